pub mod builtins;
pub mod manifest;
pub mod registry;
pub mod schema;
pub mod script;

pub use manifest::SkillManifest;
pub use registry::{Skill, SkillRegistry, ToolContext};
pub use schema::{build_tool_definition, synthesize_parameters, ParamSpec};
