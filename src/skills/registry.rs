//! Skill discovery and tool dispatch.
//!
//! Discovery scans the skill roots in fixed precedence (user data dir >
//! executable-adjacent > bundled > dev workspace); the first root claiming
//! a skill name wins. The tool table is rebuilt wholesale on every
//! (re)load, so no partial update is ever visible mid-turn.
//!
//! `call_tool` never propagates a failure: every error becomes a text
//! result the model can read and correct.

use crate::config::{self, Config};
use crate::events::EventSender;
use crate::gate::ConfirmationGate;
use crate::skills::builtins::{builtin_tools, run_guarded, ToolHandler};
use crate::skills::manifest::SkillManifest;
use crate::skills::schema::{build_tool_definition, ParamSpec, RESERVED_PARAMS};
use crate::skills::script::{self, introspect_functions, ScriptRunner};
use jsonschema::{Draft, JSONSchema};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

/// Context bag passed to tool handlers. Values are injected into a tool's
/// arguments only when the tool declares the reserved parameter names.
pub struct ToolContext<'a> {
    pub workspace_dir: Option<&'a Path>,
    pub events: Option<&'a EventSender>,
    pub gate: Option<&'a ConfirmationGate>,
}

impl<'a> ToolContext<'a> {
    pub fn empty() -> Self {
        ToolContext {
            workspace_dir: None,
            events: None,
            gate: None,
        }
    }
}

pub enum ToolKind {
    Builtin(ToolHandler),
    Script { skill_root: PathBuf },
}

pub struct SkillTool {
    pub name: String,
    pub skill: String,
    pub definition: Value,
    pub params: Vec<ParamSpec>,
    pub kind: ToolKind,
}

#[derive(Debug, Clone)]
pub struct Skill {
    pub name: String,
    pub root: PathBuf,
    pub manifest: SkillManifest,
}

pub struct SkillRegistry {
    roots: Vec<PathBuf>,
    disabled_skills: Vec<String>,
    skills: Vec<Skill>,
    tools: HashMap<String, SkillTool>,
    /// Definition order, kept stable for the model.
    tool_order: Vec<String>,
    runner: ScriptRunner,
    /// mtime snapshot of every manifest/impl seen at load time.
    snapshot: BTreeMap<PathBuf, Option<SystemTime>>,
}

impl SkillRegistry {
    pub fn new(config: &Config) -> Self {
        Self::with_roots(default_roots(), config.disabled_skills.clone())
    }

    pub fn with_roots(roots: Vec<PathBuf>, disabled_skills: Vec<String>) -> Self {
        let mut registry = SkillRegistry {
            roots,
            disabled_skills,
            skills: Vec::new(),
            tools: HashMap::new(),
            tool_order: Vec::new(),
            runner: ScriptRunner::new(),
            snapshot: BTreeMap::new(),
        };
        registry.load();
        registry
    }

    /// Rebuild the whole tool table from builtins plus disk skills.
    pub fn load(&mut self) {
        self.skills.clear();
        self.tools.clear();
        self.tool_order.clear();
        self.snapshot.clear();

        for builtin in builtin_tools() {
            if !self.is_enabled(builtin.skill) {
                continue;
            }
            let definition =
                build_tool_definition(builtin.name, Some(builtin.doc), &builtin.params);
            self.insert_tool(SkillTool {
                name: builtin.name.to_string(),
                skill: builtin.skill.to_string(),
                definition,
                params: builtin.params,
                kind: ToolKind::Builtin(builtin.handler),
            });
        }

        for root in self.roots.clone() {
            self.load_root(&root);
        }
    }

    fn load_root(&mut self, root: &Path) {
        let entries = match fs::read_dir(root) {
            Ok(entries) => entries,
            Err(_) => return,
        };

        for entry in entries.filter_map(|e| e.ok()) {
            let skill_path = entry.path();
            if !skill_path.is_dir() {
                continue;
            }
            let skill_name = match skill_path.file_name().and_then(|n| n.to_str()) {
                Some(name) => name.to_string(),
                None => continue,
            };
            if !self.is_enabled(&skill_name) {
                continue;
            }

            // Fingerprint every candidate file, even ones that fail to
            // parse, so change detection stays in sync with this scan.
            let md_path = skill_path.join("SKILL.md");
            let impl_file = script::impl_path(&skill_path);
            self.record_mtime(&md_path);
            self.record_mtime(&impl_file);

            // Earlier roots take precedence.
            if self.skills.iter().any(|s| s.name == skill_name) {
                continue;
            }

            let manifest = match SkillManifest::load(&md_path) {
                Ok(manifest) => manifest,
                Err(e) => {
                    if md_path.exists() {
                        eprintln!("Warning: failed to parse {}: {}", md_path.display(), e);
                    }
                    continue;
                }
            };

            if let Ok(source) = fs::read_to_string(&impl_file) {
                for function in introspect_functions(&source) {
                    if self.tools.contains_key(&function.name) {
                        continue;
                    }
                    let definition = build_tool_definition(
                        &function.name,
                        function.doc.as_deref(),
                        &function.params,
                    );
                    self.insert_tool(SkillTool {
                        name: function.name.clone(),
                        skill: skill_name.clone(),
                        definition,
                        params: function.params,
                        kind: ToolKind::Script {
                            skill_root: skill_path.clone(),
                        },
                    });
                }
            }

            self.skills.push(Skill {
                name: skill_name,
                root: skill_path,
                manifest,
            });
        }
    }

    fn insert_tool(&mut self, tool: SkillTool) {
        self.tool_order.push(tool.name.clone());
        self.tools.insert(tool.name.clone(), tool);
    }

    fn record_mtime(&mut self, path: &Path) {
        let mtime = fs::metadata(path).and_then(|m| m.modified()).ok();
        self.snapshot.insert(path.to_path_buf(), mtime);
    }

    fn is_enabled(&self, skill_name: &str) -> bool {
        !self.disabled_skills.iter().any(|s| s == skill_name)
    }

    /// True if any manifest or impl changed (or appeared/disappeared) since
    /// the last load. Checked at turn boundaries only.
    pub fn changed_on_disk(&self) -> bool {
        let mut current = BTreeMap::new();
        for root in &self.roots {
            if let Ok(entries) = fs::read_dir(root) {
                for entry in entries.filter_map(|e| e.ok()) {
                    let dir = entry.path();
                    if !dir.is_dir() {
                        continue;
                    }
                    let enabled = dir
                        .file_name()
                        .and_then(|n| n.to_str())
                        .is_some_and(|name| self.is_enabled(name));
                    if !enabled {
                        continue;
                    }
                    for file in [dir.join("SKILL.md"), script::impl_path(&dir)] {
                        let mtime = fs::metadata(&file).and_then(|m| m.modified()).ok();
                        current.insert(file, mtime);
                    }
                }
            }
        }
        current != self.snapshot
    }

    pub fn reload(&mut self) {
        self.load();
    }

    pub fn tool_definitions(&self) -> Vec<Value> {
        self.tool_order
            .iter()
            .filter_map(|name| self.tools.get(name))
            .map(|tool| tool.definition.clone())
            .collect()
    }

    pub fn skills(&self) -> &[Skill] {
        &self.skills
    }

    pub fn get_tool(&self, name: &str) -> Option<&SkillTool> {
        self.tools.get(name)
    }

    pub fn skill_of_tool(&self, name: &str) -> Option<&str> {
        self.tools.get(name).map(|t| t.skill.as_str())
    }

    /// Guidance injected into the system preamble: every enabled skill's
    /// manifest body plus accumulated experience.
    pub fn system_guidance(&self) -> String {
        self.skills
            .iter()
            .map(|s| s.manifest.guidance())
            .filter(|g| !g.is_empty())
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    /// Append a lesson to a skill's manifest on disk. The in-memory table
    /// picks it up at the next turn-boundary reload.
    pub fn append_experience(&self, skill_name: &str, lesson: &str) -> Result<(), String> {
        let skill = self
            .skills
            .iter()
            .find(|s| s.name == skill_name)
            .ok_or_else(|| format!("Skill '{}' not found", skill_name))?;
        let md_path = skill.root.join("SKILL.md");
        let mut manifest =
            SkillManifest::load(&md_path).map_err(|e| format!("Failed to reload manifest: {}", e))?;
        manifest
            .append_experience(&md_path, lesson)
            .map_err(|e| format!("Failed to save manifest: {}", e))
    }

    /// Execute a tool. Never fails: unknown names, bad arguments, handler
    /// errors and panics all come back as text for the model to read.
    pub async fn call_tool(&self, name: &str, args: &Value, ctx: &ToolContext<'_>) -> String {
        let tool = match self.tools.get(name) {
            Some(tool) => tool,
            None => return format!("Error: Tool '{}' not found.", name),
        };

        if let Err(e) = self.validate_arguments(tool, args) {
            return format!("Error: invalid arguments for '{}': {}", name, e);
        }

        let args = inject_reserved(tool, args, ctx);

        let result = match &tool.kind {
            ToolKind::Builtin(handler) => run_guarded(handler(&args, ctx, self)).await,
            ToolKind::Script { skill_root } => {
                self.runner.call(skill_root, &tool.name, &args).await
            }
        };

        match result {
            Ok(output) => output,
            Err(e) => format!("Error executing {}: {}", name, e),
        }
    }

    fn validate_arguments(&self, tool: &SkillTool, args: &Value) -> Result<(), String> {
        let schema_value = tool
            .definition
            .pointer("/function/parameters")
            .cloned()
            .ok_or_else(|| "tool has no parameter schema".to_string())?;
        let schema = JSONSchema::options()
            .with_draft(Draft::Draft7)
            .compile(&schema_value)
            .map_err(|e| format!("invalid tool schema: {}", e))?;
        if let Err(errors) = schema.validate(args) {
            let messages: Vec<String> = errors.map(|e| e.to_string()).collect();
            return Err(messages.join("; "));
        }
        Ok(())
    }
}

/// Inject reserved values into the argument object, but only for the
/// parameters the tool actually declares.
fn inject_reserved(tool: &SkillTool, args: &Value, ctx: &ToolContext<'_>) -> Value {
    let mut map = match args {
        Value::Object(map) => map.clone(),
        _ => serde_json::Map::new(),
    };

    for reserved in RESERVED_PARAMS {
        if !tool.params.iter().any(|p| p.name == reserved) {
            continue;
        }
        match reserved {
            "workspace_dir" => {
                if let Some(dir) = ctx.workspace_dir {
                    map.insert(
                        reserved.to_string(),
                        Value::String(dir.to_string_lossy().to_string()),
                    );
                }
            }
            // Script functions declaring `_context` get an explicit null so
            // the call never fails on a missing argument; builtin handlers
            // receive the native context bag instead.
            "_context" => {
                map.entry(reserved.to_string()).or_insert(Value::Null);
            }
            _ => {}
        }
    }

    Value::Object(map)
}

/// Skill roots in precedence order.
pub fn default_roots() -> Vec<PathBuf> {
    let mut roots = vec![config::app_data_dir().join("skills")];
    if let Some(exe_dir) = config::exe_dir() {
        roots.push(exe_dir.join("skills"));
        roots.push(exe_dir.join("_internal").join("skills"));
    }
    roots.push(PathBuf::from("skills"));
    roots
}
