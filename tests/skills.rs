use cowork::events::{event_channel, AgentEvent};
use cowork::gate::{ConfirmationGate, Decision};
use cowork::skills::manifest::SkillManifest;
use cowork::skills::registry::{SkillRegistry, ToolContext};
use cowork::skills::schema::{build_tool_definition, synthesize_parameters, ParamSpec};
use cowork::skills::script::introspect_functions;
use serde_json::{json, Value};
use std::fs;
use tempfile::TempDir;

// --- schema synthesis ---

#[test]
fn required_and_optional_parameters() {
    let params = vec![
        ParamSpec::required("name"),
        ParamSpec::optional("excited", Value::Bool(false)),
    ];
    let schema = synthesize_parameters(&params);
    assert_eq!(schema["properties"]["name"]["type"], "string");
    assert_eq!(schema["properties"]["excited"]["type"], "boolean");
    assert_eq!(schema["required"], json!(["name"]));
}

#[test]
fn name_heuristics_override_string_default() {
    let params = vec![
        ParamSpec::required("tasks"),
        ParamSpec::required("limit"),
        ParamSpec::required("recursive"),
    ];
    let schema = synthesize_parameters(&params);
    assert_eq!(schema["properties"]["tasks"]["type"], "array");
    assert_eq!(schema["properties"]["tasks"]["items"]["type"], "string");
    assert_eq!(schema["properties"]["tasks"]["description"], "List of tasks");
    assert_eq!(schema["properties"]["limit"]["type"], "integer");
    assert_eq!(schema["properties"]["recursive"]["type"], "boolean");
}

#[test]
fn reserved_parameters_never_reach_the_schema() {
    let params = vec![
        ParamSpec::required("path"),
        ParamSpec::required("workspace_dir"),
        ParamSpec::optional("_context", Value::Null),
    ];
    let schema = synthesize_parameters(&params);
    assert!(schema["properties"]["workspace_dir"].is_null());
    assert!(schema["properties"]["_context"].is_null());
    assert_eq!(schema["required"], json!(["path"]));
}

#[test]
fn tool_definition_uses_first_doc_line() {
    let def = build_tool_definition(
        "greet",
        Some("Say hello.\n\nLonger explanation here."),
        &[ParamSpec::required("name")],
    );
    assert_eq!(def["type"], "function");
    assert_eq!(def["function"]["name"], "greet");
    assert_eq!(def["function"]["description"], "Say hello.");
}

#[test]
fn tool_definition_falls_back_when_undocumented() {
    let def = build_tool_definition("mystery", None, &[]);
    assert_eq!(def["function"]["description"], "Tool mystery");
}

// --- introspection ---

const IMPL_SOURCE: &str = r#"
import os

def _helper(x):
    return x

def greet(name, excited=False):
    """Say hello to someone.

    More detail that should not end up in the description.
    """
    suffix = "!" if excited else "."
    return f"Hello, {name}{suffix}"

def count_files(path=".", limit=100, *args, **kwargs):
    '''Count files under a path.'''
    return len(os.listdir(path))[:limit]
"#;

#[test]
fn introspection_finds_public_functions_only() {
    let functions = introspect_functions(IMPL_SOURCE);
    let names: Vec<&str> = functions.iter().map(|f| f.name.as_str()).collect();
    assert_eq!(names, vec!["greet", "count_files"]);
}

#[test]
fn introspection_extracts_defaults_and_docstrings() {
    let functions = introspect_functions(IMPL_SOURCE);
    let greet = &functions[0];
    assert!(greet.doc.as_deref().unwrap().starts_with("Say hello to someone."));
    assert_eq!(greet.params[0].name, "name");
    assert_eq!(greet.params[0].default, None);
    assert_eq!(greet.params[1].default, Some(Value::Bool(false)));

    let count = &functions[1];
    assert_eq!(count.params.len(), 2); // *args / **kwargs skipped
    assert_eq!(count.params[0].default, Some(Value::String(".".into())));
    assert_eq!(count.params[1].default, Some(Value::Number(100.into())));
}

#[test]
fn introspection_handles_annotations_and_multiline_signatures() {
    let source = "def fetch(\n    url: str,\n    retries: int = 3,\n) -> str:\n    return url\n";
    let functions = introspect_functions(source);
    assert_eq!(functions.len(), 1);
    assert_eq!(functions[0].params[0].name, "url");
    assert_eq!(functions[0].params[1].name, "retries");
    assert_eq!(functions[0].params[1].default, Some(Value::Number(3.into())));
}

// --- manifests ---

const MANIFEST: &str = "---\nname: file-ops\ndescription: File utilities\ntype: script\nallowed-tools: read, write\ndependencies: [requests]\n---\n\nUse relative paths inside the workspace.\n";

#[test]
fn manifest_parses_front_matter_and_body() {
    let manifest = SkillManifest::parse(MANIFEST).unwrap();
    assert_eq!(manifest.name, "file-ops");
    assert_eq!(manifest.skill_type.as_deref(), Some("script"));
    assert_eq!(manifest.allowed_tools, vec!["read", "write"]);
    assert_eq!(manifest.dependencies, vec!["requests"]);
    assert_eq!(manifest.body, "Use relative paths inside the workspace.");
}

#[test]
fn manifest_without_front_matter_is_an_error() {
    assert!(SkillManifest::parse("just a plain file").is_err());
}

#[test]
fn experience_appends_and_survives_a_round_trip() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("SKILL.md");
    fs::write(&path, MANIFEST).unwrap();

    let mut manifest = SkillManifest::load(&path).unwrap();
    manifest
        .append_experience(&path, "Always check the file exists first")
        .unwrap();

    let reloaded = SkillManifest::load(&path).unwrap();
    assert_eq!(
        reloaded.experience,
        vec!["Always check the file exists first"]
    );
    assert_eq!(reloaded.body, manifest.body);
    assert!(reloaded.guidance().contains("Lessons learned:"));
}

// --- registry ---

fn write_skill(root: &std::path::Path, name: &str) {
    let skill = root.join(name);
    fs::create_dir_all(&skill).unwrap();
    fs::write(
        skill.join("SKILL.md"),
        format!("---\nname: {}\ndescription: test skill\n---\n\nBody guidance.\n", name),
    )
    .unwrap();
    fs::write(
        skill.join("impl.py"),
        "def greet(name, excited=False):\n    \"\"\"Say hello.\"\"\"\n    return name\n",
    )
    .unwrap();
}

#[test]
fn registry_discovers_script_tools() {
    let dir = TempDir::new().unwrap();
    write_skill(dir.path(), "greeter");

    let registry = SkillRegistry::with_roots(vec![dir.path().to_path_buf()], vec![]);
    assert!(registry.get_tool("greet").is_some());
    assert_eq!(registry.skill_of_tool("greet"), Some("greeter"));

    let defs = registry.tool_definitions();
    let greet = defs
        .iter()
        .find(|d| d["function"]["name"] == "greet")
        .unwrap();
    assert_eq!(greet["function"]["parameters"]["required"], json!(["name"]));
    assert!(registry.system_guidance().contains("Body guidance."));
}

#[test]
fn disabled_skills_are_skipped() {
    let dir = TempDir::new().unwrap();
    write_skill(dir.path(), "greeter");

    let registry =
        SkillRegistry::with_roots(vec![dir.path().to_path_buf()], vec!["greeter".to_string()]);
    assert!(registry.get_tool("greet").is_none());
}

#[test]
fn earlier_roots_take_precedence() {
    let first = TempDir::new().unwrap();
    let second = TempDir::new().unwrap();
    write_skill(first.path(), "greeter");
    write_skill(second.path(), "greeter");

    let registry = SkillRegistry::with_roots(
        vec![first.path().to_path_buf(), second.path().to_path_buf()],
        vec![],
    );
    let skills = registry.skills();
    assert_eq!(skills.len(), 1);
    assert!(skills[0].root.starts_with(first.path()));
}

#[test]
fn new_skill_on_disk_is_detected_at_turn_boundary() {
    let dir = TempDir::new().unwrap();
    write_skill(dir.path(), "greeter");

    let mut registry = SkillRegistry::with_roots(vec![dir.path().to_path_buf()], vec![]);
    assert!(!registry.changed_on_disk());

    write_skill(dir.path(), "counter");
    assert!(registry.changed_on_disk());

    registry.reload();
    assert!(!registry.changed_on_disk());
    assert_eq!(registry.skills().len(), 2);
}

#[tokio::test]
async fn unknown_tool_returns_text_not_an_error() {
    let registry = SkillRegistry::with_roots(vec![], vec![]);
    let result = registry
        .call_tool("no_such_tool", &json!({}), &ToolContext::empty())
        .await;
    assert_eq!(result, "Error: Tool 'no_such_tool' not found.");
}

#[tokio::test]
async fn invalid_arguments_come_back_as_text() {
    let registry = SkillRegistry::with_roots(vec![], vec![]);
    let result = registry
        .call_tool("ask_user_confirmation", &json!({"message": 42}), &ToolContext::empty())
        .await;
    assert!(result.starts_with("Error: invalid arguments for 'ask_user_confirmation'"));
}

#[tokio::test]
async fn update_experience_writes_through_to_disk() {
    let dir = TempDir::new().unwrap();
    write_skill(dir.path(), "greeter");

    let registry = SkillRegistry::with_roots(vec![dir.path().to_path_buf()], vec![]);
    let result = registry
        .call_tool(
            "update_experience",
            &json!({"skill_name": "greeter", "experience": "Prefer short greetings"}),
            &ToolContext::empty(),
        )
        .await;
    assert_eq!(result, "Recorded lesson for skill 'greeter'.");

    let manifest = SkillManifest::load(&dir.path().join("greeter/SKILL.md")).unwrap();
    assert_eq!(manifest.experience, vec!["Prefer short greetings"]);
}

#[tokio::test]
async fn declared_context_parameter_is_injected_for_script_tools() {
    let dir = TempDir::new().unwrap();
    let skill = dir.path().join("describer");
    fs::create_dir_all(&skill).unwrap();
    fs::write(
        skill.join("SKILL.md"),
        "---\nname: describer\ndescription: test skill\n---\n\nBody.\n",
    )
    .unwrap();
    fs::write(
        skill.join("impl.py"),
        "def describe(task, _context):\n    \"\"\"Describe a task.\"\"\"\n    return f\"{task}:{_context}\"\n",
    )
    .unwrap();

    let registry = SkillRegistry::with_roots(vec![dir.path().to_path_buf()], vec![]);
    let tool = registry.get_tool("describe").unwrap();
    // Reserved name stays out of the model-facing schema entirely.
    assert_eq!(
        tool.definition["function"]["parameters"]["required"],
        json!(["task"])
    );

    let result = registry
        .call_tool("describe", &json!({"task": "clean"}), &ToolContext::empty())
        .await;
    assert_eq!(result, "clean:None");
}

// --- confirmation gate ---

#[test]
fn gate_allows_one_outstanding_request() {
    let gate = ConfirmationGate::new();
    let _rx = gate.request().unwrap();
    assert!(gate.is_pending());
    assert!(gate.request().is_err());
}

#[test]
fn responding_without_a_request_is_a_noop() {
    let gate = ConfirmationGate::new();
    assert!(!gate.respond(Decision::Approved));
}

#[tokio::test]
async fn confirmation_tool_blocks_until_answered() {
    let registry = SkillRegistry::with_roots(vec![], vec![]);
    let gate = ConfirmationGate::new();
    let (events, mut rx) = event_channel();
    let ctx = ToolContext {
        workspace_dir: None,
        events: Some(&events),
        gate: Some(&gate),
    };

    let args = json!({"message": "Delete everything?"});
    let call = registry.call_tool("ask_user_confirmation", &args, &ctx);
    let answer = async {
        match rx.recv().await {
            Some(AgentEvent::ConfirmationRequested(prompt)) => {
                assert_eq!(prompt, "Delete everything?");
                assert!(gate.respond(Decision::Approved));
            }
            other => panic!("unexpected event: {:?}", other),
        }
    };

    let (result, ()) = tokio::join!(call, answer);
    assert_eq!(result, "User confirmed: yes");
    assert!(!gate.is_pending());
}

#[tokio::test]
async fn free_text_reply_reaches_the_tool_result() {
    let registry = SkillRegistry::with_roots(vec![], vec![]);
    let gate = ConfirmationGate::new();
    let (events, mut rx) = event_channel();
    let ctx = ToolContext {
        workspace_dir: None,
        events: Some(&events),
        gate: Some(&gate),
    };

    let args = json!({"message": "Which file?"});
    let call = registry.call_tool("ask_user_confirmation", &args, &ctx);
    let answer = async {
        let _ = rx.recv().await;
        gate.respond(Decision::Reply("the second one".to_string()));
    };

    let (result, ()) = tokio::join!(call, answer);
    assert_eq!(result, "User replied: the second one");
}
