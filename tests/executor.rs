use cowork::agent::ControlFlags;
use cowork::error::CoworkError;
use cowork::events::event_channel;
use cowork::executor::{extract_python_block, CodeExecutor};
use cowork::gate::ConfirmationGate;
use cowork::security::SecurityPolicy;
use tempfile::TempDir;

#[test]
fn extracts_the_first_fenced_python_block() {
    let text = "Here you go:\n\n```python\nprint('hi')\n```\n\nand another:\n```python\nprint('bye')\n```";
    assert_eq!(extract_python_block(text).unwrap(), "print('hi')\n");
}

#[test]
fn accepts_the_short_fence_tag() {
    let text = "```py\nx = 1\nprint(x)\n```";
    assert_eq!(extract_python_block(text).unwrap(), "x = 1\nprint(x)\n");
}

#[test]
fn plain_text_and_other_languages_yield_nothing() {
    assert!(extract_python_block("no code here").is_none());
    assert!(extract_python_block("```bash\nls\n```").is_none());
}

#[tokio::test]
async fn stderr_heavy_child_still_completes() {
    let workspace = TempDir::new().unwrap();
    let policy = SecurityPolicy::new(workspace.path(), false);
    let executor = CodeExecutor::new(policy, workspace.path());
    let gate = ConfirmationGate::new();
    let flags = ControlFlags::new();
    let (events, _rx) = event_channel();

    // Well past the pipe buffer on stderr before stdout closes.
    let code = "import sys\nfor i in range(20000):\n    sys.stderr.write('x' * 40 + '\\n')\nprint('done')\n";
    let report = tokio::time::timeout(
        std::time::Duration::from_secs(60),
        executor.run(code, &events, &gate, &flags),
    )
    .await
    .expect("run must not stall on a full stderr pipe")
    .unwrap();

    assert_eq!(report.exit_code, Some(0));
    assert!(report.stdout.contains("done"));
    assert!(!report.stderr.is_empty());
}

#[tokio::test]
async fn restricted_code_is_rejected_before_launch() {
    let workspace = TempDir::new().unwrap();
    let policy = SecurityPolicy::new(workspace.path(), false);
    let executor = CodeExecutor::new(policy, workspace.path());
    let gate = ConfirmationGate::new();
    let flags = ControlFlags::new();
    let (events, _rx) = event_channel();

    let result = executor
        .run("import subprocess\nsubprocess.run(['ls'])", &events, &gate, &flags)
        .await;
    match result {
        Err(CoworkError::SecurityError(msg)) => assert!(msg.contains("subprocess")),
        other => panic!("expected a security rejection, got {:?}", other),
    }
}

#[tokio::test]
async fn out_of_workspace_paths_are_rejected_before_launch() {
    let workspace = TempDir::new().unwrap();
    let policy = SecurityPolicy::new(workspace.path(), false);
    let executor = CodeExecutor::new(policy, workspace.path());
    let gate = ConfirmationGate::new();
    let flags = ControlFlags::new();
    let (events, _rx) = event_channel();

    let result = executor
        .run("open('/etc/passwd').read()", &events, &gate, &flags)
        .await;
    assert!(matches!(result, Err(CoworkError::SecurityError(_))));
}
