use cowork::error::CoworkError;
use cowork::security::{validate_code_safety, validate_code_strict, SecurityPolicy};

fn policy() -> SecurityPolicy {
    SecurityPolicy::new("/tmp/workspace", false)
}

fn override_policy() -> SecurityPolicy {
    SecurityPolicy::new("/tmp/workspace", true)
}

#[test]
fn plain_code_with_relative_paths_passes() {
    let code = "with open('data/report.txt') as f:\n    print(f.read())\n";
    assert!(validate_code_safety(code, &policy()).is_ok());
    assert!(validate_code_strict(code, &policy()).is_ok());
}

#[test]
fn traversal_in_any_literal_is_rejected() {
    for code in [
        "open('../secrets.txt')",
        "p = \"foo/../../etc/passwd\"",
        "x = '''..'''",
    ] {
        let err = validate_code_safety(code, &policy()).unwrap_err();
        assert!(matches!(err, CoworkError::SecurityError(_)), "{}", code);
    }
}

#[test]
fn absolute_path_outside_workspace_is_rejected() {
    let code = "open('/etc/passwd')";
    assert!(validate_code_safety(code, &policy()).is_err());
}

#[test]
fn absolute_path_inside_workspace_passes() {
    let code = "open('/tmp/workspace/output.csv', 'w')";
    assert!(validate_code_safety(code, &policy()).is_ok());
}

#[test]
fn windows_style_absolute_path_is_rejected() {
    let code = r#"open("C:\\Windows\\system.ini")"#;
    assert!(validate_code_safety(code, &policy()).is_err());
}

#[test]
fn workspace_prefix_comparison_is_case_insensitive() {
    let code = "open('/TMP/Workspace/data.txt')";
    assert!(validate_code_safety(code, &policy()).is_ok());
}

#[test]
fn override_accepts_everything() {
    let code = "import subprocess\nopen('/etc/shadow')\nopen('../x')";
    assert!(validate_code_safety(code, &override_policy()).is_ok());
    assert!(validate_code_strict(code, &override_policy()).is_ok());
}

#[test]
fn restricted_imports_rejected_in_strict_mode_only() {
    for code in [
        "import subprocess",
        "import subprocess as sp",
        "from subprocess import run",
        "import os, subprocess",
        "from ctypes import CDLL",
        "import winreg",
    ] {
        assert!(validate_code_strict(code, &policy()).is_err(), "{}", code);
        assert!(validate_code_safety(code, &policy()).is_ok(), "{}", code);
    }
}

#[test]
fn submodule_import_of_restricted_module_is_rejected() {
    assert!(validate_code_strict("import ctypes.util", &policy()).is_err());
}

#[test]
fn harmless_imports_pass_strict_mode() {
    let code = "import os\nimport json\nfrom pathlib import Path\n";
    assert!(validate_code_strict(code, &policy()).is_ok());
}

#[test]
fn mentions_inside_strings_and_comments_do_not_count_as_imports() {
    let code = "# import subprocess\nmsg = 'you could import subprocess here'\n";
    assert!(validate_code_strict(code, &policy()).is_ok());
}

#[test]
fn traversal_inside_comment_is_ignored() {
    let code = "# see ../docs for details\nprint('ok')\n";
    assert!(validate_code_safety(code, &policy()).is_ok());
}

#[test]
fn unterminated_string_fails_closed() {
    let code = "x = 'unclosed";
    let err = validate_code_safety(code, &policy()).unwrap_err();
    match err {
        CoworkError::SecurityError(msg) => assert!(msg.contains("unterminated")),
        other => panic!("expected security error, got {:?}", other),
    }
    assert!(validate_code_strict(code, &policy()).is_err());
}

#[test]
fn escaped_quotes_do_not_end_literals() {
    let code = r#"s = "a \" quote inside""#;
    assert!(validate_code_safety(code, &policy()).is_ok());
}

#[test]
fn triple_quoted_literal_is_scanned() {
    let code = "doc = \"\"\"/etc/passwd\"\"\"\n";
    assert!(validate_code_safety(code, &policy()).is_err());
}
