//! Script-backed skill implementations.
//!
//! A skill directory may ship an `impl.py`; its public top-level functions
//! become tools. Signatures are introspected textually to synthesize
//! schemas, and calls run out of process through a small Python driver.
//! A missing third-party module triggers one install-and-retry pass.

use crate::skills::schema::ParamSpec;
use regex::Regex;
use serde_json::Value;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Mutex;
use tokio::process::Command;

const CALL_TIMEOUT_SECS: u64 = 300;

const DRIVER: &str = r#"
import json, sys
sys.path.insert(0, sys.argv[1])
import impl
fn = getattr(impl, sys.argv[2])
args = json.loads(sys.argv[3])
result = fn(**args)
if result is not None:
    print(result)
"#;

/// One introspected `def` from an impl file.
#[derive(Debug, Clone)]
pub struct ScriptFunction {
    pub name: String,
    pub doc: Option<String>,
    pub params: Vec<ParamSpec>,
}

/// Extract public top-level function signatures and docstring first lines.
pub fn introspect_functions(source: &str) -> Vec<ScriptFunction> {
    let def_re = Regex::new(r"(?ms)^def\s+([A-Za-z_]\w*)\s*\((.*?)\)\s*(?:->[^:\n]*)?:").unwrap();
    let mut functions = Vec::new();

    for caps in def_re.captures_iter(source) {
        let name = caps[1].to_string();
        if name.starts_with('_') {
            continue;
        }
        let params = parse_params(&caps[2]);
        let body_start = caps.get(0).unwrap().end();
        let doc = extract_docstring(&source[body_start..]);
        functions.push(ScriptFunction { name, doc, params });
    }

    functions
}

fn parse_params(raw: &str) -> Vec<ParamSpec> {
    split_top_level(raw)
        .into_iter()
        .filter_map(|part| {
            let part = part.trim();
            if part.is_empty() || part.starts_with('*') {
                return None;
            }
            // "name: annotation = default" -> name, default
            let (head, default) = match split_once_top_level(part, '=') {
                Some((h, d)) => (h, Some(d.trim().to_string())),
                None => (part, None),
            };
            let name = head.split(':').next().unwrap_or("").trim().to_string();
            if name.is_empty() {
                return None;
            }
            Some(ParamSpec {
                name,
                default: default.map(|d| parse_default(&d)),
                description: None,
            })
        })
        .collect()
}

/// Best-effort literal parse of a Python default expression.
fn parse_default(text: &str) -> Value {
    match text {
        "True" => return Value::Bool(true),
        "False" => return Value::Bool(false),
        "None" => return Value::Null,
        _ => {}
    }
    if let Ok(n) = text.parse::<i64>() {
        return Value::Number(n.into());
    }
    if text.starts_with('[') {
        return Value::Array(vec![]);
    }
    if text.len() >= 2
        && ((text.starts_with('\'') && text.ends_with('\''))
            || (text.starts_with('"') && text.ends_with('"')))
    {
        return Value::String(text[1..text.len() - 1].to_string());
    }
    Value::String(text.to_string())
}

fn split_top_level(raw: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut depth = 0i32;
    let mut current = String::new();
    for c in raw.chars() {
        match c {
            '(' | '[' | '{' => depth += 1,
            ')' | ']' | '}' => depth -= 1,
            ',' if depth == 0 => {
                parts.push(std::mem::take(&mut current));
                continue;
            }
            _ => {}
        }
        current.push(c);
    }
    if !current.trim().is_empty() {
        parts.push(current);
    }
    parts
}

fn split_once_top_level(raw: &str, sep: char) -> Option<(&str, &str)> {
    let mut depth = 0i32;
    for (i, c) in raw.char_indices() {
        match c {
            '(' | '[' | '{' => depth += 1,
            ')' | ']' | '}' => depth -= 1,
            c if c == sep && depth == 0 => return Some((&raw[..i], &raw[i + 1..])),
            _ => {}
        }
    }
    None
}

fn extract_docstring(after_signature: &str) -> Option<String> {
    let trimmed = after_signature.trim_start();
    let quote = if trimmed.starts_with("\"\"\"") {
        "\"\"\""
    } else if trimmed.starts_with("'''") {
        "'''"
    } else {
        return None;
    };
    let inner = &trimmed[3..];
    let end = inner.find(quote)?;
    let doc = inner[..end].trim();
    let first_line = doc.lines().next()?.trim();
    if first_line.is_empty() {
        None
    } else {
        Some(doc.to_string())
    }
}

/// Runs impl functions out of process, owning the install cache.
pub struct ScriptRunner {
    python: String,
    /// Packages already auto-installed this process; retried at most once.
    installed: Mutex<HashSet<String>>,
}

impl ScriptRunner {
    pub fn new() -> Self {
        ScriptRunner {
            python: std::env::var("COWORK_PYTHON").unwrap_or_else(|_| "python3".to_string()),
            installed: Mutex::new(HashSet::new()),
        }
    }

    pub async fn call(
        &self,
        skill_root: &Path,
        function: &str,
        args: &Value,
    ) -> Result<String, String> {
        let first = self.invoke(skill_root, function, args).await?;
        match first {
            Invocation::Ok(output) => Ok(output),
            Invocation::Failed { stderr } => {
                if let Some(package) = missing_module(&stderr) {
                    if self.mark_installed(&package) {
                        self.pip_install(&package).await?;
                        return match self.invoke(skill_root, function, args).await? {
                            Invocation::Ok(output) => Ok(output),
                            Invocation::Failed { stderr } => Err(tail(&stderr)),
                        };
                    }
                }
                Err(tail(&stderr))
            }
        }
    }

    async fn invoke(
        &self,
        skill_root: &Path,
        function: &str,
        args: &Value,
    ) -> Result<Invocation, String> {
        let args_text = serde_json::to_string(args).map_err(|e| e.to_string())?;
        let output = tokio::time::timeout(
            std::time::Duration::from_secs(CALL_TIMEOUT_SECS),
            Command::new(&self.python)
                .arg("-c")
                .arg(DRIVER)
                .arg(skill_root)
                .arg(function)
                .arg(&args_text)
                .env("PYTHONIOENCODING", "utf-8")
                .stdin(Stdio::null())
                .stdout(Stdio::piped())
                .stderr(Stdio::piped())
                .output(),
        )
        .await
        .map_err(|_| format!("Tool '{}' timed out after {}s", function, CALL_TIMEOUT_SECS))?
        .map_err(|e| format!("Failed to spawn {}: {}", self.python, e))?;

        if output.status.success() {
            let stdout = String::from_utf8_lossy(&output.stdout);
            Ok(Invocation::Ok(stdout.trim_end().to_string()))
        } else {
            Ok(Invocation::Failed {
                stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            })
        }
    }

    async fn pip_install(&self, package: &str) -> Result<(), String> {
        let status = Command::new(&self.python)
            .args(["-m", "pip", "install", package])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .map_err(|e| format!("Failed to run pip: {}", e))?;
        if status.success() {
            Ok(())
        } else {
            Err(format!("pip install {} failed", package))
        }
    }

    /// Returns true the first time a package is seen.
    fn mark_installed(&self, package: &str) -> bool {
        self.installed
            .lock()
            .expect("install cache lock poisoned")
            .insert(package.to_string())
    }
}

impl Default for ScriptRunner {
    fn default() -> Self {
        Self::new()
    }
}

enum Invocation {
    Ok(String),
    Failed { stderr: String },
}

/// Extract the package name from a ModuleNotFoundError in stderr.
pub fn missing_module(stderr: &str) -> Option<String> {
    let re = Regex::new(r"ModuleNotFoundError: No module named '([^']+)'").unwrap();
    re.captures(stderr)
        .map(|caps| caps[1].split('.').next().unwrap_or(&caps[1]).to_string())
}

fn tail(stderr: &str) -> String {
    let lines: Vec<&str> = stderr.lines().rev().take(5).collect();
    lines.into_iter().rev().collect::<Vec<_>>().join("\n")
}

pub fn impl_path(skill_root: &Path) -> PathBuf {
    skill_root.join("impl.py")
}
