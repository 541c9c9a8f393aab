//! Static safety check for model-authored code.
//!
//! This is a heuristic speed bump, not a sandbox: it scans string literals
//! for path traversal and out-of-workspace absolute paths, and (in strict
//! mode) rejects imports of process/registry/FFI-capable modules. It offers
//! no protection against dynamically constructed paths or imports.

use crate::error::{CoworkError, Result};
use std::path::{Path, PathBuf};

/// Modules that require the override to import (strict mode only).
pub const RESTRICTED_MODULES: [&str; 3] = ["subprocess", "winreg", "ctypes"];

#[derive(Debug, Clone)]
pub struct SecurityPolicy {
    /// Override flag: disables all static checks.
    pub god_mode: bool,
    pub allowed_root: PathBuf,
}

impl SecurityPolicy {
    pub fn new(allowed_root: impl Into<PathBuf>, god_mode: bool) -> Self {
        SecurityPolicy {
            god_mode,
            allowed_root: allowed_root.into(),
        }
    }
}

/// Check string literals only: traversal sequences and absolute paths
/// outside the allowed root.
pub fn validate_code_safety(code: &str, policy: &SecurityPolicy) -> Result<()> {
    if policy.god_mode {
        return Ok(());
    }
    let scanned = scan_source(code)?;
    check_literals(&scanned.literals, &policy.allowed_root)
}

/// Strict variant used by the code executor: literal checks plus a deny
/// list of restricted module imports.
pub fn validate_code_strict(code: &str, policy: &SecurityPolicy) -> Result<()> {
    if policy.god_mode {
        return Ok(());
    }
    let scanned = scan_source(code)?;
    check_imports(&scanned.stripped)?;
    check_literals(&scanned.literals, &policy.allowed_root)
}

fn check_literals(literals: &[String], allowed_root: &Path) -> Result<()> {
    let root_key = normalize_path(&allowed_root.to_string_lossy());
    for lit in literals {
        if lit.contains("..") {
            return Err(CoworkError::SecurityError(format!(
                "Path traversal '..' detected in string: '{}'",
                lit
            )));
        }
        if looks_absolute(lit) {
            let lit_key = normalize_path(lit);
            if !lit_key.starts_with(&root_key) {
                return Err(CoworkError::SecurityError(format!(
                    "Unauthorized absolute path access: '{}'",
                    lit
                )));
            }
        }
    }
    Ok(())
}

fn check_imports(stripped: &str) -> Result<()> {
    for line in stripped.lines() {
        let line = line.trim_start();
        let modules: Vec<&str> = if let Some(rest) = line.strip_prefix("import ") {
            rest.split(',').map(|m| m.trim()).collect()
        } else if let Some(rest) = line.strip_prefix("from ") {
            rest.split_whitespace().take(1).collect()
        } else {
            continue;
        };
        for module in modules {
            // "a.b as c" -> "a"
            let top = module
                .split_whitespace()
                .next()
                .unwrap_or("")
                .split('.')
                .next()
                .unwrap_or("");
            if RESTRICTED_MODULES.contains(&top) {
                return Err(CoworkError::SecurityError(format!(
                    "Import of restricted module '{}' is not allowed in Standard Mode. \
                     Enable the security override to use it.",
                    top
                )));
            }
        }
    }
    Ok(())
}

fn looks_absolute(s: &str) -> bool {
    if s.starts_with('/') || s.starts_with("\\\\") {
        return true;
    }
    // Windows drive letter, e.g. C:\ or C:/
    let bytes = s.as_bytes();
    bytes.len() >= 3
        && bytes[0].is_ascii_alphabetic()
        && bytes[1] == b':'
        && (bytes[2] == b'\\' || bytes[2] == b'/')
}

fn normalize_path(s: &str) -> String {
    s.replace('\\', "/").to_lowercase()
}

struct ScannedSource {
    /// Every string literal found in the source.
    literals: Vec<String>,
    /// Source with comments removed and literal contents blanked, for
    /// line-oriented checks.
    stripped: String,
}

/// Lexical scan of Python source. Fails closed: an unterminated string
/// literal is treated as a parse error.
fn scan_source(code: &str) -> Result<ScannedSource> {
    let chars: Vec<char> = code.chars().collect();
    let mut literals = Vec::new();
    let mut stripped = String::with_capacity(code.len());
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];

        if c == '#' {
            while i < chars.len() && chars[i] != '\n' {
                i += 1;
            }
            continue;
        }

        if c == '\'' || c == '"' {
            let quote = c;
            let triple = i + 2 < chars.len() && chars[i + 1] == quote && chars[i + 2] == quote;
            let open_len = if triple { 3 } else { 1 };
            let mut j = i + open_len;
            let mut value = String::new();
            let mut closed = false;

            while j < chars.len() {
                if chars[j] == '\\' && j + 1 < chars.len() {
                    value.push(chars[j]);
                    value.push(chars[j + 1]);
                    j += 2;
                    continue;
                }
                if triple {
                    if chars[j] == quote
                        && chars.get(j + 1) == Some(&quote)
                        && chars.get(j + 2) == Some(&quote)
                    {
                        closed = true;
                        j += 3;
                        break;
                    }
                } else {
                    if chars[j] == quote {
                        closed = true;
                        j += 1;
                        break;
                    }
                    if chars[j] == '\n' {
                        break;
                    }
                }
                value.push(chars[j]);
                j += 1;
            }

            if !closed {
                return Err(CoworkError::SecurityError(
                    "Syntax Error: unterminated string literal".to_string(),
                ));
            }

            literals.push(value);
            stripped.push(quote);
            stripped.push(quote);
            i = j;
            continue;
        }

        stripped.push(c);
        i += 1;
    }

    Ok(ScannedSource { literals, stripped })
}
