//! SKILL.md manifest parsing and write-back.
//!
//! Manifests are `---` delimited front-matter (`key: value` lines, inline
//! `[a, b]` lists) followed by a free-text body that becomes model-facing
//! guidance.

use crate::error::{CoworkError, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SkillManifest {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description_cn: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub license: Option<String>,
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub skill_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_by: Option<String>,
    #[serde(
        default,
        rename = "allowed-tools",
        deserialize_with = "de_string_or_list",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub allowed_tools: Vec<String>,
    #[serde(
        default,
        deserialize_with = "de_string_or_list",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub dependencies: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub security_level: Option<String>,
    /// Learned lessons, append-only.
    #[serde(
        default,
        deserialize_with = "de_string_or_list",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub experience: Vec<String>,

    /// Free-text guidance below the front-matter; not a front-matter key.
    #[serde(skip)]
    pub body: String,
}

/// Accept both `key: a` and `key: [a, b]`.
fn de_string_or_list<'de, D>(deserializer: D) -> std::result::Result<Vec<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum StringOrList {
        One(String),
        Many(Vec<String>),
    }

    Ok(match StringOrList::deserialize(deserializer)? {
        StringOrList::One(s) => s
            .split(',')
            .map(|p| p.trim().to_string())
            .filter(|p| !p.is_empty())
            .collect(),
        StringOrList::Many(v) => v,
    })
}

impl SkillManifest {
    pub fn parse(content: &str) -> Result<Self> {
        let (front, body) = split_front_matter(content).ok_or_else(|| {
            CoworkError::Other("SKILL.md is missing front-matter delimiters".to_string())
        })?;
        let mut manifest: SkillManifest = serde_yaml::from_str(front)?;
        manifest.body = body.trim().to_string();
        Ok(manifest)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Self::parse(&content)
    }

    /// Append a learned lesson and rewrite the manifest file.
    pub fn append_experience(&mut self, path: &Path, lesson: &str) -> Result<()> {
        self.experience.push(lesson.to_string());
        self.save(path)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        fs::write(path, self.render())?;
        Ok(())
    }

    pub fn render(&self) -> String {
        let front = serde_yaml::to_string(self).unwrap_or_default();
        format!("---\n{}---\n\n{}\n", front, self.body)
    }

    /// Guidance text injected into the system preamble: body plus
    /// accumulated experience.
    pub fn guidance(&self) -> String {
        let mut text = self.body.clone();
        if !self.experience.is_empty() {
            text.push_str("\n\nLessons learned:\n");
            for lesson in &self.experience {
                text.push_str(&format!("- {}\n", lesson));
            }
        }
        text
    }
}

fn split_front_matter(content: &str) -> Option<(&str, &str)> {
    let rest = content.strip_prefix("---")?;
    let rest = rest.strip_prefix('\n').or_else(|| rest.strip_prefix("\r\n"))?;
    let end = rest.find("\n---")?;
    let front = &rest[..end + 1];
    let after = &rest[end + 4..];
    let body = after.strip_prefix('\n').unwrap_or(after);
    Some((front, body))
}
