use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::PathBuf;

pub const APP_NAME: &str = "cowork";

/// Which backend streaming protocol to speak.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    OpenAi,
    Anthropic,
}

impl Default for ProviderKind {
    fn default() -> Self {
        ProviderKind::OpenAi
    }
}

/// Persisted settings, stored as `config.json` in the app data directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default)]
    pub provider: ProviderKind,
    #[serde(default)]
    pub workspace_dir: Option<PathBuf>,
    /// Process-wide override disabling all static safety checks.
    #[serde(default)]
    pub god_mode: bool,
    #[serde(default)]
    pub disabled_skills: Vec<String>,
    #[serde(default = "default_stream_timeout")]
    pub stream_timeout: u64,
    #[serde(default = "default_max_output_tokens")]
    pub max_output_tokens: u32,
    #[serde(default)]
    pub verbose: bool,
}

fn default_base_url() -> String {
    "https://api.deepseek.com".to_string()
}

fn default_model() -> String {
    "deepseek-reasoner".to_string()
}

fn default_stream_timeout() -> u64 {
    120
}

fn default_max_output_tokens() -> u32 {
    8192
}

impl Default for Config {
    fn default() -> Self {
        Config {
            api_key: String::new(),
            base_url: default_base_url(),
            model: default_model(),
            provider: ProviderKind::default(),
            workspace_dir: None,
            god_mode: false,
            disabled_skills: vec![],
            stream_timeout: default_stream_timeout(),
            max_output_tokens: default_max_output_tokens(),
            verbose: false,
        }
    }
}

impl Config {
    /// Load from the config file, then apply environment overrides.
    pub fn load() -> Result<Self> {
        let mut config = Self::load_file(&config_path()).unwrap_or_default();

        if let Ok(key) = env::var("COWORK_API_KEY") {
            config.api_key = key;
        }
        if let Ok(url) = env::var("COWORK_BASE_URL") {
            config.base_url = url;
        }
        if let Ok(model) = env::var("COWORK_MODEL") {
            config.model = model;
        }
        if let Ok(provider) = env::var("COWORK_PROVIDER") {
            match provider.to_lowercase().as_str() {
                "openai" => config.provider = ProviderKind::OpenAi,
                "anthropic" => config.provider = ProviderKind::Anthropic,
                _ => {}
            }
        }
        if let Ok(v) = env::var("COWORK_VERBOSE") {
            config.verbose = matches!(v.to_lowercase().as_str(), "true" | "1" | "yes");
        }
        if let Ok(v) = env::var("COWORK_STREAM_TIMEOUT") {
            if let Ok(secs) = v.parse::<u64>() {
                config.stream_timeout = secs;
            }
        }

        Ok(config)
    }

    fn load_file(path: &PathBuf) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config = serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        let path = config_path();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        fs::write(&path, contents)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;
        Ok(())
    }

    pub fn is_skill_enabled(&self, skill_name: &str) -> bool {
        !self.disabled_skills.iter().any(|s| s == skill_name)
    }

    pub fn set_skill_enabled(&mut self, skill_name: &str, enabled: bool) {
        if enabled {
            self.disabled_skills.retain(|s| s != skill_name);
        } else if self.is_skill_enabled(skill_name) {
            self.disabled_skills.push(skill_name.to_string());
        }
    }

    pub fn current_date() -> String {
        chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string()
    }
}

/// App data directory. A portable `user_data` folder next to the executable
/// wins over the platform data dir.
pub fn app_data_dir() -> PathBuf {
    if let Some(exe_dir) = exe_dir() {
        let portable = exe_dir.join("user_data");
        if portable.exists() {
            return portable;
        }
    }
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_NAME)
}

pub fn exe_dir() -> Option<PathBuf> {
    env::current_exe()
        .ok()
        .and_then(|p| p.parent().map(|d| d.to_path_buf()))
}

fn config_path() -> PathBuf {
    app_data_dir().join("config.json")
}
