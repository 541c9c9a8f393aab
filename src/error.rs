use std::fmt;

#[derive(Debug)]
pub enum CoworkError {
    ApiError {
        status: u16,
        message: String,
    },
    SecurityError(String),
    ConfigError(String),
    ToolError(String),
    StorageError(rusqlite::Error),
    NetworkError(reqwest::Error),
    Timeout,
    GateBusy,
    IoError(std::io::Error),
    JsonError(serde_json::Error),
    YamlError(serde_yaml::Error),
    Other(String),
}

impl fmt::Display for CoworkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CoworkError::ApiError { status, message } => {
                write!(f, "API error (status {}): {}", status, message)
            }
            CoworkError::SecurityError(msg) => write!(f, "Security Alert: {}", msg),
            CoworkError::ConfigError(msg) => write!(f, "Configuration error: {}", msg),
            CoworkError::ToolError(msg) => write!(f, "Tool error: {}", msg),
            CoworkError::StorageError(e) => write!(f, "Storage error: {}", e),
            CoworkError::NetworkError(e) => write!(f, "Network error: {}", e),
            CoworkError::Timeout => write!(f, "Request timeout"),
            CoworkError::GateBusy => write!(f, "A confirmation is already pending"),
            CoworkError::IoError(e) => write!(f, "IO error: {}", e),
            CoworkError::JsonError(e) => write!(f, "JSON error: {}", e),
            CoworkError::YamlError(e) => write!(f, "YAML error: {}", e),
            CoworkError::Other(msg) => write!(f, "{}", msg),
        }
    }
}

impl std::error::Error for CoworkError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CoworkError::StorageError(e) => Some(e),
            CoworkError::NetworkError(e) => Some(e),
            CoworkError::IoError(e) => Some(e),
            CoworkError::JsonError(e) => Some(e),
            CoworkError::YamlError(e) => Some(e),
            _ => None,
        }
    }
}

impl From<rusqlite::Error> for CoworkError {
    fn from(err: rusqlite::Error) -> Self {
        CoworkError::StorageError(err)
    }
}

impl From<reqwest::Error> for CoworkError {
    fn from(err: reqwest::Error) -> Self {
        CoworkError::NetworkError(err)
    }
}

impl From<std::io::Error> for CoworkError {
    fn from(err: std::io::Error) -> Self {
        CoworkError::IoError(err)
    }
}

impl From<serde_json::Error> for CoworkError {
    fn from(err: serde_json::Error) -> Self {
        CoworkError::JsonError(err)
    }
}

impl From<serde_yaml::Error> for CoworkError {
    fn from(err: serde_yaml::Error) -> Self {
        CoworkError::YamlError(err)
    }
}

impl From<anyhow::Error> for CoworkError {
    fn from(err: anyhow::Error) -> Self {
        CoworkError::Other(err.to_string())
    }
}

impl From<String> for CoworkError {
    fn from(msg: String) -> Self {
        CoworkError::Other(msg)
    }
}

impl From<&str> for CoworkError {
    fn from(msg: &str) -> Self {
        CoworkError::Other(msg.to_string())
    }
}

pub type Result<T> = std::result::Result<T, CoworkError>;
