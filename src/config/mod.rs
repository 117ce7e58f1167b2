//! Configuration system (layered: explicit > env > config file > defaults).

use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use serde::Deserialize;

use crate::error::KestrelError;

/// Recommended for production use; tool calling is markedly more reliable.
pub const PRO_MODEL: &str = "gemini-2.5-pro";
/// Cheaper model used for demos and for the typed-step converter agent.
pub const SIMPLE_MODEL: &str = "gemini-2.5-flash";
pub const DEFAULT_MODEL: &str = PRO_MODEL;

const API_KEY_ENV: [&str; 2] = ["GEMINI_API_KEY", "GOOGLE_API_KEY"];
const BASE_URL_ENV: &str = "GEMINI_BASE_URL";
const MODEL_ENV: &str = "KESTREL_MODEL";
const SIMPLE_MODEL_ENV: &str = "KESTREL_SIMPLE_MODEL";
const TIMEOUT_ENV: &str = "KESTREL_REQUEST_TIMEOUT_SECS";
const CONFIG_FILE_NAME: &str = "config.toml";

/// On-disk configuration file shape.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
struct FileConfig {
    api_key: Option<String>,
    base_url: Option<String>,
    model: Option<String>,
    simple_model: Option<String>,
    request_timeout_secs: Option<u64>,
    data_dir: Option<PathBuf>,
}

/// Resolved configuration.
#[derive(Clone, Default)]
pub struct KestrelConfig {
    api_key: Option<String>,
    base_url: Option<String>,
    model: Option<String>,
    simple_model: Option<String>,
    request_timeout: Option<Duration>,
    data_dir: Option<PathBuf>,
}

impl std::fmt::Debug for KestrelConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KestrelConfig")
            .field("api_key", &self.api_key.as_ref().map(|_| ".."))
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("simple_model", &self.simple_model)
            .field("request_timeout", &self.request_timeout)
            .field("data_dir", &self.data_dir)
            .finish()
    }
}

impl KestrelConfig {
    /// Empty config; every value falls back to its default.
    pub fn new() -> Self {
        Self::default()
    }

    /// Load `.env`, the platform config file (if present), then environment
    /// variables, each layer overriding the previous one.
    pub fn from_env() -> Result<Self, KestrelError> {
        let _ = dotenvy::dotenv();
        let mut config = match default_config_path() {
            Some(path) if path.exists() => Self::from_toml_file(&path)?,
            _ => Self::new(),
        };
        config.apply_env();
        Ok(config)
    }

    /// Parse a TOML config file.
    pub fn from_toml_file(path: &Path) -> Result<Self, KestrelError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_toml_str(&raw)
    }

    pub fn from_toml_str(raw: &str) -> Result<Self, KestrelError> {
        let file: FileConfig = toml::from_str(raw)
            .map_err(|e| KestrelError::Configuration(format!("invalid config file: {e}")))?;
        Ok(Self {
            api_key: file.api_key,
            base_url: file.base_url,
            model: file.model,
            simple_model: file.simple_model,
            request_timeout: file.request_timeout_secs.map(Duration::from_secs),
            data_dir: file.data_dir,
        })
    }

    fn apply_env(&mut self) {
        if let Some(key) = API_KEY_ENV.iter().find_map(|k| std::env::var(k).ok()) {
            self.api_key = Some(key);
        }
        if let Ok(url) = std::env::var(BASE_URL_ENV) {
            self.base_url = Some(url);
        }
        if let Ok(model) = std::env::var(MODEL_ENV) {
            self.model = Some(model);
        }
        if let Ok(model) = std::env::var(SIMPLE_MODEL_ENV) {
            self.simple_model = Some(model);
        }
        if let Some(secs) = std::env::var(TIMEOUT_ENV)
            .ok()
            .and_then(|v| v.trim().parse::<u64>().ok())
            .filter(|&v| v > 0)
        {
            self.request_timeout = Some(Duration::from_secs(secs));
        }
    }

    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    pub fn with_data_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.data_dir = Some(dir.into());
        self
    }

    pub fn api_key(&self) -> Option<String> {
        self.api_key.clone()
    }

    pub fn base_url(&self) -> Option<String> {
        self.base_url.clone()
    }

    pub fn default_model(&self) -> &str {
        self.model.as_deref().unwrap_or(DEFAULT_MODEL)
    }

    pub fn simple_model(&self) -> &str {
        self.simple_model.as_deref().unwrap_or(SIMPLE_MODEL)
    }

    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout
    }

    /// Directory for persisted state such as scheduled tasks.
    pub fn data_dir(&self) -> Option<PathBuf> {
        self.data_dir
            .clone()
            .or_else(|| project_dirs().map(|d| d.data_dir().to_path_buf()))
    }
}

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("dev", "kestrel", "kestrel")
}

/// Location of the optional config file.
pub fn default_config_path() -> Option<PathBuf> {
    project_dirs().map(|d| d.config_dir().join(CONFIG_FILE_NAME))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply_when_nothing_is_set() {
        let config = KestrelConfig::new();
        assert_eq!(config.default_model(), PRO_MODEL);
        assert_eq!(config.simple_model(), SIMPLE_MODEL);
        assert!(config.api_key().is_none());
        assert!(config.request_timeout().is_none());
    }

    #[test]
    fn toml_values_are_loaded() {
        let config = KestrelConfig::from_toml_str(
            r#"
            api_key = "abc"
            model = "gemini-custom"
            request_timeout_secs = 30
            data_dir = "/tmp/kestrel"
            "#,
        )
        .unwrap();

        assert_eq!(config.api_key().as_deref(), Some("abc"));
        assert_eq!(config.default_model(), "gemini-custom");
        assert_eq!(config.request_timeout(), Some(Duration::from_secs(30)));
        assert_eq!(config.data_dir(), Some(PathBuf::from("/tmp/kestrel")));
    }

    #[test]
    fn explicit_setters_override_file_values() {
        let config = KestrelConfig::from_toml_str("model = \"from-file\"")
            .unwrap()
            .with_model("explicit");
        assert_eq!(config.default_model(), "explicit");
    }

    #[test]
    fn malformed_toml_is_a_configuration_error() {
        let err = KestrelConfig::from_toml_str("model = [").unwrap_err();
        assert!(matches!(err, KestrelError::Configuration(_)));
    }
}
