//! Configuration loading, validation, and management for AnswerFlow.
//!
//! Loads configuration from `~/.answerflow/config.toml` with environment
//! variable overrides. Validates all settings at startup.

use answerflow_core::request::Language;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// The root configuration structure.
///
/// Maps directly to `~/.answerflow/config.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Language used when a request does not name one
    #[serde(default)]
    pub default_language: Language,

    /// Response cache configuration
    #[serde(default)]
    pub cache: CacheConfig,

    /// Stream consumer configuration
    #[serde(default)]
    pub stream: StreamConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Storage backend: "memory", "file" or "none"
    #[serde(default = "default_cache_backend")]
    pub backend: String,

    /// Seconds a cached answer stays valid
    #[serde(default = "default_ttl_secs")]
    pub ttl_secs: u64,

    /// Conversation turns kept per (assessment, control)
    #[serde(default = "default_max_history")]
    pub max_history: usize,

    /// Key the cache document is stored under
    #[serde(default = "default_storage_key")]
    pub storage_key: String,

    /// File used by the "file" backend (defaults to `~/.answerflow/cache.json`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

fn default_cache_backend() -> String {
    "file".into()
}
fn default_ttl_secs() -> u64 {
    2 * 60 * 60
}
fn default_max_history() -> usize {
    10
}
fn default_storage_key() -> String {
    "ai-response-cache".into()
}

impl CacheConfig {
    /// Resolved path of the file backend.
    pub fn file_path(&self) -> PathBuf {
        self.path
            .clone()
            .unwrap_or_else(|| AppConfig::config_dir().join("cache.json"))
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            backend: default_cache_backend(),
            ttl_secs: default_ttl_secs(),
            max_history: default_max_history(),
            storage_key: default_storage_key(),
            path: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamConfig {
    /// Capacity of the session event broadcast channel
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,

    /// Capacity of a transport's event channel
    #[serde(default = "default_transport_buffer")]
    pub transport_buffer: usize,
}

fn default_event_buffer() -> usize {
    256
}
fn default_transport_buffer() -> usize {
    64
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            event_buffer: default_event_buffer(),
            transport_buffer: default_transport_buffer(),
        }
    }
}

const KNOWN_BACKENDS: [&str; 3] = ["memory", "file", "none"];

impl AppConfig {
    /// Load configuration from the default location with env var overrides.
    ///
    /// Priority: env vars > config file > defaults
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        let mut config = Self::load_from(&config_path)?;
        config.apply_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Apply `ANSWERFLOW_*` overrides read through `lookup`.
    fn apply_overrides(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        if let Some(backend) = lookup("ANSWERFLOW_CACHE_BACKEND") {
            self.cache.backend = backend;
        }

        if let Some(ttl) = lookup("ANSWERFLOW_CACHE_TTL_SECS") {
            self.cache.ttl_secs = ttl.parse().map_err(|_| {
                ConfigError::ValidationError(format!(
                    "ANSWERFLOW_CACHE_TTL_SECS must be a whole number of seconds, got '{ttl}'"
                ))
            })?;
        }

        if let Some(path) = lookup("ANSWERFLOW_CACHE_PATH") {
            self.cache.path = Some(PathBuf::from(path));
        }

        if let Some(language) = lookup("ANSWERFLOW_LANGUAGE") {
            self.default_language = language.parse().map_err(ConfigError::ValidationError)?;
        }

        Ok(())
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".answerflow")
    }

    /// Validate the configuration.
    fn validate(&self) -> Result<(), ConfigError> {
        if !KNOWN_BACKENDS.contains(&self.cache.backend.as_str()) {
            return Err(ConfigError::ValidationError(format!(
                "cache.backend must be one of {KNOWN_BACKENDS:?}, got '{}'",
                self.cache.backend
            )));
        }

        if self.cache.ttl_secs == 0 {
            return Err(ConfigError::ValidationError(
                "cache.ttl_secs must be > 0".into(),
            ));
        }

        if self.cache.max_history == 0 {
            return Err(ConfigError::ValidationError(
                "cache.max_history must be > 0".into(),
            ));
        }

        if self.cache.storage_key.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "cache.storage_key must not be empty".into(),
            ));
        }

        if self.stream.event_buffer == 0 || self.stream.transport_buffer == 0 {
            return Err(ConfigError::ValidationError(
                "stream buffers must be > 0".into(),
            ));
        }

        Ok(())
    }

    /// Generate a default config TOML string.
    pub fn default_toml() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            default_language: Language::default(),
            cache: CacheConfig::default(),
            stream: StreamConfig::default(),
        }
    }
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn default_config_is_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.cache.ttl_secs, 7200);
        assert_eq!(config.cache.max_history, 10);
        assert_eq!(config.cache.storage_key, "ai-response-cache");
        assert_eq!(config.default_language, Language::En);
    }

    #[test]
    fn config_roundtrip_toml() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed: AppConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.cache.backend, config.cache.backend);
        assert_eq!(parsed.cache.ttl_secs, config.cache.ttl_secs);
    }

    #[test]
    fn unknown_backend_rejected() {
        let mut config = AppConfig::default();
        config.cache.backend = "redis".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn zero_ttl_rejected() {
        let mut config = AppConfig::default();
        config.cache.ttl_secs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn missing_config_file_returns_defaults() {
        let result = AppConfig::load_from(Path::new("/nonexistent/config.toml"));
        assert!(result.is_ok());
        assert_eq!(result.unwrap().cache.backend, "file");
    }

    #[test]
    fn partial_file_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
default_language = "hr"

[cache]
backend = "memory"
ttl_secs = 60
"#,
        )
        .unwrap();

        let config = AppConfig::load_from(&path).unwrap();
        assert_eq!(config.default_language, Language::Hr);
        assert_eq!(config.cache.backend, "memory");
        assert_eq!(config.cache.ttl_secs, 60);
        assert_eq!(config.cache.max_history, 10);
        assert_eq!(config.stream.transport_buffer, 64);
    }

    #[test]
    fn malformed_file_reports_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[cache\nbackend = ").unwrap();
        assert!(matches!(
            AppConfig::load_from(&path),
            Err(ConfigError::ParseError { .. })
        ));
    }

    #[test]
    fn env_overrides_apply() {
        let vars: HashMap<&str, &str> = HashMap::from([
            ("ANSWERFLOW_CACHE_BACKEND", "none"),
            ("ANSWERFLOW_CACHE_TTL_SECS", "30"),
            ("ANSWERFLOW_LANGUAGE", "hr"),
        ]);
        let mut config = AppConfig::default();
        config
            .apply_overrides(|k| vars.get(k).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(config.cache.backend, "none");
        assert_eq!(config.cache.ttl_secs, 30);
        assert_eq!(config.default_language, Language::Hr);
    }

    #[test]
    fn bad_ttl_override_rejected() {
        let mut config = AppConfig::default();
        let result = config.apply_overrides(|k| {
            (k == "ANSWERFLOW_CACHE_TTL_SECS").then(|| "two hours".to_string())
        });
        assert!(result.is_err());
    }

    #[test]
    fn default_toml_generation() {
        let toml_str = AppConfig::default_toml();
        assert!(toml_str.contains("ai-response-cache"));
        assert!(toml_str.contains("7200"));
    }
}
