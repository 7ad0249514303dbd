//! Tool configuration
//!
//! Loaded from YAML at `TRACEGEN_CONFIG` or `<config dir>/tracegen/config.yaml`.
//! A missing file means defaults.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::db::{BackendType, DatabaseConfig};

/// Which model client to construct
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum AiProvider {
    #[default]
    Gemini,
    /// A local model CLI; the prompt is passed as the last argument
    Command,
    Disabled,
}

/// Model client settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct AiConfig {
    pub provider: AiProvider,
    pub model: String,
    /// Environment variable holding the API key
    pub api_key_env: String,
    pub endpoint: String,
    pub command: Vec<String>,
    pub timeout_secs: u64,
}

impl Default for AiConfig {
    fn default() -> Self {
        Self {
            provider: AiProvider::Gemini,
            model: "gemini-1.5-pro".to_string(),
            api_key_env: "GEMINI_API_KEY".to_string(),
            endpoint: "https://generativelanguage.googleapis.com/v1beta".to_string(),
            command: Vec::new(),
            timeout_secs: 60,
        }
    }
}

/// Top-level configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Config {
    /// Test case and traceability database
    pub database: PathBuf,
    /// Overrides the backend inferred from the database extension
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backend: Option<BackendType>,
    /// Root of the document store
    pub documents_dir: PathBuf,
    /// Bounded wait for storage locks
    pub storage_timeout_secs: u64,
    pub ai: AiConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database: PathBuf::from("tracegen.db"),
            backend: None,
            documents_dir: PathBuf::from("documents"),
            storage_timeout_secs: 5,
            ai: AiConfig::default(),
        }
    }
}

impl Config {
    /// Loads the configuration from the provided path
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config file: {:?}", path.as_ref()))?;

        let mut config: Config = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {:?}", path.as_ref()))?;
        config.apply_env();
        Ok(config)
    }

    /// Loads the configuration, falling back to defaults when the file is absent
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self> {
        if path.as_ref().exists() {
            Self::load(path)
        } else {
            let mut config = Self::default();
            config.apply_env();
            Ok(config)
        }
    }

    /// Save the configuration to the specified path
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = serde_yaml::to_string(&self)?;

        if let Some(parent) = path.as_ref().parent() {
            fs::create_dir_all(parent)?;
        }

        fs::write(&path, content)
            .with_context(|| format!("Failed to write config to {:?}", path.as_ref()))?;

        Ok(())
    }

    /// Creates a default config file if it doesn't exist.
    /// Returns true if a file was written.
    pub fn create_default<P: AsRef<Path>>(path: P) -> Result<bool> {
        if path.as_ref().exists() {
            return Ok(false);
        }
        Self::default().save(path)?;
        Ok(true)
    }

    /// `GEMINI_MODEL` overrides the configured model
    fn apply_env(&mut self) {
        if let Ok(model) = std::env::var("GEMINI_MODEL") {
            if !model.trim().is_empty() {
                self.ai.model = model;
            }
        }
    }

    /// Storage lock timeout
    pub fn storage_timeout(&self) -> Duration {
        Duration::from_secs(self.storage_timeout_secs)
    }

    /// Database settings derived from this configuration
    pub fn database_config(&self) -> DatabaseConfig {
        DatabaseConfig::for_path(&self.database, self.backend, self.storage_timeout())
    }
}

/// Gets the path to the config file
pub fn get_config_path() -> Result<PathBuf> {
    if let Ok(path) = std::env::var("TRACEGEN_CONFIG") {
        return Ok(PathBuf::from(path));
    }

    let config_dir = dirs::config_dir().context("Failed to determine config directory")?;

    Ok(config_dir.join("tracegen").join("config.yaml"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_gives_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let config = Config::load_or_default(temp_dir.path().join("none.yaml")).unwrap();
        assert_eq!(config.database, PathBuf::from("tracegen.db"));
        assert_eq!(config.storage_timeout_secs, 5);
        assert_eq!(config.ai.timeout_secs, 60);
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.yaml");
        fs::write(
            &path,
            "database: /tmp/trace.yaml\nai:\n  provider: command\n  command: [ollama, run, llama3]\n",
        )
        .unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.database, PathBuf::from("/tmp/trace.yaml"));
        assert_eq!(config.ai.provider, AiProvider::Command);
        assert_eq!(config.ai.command, vec!["ollama", "run", "llama3"]);
        assert_eq!(config.ai.api_key_env, "GEMINI_API_KEY");
        assert_eq!(config.database_config().backend_type, BackendType::Yaml);
    }

    #[test]
    fn test_create_default_once() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("nested").join("config.yaml");
        assert!(Config::create_default(&path).unwrap());
        assert!(!Config::create_default(&path).unwrap());

        let loaded = Config::load(&path).unwrap();
        assert_eq!(loaded.documents_dir, PathBuf::from("documents"));
    }

    #[test]
    fn test_backend_override() {
        let config = Config {
            database: PathBuf::from("trace.data"),
            backend: Some(BackendType::Sqlite),
            ..Config::default()
        };
        assert_eq!(config.database_config().backend_type, BackendType::Sqlite);
    }

    #[test]
    fn test_invalid_yaml_is_an_error() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.yaml");
        fs::write(&path, "storage_timeout_secs: [not a number").unwrap();
        assert!(Config::load(&path).is_err());
    }
}
