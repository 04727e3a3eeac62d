//! Server configuration, loaded from a TOML file.

use anyhow::{Context, Result};
use evald_core::service::CommitPolicy;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Top-level configuration for the evald server.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub security: SecurityConfig,
    #[serde(default)]
    pub history: HistoryConfig,
    #[serde(default)]
    pub pagination: PaginationConfig,
}

/// HTTP listener settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

/// Evaluation safety settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityConfig {
    /// Wall-clock budget per evaluation, in milliseconds.
    #[serde(default = "default_eval_timeout_ms")]
    pub eval_timeout_ms: u64,
    /// Commands denied to non-admin callers, on top of the built-in set.
    #[serde(default)]
    pub denied_commands: Vec<String>,
}

/// History store settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryConfig {
    /// Directory holding the versioned session state.
    #[serde(default = "default_state_path")]
    pub state_path: PathBuf,
    #[serde(default)]
    pub commit_policy: CommitPolicy,
}

/// Output pagination settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaginationConfig {
    #[serde(default = "default_page_size")]
    pub page_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            port: default_port(),
        }
    }
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            eval_timeout_ms: default_eval_timeout_ms(),
            denied_commands: Vec::new(),
        }
    }
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            state_path: default_state_path(),
            commit_policy: CommitPolicy::default(),
        }
    }
}

impl Default for PaginationConfig {
    fn default() -> Self {
        Self {
            page_size: default_page_size(),
        }
    }
}

fn default_bind_address() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_eval_timeout_ms() -> u64 {
    5000
}

fn default_state_path() -> PathBuf {
    dirs::data_dir()
        .map(|d| d.join("evald").join("state"))
        .unwrap_or_else(|| PathBuf::from("evald-state"))
}

fn default_page_size() -> usize {
    25
}

impl Config {
    /// Loads configuration from a TOML file, falling back to defaults when
    /// the file does not exist.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.pagination.page_size == 0 {
            anyhow::bail!("pagination.page_size must be positive");
        }
        if self.security.eval_timeout_ms == 0 {
            anyhow::bail!("security.eval_timeout_ms must be positive");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.server.bind_address, "127.0.0.1");
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.security.eval_timeout_ms, 5000);
        assert!(config.security.denied_commands.is_empty());
        assert_eq!(config.pagination.page_size, 25);
        assert_eq!(config.history.commit_policy, CommitPolicy::Mutations);
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let config: Config = toml::from_str(
            r#"
            [server]
            port = 9999

            [security]
            denied_commands = ["vars"]
            "#,
        )
        .unwrap();
        assert_eq!(config.server.port, 9999);
        assert_eq!(config.server.bind_address, "127.0.0.1");
        assert_eq!(config.security.denied_commands, vec!["vars"]);
        assert_eq!(config.pagination.page_size, 25);
    }

    #[test]
    fn test_commit_policy_parses_lowercase() {
        let config: Config = toml::from_str(
            r#"
            [history]
            commit_policy = "all"
            "#,
        )
        .unwrap();
        assert_eq!(config.history.commit_policy, CommitPolicy::All);
    }

    #[test]
    fn test_zero_page_size_rejected() {
        let config: Config = toml::from_str(
            r#"
            [pagination]
            page_size = 0
            "#,
        )
        .unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let config = Config::load("/nonexistent/evald-config.toml").unwrap();
        assert_eq!(config.server.port, 8080);
    }
}
