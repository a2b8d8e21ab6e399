//! Server configuration
//!
//! Loaded from YAML. Every section and field is optional; a missing file
//! yields the defaults, so the server can start with no configuration at all.

use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;

use evaluation_core::ServiceConfig;

/// Root configuration structure for the evaluation server
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub server: ListenConfig,
    pub orchestrator: OrchestratorConfig,
    pub database: DatabaseConfig,
    pub service: ServiceConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ListenConfig {
    pub addr: String,
    /// Upper bound for encoded and decoded gRPC messages. Evaluation results
    /// carry attachments of several megabytes.
    pub max_message_bytes: usize,
}

impl Default for ListenConfig {
    fn default() -> Self {
        Self {
            addr: "[::]:50053".to_string(),
            max_message_bytes: 64 * 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    pub address: String,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            address: "http://localhost:50051".to_string(),
        }
    }
}

/// Database connection configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Keep results in memory instead of Postgres.
    pub in_memory: bool,
    /// Name of the environment variable holding the connection string.
    pub connection_string_env: String,
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            in_memory: true,
            connection_string_env: "DATABASE_URL".to_string(),
            max_connections: 10,
        }
    }
}

impl DatabaseConfig {
    pub fn connection_string(&self) -> Result<String> {
        std::env::var(&self.connection_string_env).with_context(|| {
            format!(
                "database connection string not set (env var {})",
                self.connection_string_env
            )
        })
    }
}

impl ServerConfig {
    /// Load configuration from a YAML file, falling back to defaults when the
    /// file does not exist.
    pub fn from_file(path: &str) -> Result<Self> {
        if !Path::new(path).exists() {
            tracing::warn!(path, "configuration file not found, using defaults");
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("could not read configuration file {path}"))?;
        Self::from_yaml(&content).with_context(|| format!("invalid configuration in {path}"))
    }

    /// Load configuration from a YAML string
    pub fn from_yaml(content: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(content)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_config() {
        let yaml = r#"
server:
  addr: "0.0.0.0:9090"

orchestrator:
  address: "http://orchestrator:50051"

database:
  in_memory: false
  connection_string_env: "EVALUATION_DATABASE_URL"
  max_connections: 4

service:
  default_interval_minutes: 10
  dispatch_queue_capacity: 16
"#;
        let config = ServerConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.server.addr, "0.0.0.0:9090");
        assert_eq!(config.server.max_message_bytes, 64 * 1024 * 1024);
        assert_eq!(config.orchestrator.address, "http://orchestrator:50051");
        assert!(!config.database.in_memory);
        assert_eq!(config.database.connection_string_env, "EVALUATION_DATABASE_URL");
        assert_eq!(config.database.max_connections, 4);
        assert_eq!(config.service.default_interval_minutes, 10);
        assert_eq!(config.service.dispatch_queue_capacity, 16);
        assert_eq!(config.service.max_page_size, 1500);
    }

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = ServerConfig::from_yaml("{}").unwrap();
        assert!(config.database.in_memory);
        assert_eq!(config.service.default_interval_minutes, 5);
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let config = ServerConfig::from_file("does/not/exist.yaml").unwrap();
        assert_eq!(config.server.addr, "[::]:50053");
    }

    #[test]
    fn test_unknown_env_var_is_error() {
        let db = DatabaseConfig {
            connection_string_env: "EVALUATION_TEST_SURELY_UNSET_VAR".into(),
            ..Default::default()
        };
        assert!(db.connection_string().is_err());
    }
}
