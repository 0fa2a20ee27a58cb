//! Configuration module for the live session client
//!
//! Sources: .env files, YAML files and environment variables.
//! Priority: YAML > ENV vars > .env values > defaults.
//!
//! # Modules
//! - `yaml`: YAML configuration file loading
//! - `env`: Environment variable loading
//!
//! # Example
//! ```rust,no_run
//! use multimodal_live::config::ClientConfig;
//! use std::path::PathBuf;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! // Load from environment variables only
//! let config = ClientConfig::from_env()?;
//!
//! // Load from YAML file with environment variable fallbacks
//! let config = ClientConfig::from_file(&PathBuf::from("config.yaml"))?;
//! let identity = config.to_identity()?;
//! # Ok(())
//! # }
//! ```

use std::path::PathBuf;

use crate::core::live::{LiveResult, SessionIdentity};

mod env;
mod yaml;

pub use env::{ENV_RUN_ID, ENV_USER_ID, ENV_WS_URL};

/// Local development endpoint.
pub const DEFAULT_ENDPOINT: &str = "ws://localhost:8000/ws";

/// Client configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// WebSocket endpoint of the live session server
    pub endpoint: String,
    /// User identifier sent in the handshake
    pub user_id: Option<String>,
    /// Fixed run identifier; generated when absent
    pub run_id: Option<String>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            user_id: None,
            run_id: None,
        }
    }
}

impl ClientConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, Box<dyn std::error::Error>> {
        let config = env::load_from_env();
        validate_endpoint(&config.endpoint)?;
        Ok(config)
    }

    /// Load configuration from a YAML file, falling back to the environment
    /// for any value the file leaves out.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read, the YAML is malformed or
    /// the resulting endpoint is not a `ws`/`wss` URL.
    pub fn from_file(path: &PathBuf) -> Result<Self, Box<dyn std::error::Error>> {
        let yaml_config = yaml::YamlConfig::from_file(path)?;
        let config = merge_config(env::load_from_env(), yaml_config);
        validate_endpoint(&config.endpoint)?;
        Ok(config)
    }

    /// Build the session identity, generating a run id when none is set.
    pub fn to_identity(&self) -> LiveResult<SessionIdentity> {
        let mut identity = SessionIdentity::new(&self.endpoint)?;
        if let Some(run_id) = &self.run_id {
            identity = identity.with_run_id(run_id.clone());
        }
        if let Some(user_id) = &self.user_id {
            identity = identity.with_user_id(user_id.clone());
        }
        Ok(identity)
    }
}

fn merge_config(base: ClientConfig, yaml: yaml::YamlConfig) -> ClientConfig {
    let Some(session) = yaml.session else {
        return base;
    };

    ClientConfig {
        endpoint: session.endpoint.unwrap_or(base.endpoint),
        user_id: session.user_id.or(base.user_id),
        run_id: session.run_id.or(base.run_id),
    }
}

fn validate_endpoint(endpoint: &str) -> Result<(), Box<dyn std::error::Error>> {
    SessionIdentity::new(endpoint)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::env;
    use std::fs;
    use tempfile::TempDir;

    fn cleanup_env_vars() {
        unsafe {
            env::remove_var(ENV_WS_URL);
            env::remove_var(ENV_USER_ID);
            env::remove_var(ENV_RUN_ID);
        }
    }

    #[test]
    #[serial]
    fn test_from_env_defaults() {
        cleanup_env_vars();

        let config = ClientConfig::from_env().unwrap();
        assert_eq!(config, ClientConfig::default());
        assert_eq!(config.endpoint, "ws://localhost:8000/ws");
    }

    #[test]
    #[serial]
    fn test_from_env_values() {
        cleanup_env_vars();
        unsafe {
            env::set_var(ENV_WS_URL, "wss://live.example.com/ws");
            env::set_var(ENV_USER_ID, "env-user");
            env::set_var(ENV_RUN_ID, "");
        }

        let config = ClientConfig::from_env().unwrap();
        assert_eq!(config.endpoint, "wss://live.example.com/ws");
        assert_eq!(config.user_id.as_deref(), Some("env-user"));
        // Empty values count as unset
        assert!(config.run_id.is_none());

        cleanup_env_vars();
    }

    #[test]
    #[serial]
    fn test_from_env_rejects_http_endpoint() {
        cleanup_env_vars();
        unsafe {
            env::set_var(ENV_WS_URL, "http://live.example.com/ws");
        }

        assert!(ClientConfig::from_env().is_err());

        cleanup_env_vars();
    }

    #[test]
    #[serial]
    fn test_from_file_yaml_overrides_env() {
        cleanup_env_vars();

        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.yaml");
        fs::write(
            &config_path,
            r#"
session:
  endpoint: "ws://127.0.0.1:9000/ws"
  user_id: "yaml-user"
"#,
        )
        .unwrap();

        unsafe {
            env::set_var(ENV_WS_URL, "ws://env-host:8000/ws");
            env::set_var(ENV_USER_ID, "env-user");
            env::set_var(ENV_RUN_ID, "env-run");
        }

        let config = ClientConfig::from_file(&config_path).unwrap();

        // YAML overrides ENV
        assert_eq!(config.endpoint, "ws://127.0.0.1:9000/ws");
        assert_eq!(config.user_id.as_deref(), Some("yaml-user"));
        // ENV value
        assert_eq!(config.run_id.as_deref(), Some("env-run"));

        cleanup_env_vars();
    }

    #[test]
    #[serial]
    fn test_from_file_missing_file() {
        cleanup_env_vars();

        let result = ClientConfig::from_file(&PathBuf::from("/nonexistent/config.yaml"));
        assert!(
            result
                .unwrap_err()
                .to_string()
                .contains("Failed to read config file")
        );
    }

    #[test]
    fn test_to_identity() {
        let config = ClientConfig {
            endpoint: "ws://localhost:8000/ws".to_string(),
            user_id: Some("user-1".to_string()),
            run_id: Some("run-1".to_string()),
        };
        let identity = config.to_identity().unwrap();
        assert_eq!(identity.run_id, "run-1");
        assert_eq!(identity.user_id.as_deref(), Some("user-1"));

        let generated = ClientConfig::default().to_identity().unwrap();
        assert!(!generated.run_id.is_empty());
        assert!(generated.user_id.is_none());
    }
}
