//! Server configuration.
//!
//! Loaded from a YAML file (the `remote_server` section), with the data
//! root overridable through `DATA_DIR` and the security-policy preset
//! through `ENVIRONMENT`.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const DEFAULT_PORT: u16 = 8443;
pub const DEFAULT_AUTH_TIMEOUT_SECS: u64 = 10;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("cannot parse config file: {0}")]
    Parse(#[from] serde_yaml::Error),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TlsConfig {
    pub enabled: bool,
    pub cert_file: Option<PathBuf>,
    pub key_file: Option<PathBuf>,
    /// Generate a self-signed certificate when the files are missing.
    pub auto_generate: bool,
}

impl Default for TlsConfig {
    fn default() -> Self {
        TlsConfig {
            enabled: true,
            cert_file: None,
            key_file: None,
            auto_generate: true,
        }
    }
}

/// Settings handed to the transcription backend.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub model: String,
    pub device: String,
    pub compute_type: String,
    pub vad_filter: bool,
    pub preview_model: Option<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            model: "Systran/faster-whisper-large-v3".to_string(),
            device: "cuda".to_string(),
            compute_type: "default".to_string(),
            vad_filter: true,
            preview_model: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub auth_timeout_secs: u64,
    pub data_dir: PathBuf,
    /// Token store file; defaults to `<data_dir>/tokens.json`.
    pub token_store: Option<PathBuf>,
    /// Static asset root; `None` disables asset serving.
    pub assets_dir: Option<PathBuf>,
    pub tls: TlsConfig,
    pub engine: Option<EngineConfig>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            host: "0.0.0.0".to_string(),
            port: DEFAULT_PORT,
            auth_timeout_secs: DEFAULT_AUTH_TIMEOUT_SECS,
            data_dir: PathBuf::from("data"),
            token_store: None,
            assets_dir: None,
            tls: TlsConfig::default(),
            engine: Some(EngineConfig::default()),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct ConfigFile {
    #[serde(default)]
    remote_server: ServerConfig,
}

impl ServerConfig {
    /// Read the `remote_server` section of a YAML config file, then apply
    /// environment overrides (`DATA_DIR`).
    pub fn load(path: impl AsRef<Path>) -> Result<ServerConfig, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        let file: ConfigFile = serde_yaml::from_str(&raw)?;
        let mut config = file.remote_server;
        config.apply_env();
        Ok(config)
    }

    pub fn apply_env(&mut self) {
        if let Ok(data_dir) = std::env::var("DATA_DIR") {
            if !data_dir.is_empty() {
                self.data_dir = PathBuf::from(data_dir);
            }
        }
    }

    pub fn token_store_path(&self) -> PathBuf {
        self.token_store
            .clone()
            .unwrap_or_else(|| self.data_dir.join("tokens.json"))
    }

    pub fn auth_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.auth_timeout_secs)
    }
}

/// Deployment environment, selecting the Content-Security-Policy preset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Development,
    Production,
}

impl Environment {
    pub fn from_env() -> Environment {
        match std::env::var("ENVIRONMENT").as_deref() {
            Ok("production") => Environment::Production,
            _ => Environment::Development,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ServerConfig::default();
        assert_eq!(config.port, DEFAULT_PORT);
        assert_eq!(config.auth_timeout_secs, 10);
        assert!(config.tls.enabled);
        assert!(config.tls.auto_generate);
        assert_eq!(config.token_store_path(), PathBuf::from("data/tokens.json"));
    }

    #[test]
    fn test_parse_yaml_section() {
        let yaml = r#"
remote_server:
  host: 127.0.0.1
  port: 9443
  token_store: /var/lib/scribe/tokens.json
  tls:
    enabled: true
    auto_generate: false
    cert_file: /etc/scribe/cert.pem
    key_file: /etc/scribe/key.pem
  engine:
    model: small
    vad_filter: false
"#;
        let file: ConfigFile = serde_yaml::from_str(yaml).unwrap();
        let config = file.remote_server;
        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.port, 9443);
        assert!(!config.tls.auto_generate);
        assert_eq!(
            config.token_store_path(),
            PathBuf::from("/var/lib/scribe/tokens.json")
        );
        let engine = config.engine.unwrap();
        assert_eq!(engine.model, "small");
        assert!(!engine.vad_filter);
    }

    #[test]
    fn test_empty_file_uses_defaults() {
        let file: ConfigFile = serde_yaml::from_str("{}").unwrap();
        assert_eq!(file.remote_server.port, DEFAULT_PORT);
    }
}
