//! YAML configuration schema and loader.

use std::path::Path;

use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_yaml::Error),
}

#[derive(Debug, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub logging: LoggingConfig,
    pub tcp: TcpConfig,
    pub http: HttpConfig,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_owned(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct TcpConfig {
    pub host: String,
    pub port: u16,
    #[serde(default)]
    pub codec: String,
    #[serde(default)]
    pub secret: String,
    #[serde(default)]
    pub presence: PresenceConfig,
}

#[derive(Debug, Default, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum PresenceConfig {
    #[default]
    Memory,
    Remote {
        redis_url: String,
    },
}

#[derive(Debug, Deserialize)]
pub struct HttpConfig {
    pub host: String,
    pub port: u16,
}

impl Config {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Ok(serde_yaml::from_str(&raw)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_minimal_document_with_defaults() {
        let yaml = r"
tcp:
  host: 0.0.0.0
  port: 9000
http:
  host: 0.0.0.0
  port: 9100
";
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.tcp.port, 9000);
        assert!(matches!(config.tcp.presence, PresenceConfig::Memory));
    }

    #[test]
    fn parses_remote_presence_config() {
        let yaml = r"
tcp:
  host: 0.0.0.0
  port: 9000
  codec: AESCBC
  presence:
    kind: remote
    redis_url: redis://127.0.0.1/
http:
  host: 0.0.0.0
  port: 9100
";
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.tcp.codec, "AESCBC");
        match config.tcp.presence {
            PresenceConfig::Remote { redis_url } => assert_eq!(redis_url, "redis://127.0.0.1/"),
            PresenceConfig::Memory => panic!("expected remote presence"),
        }
    }
}
