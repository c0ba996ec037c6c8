//! TOML configuration for the directory CLI and API server.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{DirectoryError, Result};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DirectoryConfig {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// SQLite file holding profiles, patient records and the audit trail.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
    /// Buffered realtime events per subscriber before it must resync
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
            event_capacity: default_event_capacity(),
        }
    }
}

fn default_db_path() -> String {
    "studio.db".into()
}

fn default_event_capacity() -> usize {
    256
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl ServerConfig {
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn default_host() -> String {
    "0.0.0.0".into()
}

fn default_port() -> u16 {
    3000
}

/// Default filter when RUST_LOG is not set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
        }
    }
}

fn default_level() -> String {
    "info".into()
}

impl DirectoryConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| DirectoryError::Config(format!("{}: {}", path.display(), e)))?;
        Self::parse(&content)
    }

    /// Like `load`, but a missing file yields the defaults
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| DirectoryError::Config(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn empty_document_uses_defaults() {
        let cfg = DirectoryConfig::parse("").unwrap();
        assert_eq!(cfg, DirectoryConfig::default());
        assert_eq!(cfg.database.path, "studio.db");
        assert_eq!(cfg.server.bind_addr(), "0.0.0.0:3000");
        assert_eq!(cfg.logging.level, "info");
    }

    #[test]
    fn partial_sections_fill_defaults() {
        let cfg = DirectoryConfig::parse(
            r#"
            [database]
            path = "/var/lib/studio/studio.db"

            [server]
            port = 8080
            "#,
        )
        .unwrap();
        assert_eq!(cfg.database.path, "/var/lib/studio/studio.db");
        assert_eq!(cfg.database.event_capacity, 256);
        assert_eq!(cfg.server.host, "0.0.0.0");
        assert_eq!(cfg.server.port, 8080);
    }

    #[test]
    fn invalid_toml_is_config_error() {
        let err = DirectoryConfig::parse("[server\nport = ").unwrap_err();
        assert!(matches!(err, DirectoryError::Config(_)));
    }

    #[test]
    fn load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[logging]\nlevel = \"debug\"").unwrap();

        let cfg = DirectoryConfig::load(file.path()).unwrap();
        assert_eq!(cfg.logging.level, "debug");
    }

    #[test]
    fn missing_file() {
        let path = Path::new("/nonexistent/studio.toml");
        assert!(matches!(
            DirectoryConfig::load(path),
            Err(DirectoryError::Config(_))
        ));
        assert_eq!(
            DirectoryConfig::load_or_default(path).unwrap(),
            DirectoryConfig::default()
        );
    }
}
