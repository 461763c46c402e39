use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use directories::BaseDirs;
use serde::{Deserialize, Serialize};

use lestash_server::ServerConfig;
use lestash_sync::TransportConfig;

const APP_DIR: &str = "lestash";

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub general: GeneralConfig,
    pub sync: TransportConfig,
    pub server: ServerConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    pub database_path: PathBuf,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self { database_path: default_database_path() }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: "info".into() }
    }
}

impl Config {
    /// Load from `path`, or from the default location when `None`.
    ///
    /// A missing file yields the defaults; a file that exists but does not
    /// parse is an error.
    pub fn load(path: Option<&Path>) -> Result<Config> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => match default_config_path() {
                Some(p) => p,
                None => return Ok(Config::default()),
            },
        };
        if !path.exists() {
            return Ok(Config::default());
        }
        let content = fs::read_to_string(&path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        toml::from_str(&content).with_context(|| format!("failed to parse config file: {}", path.display()))
    }
}

/// `<config dir>/lestash/config.toml`.
pub fn default_config_path() -> Option<PathBuf> {
    BaseDirs::new().map(|dirs| dirs.config_dir().join(APP_DIR).join("config.toml"))
}

/// `<data dir>/lestash/lestash.db`, or `lestash.db` in the working directory
/// when no home directory can be found.
pub fn default_database_path() -> PathBuf {
    BaseDirs::new()
        .map(|dirs| dirs.data_dir().join(APP_DIR).join("lestash.db"))
        .unwrap_or_else(|| PathBuf::from("lestash.db"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn missing_file_gives_defaults() {
        let dir = tempdir().unwrap();
        let config = Config::load(Some(&dir.path().join("absent.toml"))).unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.sync.connect_timeout_secs, 10);
        assert_eq!(config.sync.response_timeout_secs, 30);
        assert_eq!(config.server.bind_addr.to_string(), "127.0.0.1:8484");
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(
            &path,
            "[general]\ndatabase_path = \"/tmp/stash.db\"\n\n[sync]\nresponse_timeout_secs = 5\n",
        )
        .unwrap();
        let config = Config::load(Some(&path)).unwrap();
        assert_eq!(config.general.database_path, PathBuf::from("/tmp/stash.db"));
        assert_eq!(config.sync.response_timeout_secs, 5);
        assert_eq!(config.sync.connect_timeout_secs, 10);
        assert_eq!(config.server, ServerConfig::default());
    }

    #[test]
    fn round_trips_through_toml() {
        let mut config = Config::default();
        config.server.bind_addr = "0.0.0.0:9000".parse().unwrap();
        config.logging.level = "debug".into();
        let text = toml::to_string_pretty(&config).unwrap();
        assert!(text.contains("bind_addr = \"0.0.0.0:9000\""));
        let back: Config = toml::from_str(&text).unwrap();
        assert_eq!(back, config);
    }

    #[test]
    fn broken_file_is_an_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "[sync\nconnect_timeout_secs = ").unwrap();
        assert!(Config::load(Some(&path)).is_err());
    }
}
