//! Process configuration: compiled-in defaults, optional TOML file, CLI
//! overrides applied by the binary.

use serde::Deserialize;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

const DEFAULT_CLIENT_ID: &str = "163519839402105";
const DEFAULT_CLIENT_VERSION: &str = "0.5.0";
/// 30 minutes, in seconds.
const DEFAULT_MAX_RETRY: u64 = 1800;
const DEFAULT_SERVER: &str = "archipelago.gg";
const DEFAULT_PORT: u16 = 38281;
const DEFAULT_CACHE_DIR: &str = "./cache";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("unable to read config file {path}: {source}")]
    Read { path: PathBuf, source: io::Error },
    #[error("unable to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub multiworld: MultiworldConfig,
    pub chat: ChatConfig,
}

impl Config {
    /// Loads configuration from `path`. A missing file yields the
    /// defaults; an unreadable or malformed file is an error.
    pub fn load(path: &Path) -> Result<Config, ConfigError> {
        let contents = match fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Config::default()),
            Err(source) => {
                return Err(ConfigError::Read {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };

        toml::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MultiworldConfig {
    pub client_id: String,
    pub client_version: String,
    /// Backoff cap for reconnect attempts, in seconds.
    pub max_connection_retry: u64,
    pub world: WorldConfig,
    pub cache: CacheConfig,
}

impl Default for MultiworldConfig {
    fn default() -> Self {
        Self {
            client_id: DEFAULT_CLIENT_ID.to_string(),
            client_version: DEFAULT_CLIENT_VERSION.to_string(),
            max_connection_retry: DEFAULT_MAX_RETRY,
            world: WorldConfig::default(),
            cache: CacheConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WorldConfig {
    pub server: String,
    pub port: u16,
    pub slot: String,
    pub password: Option<String>,
}

impl Default for WorldConfig {
    fn default() -> Self {
        Self {
            server: DEFAULT_SERVER.to_string(),
            port: DEFAULT_PORT,
            slot: String::new(),
            password: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub filepath: PathBuf,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            filepath: PathBuf::from(DEFAULT_CACHE_DIR),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ChatConfig {
    pub display_mode: DisplayMode,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DisplayMode {
    #[default]
    Plain,
    Mono,
    Color,
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_yields_defaults() {
        let dir = TempDir::new().unwrap();
        let config = Config::load(&dir.path().join("absent.toml")).unwrap();

        assert_eq!(config.multiworld.client_id, DEFAULT_CLIENT_ID);
        assert_eq!(config.multiworld.world.server, DEFAULT_SERVER);
        assert_eq!(config.multiworld.max_connection_retry, DEFAULT_MAX_RETRY);
        assert_eq!(config.chat.display_mode, DisplayMode::Plain);
    }

    #[test]
    fn test_partial_file_keeps_unset_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(
            &path,
            r#"
[multiworld.world]
server = "localhost"
port = 12345
slot = "Civil"

[chat]
display_mode = "color"
"#,
        )
        .unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.multiworld.world.server, "localhost");
        assert_eq!(config.multiworld.world.port, 12345);
        assert_eq!(config.multiworld.world.slot, "Civil");
        assert_eq!(config.chat.display_mode, DisplayMode::Color);
        // Unset sections keep their defaults.
        assert_eq!(config.multiworld.client_version, DEFAULT_CLIENT_VERSION);
        assert_eq!(config.multiworld.cache.filepath, PathBuf::from(DEFAULT_CACHE_DIR));
    }

    #[test]
    fn test_malformed_file_is_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "not = [valid").unwrap();

        let err = Config::load(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }
}
