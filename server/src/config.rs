//! Server settings, read once at startup and handed to the context by value.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("invalid setting: {0}")]
    Invalid(String),
}

/// Reads and parses a TOML file into `T`.
pub(crate) fn load_toml<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<T, ConfigError> {
    let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    toml::from_str(&text).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    /// TCP listen address
    pub bind_address: String,
    /// Target duration of one game loop iteration, in milliseconds
    pub update_rate_ms: u64,
    /// Period between idle connection purges
    pub purge_interval_ms: u64,
    /// Connections silent for longer than this are closed on the next purge
    pub idle_timeout_ms: u64,
    pub max_connections: usize,
    /// Largest accepted frame payload in bytes
    pub max_frame_size: usize,
    /// Account database; accounts live only in memory when unset
    pub accounts_file: Option<PathBuf>,
    /// Game content; the built-in demo content is used when unset
    pub content_file: Option<PathBuf>,
    /// Sent to each user after character selection. Empty disables it.
    pub motd: String,
    pub stats_file: Option<PathBuf>,
    pub stats_dump_rate_ms: u64,
    pub position_sync_rate_ms: u64,
    pub world_seed: u64,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1:44445".to_string(),
            update_rate_ms: 5,
            purge_interval_ms: 60_000,
            idle_timeout_ms: 5_000,
            max_connections: 256,
            max_frame_size: 4096,
            accounts_file: None,
            content_file: None,
            motd: "Welcome to NetGore! Type /tell <name> <text> to whisper.".to_string(),
            stats_file: None,
            stats_dump_rate_ms: 10_000,
            position_sync_rate_ms: 100,
            world_seed: 0,
        }
    }
}

impl ServerSettings {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let settings: Self = load_toml(path)?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.update_rate_ms == 0 {
            return Err(ConfigError::Invalid(
                "update_rate_ms must be greater than zero".to_string(),
            ));
        }
        if self.max_connections == 0 {
            return Err(ConfigError::Invalid(
                "max_connections must be greater than zero".to_string(),
            ));
        }
        if self.max_frame_size == 0 || self.max_frame_size > u16::MAX as usize {
            return Err(ConfigError::Invalid(format!(
                "max_frame_size must be between 1 and {}",
                u16::MAX
            )));
        }
        Ok(())
    }

    pub fn tick_duration(&self) -> Duration {
        Duration::from_millis(self.update_rate_ms)
    }

    /// The MOTD, or `None` when it is disabled.
    pub fn motd(&self) -> Option<&str> {
        let motd = self.motd.trim();
        (!motd.is_empty()).then_some(motd)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_file_gives_defaults() {
        let settings: ServerSettings = toml::from_str("").unwrap();
        assert_eq!(settings, ServerSettings::default());
        assert_eq!(settings.tick_duration(), Duration::from_millis(5));
        assert_eq!(settings.idle_timeout_ms, 5_000);
        assert_eq!(settings.purge_interval_ms, 60_000);
    }

    #[test]
    fn test_partial_file_overrides_only_given_keys() {
        let settings: ServerSettings = toml::from_str(
            r#"
            bind_address = "0.0.0.0:5000"
            idle_timeout_ms = 1500
            motd = ""
            "#,
        )
        .unwrap();

        assert_eq!(settings.bind_address, "0.0.0.0:5000");
        assert_eq!(settings.idle_timeout_ms, 1500);
        assert_eq!(settings.purge_interval_ms, 60_000);
        assert_eq!(settings.motd(), None);
    }

    #[test]
    fn test_validation_rejects_zero_tick() {
        let settings = ServerSettings {
            update_rate_ms: 0,
            ..Default::default()
        };
        assert!(matches!(settings.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_validation_rejects_frames_above_length_prefix() {
        let settings = ServerSettings {
            max_frame_size: 70_000,
            ..Default::default()
        };
        assert!(settings.validate().is_err());
        assert!(ServerSettings::default().validate().is_ok());
    }

    #[test]
    fn test_missing_file_reports_path() {
        let err = ServerSettings::load(Path::new("/nonexistent/server.toml")).unwrap_err();
        match err {
            ConfigError::Io { path, .. } => {
                assert_eq!(path, PathBuf::from("/nonexistent/server.toml"))
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
