//! Daemon configuration: TOML file with environment overrides.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

/// Default port carried in the pairing QR payload on the sharing side.
pub const DEFAULT_PORT: u16 = 37899;

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Port the share server listens on and the fetch client dials.
    #[serde(default = "default_listen_port")]
    pub listen_port: u16,
    /// Where fetched files land.
    #[serde(default = "default_save_dir")]
    pub save_dir: PathBuf,
    /// Worker pool size, i.e. concurrent connection sessions.
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Socket read timeout. Generous because a transfer may sit idle while
    /// the peer device screen is off.
    #[serde(default = "default_read_timeout_secs")]
    pub read_timeout_secs: u64,
}

fn default_listen_port() -> u16 {
    DEFAULT_PORT
}

fn default_save_dir() -> PathBuf {
    match std::env::var_os("HOME") {
        Some(home) => PathBuf::from(home).join("Downloads"),
        None => std::env::temp_dir(),
    }
}

fn default_workers() -> usize {
    4
}

fn default_read_timeout_secs() -> u64 {
    3600
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_port: default_listen_port(),
            save_dir: default_save_dir(),
            workers: default_workers(),
            read_timeout_secs: default_read_timeout_secs(),
        }
    }
}

impl Config {
    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout_secs)
    }

    fn from_file(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&text)?)
    }

    /// Load from the user config, then the system config, then defaults;
    /// `BEAM_*` environment variables override whatever was loaded.
    pub fn load() -> Self {
        let mut config = Self::candidate_paths()
            .into_iter()
            .find(|p| p.exists())
            .and_then(|p| match Self::from_file(&p) {
                Ok(c) => {
                    tracing::debug!(path = %p.display(), "config loaded");
                    Some(c)
                }
                Err(err) => {
                    tracing::warn!(path = %p.display(), error = %err, "config unreadable, using defaults");
                    None
                }
            })
            .unwrap_or_default();
        config.apply_env();
        config
    }

    fn candidate_paths() -> Vec<PathBuf> {
        let mut paths = Vec::new();
        if let Some(home) = std::env::var_os("HOME") {
            paths.push(PathBuf::from(home).join(".config/beam/config.toml"));
        }
        paths.push(PathBuf::from("/etc/beam/config.toml"));
        paths
    }

    fn apply_env(&mut self) {
        if let Ok(port) = std::env::var("BEAM_LISTEN_PORT") {
            if let Ok(port) = port.parse() {
                self.listen_port = port;
            }
        }
        if let Ok(dir) = std::env::var("BEAM_SAVE_DIR") {
            self.save_dir = PathBuf::from(dir);
        }
        if let Ok(workers) = std::env::var("BEAM_WORKERS") {
            if let Ok(workers) = workers.parse() {
                self.workers = workers;
            }
        }
        if let Ok(secs) = std::env::var("BEAM_READ_TIMEOUT_SECS") {
            if let Ok(secs) = secs.parse() {
                self.read_timeout_secs = secs;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = Config::default();
        assert_eq!(config.listen_port, 37899);
        assert_eq!(config.workers, 4);
        assert_eq!(config.read_timeout(), Duration::from_secs(3600));
    }

    #[test]
    fn partial_file_fills_defaults() {
        let config: Config = toml::from_str("listen_port = 8080\nworkers = 2\n").unwrap();
        assert_eq!(config.listen_port, 8080);
        assert_eq!(config.workers, 2);
        assert_eq!(config.read_timeout_secs, 3600);
    }

    #[test]
    fn unknown_keys_rejected() {
        assert!(toml::from_str::<Config>("listen_protocol = \"quic\"\n").is_err());
    }
}
