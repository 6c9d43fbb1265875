//! Coordinator-specific configuration keys layered on
//! [`core::config::Configuration`].

use std::path::{Path, PathBuf};

use core::{ConfigError, Configuration};

const KNOWN_KEYS: &[&str] = &[
    "PORT",
    "CONNECTION_QUEUE",
    "MAX_COPY_SERVER",
    "MAX_COPY_NODE",
    "DB_FILE",
    "DB_SAVE_INTERVAL",
    "STAT_INTERVAL",
    "CLEANUP_INTERVAL",
    "SOCKET_TIMEOUT",
    "MAX_WAIT_COPY",
    "CLIENT_WAIT",
    "MAX_AGE",
];

#[derive(Debug, Clone)]
pub struct CoordinatorSettings {
    pub port: u16,
    pub connection_queue: u32,
    pub max_copy_server: u32,
    pub max_copy_node: u32,
    pub db_file: PathBuf,
    pub db_save_interval: u64,
    pub stat_interval: u64,
    pub cleanup_interval: u64,
    pub socket_timeout: u64,
    pub max_wait_copy: u64,
    pub client_wait: u64,
    pub max_age: u64,
}

impl Default for CoordinatorSettings {
    fn default() -> Self {
        Self {
            port: 4711,
            connection_queue: 10,
            max_copy_server: 10,
            max_copy_node: 2,
            db_file: PathBuf::from("/var/cache/cachesync/index.db"),
            db_save_interval: 300,
            stat_interval: 60,
            cleanup_interval: 3600,
            socket_timeout: 60,
            max_wait_copy: 300,
            client_wait: 30,
            max_age: 7 * 86_400,
        }
    }
}

impl CoordinatorSettings {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let cfg = Configuration::read(path, KNOWN_KEYS)?;
        let defaults = Self::default();
        Ok(Self {
            port: cfg.get_parsed("PORT", defaults.port)?,
            connection_queue: cfg.get_parsed("CONNECTION_QUEUE", defaults.connection_queue)?,
            max_copy_server: cfg.get_parsed("MAX_COPY_SERVER", defaults.max_copy_server)?,
            max_copy_node: cfg.get_parsed("MAX_COPY_NODE", defaults.max_copy_node)?,
            db_file: PathBuf::from(cfg.get_str("DB_FILE", defaults.db_file.to_str().unwrap_or_default())),
            db_save_interval: cfg.get_parsed("DB_SAVE_INTERVAL", defaults.db_save_interval)?,
            stat_interval: cfg.get_parsed("STAT_INTERVAL", defaults.stat_interval)?,
            cleanup_interval: cfg.get_parsed("CLEANUP_INTERVAL", defaults.cleanup_interval)?,
            socket_timeout: cfg.get_parsed("SOCKET_TIMEOUT", defaults.socket_timeout)?,
            max_wait_copy: cfg.get_parsed("MAX_WAIT_COPY", defaults.max_wait_copy)?,
            client_wait: cfg.get_parsed("CLIENT_WAIT", defaults.client_wait)?,
            max_age: cfg.get_parsed("MAX_AGE", defaults.max_age)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn loads_overrides_and_falls_back_to_defaults() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        writeln!(f, "PORT = 9000\nMAX_COPY_NODE = 3\n").unwrap();
        let settings = CoordinatorSettings::load(f.path()).unwrap();
        assert_eq!(settings.port, 9000);
        assert_eq!(settings.max_copy_node, 3);
        assert_eq!(settings.max_copy_server, CoordinatorSettings::default().max_copy_server);
    }
}
