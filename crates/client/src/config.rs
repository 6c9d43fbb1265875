//! Client-specific configuration keys layered on
//! [`core::config::Configuration`].

use std::path::{Path, PathBuf};

use core::{ConfigError, Configuration};

const KNOWN_KEYS: &[&str] = &[
    "MASTER_HOST",
    "MASTER_PORT",
    "CACHE_DIR",
    "MIN_FREE",
    "MAX_USAGE",
    "MIN_AGE",
    "SOCKET_TIMEOUT",
    "STAT_TIMEOUT",
    "IGNORE_BUNDLE",
];

#[derive(Debug, Clone)]
pub struct ClientSettings {
    pub master_host: String,
    pub master_port: u16,
    pub cache_dir_template: String,
    pub min_free: u64,
    pub max_usage: f64,
    pub min_age: u64,
    pub socket_timeout: u64,
    pub stat_timeout: u64,
    pub ignore_bundle: bool,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            master_host: "localhost".to_string(),
            master_port: 4711,
            cache_dir_template: "/var/cache/cachesync/$(USER)/$(HOST)".to_string(),
            min_free: 1024 * 1024 * 1024,
            max_usage: 90.0,
            min_age: 3600,
            socket_timeout: 60,
            stat_timeout: 10,
            ignore_bundle: false,
        }
    }
}

impl ClientSettings {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let cfg = Configuration::read(path, KNOWN_KEYS)?;
        let defaults = Self::default();
        Ok(Self {
            master_host: cfg.get_str("MASTER_HOST", &defaults.master_host),
            master_port: cfg.get_parsed("MASTER_PORT", defaults.master_port)?,
            cache_dir_template: cfg.get_str("CACHE_DIR", &defaults.cache_dir_template),
            min_free: cfg.get_parsed("MIN_FREE", defaults.min_free)?,
            max_usage: cfg.get_parsed("MAX_USAGE", defaults.max_usage)?,
            min_age: cfg.get_parsed("MIN_AGE", defaults.min_age)?,
            socket_timeout: cfg.get_parsed("SOCKET_TIMEOUT", defaults.socket_timeout)?,
            stat_timeout: cfg.get_parsed("STAT_TIMEOUT", defaults.stat_timeout)?,
            ignore_bundle: cfg.get_parsed("IGNORE_BUNDLE", defaults.ignore_bundle)?,
        })
    }

    /// Expand the `$(USER)`/`$(HOST)` placeholders against the running
    /// user and local hostname.
    #[must_use]
    pub fn cache_dir(&self) -> PathBuf {
        let user = std::env::var("USER").unwrap_or_else(|_| "unknown".to_string());
        let host = self.hostname();
        PathBuf::from(self.cache_dir_template.replace("$(USER)", &user).replace("$(HOST)", &host))
    }

    #[must_use]
    pub fn hostname(&self) -> String {
        hostname()
    }
}

fn hostname() -> String {
    let mut buf = [0u8; 256];
    // SAFETY: `buf` is a valid writable buffer of the given length; gethostname
    // writes at most that many bytes and NUL-terminates on success.
    let rc = unsafe { libc::gethostname(buf.as_mut_ptr().cast(), buf.len()) };
    if rc != 0 {
        return "localhost".to_string();
    }
    let len = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
    std::str::from_utf8(&buf[..len]).map_or_else(|_| "localhost".to_string(), str::to_string)
}
