//! `key = value` configuration file reader shared by the coordinator and
//! client binaries.
//!
//! The format is deliberately simple: one `key = value` pair per line,
//! blank lines and `#`-prefixed comments are skipped, and values are either
//! double-quoted strings or bare literals (integers, floats, booleans).
//! Unknown keys are warned about and otherwise ignored rather than treated
//! as a hard error, matching the tolerant reader this format was modeled
//! on.

use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::str::FromStr;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read configuration file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed line in {path}: {line:?}")]
    MalformedLine { path: String, line: String },
    #[error("key {key} expects a value convertible to {expected}, got {value:?}")]
    InvalidValue {
        key: String,
        expected: &'static str,
        value: String,
    },
    #[error("missing required key {0}")]
    MissingKey(String),
}

/// Parsed `key = value` settings, plus lookups with typed defaults.
#[derive(Debug, Default, Clone)]
pub struct Configuration {
    values: HashMap<String, String>,
}

impl Configuration {
    /// Read and parse `path`. `known_keys` is used only to decide whether
    /// to emit a `tracing::warn!` for an unrecognized key; unknown keys
    /// are still stored and retrievable.
    pub fn read(path: &Path, known_keys: &[&str]) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let mut values = HashMap::new();
        for raw_line in text.lines() {
            let line = raw_line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let Some((key, value)) = line.split_once('=') else {
                return Err(ConfigError::MalformedLine {
                    path: path.display().to_string(),
                    line: raw_line.to_string(),
                });
            };
            let key = key.trim().to_string();
            let value = parse_value(value.trim());
            if !known_keys.is_empty() && !known_keys.contains(&key.as_str()) {
                tracing::warn!(%key, file = %path.display(), "unknown setting in configuration file");
            }
            values.insert(key, value);
        }
        Ok(Self { values })
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    pub fn get_str(&self, key: &str, default: &str) -> String {
        self.values
            .get(key)
            .map_or_else(|| default.to_string(), Clone::clone)
    }

    pub fn get_required(&self, key: &str) -> Result<&str, ConfigError> {
        self.get(key)
            .ok_or_else(|| ConfigError::MissingKey(key.to_string()))
    }

    pub fn get_parsed<T>(&self, key: &str, default: T) -> Result<T, ConfigError>
    where
        T: FromStr,
    {
        match self.values.get(key) {
            None => Ok(default),
            Some(raw) => raw.parse().map_err(|_| ConfigError::InvalidValue {
                key: key.to_string(),
                expected: std::any::type_name::<T>(),
                value: raw.clone(),
            }),
        }
    }
}

/// Strip surrounding double quotes from a quoted value, or return the bare
/// literal unchanged. The original format allowed arbitrary Python
/// expressions here; we only need bare numbers/bools/paths, so unquoted
/// values pass through verbatim for `FromStr` to interpret.
fn parse_value(value: &str) -> String {
    if value.len() >= 2 && value.starts_with('"') && value.ends_with('"') {
        value[1..value.len() - 1].to_string()
    } else {
        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_fixture(contents: &str) -> tempfile::NamedTempFile {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        write!(f, "{contents}").unwrap();
        f
    }

    #[test]
    fn reads_bare_and_quoted_values() {
        let f = write_fixture(
            "# comment\n\nPORT = 4711\nDB_FILE = \"/var/cache/index.db\"\n",
        );
        let cfg = Configuration::read(f.path(), &["PORT", "DB_FILE"]).unwrap();
        assert_eq!(cfg.get("PORT"), Some("4711"));
        assert_eq!(cfg.get("DB_FILE"), Some("/var/cache/index.db"));
    }

    #[test]
    fn get_parsed_returns_default_when_absent() {
        let f = write_fixture("PORT = 4711\n");
        let cfg = Configuration::read(f.path(), &["PORT"]).unwrap();
        let max_age: u64 = cfg.get_parsed("MAX_AGE", 86400).unwrap();
        assert_eq!(max_age, 86400);
        let port: u16 = cfg.get_parsed("PORT", 0).unwrap();
        assert_eq!(port, 4711);
    }

    #[test]
    fn invalid_numeric_value_is_an_error() {
        let f = write_fixture("PORT = not-a-number\n");
        let cfg = Configuration::read(f.path(), &["PORT"]).unwrap();
        let result: Result<u16, _> = cfg.get_parsed("PORT", 0);
        assert!(result.is_err());
    }

    #[test]
    fn unknown_key_is_retained_but_warned() {
        let f = write_fixture("SURPRISE = 1\n");
        let cfg = Configuration::read(f.path(), &["PORT"]).unwrap();
        assert_eq!(cfg.get("SURPRISE"), Some("1"));
    }

    #[test]
    fn missing_file_is_an_error() {
        let result = Configuration::read(Path::new("/nonexistent/path.conf"), &[]);
        assert!(result.is_err());
    }
}
