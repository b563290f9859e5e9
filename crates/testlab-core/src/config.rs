//! Configuration for the console and CLI.
//!
//! Key=value format, `#` comments, optional quotes around values.
//! Precedence: CLI flags / env > `--config` file > default file > defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, warn};

pub const DEFAULT_BASE_URL: &str = "http://127.0.0.1:8080";
pub const DEFAULT_API_PREFIX: &str = "/api/v1/testlab-service/testcases/projects";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),
    #[error("invalid config line: {0}")]
    InvalidLine(String),
    #[error("invalid integer value for {key}: {value}")]
    InvalidInt { key: String, value: String },
    #[error("unknown config key: {0}")]
    UnknownKey(String),
    #[error("no config directory available on this platform")]
    NoConfigDir,
}

/// Console configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// API base URL; persisted with `config set-base-url`.
    pub base_url: String,
    /// Path prefix under which project/module/test-case routes live.
    pub api_prefix: String,
    pub poll_interval_ms: u64,
    pub request_timeout_sec: u64,
    /// Where exported results land.
    pub export_dir: PathBuf,
    pub default_project: Option<String>,
    pub default_module: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            api_prefix: DEFAULT_API_PREFIX.to_string(),
            poll_interval_ms: 3000,
            request_timeout_sec: 30,
            export_dir: PathBuf::from("."),
            default_project: None,
            default_module: None,
        }
    }
}

impl Config {
    /// Default config file: `<config_dir>/testlab/config`.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("testlab").join("config"))
    }

    /// Defaults, then the default file if present, then `explicit` (which
    /// must exist).
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        if let Some(path) = Self::default_path().filter(|p| p.exists()) {
            debug!(path = %path.display(), "loading default config");
            config.load_file(&path)?;
        }
        if let Some(path) = explicit {
            debug!(path = %path.display(), "loading config");
            config.load_file(path)?;
        }
        Ok(config)
    }

    pub fn load_file(&mut self, path: &Path) -> Result<(), ConfigError> {
        let content = std::fs::read_to_string(path)?;
        self.parse_content(&content, &path.display().to_string())
    }

    fn parse_content(&mut self, content: &str, source: &str) -> Result<(), ConfigError> {
        for line in content.lines() {
            let Some((key, value)) = Self::parse_line(line)? else {
                continue;
            };
            self.apply_value(key, &value, source)?;
        }
        Ok(())
    }

    /// Split a line into key and unquoted value; `None` for blanks/comments.
    fn parse_line(line: &str) -> Result<Option<(&str, String)>, ConfigError> {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            return Ok(None);
        }
        let Some((key, value)) = trimmed.split_once('=') else {
            return Err(ConfigError::InvalidLine(line.to_string()));
        };
        Ok(Some((key.trim(), Self::unquote(value.trim()))))
    }

    fn unquote(value: &str) -> String {
        if value.len() >= 2
            && ((value.starts_with('"') && value.ends_with('"'))
                || (value.starts_with('\'') && value.ends_with('\'')))
        {
            return value[1..value.len() - 1].to_string();
        }
        value.to_string()
    }

    fn apply_value(&mut self, key: &str, value: &str, source: &str) -> Result<(), ConfigError> {
        match key {
            "base_url" => self.base_url = value.trim_end_matches('/').to_string(),
            "api_prefix" => self.api_prefix = value.to_string(),
            "poll_interval_ms" => {
                self.poll_interval_ms = Self::parse_int(key, value)?;
                if self.poll_interval_ms == 0 {
                    return Err(ConfigError::InvalidLine(
                        "poll_interval_ms must be greater than zero".to_string(),
                    ));
                }
            }
            "request_timeout_sec" => self.request_timeout_sec = Self::parse_int(key, value)?,
            "export_dir" => self.export_dir = PathBuf::from(value),
            "default_project" => self.default_project = non_empty(value),
            "default_module" => self.default_module = non_empty(value),
            _ => {
                warn!(key, source, "unknown config key");
            }
        }
        Ok(())
    }

    fn parse_int(key: &str, value: &str) -> Result<u64, ConfigError> {
        value.parse().map_err(|_| ConfigError::InvalidInt {
            key: key.to_string(),
            value: value.to_string(),
        })
    }

    /// Root of the scoped API: base URL joined with the prefix.
    pub fn api_root(&self) -> String {
        let base = self.base_url.trim_end_matches('/');
        let prefix = self.api_prefix.trim_matches('/');
        if prefix.is_empty() {
            base.to_string()
        } else {
            format!("{base}/{prefix}")
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_sec)
    }

    /// Effective values as key/value pairs, in file order.
    pub fn entries(&self) -> Vec<(&'static str, String)> {
        vec![
            ("base_url", self.base_url.clone()),
            ("api_prefix", self.api_prefix.clone()),
            ("poll_interval_ms", self.poll_interval_ms.to_string()),
            ("request_timeout_sec", self.request_timeout_sec.to_string()),
            ("export_dir", self.export_dir.display().to_string()),
            (
                "default_project",
                self.default_project.clone().unwrap_or_default(),
            ),
            (
                "default_module",
                self.default_module.clone().unwrap_or_default(),
            ),
        ]
    }

    /// Persist a single key in the file at `path`, keeping other lines.
    ///
    /// The value is validated by applying it to a scratch config first.
    pub fn set_value(path: &Path, key: &str, value: &str) -> Result<(), ConfigError> {
        if !Self::default().entries().iter().any(|(k, _)| *k == key) {
            return Err(ConfigError::UnknownKey(key.to_string()));
        }
        Self::default().apply_value(key, value, "set")?;

        let existing = if path.exists() {
            std::fs::read_to_string(path)?
        } else {
            String::new()
        };

        let mut replaced = false;
        let mut lines: Vec<String> = Vec::new();
        for line in existing.lines() {
            let is_key = matches!(Self::parse_line(line), Ok(Some((k, _))) if k == key);
            if is_key {
                if !replaced {
                    lines.push(format!("{key}={value}"));
                    replaced = true;
                }
            } else {
                lines.push(line.to_string());
            }
        }
        if !replaced {
            lines.push(format!("{key}={value}"));
        }

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut content = lines.join("\n");
        content.push('\n');
        std::fs::write(path, content)?;
        Ok(())
    }
}

fn non_empty(value: &str) -> Option<String> {
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn parse_config_content() {
        let content = r#"
# Comment line
base_url="http://testlab.local:9000/"
poll_interval_ms=500
request_timeout_sec=5
export_dir='/tmp/exports'
default_project=p-1
"#;

        let mut config = Config::default();
        config.parse_content(content, "test").unwrap();

        assert_eq!(config.base_url, "http://testlab.local:9000");
        assert_eq!(config.poll_interval(), Duration::from_millis(500));
        assert_eq!(config.request_timeout(), Duration::from_secs(5));
        assert_eq!(config.export_dir, PathBuf::from("/tmp/exports"));
        assert_eq!(config.default_project.as_deref(), Some("p-1"));
        assert_eq!(config.default_module, None);
    }

    #[test]
    fn defaults() {
        let config = Config::default();
        assert_eq!(config.base_url, DEFAULT_BASE_URL);
        assert_eq!(config.poll_interval_ms, 3000);
        assert_eq!(
            config.api_root(),
            "http://127.0.0.1:8080/api/v1/testlab-service/testcases/projects"
        );
    }

    #[test]
    fn api_root_with_empty_prefix() {
        let config = Config {
            api_prefix: String::new(),
            ..Config::default()
        };
        assert_eq!(config.api_root(), DEFAULT_BASE_URL);
    }

    #[test]
    fn invalid_values_are_errors() {
        let mut config = Config::default();
        assert!(matches!(
            config.parse_content("poll_interval_ms=soon", "test"),
            Err(ConfigError::InvalidInt { .. })
        ));
        assert!(config.parse_content("poll_interval_ms=0", "test").is_err());
        assert!(matches!(
            config.parse_content("no equals here", "test"),
            Err(ConfigError::InvalidLine(_))
        ));
    }

    #[test]
    fn unknown_keys_are_ignored() {
        let mut config = Config::default();
        config.parse_content("theme=dark", "test").unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn set_value_replaces_and_appends() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("config");

        Config::set_value(&path, "base_url", "http://a:1").unwrap();
        std::fs::write(&path, "# keep me\nbase_url=http://a:1\npoll_interval_ms=100\n").unwrap();
        Config::set_value(&path, "base_url", "http://b:2").unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content, "# keep me\nbase_url=http://b:2\npoll_interval_ms=100\n");

        let mut config = Config::default();
        config.load_file(&path).unwrap();
        assert_eq!(config.base_url, "http://b:2");
        assert_eq!(config.poll_interval_ms, 100);
    }

    #[test]
    fn set_value_rejects_unknown_or_invalid() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config");
        assert!(matches!(
            Config::set_value(&path, "theme", "dark"),
            Err(ConfigError::UnknownKey(_))
        ));
        assert!(Config::set_value(&path, "poll_interval_ms", "x").is_err());
        assert!(!path.exists());
    }
}
