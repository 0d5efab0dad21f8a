use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::marker::DEFAULT_MAX_MARKER_LEN;
use crate::splice::{
    DEFAULT_BEGIN_SENTINEL, DEFAULT_END_SENTINEL, MIN_SELECTION_CHARS, SpliceSettings,
};

/// Environment variable overriding `base_url`.
pub const BASE_URL_ENV: &str = "DRAFTFLOW_BASE_URL";

/// Returns the default config template with comments.
///
/// Embedded from default_config.toml at compile time.
fn default_config_template() -> &'static str {
    include_str!("../default_config.toml")
}

pub mod paths {
    //! Path resolution for draftflow configuration.
    //!
    //! DRAFTFLOW_HOME resolution order:
    //! 1. DRAFTFLOW_HOME environment variable (if set)
    //! 2. ~/.config/draftflow (default)

    use std::path::PathBuf;

    /// Returns the draftflow home directory.
    pub fn draftflow_home() -> PathBuf {
        if let Ok(home) = std::env::var("DRAFTFLOW_HOME") {
            return PathBuf::from(home);
        }

        dirs::home_dir()
            .map(|h| h.join(".config").join("draftflow"))
            .unwrap_or_else(|| PathBuf::from(".draftflow"))
    }

    /// Returns the path to the config.toml file.
    pub fn config_path() -> PathBuf {
        draftflow_home().join("config.toml")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    pub max_marker_len: usize,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            max_marker_len: DEFAULT_MAX_MARKER_LEN,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExpandConfig {
    pub min_selection_chars: usize,
    pub begin_sentinel: String,
    pub end_sentinel: String,
    pub context_chars: usize,
}

impl Default for ExpandConfig {
    fn default() -> Self {
        Self {
            min_selection_chars: MIN_SELECTION_CHARS,
            begin_sentinel: DEFAULT_BEGIN_SENTINEL.to_string(),
            end_sentinel: DEFAULT_END_SENTINEL.to_string(),
            context_chars: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `EnvFilter` directive used when `RUST_LOG` is unset.
    pub filter: String,
    /// Optional log file written alongside stderr.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "info".to_string(),
            file: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Writing backend root; `None` falls back to the built-in default.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    pub request_timeout_secs: u64,
    pub stream: StreamConfig,
    pub expand: ExpandConfig,
    pub logging: LoggingConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            base_url: None,
            request_timeout_secs: Self::DEFAULT_REQUEST_TIMEOUT_SECS,
            stream: StreamConfig::default(),
            expand: ExpandConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Config {
    pub const DEFAULT_BASE_URL: &str = "http://localhost:8000/api";
    const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

    /// Loads configuration from the default config path.
    ///
    /// # Errors
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load() -> Result<Self> {
        Self::load_from(&paths::config_path())
    }

    /// Loads configuration from a specific path.
    /// Returns defaults if file doesn't exist.
    ///
    /// # Errors
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let contents = fs::read_to_string(path)
                .with_context(|| format!("Failed to read config from {}", path.display()))?;
            toml::from_str(&contents)
                .with_context(|| format!("Failed to parse config from {}", path.display()))
        } else {
            Ok(Config::default())
        }
    }

    /// Creates a default config file at the given path.
    ///
    /// # Errors
    /// Returns an error if the file already exists or cannot be written.
    pub fn init(path: &Path) -> Result<()> {
        if path.exists() {
            anyhow::bail!("Config file already exists at {}", path.display());
        }

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory {}", parent.display()))?;
        }

        let tmp_path = path.with_extension("toml.tmp");
        fs::write(&tmp_path, default_config_template())
            .with_context(|| format!("Failed to write config to {}", tmp_path.display()))?;
        fs::rename(&tmp_path, path).with_context(|| {
            format!(
                "Failed to rename {} to {}",
                tmp_path.display(),
                path.display()
            )
        })?;

        Ok(())
    }

    /// Resolves the backend URL: `DRAFTFLOW_BASE_URL` > config > default.
    ///
    /// # Errors
    /// Returns an error if the chosen URL does not parse.
    pub fn effective_base_url(&self) -> Result<String> {
        let env_url = std::env::var(BASE_URL_ENV).ok();
        resolve_base_url(env_url.as_deref(), self.base_url.as_deref())
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn splice_settings(&self) -> SpliceSettings {
        SpliceSettings {
            min_selection_chars: self.expand.min_selection_chars,
            begin_sentinel: self.expand.begin_sentinel.clone(),
            end_sentinel: self.expand.end_sentinel.clone(),
            context_chars: self.expand.context_chars,
            max_marker_len: self.stream.max_marker_len,
        }
    }
}

/// Picks the first non-blank URL of `env_url`, `config_url`, then the default.
///
/// # Errors
/// Returns an error if the chosen URL does not parse.
pub fn resolve_base_url(env_url: Option<&str>, config_url: Option<&str>) -> Result<String> {
    let chosen = [env_url, config_url]
        .into_iter()
        .flatten()
        .map(str::trim)
        .find(|url| !url.is_empty());

    match chosen {
        Some(url) => {
            url::Url::parse(url).with_context(|| format!("Invalid backend base URL: {url}"))?;
            Ok(url.trim_end_matches('/').to_string())
        }
        None => Ok(Config::DEFAULT_BASE_URL.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;

    #[test]
    fn test_load_missing_file_returns_defaults() {
        let dir = tempdir().unwrap();
        let config = Config::load_from(&dir.path().join("nonexistent.toml")).unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.stream.max_marker_len, 128);
        assert_eq!(config.expand.min_selection_chars, 10);
    }

    #[test]
    fn test_load_partial_config_merges_defaults() {
        let dir = tempdir().unwrap();
        let config_path = dir.path().join("config.toml");
        fs::write(
            &config_path,
            "base_url = \"http://backend:9000/api\"\n[expand]\ncontext_chars = 40\n",
        )
        .unwrap();

        let config = Config::load_from(&config_path).unwrap();
        assert_eq!(config.base_url.as_deref(), Some("http://backend:9000/api"));
        assert_eq!(config.expand.context_chars, 40);
        assert_eq!(config.expand.begin_sentinel, DEFAULT_BEGIN_SENTINEL);
        assert_eq!(config.logging.filter, "info");
    }

    #[test]
    fn test_load_invalid_toml_reports_path() {
        let dir = tempdir().unwrap();
        let config_path = dir.path().join("config.toml");
        fs::write(&config_path, "request_timeout_secs = \"soon\"").unwrap();

        let err = Config::load_from(&config_path).unwrap_err();
        assert!(format!("{err:#}").contains("Failed to parse config"));
    }

    #[test]
    fn test_init_writes_template_matching_defaults() {
        let dir = tempdir().unwrap();
        let config_path = dir.path().join("subdir").join("config.toml");

        Config::init(&config_path).unwrap();

        let config = Config::load_from(&config_path).unwrap();
        assert_eq!(
            config,
            Config {
                base_url: Some(Config::DEFAULT_BASE_URL.to_string()),
                ..Config::default()
            }
        );
    }

    #[test]
    fn test_init_fails_if_exists() {
        let dir = tempdir().unwrap();
        let config_path = dir.path().join("config.toml");
        fs::write(&config_path, "").unwrap();

        assert!(Config::init(&config_path).is_err());
    }

    #[test]
    fn test_base_url_precedence() {
        assert_eq!(
            resolve_base_url(Some("http://env/api/"), Some("http://cfg/api")).unwrap(),
            "http://env/api"
        );
        assert_eq!(
            resolve_base_url(Some("  "), Some("http://cfg/api")).unwrap(),
            "http://cfg/api"
        );
        assert_eq!(
            resolve_base_url(None, None).unwrap(),
            Config::DEFAULT_BASE_URL
        );
        assert!(resolve_base_url(None, Some("not a url")).is_err());
    }

    #[test]
    fn test_splice_settings_follow_config() {
        let mut config = Config::default();
        config.expand.end_sentinel = "<<end>>".to_string();
        config.stream.max_marker_len = 64;

        let settings = config.splice_settings();
        assert_eq!(settings.end_sentinel, "<<end>>");
        assert_eq!(settings.max_marker_len, 64);
        assert_eq!(settings.min_selection_chars, MIN_SELECTION_CHARS);
    }
}
