//! Configuration loading
//!
//! Engine settings come from a TOML file. Every field has a built-in default,
//! so a missing file (or a file naming only a few keys) is fine. The file is
//! located in priority order:
//! 1. Command-line argument (highest priority)
//! 2. `SFR_CONFIG` environment variable
//! 3. Platform config directory: `<config_dir>/studyfindr/config.toml`
//! 4. None: built-in defaults

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

/// Environment variable naming the config file
pub const CONFIG_ENV_VAR: &str = "SFR_CONFIG";

/// Complete engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Base URL of the StudyFindr API
    pub api_base_url: String,

    /// Upper bound for any single backend call
    pub request_timeout_ms: u64,

    /// EventBus buffer size
    pub event_bus_capacity: usize,

    pub feed: FeedConfig,
    pub categories: CategoryConfig,
    pub logging: LoggingConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            api_base_url: "http://localhost:5000".to_string(),
            request_timeout_ms: 10_000,
            event_bus_capacity: 256,
            feed: FeedConfig::default(),
            categories: CategoryConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

/// Review feed and aggregation paging
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedConfig {
    /// Reviews per infinite-scroll page
    pub page_size: u32,
    /// Reviews per request when walking a full review list for aggregation
    pub aggregate_page_size: u32,
    /// Number of commented reviews shown in the selection preview
    pub comment_preview_len: usize,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            page_size: 5,
            aggregate_page_size: 100,
            comment_preview_len: 3,
        }
    }
}

/// Category thresholds and study-candidate name lists
///
/// These are product-tuning values; the defaults are the ones the web client
/// shipped with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CategoryConfig {
    /// Minimum mean quietness for "Quiet Study"
    pub quiet_min: f64,
    /// Minimum mean seating for "Convenience Study"
    pub convenience_seating_min: f64,
    /// Minimum mean internet for "Convenience Study"
    pub convenience_internet_min: f64,
    /// Minimum overall score for "Popular Study"
    pub popular_overall_min: f64,
    /// Minimum review count for "Popular Study"
    pub popular_min_reviews: usize,
    /// Ranked categories are truncated to this many entries
    pub top_n: usize,
    /// Concurrent aggregate fetches while ranking
    pub max_concurrent_fetches: usize,
    /// Cafe chains that are always study candidates
    pub cafe_allow_list: Vec<String>,
    /// Name terms that disqualify a cafe not on the allow list
    pub cafe_deny_list: Vec<String>,
}

impl Default for CategoryConfig {
    fn default() -> Self {
        Self {
            quiet_min: 3.0,
            convenience_seating_min: 3.5,
            convenience_internet_min: 3.5,
            popular_overall_min: 3.5,
            popular_min_reviews: 1,
            top_n: 15,
            max_concurrent_fetches: 4,
            cafe_allow_list: [
                "starbucks",
                "panera",
                "barnes & noble",
                "pascal's coffeehouse",
                "wolfgang's",
                "concord coffee",
                "opus coffee",
                "maude's",
                "coffee culture",
                "first magnitude",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            cafe_deny_list: [
                "bar", "pub", "tavern", "brewery", "lounge", "nightclub", "hookah", "drive-thru",
                "dunkin", "donut", "smoothie", "bubble tea", "boba",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl EngineConfig {
    /// Parse and validate a TOML document
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: EngineConfig =
            toml::from_str(content).map_err(|e| Error::Config(format!("Invalid TOML: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a file; a missing file yields the defaults
    pub fn load_file(path: &Path) -> Result<Self> {
        match std::fs::read_to_string(path) {
            Ok(content) => {
                info!("Loading configuration from {}", path.display());
                Self::from_toml_str(&content)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!(
                    "Config file {} not found, using built-in defaults",
                    path.display()
                );
                Ok(Self::default())
            }
            Err(e) => Err(Error::Io(e)),
        }
    }

    /// Resolve the config file location and load it
    pub fn load(cli_arg: Option<&Path>) -> Result<Self> {
        match resolve_config_path(cli_arg) {
            Some(path) => Self::load_file(&path),
            None => {
                info!("No config file found, using built-in defaults");
                Ok(Self::default())
            }
        }
    }

    /// Reject values no component can work with
    pub fn validate(&self) -> Result<()> {
        if self.request_timeout_ms == 0 {
            return Err(Error::Config("request_timeout_ms must be positive".to_string()));
        }
        if self.feed.page_size == 0 || self.feed.aggregate_page_size == 0 {
            return Err(Error::Config("page sizes must be positive".to_string()));
        }
        if self.categories.top_n == 0 || self.categories.max_concurrent_fetches == 0 {
            return Err(Error::Config(
                "top_n and max_concurrent_fetches must be positive".to_string(),
            ));
        }
        let thresholds = [
            ("quiet_min", self.categories.quiet_min),
            ("convenience_seating_min", self.categories.convenience_seating_min),
            ("convenience_internet_min", self.categories.convenience_internet_min),
            ("popular_overall_min", self.categories.popular_overall_min),
        ];
        for (name, value) in thresholds {
            if !(0.0..=5.0).contains(&value) {
                return Err(Error::Config(format!(
                    "{} must be between 0 and 5, got {}",
                    name, value
                )));
            }
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

/// Locate the config file following the documented priority order
pub fn resolve_config_path(cli_arg: Option<&Path>) -> Option<PathBuf> {
    // Priority 1: Command-line argument
    if let Some(path) = cli_arg {
        return Some(path.to_path_buf());
    }

    // Priority 2: Environment variable
    if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
        if !path.trim().is_empty() {
            return Some(PathBuf::from(path));
        }
    }

    // Priority 3: Platform config directory
    default_config_path().filter(|path| path.exists())
}

/// `<config_dir>/studyfindr/config.toml` for the current platform
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("studyfindr").join("config.toml"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.feed.page_size, 5);
        assert_eq!(config.categories.top_n, 15);
        assert_eq!(config.request_timeout(), Duration::from_secs(10));
    }

    #[test]
    fn test_partial_toml_keeps_other_defaults() {
        let config = EngineConfig::from_toml_str(
            r#"
            api_base_url = "https://api.example.edu"

            [categories]
            quiet_min = 3.5
            "#,
        )
        .unwrap();

        assert_eq!(config.api_base_url, "https://api.example.edu");
        assert_eq!(config.categories.quiet_min, 3.5);
        assert_eq!(config.categories.top_n, 15);
        assert_eq!(config.feed, FeedConfig::default());
    }

    #[test]
    fn test_invalid_values_rejected() {
        assert!(EngineConfig::from_toml_str("request_timeout_ms = 0").is_err());
        assert!(EngineConfig::from_toml_str("[feed]\npage_size = 0").is_err());
        assert!(EngineConfig::from_toml_str("[categories]\nquiet_min = 7.0").is_err());
        assert!(EngineConfig::from_toml_str("not toml at all [").is_err());
    }
}
