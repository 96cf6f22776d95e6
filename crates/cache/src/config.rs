//! Cache configuration
//!
//! Programmatic defaults, environment overrides, and a line-oriented
//! `key = value` config file format. Unknown file keys are ignored so
//! configs can be shared across versions.

use std::env;
use std::fs;
use std::io;
use std::path::Path;
use std::time::Duration;

use thiserror::Error;
use tracing::warn;

use crate::artifact::ArtifactCache;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {key}: {value}")]
    InvalidValue { key: String, value: String },

    #[error("config io error: {0}")]
    Io(#[from] io::Error),
}

/// Artifact cache configuration
#[derive(Debug, Clone, PartialEq)]
pub struct CacheConfig {
    /// Byte ceiling
    pub max_memory: usize,

    /// Entry ceiling
    pub max_items: usize,

    /// Per-entry maximum age; zero disables aging
    pub item_max_age: Duration,

    /// Eviction policy tag
    pub eviction_policy: String,

    /// Eviction score weight for Low priority
    pub weight_low: f64,

    /// Eviction score weight for Normal priority
    pub weight_normal: f64,

    /// Eviction score weight for High priority
    pub weight_high: f64,

    pub preloading_enabled: bool,
    pub preloading_strategy: String,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_memory: 256 * 1024 * 1024,
            max_items: 1000,
            item_max_age: Duration::from_secs(30 * 60),
            eviction_policy: "LRU".to_string(),
            weight_low: 0.1,
            weight_normal: 1.0,
            weight_high: 10.0,
            preloading_enabled: true,
            preloading_strategy: "adaptive".to_string(),
        }
    }
}

impl CacheConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_memory_mb(mut self, megabytes: usize) -> Self {
        self.max_memory = megabytes * 1024 * 1024;
        self
    }

    pub fn with_max_items(mut self, max_items: usize) -> Self {
        self.max_items = max_items;
        self
    }

    pub fn with_item_max_age_secs(mut self, seconds: u64) -> Self {
        self.item_max_age = Duration::from_secs(seconds);
        self
    }

    pub fn with_eviction_policy(mut self, policy: impl Into<String>) -> Self {
        self.eviction_policy = policy.into();
        self
    }

    pub fn with_priority_weights(mut self, low: f64, normal: f64, high: f64) -> Self {
        self.weight_low = low;
        self.weight_normal = normal;
        self.weight_high = high;
        self
    }

    pub fn with_preloading(mut self, enabled: bool, strategy: impl Into<String>) -> Self {
        self.preloading_enabled = enabled;
        self.preloading_strategy = strategy.into();
        self
    }

    pub fn max_memory_mb(&self) -> usize {
        self.max_memory / (1024 * 1024)
    }

    /// Load configuration from the environment
    ///
    /// Recognized variables: `VIEWER_CACHE_MAX_MEMORY_MB`,
    /// `VIEWER_CACHE_MAX_ITEMS`, `VIEWER_CACHE_MAX_AGE_SECS`,
    /// `VIEWER_CACHE_EVICTION_POLICY`, `VIEWER_CACHE_PRELOADING`,
    /// `VIEWER_CACHE_PRELOAD_STRATEGY`. Unparseable values keep the
    /// default and log a warning.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(value) = env::var("VIEWER_CACHE_MAX_MEMORY_MB") {
            match value.parse::<usize>() {
                Ok(mb) => config.max_memory = mb * 1024 * 1024,
                Err(_) => warn!(value = %value, "ignoring bad VIEWER_CACHE_MAX_MEMORY_MB"),
            }
        }
        if let Ok(value) = env::var("VIEWER_CACHE_MAX_ITEMS") {
            match value.parse::<usize>() {
                Ok(items) => config.max_items = items,
                Err(_) => warn!(value = %value, "ignoring bad VIEWER_CACHE_MAX_ITEMS"),
            }
        }
        if let Ok(value) = env::var("VIEWER_CACHE_MAX_AGE_SECS") {
            match value.parse::<u64>() {
                Ok(secs) => config.item_max_age = Duration::from_secs(secs),
                Err(_) => warn!(value = %value, "ignoring bad VIEWER_CACHE_MAX_AGE_SECS"),
            }
        }
        if let Ok(value) = env::var("VIEWER_CACHE_EVICTION_POLICY") {
            config.eviction_policy = value;
        }
        if let Ok(value) = env::var("VIEWER_CACHE_PRELOADING") {
            match parse_bool(&value) {
                Some(enabled) => config.preloading_enabled = enabled,
                None => warn!(value = %value, "ignoring bad VIEWER_CACHE_PRELOADING"),
            }
        }
        if let Ok(value) = env::var("VIEWER_CACHE_PRELOAD_STRATEGY") {
            config.preloading_strategy = value;
        }

        config
    }

    /// Load configuration from a `key = value` file
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path)?;
        Self::from_str_contents(&contents)
    }

    /// Parse `key = value` lines; `#` starts a comment, unknown keys are
    /// ignored, values may be quoted
    pub fn from_str_contents(contents: &str) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        for line in contents.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') || line.starts_with('[') {
                continue;
            }
            let Some((key, value)) = line.split_once('=') else {
                continue;
            };
            let key = key.trim();
            let value = value.trim().trim_matches('"');

            match key {
                "max_memory_mb" => {
                    config.max_memory = parse_value::<usize>(key, value)? * 1024 * 1024;
                }
                "max_items" => {
                    config.max_items = parse_value(key, value)?;
                }
                "item_max_age_secs" => {
                    config.item_max_age = Duration::from_secs(parse_value(key, value)?);
                }
                "eviction_policy" => {
                    config.eviction_policy = value.to_string();
                }
                "weight_low" => {
                    config.weight_low = parse_value(key, value)?;
                }
                "weight_normal" => {
                    config.weight_normal = parse_value(key, value)?;
                }
                "weight_high" => {
                    config.weight_high = parse_value(key, value)?;
                }
                "preloading_enabled" => {
                    config.preloading_enabled =
                        parse_bool(value).ok_or_else(|| ConfigError::InvalidValue {
                            key: key.to_string(),
                            value: value.to_string(),
                        })?;
                }
                "preloading_strategy" => {
                    config.preloading_strategy = value.to_string();
                }
                _ => {} // unknown keys are ignored
            }
        }

        Ok(config)
    }

    /// Serialize to the config file format
    pub fn to_config_string(&self) -> String {
        format!(
            "# Viewer cache configuration\n\
             max_memory_mb = {}\n\
             max_items = {}\n\
             item_max_age_secs = {}\n\
             eviction_policy = \"{}\"\n\
             weight_low = {}\n\
             weight_normal = {}\n\
             weight_high = {}\n\
             preloading_enabled = {}\n\
             preloading_strategy = \"{}\"\n",
            self.max_memory_mb(),
            self.max_items,
            self.item_max_age.as_secs(),
            self.eviction_policy,
            self.weight_low,
            self.weight_normal,
            self.weight_high,
            self.preloading_enabled,
            self.preloading_strategy,
        )
    }

    pub fn save_to_file(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, self.to_config_string())?;
        Ok(())
    }

    /// Apply this configuration to an artifact cache
    pub fn apply(&self, cache: &ArtifactCache) {
        use crate::component::CacheComponent;

        cache.set_max_memory_limit(self.max_memory);
        cache.set_max_items(self.max_items);
        cache.set_item_max_age(self.item_max_age);
        cache.set_eviction_policy(&self.eviction_policy);
        cache.set_priority_weights(self.weight_low, self.weight_normal, self.weight_high);
        cache.set_preloading_enabled(self.preloading_enabled);
        cache.set_preloading_strategy(&self.preloading_strategy);
    }
}

fn parse_value<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value.parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
