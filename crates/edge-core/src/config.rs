//! Cache configuration, loaded once at startup.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Errors raised while loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {message}")]
    Parse { path: String, message: String },

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Configuration for request normalization and cache policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Query parameters removed before keying (client-side tracking).
    #[serde(default = "default_ignored_query_params")]
    pub ignored_query_params: Vec<String>,

    /// Request headers that participate in the cache key.
    #[serde(default)]
    pub vary_headers: Vec<String>,

    /// Cookie names that participate in the cache key.
    #[serde(default)]
    pub vary_cookies: Vec<String>,

    /// Freshness lifetime used when the origin declares none.
    #[serde(default = "default_ttl_secs")]
    pub default_ttl_secs: u64,

    /// Extra store lifetime for entries with validators.
    #[serde(default = "default_revalidation_window_secs")]
    pub revalidation_window_secs: u64,

    /// Fraction of `Date - Last-Modified` used as heuristic freshness.
    #[serde(default = "default_heuristic_fraction")]
    pub heuristic_fraction: f64,

    /// Upper bound on heuristic freshness.
    #[serde(default = "default_max_heuristic_ttl_secs")]
    pub max_heuristic_ttl_secs: u64,

    /// Path extensions whose responses never vary by cookie.
    #[serde(default = "default_static_file_extensions")]
    pub static_file_extensions: Vec<String>,

    /// Always emit key/TTL debug headers.
    #[serde(default)]
    pub explain_headers: bool,
}

fn default_ignored_query_params() -> Vec<String> {
    [
        "utm_source",
        "utm_medium",
        "utm_campaign",
        "utm_content",
        "utm_term",
        "gclid",
        "fbclid",
        "msclkid",
        "cx",
        "ie",
        "cof",
        "siteurl",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_ttl_secs() -> u64 {
    10
}

fn default_revalidation_window_secs() -> u64 {
    300
}

fn default_heuristic_fraction() -> f64 {
    0.1
}

fn default_max_heuristic_ttl_secs() -> u64 {
    86_400
}

fn default_static_file_extensions() -> Vec<String> {
    [
        "7z", "avi", "bz2", "flac", "flv", "gz", "mka", "mkv", "mov", "mp3", "mp4", "mpeg",
        "mpg", "ogg", "ogm", "opus", "rar", "tar", "tgz", "tbz", "txz", "wav", "webm", "xz",
        "zip",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ignored_query_params: default_ignored_query_params(),
            vary_headers: Vec::new(),
            vary_cookies: Vec::new(),
            default_ttl_secs: default_ttl_secs(),
            revalidation_window_secs: default_revalidation_window_secs(),
            heuristic_fraction: default_heuristic_fraction(),
            max_heuristic_ttl_secs: default_max_heuristic_ttl_secs(),
            static_file_extensions: default_static_file_extensions(),
            explain_headers: false,
        }
    }
}

impl CacheConfig {
    /// Load config from a TOML file, or JSON when the path ends in `.json`.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let display = path.display().to_string();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: display.clone(),
            source,
        })?;

        let is_json = path.extension().is_some_and(|ext| ext == "json");
        let config = Self::parse(&content, is_json).map_err(|message| ConfigError::Parse {
            path: display,
            message,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Parse config text.
    pub fn parse(content: &str, is_json: bool) -> Result<Self, String> {
        if is_json {
            serde_json::from_str(content).map_err(|e| e.to_string())
        } else {
            toml::from_str(content).map_err(|e| e.to_string())
        }
    }

    /// Serialize to TOML.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::Invalid(e.to_string()))
    }

    /// Check semantic constraints serde cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.heuristic_fraction > 0.0 && self.heuristic_fraction <= 1.0) {
            return Err(ConfigError::Invalid(format!(
                "heuristic_fraction must be in (0, 1], got {}",
                self.heuristic_fraction
            )));
        }
        if self.ignored_query_params.iter().any(|p| p.is_empty()) {
            return Err(ConfigError::Invalid(
                "ignored_query_params contains an empty name".to_string(),
            ));
        }
        if self.vary_headers.iter().any(|h| h.trim().is_empty()) {
            return Err(ConfigError::Invalid(
                "vary_headers contains an empty name".to_string(),
            ));
        }
        Ok(())
    }

    /// Freshness lifetime used when the origin declares none.
    pub fn default_ttl(&self) -> Duration {
        Duration::from_secs(self.default_ttl_secs)
    }

    /// Extra store lifetime for entries with validators.
    pub fn revalidation_window(&self) -> Duration {
        Duration::from_secs(self.revalidation_window_secs)
    }
}

/// Generate a commented default `edge-cache.toml`.
pub fn generate_default_config() -> String {
    r#"# Edge cache configuration

# Query parameters stripped before keying.
ignored_query_params = [
  "utm_source", "utm_medium", "utm_campaign", "utm_content", "utm_term",
  "gclid", "fbclid", "msclkid", "cx", "ie", "cof", "siteurl",
]

# Request headers the origin varies on.
vary_headers = ["accept-encoding"]

# Cookie names the origin varies on. Other cookies never fragment the cache.
vary_cookies = []

# Freshness lifetime when the origin sends no caching headers.
default_ttl_secs = 10

# How long entries with an ETag or Last-Modified outlive their freshness.
revalidation_window_secs = 300

heuristic_fraction = 0.1
max_heuristic_ttl_secs = 86400

explain_headers = false
"#
    .to_string()
}
