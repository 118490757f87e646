//! Layered configuration for the deduplication pipeline.
//!
//! Configuration is loaded with precedence: CLI args > Env vars > Config file > Defaults
//!
//! # Example config file (orgmerge.toml)
//! ```toml
//! output_dir = "data"
//!
//! [remote]
//! base_url = "https://api.hubapi.com"
//! page_limit = 100
//!
//! [matcher]
//! min_score = 92.5
//! max_bucket_size = 150
//!
//! [merge]
//! dry_run = false
//! ```

use crate::matcher::MatcherConfig;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

/// Main configuration for a pipeline run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OrgmergeConfig {
    /// Remote store connection and retry settings
    pub remote: RemoteConfig,
    /// Fuzzy matcher thresholds and caps
    pub matcher: MatcherConfig,
    /// Merge execution settings
    pub merge: MergeConfig,
    /// Directory where CSV artifacts are written
    pub output_dir: String,
}

impl Default for OrgmergeConfig {
    fn default() -> Self {
        Self {
            remote: RemoteConfig::default(),
            matcher: MatcherConfig::default(),
            merge: MergeConfig::default(),
            output_dir: "data".to_string(),
        }
    }
}

impl OrgmergeConfig {
    /// Load configuration with precedence: CLI args > Env > File > Defaults
    pub fn load(
        config_path: Option<&str>,
        overrides: ConfigOverrides,
    ) -> Result<Self, ConfigError> {
        let mut figment = Figment::new().merge(Serialized::defaults(OrgmergeConfig::default()));

        if let Some(path) = config_path {
            figment = figment.merge(Toml::file(path));
        }

        // Double underscore separates nesting levels so snake_case
        // field names survive, e.g. ORGMERGE_MATCHER__MIN_SCORE.
        figment = figment.merge(Env::prefixed("ORGMERGE_").split("__"));

        figment = figment.merge(Serialized::defaults(overrides));

        figment.extract().map_err(ConfigError::from)
    }

    /// Load from environment and optional config file only.
    pub fn from_env(config_path: Option<&str>) -> Result<Self, ConfigError> {
        Self::load(config_path, ConfigOverrides::default())
    }
}

/// Remote store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    /// Base URL of the remote API
    pub base_url: String,
    /// Bearer token; usually supplied via ORGMERGE_REMOTE__TOKEN
    pub token: Option<String>,
    /// Page size for listing scans (remote maximum is 100)
    pub page_limit: usize,
    /// Chunk size for batch reads
    pub batch_size: usize,
    /// Retry attempts for transient faults
    pub max_retries: u32,
    /// Linear backoff step in seconds (attempt * step)
    pub backoff_step_secs: f64,
    /// Backoff ceiling in seconds
    pub backoff_cap_secs: f64,
    /// Per-request timeout in seconds
    pub timeout_secs: u64,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.hubapi.com".to_string(),
            token: None,
            page_limit: 100,
            batch_size: 100,
            max_retries: 5,
            backoff_step_secs: 1.5,
            backoff_cap_secs: 10.0,
            timeout_secs: 30,
        }
    }
}

/// Merge execution configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MergeConfig {
    /// Hop bound for canonical chain resolution
    pub max_hops: usize,
    /// Plan merges without executing them (the safe default)
    pub dry_run: bool,
}

impl Default for MergeConfig {
    fn default() -> Self {
        Self {
            max_hops: 10,
            dry_run: true,
        }
    }
}

/// CLI overrides that take precedence over file and env config.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfigOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_dir: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub merge: Option<MergeOverrides>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub matcher: Option<MatcherOverrides>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MergeOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dry_run: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_hops: Option<usize>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MatcherOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_score: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_bucket_size: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_pairs: Option<usize>,
}

/// Configuration error.
#[derive(Debug)]
pub struct ConfigError {
    pub message: String,
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "configuration error: {}", self.message)
    }
}

impl std::error::Error for ConfigError {}

impl From<figment::Error> for ConfigError {
    fn from(e: figment::Error) -> Self {
        Self {
            message: e.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = OrgmergeConfig::default();
        assert_eq!(config.remote.page_limit, 100);
        assert_eq!(config.remote.max_retries, 5);
        assert_eq!(config.matcher.min_score, 90.0);
        assert!(config.merge.dry_run);
        assert_eq!(config.merge.max_hops, 10);
    }

    #[test]
    fn test_cli_overrides_win() {
        let overrides = ConfigOverrides {
            merge: Some(MergeOverrides {
                dry_run: Some(false),
                max_hops: None,
            }),
            matcher: Some(MatcherOverrides {
                min_score: Some(95.0),
                ..MatcherOverrides::default()
            }),
            ..ConfigOverrides::default()
        };
        let config = OrgmergeConfig::load(None, overrides).unwrap();
        assert!(!config.merge.dry_run);
        assert_eq!(config.matcher.min_score, 95.0);
        // Untouched fields keep their defaults.
        assert_eq!(config.merge.max_hops, 10);
        assert_eq!(config.matcher.max_bucket_size, 200);
    }

    #[test]
    fn test_config_error_display() {
        let err = ConfigError {
            message: "bad value".to_string(),
        };
        assert_eq!(err.to_string(), "configuration error: bad value");
    }
}
