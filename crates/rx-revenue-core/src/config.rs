//! Engine configuration.
//!
//! Every threshold used by the product matcher and the allocator lives here so
//! that a deployment can tune them without a rebuild:
//! - `MatcherConfig`: the 0..=100 score cut-offs of the matching cascade
//! - `EngineConfig`: split-rule tolerance, write chunk size, index caching

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// Environment variable naming a JSON config file.
pub const CONFIG_PATH_ENV: &str = "RX_REVENUE_CONFIG";

/// Environment variable overriding `chunk_size`.
pub const CHUNK_SIZE_ENV: &str = "RX_REVENUE_CHUNK_SIZE";

/// Configuration errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid config value: {0}")]
    Invalid(String),
}

/// Score thresholds for the product matching cascade.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct MatcherConfig {
    /// First-pass cut-off for fuzzy matching inside a core group
    pub group_high: u8,
    /// Second-pass cut-off for fuzzy matching inside a core group
    pub group_low: u8,
    /// First-pass cut-off for whole-catalog fuzzy matching
    pub global_high: u8,
    /// Second-pass cut-off for whole-catalog fuzzy matching
    pub global_low: u8,
    /// Cut-off for the max-of-measures character similarity pass
    pub character_threshold: u8,
    /// Minimum length of both strings for containment matching
    pub containment_min_len: usize,
    /// Share of the shorter string the overlap must cover
    pub containment_coverage: f64,
    /// Minimum length of both alphanumeric-only strings for noisy matching
    pub noisy_min_len: usize,
    /// Partial-ratio cut-off when noisy strings do not contain each other
    pub noisy_partial_threshold: u8,
}

impl Default for MatcherConfig {
    fn default() -> Self {
        Self {
            group_high: 85,
            group_low: 70,
            global_high: 80,
            global_low: 65,
            character_threshold: 70,
            containment_min_len: 5,
            containment_coverage: 0.7,
            noisy_min_len: 4,
            noisy_partial_threshold: 85,
        }
    }
}

/// Top-level engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EngineConfig {
    pub matcher: MatcherConfig,
    /// Allowed distance of a split rule's percentage sum from 100
    pub split_tolerance: f64,
    /// Invoice rows written per transaction
    pub chunk_size: usize,
    /// Rebuild the product index at the start of every run
    pub rebuild_index_each_run: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            matcher: MatcherConfig::default(),
            split_tolerance: 0.1,
            chunk_size: 2000,
            rebuild_index_each_run: true,
        }
    }
}

impl EngineConfig {
    /// Parse a JSON document; missing fields take their defaults.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a JSON config file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json_str(&raw)
    }

    /// Defaults, overlaid with `RX_REVENUE_CONFIG` and `RX_REVENUE_CHUNK_SIZE`.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = match std::env::var(CONFIG_PATH_ENV) {
            Ok(path) if !path.trim().is_empty() => Self::load(path.trim())?,
            _ => Self::default(),
        };

        if let Ok(raw) = std::env::var(CHUNK_SIZE_ENV) {
            config.chunk_size = raw.trim().parse().map_err(|_| {
                ConfigError::Invalid(format!("{} must be a positive integer, got {:?}", CHUNK_SIZE_ENV, raw))
            })?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Reject values the engine cannot work with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.chunk_size == 0 {
            return Err(ConfigError::Invalid("chunk_size must be greater than zero".into()));
        }
        if !self.split_tolerance.is_finite() || self.split_tolerance < 0.0 {
            return Err(ConfigError::Invalid(format!(
                "split_tolerance must be a non-negative number, got {}",
                self.split_tolerance
            )));
        }

        let m = &self.matcher;
        let scores = [
            ("group_high", m.group_high),
            ("group_low", m.group_low),
            ("global_high", m.global_high),
            ("global_low", m.global_low),
            ("character_threshold", m.character_threshold),
            ("noisy_partial_threshold", m.noisy_partial_threshold),
        ];
        for (name, value) in scores {
            if value > 100 {
                return Err(ConfigError::Invalid(format!("{} must be at most 100, got {}", name, value)));
            }
        }
        if !(0.0..=1.0).contains(&m.containment_coverage) {
            return Err(ConfigError::Invalid(format!(
                "containment_coverage must be within 0..=1, got {}",
                m.containment_coverage
            )));
        }

        Ok(())
    }
}
