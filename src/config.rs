//! Configuration for the wagering engine.
//!
//! Loaded from a TOML file with environment-variable overrides and
//! validated before use. All multipliers and probabilities are expressed
//! in basis points so the engine never touches floating point money.

use crate::errors::{ConfigError, EngineResult};
use crate::types::BPS_SCALE;
use serde::{Deserialize, Serialize};
use std::env;
use std::path::Path;

/// Top-level engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    pub storage: StorageConfig,
    pub round: RoundConfig,
    #[serde(rename = "match")]
    pub match_rules: MatchConfig,
    pub stakes: StakeConfig,
}

/// Where the book lives on disk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub data_dir: String,
}

/// Coin-flip round parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoundConfig {
    /// Fixed round length in seconds.
    pub duration_secs: u64,
    /// Final stretch surfaced to the UI as "closing"; admission still runs
    /// to the hard cutoff.
    pub closing_buffer_secs: u64,
    /// Win multiplier in basis points (19_500 = 1.95x).
    pub payout_bps: u32,
    /// Probability the draw lands heads, in basis points (5_000 = fair).
    pub heads_bps: u32,
}

/// Toss-match defaults applied at match creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchConfig {
    /// Win multiplier in basis points (20_000 = 2x).
    pub payout_bps: u32,
    /// Multiplier for wagers admitted during the extended window.
    pub extra_payout_bps: u32,
    /// Default per-match stake ceiling.
    pub max_stake: u64,
}

/// Stake limits shared by rounds and matches.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StakeConfig {
    pub min_stake: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            storage: StorageConfig::default(),
            round: RoundConfig::default(),
            match_rules: MatchConfig::default(),
            stakes: StakeConfig::default(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: "./tossbook_data".to_string(),
        }
    }
}

impl Default for RoundConfig {
    fn default() -> Self {
        Self {
            duration_secs: 15,
            closing_buffer_secs: 2,
            payout_bps: 19_500,
            heads_bps: 5_000,
        }
    }
}

impl Default for MatchConfig {
    fn default() -> Self {
        Self {
            payout_bps: 20_000,
            extra_payout_bps: 15_000,
            max_stake: 100_000,
        }
    }
}

impl Default for StakeConfig {
    fn default() -> Self {
        Self { min_stake: 10 }
    }
}

/// Configuration loader with environment variable support.
pub struct ConfigLoader {
    config_path: Option<String>,
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self { config_path: None }
    }

    /// Set the configuration file path.
    pub fn with_path<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.config_path = Some(path.as_ref().to_string_lossy().to_string());
        self
    }

    /// Load configuration from file and environment variables.
    pub fn load(&self) -> EngineResult<EngineConfig> {
        let mut config = if let Some(ref path) = self.config_path {
            self.load_from_file(path)?
        } else {
            EngineConfig::default()
        };

        self.apply_env_overrides(&mut config)?;
        self.validate(&config)?;

        Ok(config)
    }

    fn load_from_file(&self, path: &str) -> Result<EngineConfig, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::LoadFailed(format!("failed to read {}: {}", path, e)))?;

        toml::from_str(&content)
            .map_err(|e| ConfigError::LoadFailed(format!("failed to parse TOML: {}", e)))
    }

    fn apply_env_overrides(&self, config: &mut EngineConfig) -> Result<(), ConfigError> {
        if let Ok(dir) = env::var("TOSSBOOK_DATA_DIR") {
            config.storage.data_dir = dir;
        }
        if let Ok(secs) = env::var("TOSSBOOK_ROUND_DURATION_SECS") {
            config.round.duration_secs = parse_env("TOSSBOOK_ROUND_DURATION_SECS", &secs)?;
        }
        if let Ok(bps) = env::var("TOSSBOOK_ROUND_PAYOUT_BPS") {
            config.round.payout_bps = parse_env("TOSSBOOK_ROUND_PAYOUT_BPS", &bps)?;
        }
        if let Ok(bps) = env::var("TOSSBOOK_HEADS_BPS") {
            config.round.heads_bps = parse_env("TOSSBOOK_HEADS_BPS", &bps)?;
        }
        if let Ok(min) = env::var("TOSSBOOK_MIN_STAKE") {
            config.stakes.min_stake = parse_env("TOSSBOOK_MIN_STAKE", &min)?;
        }
        Ok(())
    }

    /// Validate configuration values.
    pub fn validate(&self, config: &EngineConfig) -> Result<(), ConfigError> {
        if config.storage.data_dir.is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "storage.data_dir".to_string(),
                reason: "cannot be empty".to_string(),
            });
        }
        if config.round.duration_secs == 0 {
            return Err(ConfigError::InvalidValue {
                field: "round.duration_secs".to_string(),
                reason: "must be positive".to_string(),
            });
        }
        if config.round.closing_buffer_secs >= config.round.duration_secs {
            return Err(ConfigError::InvalidValue {
                field: "round.closing_buffer_secs".to_string(),
                reason: "must be shorter than the round duration".to_string(),
            });
        }
        if config.round.heads_bps > BPS_SCALE {
            return Err(ConfigError::InvalidValue {
                field: "round.heads_bps".to_string(),
                reason: format!("must be at most {}", BPS_SCALE),
            });
        }
        for (field, bps) in [
            ("round.payout_bps", config.round.payout_bps),
            ("match.payout_bps", config.match_rules.payout_bps),
            ("match.extra_payout_bps", config.match_rules.extra_payout_bps),
        ] {
            if bps == 0 {
                return Err(ConfigError::InvalidValue {
                    field: field.to_string(),
                    reason: "must be positive".to_string(),
                });
            }
        }
        if config.stakes.min_stake == 0 {
            return Err(ConfigError::InvalidValue {
                field: "stakes.min_stake".to_string(),
                reason: "must be positive".to_string(),
            });
        }
        if config.match_rules.max_stake < config.stakes.min_stake {
            return Err(ConfigError::InvalidValue {
                field: "match.max_stake".to_string(),
                reason: "must be at least the minimum stake".to_string(),
            });
        }
        Ok(())
    }

    /// Save configuration to file.
    pub fn save(&self, config: &EngineConfig, path: &str) -> Result<(), ConfigError> {
        let toml_string = toml::to_string_pretty(config)
            .map_err(|e| ConfigError::SaveFailed(format!("failed to serialize config: {}", e)))?;

        std::fs::write(path, toml_string)
            .map_err(|e| ConfigError::SaveFailed(format!("failed to write {}: {}", path, e)))
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

fn parse_env<T: std::str::FromStr>(field: &str, value: &str) -> Result<T, ConfigError> {
    value.parse().map_err(|_| ConfigError::InvalidValue {
        field: field.to_string(),
        reason: format!("cannot parse '{}'", value),
    })
}

/// Generate a sample configuration file.
pub fn generate_sample_config(path: &str) -> Result<(), ConfigError> {
    ConfigLoader::new().save(&EngineConfig::default(), path)
}
