use crate::domain::{CostBasisMethod, Decimal};
use crate::engine::finder::MatchingConfig;
use crate::engine::transfer::TransferFeePolicy;
use std::collections::HashMap;
use thiserror::Error;

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub database_path: String,
    pub cost_basis_method: CostBasisMethod,
    pub transfer_fee_policy: TransferFeePolicy,
    pub max_timing_window_hours: f64,
    pub min_amount_similarity: Decimal,
    pub min_confidence_score: Decimal,
    pub auto_confirm_threshold: Decimal,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnv(String),
    #[error("Invalid value for {0}: {1}")]
    InvalidValue(String, String),
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_env_map(std::env::vars().collect())
    }

    pub fn from_env_map(env_map: HashMap<String, String>) -> Result<Self, ConfigError> {
        let port = env_map
            .get("PORT")
            .map(|s| s.as_str())
            .unwrap_or("8080")
            .parse::<u16>()
            .map_err(|_| {
                ConfigError::InvalidValue("PORT".to_string(), "must be a valid u16".to_string())
            })?;

        let database_path = env_map
            .get("DATABASE_PATH")
            .cloned()
            .ok_or_else(|| ConfigError::MissingEnv("DATABASE_PATH".to_string()))?;

        let cost_basis_method = env_map
            .get("COST_BASIS_METHOD")
            .map(|s| s.as_str())
            .unwrap_or("fifo")
            .parse::<CostBasisMethod>()
            .map_err(|e| ConfigError::InvalidValue("COST_BASIS_METHOD".to_string(), e))?;

        let transfer_fee_policy = env_map
            .get("TRANSFER_FEE_POLICY")
            .map(|s| s.as_str())
            .unwrap_or("add-to-basis")
            .parse::<TransferFeePolicy>()
            .map_err(|e| ConfigError::InvalidValue("TRANSFER_FEE_POLICY".to_string(), e))?;

        let max_timing_window_hours = env_map
            .get("MAX_TIMING_WINDOW_HOURS")
            .map(|s| s.as_str())
            .unwrap_or("48")
            .parse::<f64>()
            .map_err(|_| {
                ConfigError::InvalidValue(
                    "MAX_TIMING_WINDOW_HOURS".to_string(),
                    "must be a valid number of hours".to_string(),
                )
            })?;

        let min_amount_similarity = parse_ratio(&env_map, "MIN_AMOUNT_SIMILARITY", "0.95")?;
        let min_confidence_score = parse_ratio(&env_map, "MIN_CONFIDENCE_SCORE", "0.7")?;
        let auto_confirm_threshold = parse_ratio(&env_map, "AUTO_CONFIRM_THRESHOLD", "0.95")?;

        Ok(Config {
            port,
            database_path,
            cost_basis_method,
            transfer_fee_policy,
            max_timing_window_hours,
            min_amount_similarity,
            min_confidence_score,
            auto_confirm_threshold,
        })
    }

    /// Matching thresholds as consumed by the engines.
    pub fn matching_config(&self) -> MatchingConfig {
        MatchingConfig {
            max_timing_window_hours: self.max_timing_window_hours,
            min_amount_similarity: self.min_amount_similarity,
            min_confidence_score: self.min_confidence_score,
            auto_confirm_threshold: self.auto_confirm_threshold,
        }
    }
}

fn parse_ratio(
    env_map: &HashMap<String, String>,
    key: &str,
    default: &str,
) -> Result<Decimal, ConfigError> {
    let raw = env_map.get(key).map(|s| s.as_str()).unwrap_or(default);
    let value = Decimal::from_str_canonical(raw).map_err(|_| {
        ConfigError::InvalidValue(key.to_string(), "must be a valid decimal".to_string())
    })?;
    if value.is_negative() || value > Decimal::one() {
        return Err(ConfigError::InvalidValue(
            key.to_string(),
            "must be within [0, 1]".to_string(),
        ));
    }
    Ok(value)
}
