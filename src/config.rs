use crate::error::{EngineError, EngineResult};
use crate::strategy::{create_strategy, Strategy};
use crate::time_keys;
use anyhow::{Context, Result};
use chrono::NaiveTime;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Where a deferred order fills within the settlement step's bar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FillPricePolicy {
    #[default]
    Open,
    /// Uniform draw between low and high from the seeded generator.
    RandomRange,
}

impl FillPricePolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            FillPricePolicy::Open => "open",
            FillPricePolicy::RandomRange => "random_range",
        }
    }
}

impl FromStr for FillPricePolicy {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "open" => Ok(FillPricePolicy::Open),
            "random_range" | "random" => Ok(FillPricePolicy::RandomRange),
            other => Err(EngineError::config(format!(
                "fill policy must be open or random_range (value: {})",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ExecutorConfig {
    pub initial_cash: f64,
    pub order_quantity: u32,
    /// Net worth below `initial_cash / max_loss_ratio` ends the replay.
    pub max_loss_ratio: f64,
    /// Settlement attempts before an unfillable order is dropped.
    pub max_fill_attempts: u32,
    /// `HH:MM:SS` marker of the last bar of a trading day.
    pub end_of_period_time: Option<String>,
    pub single_action_per_period: bool,
    /// Sell every open lot at the final step's fill price.
    pub liquidate_at_end: bool,
    pub fill_policy: FillPricePolicy,
    pub seed: u64,
    /// Empty means every instrument in the store.
    pub instruments: Vec<String>,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            initial_cash: 1000.0,
            order_quantity: 1,
            max_loss_ratio: 10.0,
            max_fill_attempts: 5,
            end_of_period_time: None,
            single_action_per_period: false,
            liquidate_at_end: false,
            fill_policy: FillPricePolicy::Open,
            seed: 42,
            instruments: Vec::new(),
        }
    }
}

impl ExecutorConfig {
    pub fn validate(&self) -> EngineResult<()> {
        if !self.initial_cash.is_finite() || self.initial_cash <= 0.0 {
            return Err(EngineError::config(format!(
                "initialCash must be positive (value: {})",
                self.initial_cash
            )));
        }
        if self.order_quantity == 0 {
            return Err(EngineError::config("orderQuantity must be at least 1"));
        }
        if !self.max_loss_ratio.is_finite() || self.max_loss_ratio < 1.0 {
            return Err(EngineError::config(format!(
                "maxLossRatio must be at least 1 (value: {})",
                self.max_loss_ratio
            )));
        }
        if self.max_fill_attempts == 0 {
            return Err(EngineError::config("maxFillAttempts must be at least 1"));
        }
        if let Some(marker) = &self.end_of_period_time {
            NaiveTime::parse_from_str(marker.trim(), "%H:%M:%S").map_err(|_| {
                EngineError::config(format!(
                    "endOfPeriodTime must be HH:MM:SS (value: {})",
                    marker
                ))
            })?;
        }
        Ok(())
    }

    pub fn minimum_net_worth(&self) -> f64 {
        self.initial_cash / self.max_loss_ratio
    }

    /// Whether `time_key` is the configured closing bar. Daily keys never
    /// match.
    pub fn is_end_of_period(&self, time_key: &str) -> bool {
        match (&self.end_of_period_time, time_keys::time_of_day(time_key)) {
            (Some(marker), Some(time)) => marker.trim() == time,
            _ => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StrategySettings {
    #[serde(rename = "strategy")]
    pub template_id: String,
    #[serde(default)]
    pub parameters: HashMap<String, f64>,
    #[serde(default)]
    pub wavelet: Option<String>,
}

impl StrategySettings {
    pub fn new(template_id: &str) -> Self {
        Self {
            template_id: template_id.to_string(),
            parameters: HashMap::new(),
            wavelet: None,
        }
    }

    pub fn with_parameter(mut self, key: &str, value: f64) -> Self {
        self.parameters.insert(key.to_string(), value);
        self
    }

    pub fn build(&self, seed: u64) -> EngineResult<Box<dyn Strategy + Send>> {
        create_strategy(
            &self.template_id,
            &self.parameters,
            self.wavelet.as_deref(),
            seed,
        )
    }
}

/// Contents of a `--config` run file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunConfig {
    #[serde(flatten)]
    pub strategy: StrategySettings,
    #[serde(default)]
    pub executor: ExecutorConfig,
    #[serde(default)]
    pub data: Option<PathBuf>,
}

impl RunConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path)
            .with_context(|| format!("Failed to read run config at {}", path.display()))?;
        let config: RunConfig = serde_json::from_str(&raw)
            .with_context(|| format!("Invalid run config in {}", path.display()))?;
        config.executor.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = ExecutorConfig::default();
        config.validate().unwrap();
        assert_eq!(config.minimum_net_worth(), 100.0);
    }

    #[test]
    fn rejects_bad_executor_settings() {
        let mut config = ExecutorConfig::default();
        config.order_quantity = 0;
        assert!(config.validate().is_err());

        let mut config = ExecutorConfig::default();
        config.end_of_period_time = Some("4pm".to_string());
        assert!(config.validate().is_err());

        let mut config = ExecutorConfig::default();
        config.max_loss_ratio = 0.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn end_of_period_matches_time_of_day_only() {
        let config = ExecutorConfig {
            end_of_period_time: Some("15:55:00".to_string()),
            ..ExecutorConfig::default()
        };
        assert!(config.is_end_of_period("2020-01-02 15:55:00"));
        assert!(!config.is_end_of_period("2020-01-02 15:50:00"));
        assert!(!config.is_end_of_period("2020-01-02"));
    }

    #[test]
    fn parses_run_config_json() {
        let raw = r#"{
            "strategy": "macd",
            "parameters": {"fastPeriod": 5, "slowPeriod": 10},
            "executor": {"initialCash": 5000, "fillPolicy": "random_range", "seed": 7}
        }"#;
        let config: RunConfig = serde_json::from_str(raw).unwrap();
        assert_eq!(config.strategy.template_id, "macd");
        assert_eq!(config.strategy.parameters.get("fastPeriod"), Some(&5.0));
        assert_eq!(config.executor.initial_cash, 5000.0);
        assert_eq!(config.executor.fill_policy, FillPricePolicy::RandomRange);
        assert_eq!(config.executor.order_quantity, 1);
        assert!(config.strategy.build(config.executor.seed).is_ok());
    }

    #[test]
    fn parses_fill_policy_names() {
        assert_eq!("open".parse::<FillPricePolicy>().unwrap(), FillPricePolicy::Open);
        assert!("vwap".parse::<FillPricePolicy>().is_err());
    }
}
