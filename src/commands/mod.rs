pub mod backtest;
pub mod inspect;
pub mod sweep;

use crate::config::{ExecutorConfig, FillPricePolicy, RunConfig, StrategySettings};
use crate::data_context::MarketData;
use crate::param_utils::parse_parameter_pairs;
use anyhow::{anyhow, Result};
use chrono::NaiveDate;
use clap::Args;
use log::info;
use std::path::PathBuf;
use std::sync::Arc;

pub const DEFAULT_MARKET_DATA_FILE: &str = "data/market-data.json";

/// Options shared by every command that runs a replay. Flags override the
/// values of a `--config` run file.
#[derive(Args, Debug, Clone, Default)]
pub struct RunOptions {
    /// Market data file (.json mapping or binary snapshot)
    #[arg(long = "data-file", value_name = "PATH")]
    pub data_file: Option<PathBuf>,
    /// JSON run file with strategy, parameters and executor settings
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,
    /// Strategy template (mean_reversion, macd, wavelet_trend, random)
    #[arg(long)]
    pub strategy: Option<String>,
    /// Strategy parameter as key=value, repeatable
    #[arg(long = "param", value_name = "KEY=VALUE")]
    pub params: Vec<String>,
    /// Wavelet basis for wavelet_trend (haar, db2, db4)
    #[arg(long)]
    pub wavelet: Option<String>,
    #[arg(long)]
    pub initial_cash: Option<f64>,
    /// Shares per order
    #[arg(long)]
    pub quantity: Option<u32>,
    /// open or random_range
    #[arg(long)]
    pub fill_policy: Option<String>,
    #[arg(long)]
    pub seed: Option<u64>,
    /// HH:MM:SS of the closing bar; open lots are sold after it
    #[arg(long)]
    pub end_of_period: Option<String>,
    /// Trade at most once per calendar date
    #[arg(long)]
    pub single_action: bool,
    /// Sell every open lot at the last step
    #[arg(long)]
    pub liquidate_at_end: bool,
    /// Restrict the universe, comma separated
    #[arg(long = "instruments", value_delimiter = ',')]
    pub instruments: Vec<String>,
    #[arg(long)]
    pub start: Option<NaiveDate>,
    #[arg(long)]
    pub end: Option<NaiveDate>,
}

/// Fully merged run settings plus the market data they apply to.
pub struct PreparedRun {
    pub strategy: StrategySettings,
    pub executor: ExecutorConfig,
    pub data: Arc<MarketData>,
}

impl RunOptions {
    pub fn prepare(&self) -> Result<PreparedRun> {
        let file_config = match &self.config {
            Some(path) => Some(RunConfig::load(path)?),
            None => None,
        };

        let (mut strategy, mut executor, file_data) = match file_config {
            Some(config) => (Some(config.strategy), config.executor, config.data),
            None => (None, ExecutorConfig::default(), None),
        };

        if let Some(template_id) = &self.strategy {
            strategy = Some(match strategy {
                Some(existing) if &existing.template_id == template_id => existing,
                _ => StrategySettings::new(template_id),
            });
        }
        let mut strategy = strategy
            .ok_or_else(|| anyhow!("No strategy given; pass --strategy or a --config file"))?;
        strategy.parameters.extend(parse_parameter_pairs(&self.params)?);
        if let Some(wavelet) = &self.wavelet {
            strategy.wavelet = Some(wavelet.clone());
        }

        if let Some(cash) = self.initial_cash {
            executor.initial_cash = cash;
        }
        if let Some(quantity) = self.quantity {
            executor.order_quantity = quantity;
        }
        if let Some(policy) = &self.fill_policy {
            executor.fill_policy = policy.parse::<FillPricePolicy>()?;
        }
        if let Some(seed) = self.seed {
            executor.seed = seed;
        }
        if let Some(marker) = &self.end_of_period {
            executor.end_of_period_time = Some(marker.clone());
        }
        if self.single_action {
            executor.single_action_per_period = true;
        }
        if self.liquidate_at_end {
            executor.liquidate_at_end = true;
        }
        if !self.instruments.is_empty() {
            executor.instruments = self.instruments.clone();
        }
        executor.validate()?;

        let data_path = self
            .data_file
            .clone()
            .or(file_data)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_MARKET_DATA_FILE));
        let data = MarketData::load_from_file(&data_path)?
            .restrict_to_instruments(&executor.instruments)?
            .restrict_to_date_range(self.start, self.end)?;
        if !data.has_data() {
            return Err(anyhow!(
                "No market data left in {} after applying filters",
                data_path.display()
            ));
        }
        info!(
            "Prepared {} run over {} steps ({} instruments)",
            strategy.template_id,
            data.time_keys().len(),
            data.instruments().len()
        );

        Ok(PreparedRun {
            strategy,
            executor,
            data: Arc::new(data),
        })
    }
}
