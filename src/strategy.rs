use crate::error::{EngineError, EngineResult};
use crate::models::*;
use std::collections::HashMap;

/// Decision-making capability driven once per replay step.
///
/// `decide` receives the whole cross-instrument step so that ranking
/// strategies can compare instruments; per-instrument strategies simply walk
/// the map. Only data already handed to `decide` may influence a decision.
pub trait Strategy {
    fn get_template_id(&self) -> &str;
    fn decide(&mut self, step: &MarketStep) -> Decisions;
    /// Called by the executor whenever the calendar date changes.
    fn reset_for_new_period(&mut self) {}
    /// Observations per instrument before the first decision can fire.
    fn get_min_data_points(&self) -> usize;
}

#[path = "strategies/mean_reversion.rs"]
pub mod mean_reversion;

pub use mean_reversion::MeanReversionStrategy;

#[path = "strategies/macd.rs"]
pub mod macd;

pub use macd::MACDStrategy;

#[path = "strategies/wavelet_trend.rs"]
pub mod wavelet_trend;

pub use wavelet_trend::WaveletTrendStrategy;

#[path = "strategies/random_pick.rs"]
pub mod random_pick;

pub use random_pick::RandomPickStrategy;

pub const TEMPLATE_IDS: [&str; 4] = ["mean_reversion", "macd", "wavelet_trend", "random"];

pub fn create_strategy(
    template_id: &str,
    parameters: &HashMap<String, f64>,
    wavelet: Option<&str>,
    seed: u64,
) -> EngineResult<Box<dyn Strategy + Send>> {
    match template_id {
        "mean_reversion" => Ok(Box::new(MeanReversionStrategy::new(parameters)?)),
        "macd" => Ok(Box::new(MACDStrategy::new(parameters)?)),
        "wavelet_trend" => Ok(Box::new(WaveletTrendStrategy::new(parameters, wavelet)?)),
        "random" => Ok(Box::new(RandomPickStrategy::new(parameters, seed)?)),
        _ => Err(EngineError::config(format!(
            "Unknown strategy template: {} (expected one of {})",
            template_id,
            TEMPLATE_IDS.join(", ")
        ))),
    }
}
