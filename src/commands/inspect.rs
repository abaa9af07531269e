use crate::data_context::MarketData;
use crate::time_keys::TimeKeyFormat;
use anyhow::Result;
use log::{info, warn};
use std::path::Path;

pub fn run(market_data_file: &Path) -> Result<()> {
    let data = MarketData::load_from_file(market_data_file)?;
    let (Some(first), Some(last)) = (data.time_keys().first(), data.time_keys().last()) else {
        warn!("{} contains no time steps", market_data_file.display());
        return Ok(());
    };

    let granularity = match data.format() {
        Some(TimeKeyFormat::DateTime) => "intraday",
        _ => "daily",
    };
    info!(
        "{} {} steps from {} to {}",
        data.time_keys().len(),
        granularity,
        first,
        last
    );
    info!("Instruments ({}): {}", data.instruments().len(), data.instruments().join(", "));

    let steps = data.time_keys().len();
    for (ticker, covered) in data.coverage() {
        let ratio = covered as f64 / steps as f64 * 100.0;
        if covered < steps {
            info!("  {}: {}/{} steps with a close ({:.1}%)", ticker, covered, steps, ratio);
        } else {
            info!("  {}: complete", ticker);
        }
    }
    Ok(())
}
