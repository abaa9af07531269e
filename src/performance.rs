use crate::error::EngineResult;
use crate::models::*;
use crate::portfolio::Portfolio;
use crate::time_keys;
use chrono::Duration;
use statrs::statistics::Statistics;

/// Running peak-to-trough statistics over a value series.
///
/// A strictly higher value starts a new peak, a strictly lower one is a
/// drawdown event and a value equal to the peak changes nothing. Both maxima
/// only ever grow.
#[derive(Debug, Clone)]
pub struct DrawdownTracker {
    peak: Option<(f64, String)>,
    max_height: f64,
    max_height_percent: f64,
    max_time: Duration,
}

impl DrawdownTracker {
    pub fn new() -> Self {
        Self {
            peak: None,
            max_height: 0.0,
            max_height_percent: 0.0,
            max_time: Duration::zero(),
        }
    }

    pub fn update(&mut self, value: f64, time_key: &str) -> EngineResult<()> {
        let Some((peak_value, peak_time_key)) = self.peak.clone() else {
            self.peak = Some((value, time_key.to_string()));
            return Ok(());
        };

        if value > peak_value {
            self.peak = Some((value, time_key.to_string()));
        } else if value < peak_value {
            let duration = time_keys::elapsed(&peak_time_key, time_key)?;
            let height = peak_value - value;
            if duration > self.max_time {
                self.max_time = duration;
            }
            if height > self.max_height {
                self.max_height = height;
            }
            if peak_value > 0.0 {
                let percent = height / peak_value * 100.0;
                if percent > self.max_height_percent {
                    self.max_height_percent = percent;
                }
            }
        }
        Ok(())
    }

    pub fn peak_value(&self) -> Option<f64> {
        self.peak.as_ref().map(|(value, _)| *value)
    }

    pub fn peak_time_key(&self) -> Option<&str> {
        self.peak.as_ref().map(|(_, key)| key.as_str())
    }

    pub fn max_height(&self) -> f64 {
        self.max_height
    }

    pub fn max_time(&self) -> Duration {
        self.max_time
    }

    pub fn info(&self) -> DrawdownInfo {
        DrawdownInfo {
            peak_value: self.peak_value(),
            peak_time_key: self.peak_time_key().map(str::to_string),
            max_drawdown: self.max_height,
            max_drawdown_percent: self.max_height_percent,
            max_drawdown_seconds: self.max_time.num_seconds(),
        }
    }
}

impl Default for DrawdownTracker {
    fn default() -> Self {
        Self::new()
    }
}

pub struct PerformanceCalculator;

impl PerformanceCalculator {
    pub fn summarize(portfolio: &Portfolio, values: &[DataPoint]) -> PerformanceSummary {
        let lot_gains: Vec<f64> = portfolio
            .historical
            .iter()
            .filter_map(|holding| holding.gain)
            .map(|gain| gain - 100.0)
            .filter(|gain| gain.is_finite())
            .collect();

        let closed_lots = portfolio.historical.len();
        let winning_lots = portfolio
            .historical
            .iter()
            .filter(|holding| holding.profit.unwrap_or(0.0) > 0.0)
            .count();
        let losing_lots = portfolio
            .historical
            .iter()
            .filter(|holding| holding.profit.unwrap_or(0.0) < 0.0)
            .count();
        let win_rate = if closed_lots > 0 {
            winning_lots as f64 / closed_lots as f64
        } else {
            0.0
        };

        let (avg_gain_percent, best_gain_percent, worst_gain_percent) = if lot_gains.is_empty() {
            (0.0, 0.0, 0.0)
        } else {
            (
                lot_gains.iter().mean(),
                lot_gains.iter().copied().fold(f64::NEG_INFINITY, f64::max),
                lot_gains.iter().copied().fold(f64::INFINITY, f64::min),
            )
        };

        PerformanceSummary {
            closed_lots,
            winning_lots,
            losing_lots,
            win_rate,
            realized_profit: portfolio.realized_profit(),
            avg_gain_percent,
            best_gain_percent,
            worst_gain_percent,
            final_value: portfolio.total_value(),
            total_gain_percent: portfolio.total_gain(),
            step_return_volatility: Self::step_return_volatility(values),
        }
    }

    /// Sample standard deviation of step-over-step value returns.
    pub fn step_return_volatility(values: &[DataPoint]) -> f64 {
        if values.len() < 3 {
            return 0.0;
        }
        let returns: Vec<f64> = values
            .windows(2)
            .map(|window| {
                let prev = window[0].value;
                if prev > 0.0 {
                    (window[1].value - prev) / prev
                } else {
                    0.0
                }
            })
            .collect();
        let std_dev = returns.std_dev();
        if std_dev.is_finite() {
            std_dev
        } else {
            0.0
        }
    }
}
