use crate::error::{EngineError, EngineResult};
use crate::indicators::RollingWindow;
use crate::models::*;
use crate::param_utils::{check_window_length, get_param_f64, get_param_flag, require_window};
use crate::strategy_utils::{buy_decision, hold_decision, sell_decision};
use std::collections::HashMap;

#[derive(Debug, Clone)]
struct InstrumentState {
    short: RollingWindow,
    long: RollingWindow,
}

/// Bollinger-style reversion around a short moving average.
///
/// SELL fires whenever the price breaks above `moving_avg + std`. BUY fires
/// when the price breaks below `moving_avg - std` and the long window is
/// trending up (`trend_percent > 0`). Both comparisons are strict, so a
/// constant series never trades.
pub struct MeanReversionStrategy {
    pub template_id: String,
    avg_range: usize,
    trend_range: usize,
    reset_each_period: bool,
    instruments: HashMap<String, InstrumentState>,
}

impl MeanReversionStrategy {
    pub fn new(parameters: &HashMap<String, f64>) -> EngineResult<Self> {
        let avg_range = require_window(parameters, "avgRange", 20)?;
        let trend_modifier = get_param_f64(parameters, "trendModifier", 2.0);
        if !trend_modifier.is_finite() || trend_modifier < 1.0 {
            return Err(EngineError::config(format!(
                "trendModifier must be at least 1 (value: {})",
                trend_modifier
            )));
        }
        let trend_range = (avg_range as f64 * trend_modifier).round() as usize;
        if trend_range < 2 {
            return Err(EngineError::config(
                "avgRange * trendModifier must cover at least 2 observations",
            ));
        }
        let trend_range = check_window_length("avgRange * trendModifier", trend_range)?;

        Ok(Self {
            template_id: "mean_reversion".to_string(),
            avg_range,
            trend_range,
            reset_each_period: get_param_flag(parameters, "resetEachPeriod", false),
            instruments: HashMap::new(),
        })
    }

    fn decide_instrument(&mut self, ticker: &str, price: f64) -> Decision {
        let (avg_range, trend_range) = (self.avg_range, self.trend_range);
        let state = self
            .instruments
            .entry(ticker.to_string())
            .or_insert_with(|| InstrumentState {
                short: RollingWindow::new(avg_range),
                long: RollingWindow::new(trend_range),
            });

        if !state.long.is_full() {
            state.short.push(price);
            state.long.push(price);
            return hold_decision();
        }

        let decision = match (
            state.short.mean(),
            state.short.population_std_dev(),
            state.long.half_split_trend(),
        ) {
            (Some(moving_avg), Some(std), trend) => {
                let trend_percent = trend.unwrap_or(0.0);
                let upper = moving_avg + std;
                let lower = moving_avg - std;
                let variables = [
                    ("price", price),
                    ("moving_avg", moving_avg),
                    ("std", std),
                    ("trend_percent", trend_percent),
                ];
                if price > upper {
                    sell_decision("above_upper_band", &variables)
                } else if price < lower && trend_percent > 0.0 {
                    buy_decision("below_lower_band_uptrend", &variables)
                } else {
                    hold_decision()
                }
            }
            _ => hold_decision(),
        };

        state.short.push(price);
        state.long.push(price);
        decision
    }
}

impl super::Strategy for MeanReversionStrategy {
    fn get_template_id(&self) -> &str {
        &self.template_id
    }

    fn decide(&mut self, step: &MarketStep) -> Decisions {
        let mut decisions = Decisions::new();
        for (ticker, snapshot) in step {
            let decision = match snapshot.close_price() {
                Some(price) => self.decide_instrument(ticker, price),
                None => hold_decision(),
            };
            decisions.insert(ticker.clone(), decision);
        }
        decisions
    }

    fn reset_for_new_period(&mut self) {
        if self.reset_each_period {
            self.instruments.clear();
        }
    }

    fn get_min_data_points(&self) -> usize {
        self.trend_range + 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategy::Strategy;

    fn params(avg_range: f64, trend_modifier: f64) -> HashMap<String, f64> {
        let mut params = HashMap::new();
        params.insert("avgRange".to_string(), avg_range);
        params.insert("trendModifier".to_string(), trend_modifier);
        params
    }

    fn step(price: Option<f64>) -> MarketStep {
        let mut step = MarketStep::new();
        let snapshot = match price {
            Some(price) => Snapshot::flat(price, 100.0),
            None => Snapshot::default(),
        };
        step.insert("AAA".to_string(), snapshot);
        step
    }

    #[test]
    fn warm_up_holds_until_long_window_is_full() {
        let mut strategy = MeanReversionStrategy::new(&params(3.0, 2.0)).unwrap();
        for i in 0..6 {
            let decisions = strategy.decide(&step(Some(100.0 + i as f64 * 10.0)));
            assert!(decisions["AAA"].is_empty(), "step {} fired during warm-up", i);
        }
        assert_eq!(strategy.get_min_data_points(), 7);
    }

    #[test]
    fn constant_series_never_trades() {
        let mut strategy = MeanReversionStrategy::new(&params(4.0, 2.0)).unwrap();
        for _ in 0..(2 * 2 * 4 + 5) {
            let decisions = strategy.decide(&step(Some(42.0)));
            assert!(decisions["AAA"].is_empty());
        }
    }

    #[test]
    fn spike_above_band_sells() {
        let mut strategy = MeanReversionStrategy::new(&params(2.0, 2.0)).unwrap();
        for price in [10.0, 11.0, 10.0, 11.0] {
            strategy.decide(&step(Some(price)));
        }
        let decisions = strategy.decide(&step(Some(20.0)));
        let decision = &decisions["AAA"];
        assert_eq!(decision.action, SignalAction::Sell);
        assert_eq!(decision.variable("moving_avg"), Some(10.5));
        assert_eq!(decision.rationale, "above_upper_band");
    }

    #[test]
    fn dip_buys_only_in_uptrend() {
        let mut strategy = MeanReversionStrategy::new(&params(2.0, 2.0)).unwrap();
        for price in [10.0, 10.0, 20.0, 20.0] {
            strategy.decide(&step(Some(price)));
        }
        // short window [20, 20], trend positive, price below the band
        let decisions = strategy.decide(&step(Some(15.0)));
        assert_eq!(decisions["AAA"].action, SignalAction::Buy);

        let mut falling = MeanReversionStrategy::new(&params(2.0, 2.0)).unwrap();
        for price in [30.0, 30.0, 20.0, 20.0] {
            falling.decide(&step(Some(price)));
        }
        assert!(falling.decide(&step(Some(15.0)))["AAA"].is_empty());
    }

    #[test]
    fn missing_price_leaves_state_untouched() {
        let mut strategy = MeanReversionStrategy::new(&params(2.0, 2.0)).unwrap();
        for price in [10.0, 11.0, 10.0] {
            strategy.decide(&step(Some(price)));
        }
        assert!(strategy.decide(&step(None))["AAA"].is_empty());
        // still one observation short of a full window
        assert!(strategy.decide(&step(Some(11.0)))["AAA"].is_empty());
        assert_eq!(
            strategy.decide(&step(Some(20.0)))["AAA"].action,
            SignalAction::Sell
        );
    }

    #[test]
    fn rejects_zero_window() {
        assert!(MeanReversionStrategy::new(&params(0.0, 2.0)).is_err());
        assert!(MeanReversionStrategy::new(&params(5.0, 0.5)).is_err());
    }

    #[test]
    fn rejects_windows_too_large_to_allocate() {
        assert!(MeanReversionStrategy::new(&params(1e11, 1.0)).is_err());
        // each factor alone is fine, the long window is not
        assert!(MeanReversionStrategy::new(&params(1000.0, 1e9)).is_err());
    }

    #[test]
    fn period_reset_restarts_warm_up_when_enabled() {
        let mut resetting = params(2.0, 2.0);
        resetting.insert("resetEachPeriod".to_string(), 1.0);
        let mut strategy = MeanReversionStrategy::new(&resetting).unwrap();
        let mut keeping = MeanReversionStrategy::new(&params(2.0, 2.0)).unwrap();
        for price in [10.0, 11.0, 10.0, 11.0] {
            strategy.decide(&step(Some(price)));
            keeping.decide(&step(Some(price)));
        }
        strategy.reset_for_new_period();
        keeping.reset_for_new_period();

        assert_eq!(keeping.decide(&step(Some(20.0)))["AAA"].action, SignalAction::Sell);
        for price in [20.0, 10.0, 11.0, 10.0] {
            assert!(strategy.decide(&step(Some(price)))["AAA"].is_empty());
        }
        assert_eq!(strategy.decide(&step(Some(20.0)))["AAA"].action, SignalAction::Sell);
    }
}
