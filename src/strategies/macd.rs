use crate::error::{EngineError, EngineResult};
use crate::indicators::{self, RollingWindow};
use crate::models::*;
use crate::param_utils::{get_param_flag, get_param_usize, require_f64_in_range, require_window};
use crate::strategy_utils::{buy_decision, hold_decision, sell_decision};
use std::collections::HashMap;

/// Absorbs rounding error from the normalised weighted averages: signals
/// within `SIGNAL_TOLERANCE * max(|price|, 1)` of zero count as no crossing.
const SIGNAL_TOLERANCE: f64 = 1e-12;

/// How recent prices are weighted when averaging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WeightingPolicy {
    /// `w[0] = beta`, `w[i] = (1 - beta) * w[i - 1]`
    Exponential,
    Uniform,
}

impl WeightingPolicy {
    fn weights(&self, beta: f64, length: usize) -> Vec<f64> {
        match self {
            WeightingPolicy::Exponential => indicators::exponential_weights(beta, length),
            WeightingPolicy::Uniform => indicators::uniform_weights(length),
        }
    }
}

#[derive(Debug, Clone)]
struct InstrumentState {
    prices: RollingWindow,
    macd_history: RollingWindow,
}

pub struct MACDStrategy {
    pub template_id: String,
    fast_period: usize,
    slow_period: usize,
    signal_period: usize,
    policy: WeightingPolicy,
    price_weights: Vec<f64>,
    signal_weights: Vec<f64>,
    reset_each_period: bool,
    instruments: HashMap<String, InstrumentState>,
}

impl MACDStrategy {
    pub fn new(parameters: &HashMap<String, f64>) -> EngineResult<Self> {
        let fast_period = require_window(parameters, "fastPeriod", 12)?;
        let slow_period = require_window(parameters, "slowPeriod", 26)?;
        let signal_period = require_window(parameters, "signalPeriod", 9)?;
        if signal_period < 2 {
            // a single-entry history always averages to the latest value
            return Err(EngineError::config("signalPeriod must be at least 2"));
        }
        let beta = require_f64_in_range(parameters, "beta", 0.9, f64::MIN_POSITIVE, 1.0)?;
        let policy = match get_param_usize(parameters, "weighting", 0) {
            0 => WeightingPolicy::Exponential,
            1 => WeightingPolicy::Uniform,
            other => {
                return Err(EngineError::config(format!(
                    "weighting must be 0 (exponential) or 1 (uniform) (value: {})",
                    other
                )))
            }
        };

        let window = fast_period.max(slow_period);
        Ok(Self {
            template_id: "macd".to_string(),
            fast_period,
            slow_period,
            signal_period,
            policy,
            price_weights: policy.weights(beta, window),
            signal_weights: policy.weights(beta, signal_period),
            reset_each_period: get_param_flag(parameters, "resetEachPeriod", false),
            instruments: HashMap::new(),
        })
    }

    pub fn policy(&self) -> WeightingPolicy {
        self.policy
    }

    fn window(&self) -> usize {
        self.fast_period.max(self.slow_period)
    }

    fn decide_instrument(&mut self, ticker: &str, price: f64) -> Decision {
        let window = self.window();
        let signal_period = self.signal_period;
        let state = self
            .instruments
            .entry(ticker.to_string())
            .or_insert_with(|| InstrumentState {
                prices: RollingWindow::new(window),
                macd_history: RollingWindow::new(signal_period),
            });

        state.prices.push(price);
        if !state.prices.is_full() {
            return hold_decision();
        }

        let fast = indicators::weighted_recent_average(&state.prices, &self.price_weights, self.fast_period);
        let slow = indicators::weighted_recent_average(&state.prices, &self.price_weights, self.slow_period);
        let (fast, slow) = match (fast, slow) {
            (Some(fast), Some(slow)) => (fast, slow),
            _ => return hold_decision(),
        };
        let macd = fast - slow;
        state.macd_history.push(macd);
        if !state.macd_history.is_full() {
            return hold_decision();
        }

        let signal_avg = match indicators::weighted_recent_average(
            &state.macd_history,
            &self.signal_weights,
            signal_period,
        ) {
            Some(value) => value,
            None => return hold_decision(),
        };
        let signal = macd - signal_avg;
        let variables = [
            ("price", price),
            ("fast_avg", fast),
            ("slow_avg", slow),
            ("macd", macd),
            ("signal", signal),
        ];

        let tolerance = SIGNAL_TOLERANCE * price.abs().max(1.0);
        if signal > tolerance {
            buy_decision("macd_above_signal", &variables)
        } else if signal < -tolerance {
            sell_decision("macd_below_signal", &variables)
        } else {
            hold_decision()
        }
    }
}

impl super::Strategy for MACDStrategy {
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
        self.window() + self.signal_period - 1
    }
}
