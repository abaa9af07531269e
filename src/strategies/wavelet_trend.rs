use crate::error::{EngineError, EngineResult};
use crate::indicators::{self, RollingWindow};
use crate::models::*;
use crate::param_utils::{get_param_f64, get_param_flag, get_param_usize, require_window};
use crate::strategy_utils::{buy_decision, hold_decision};
use crate::wavelet::{self, WaveletBasis};
use log::debug;
use std::cmp::Ordering;
use std::collections::HashMap;

#[derive(Debug, Clone)]
struct InstrumentState {
    prices: RollingWindow,
    volumes: RollingWindow,
}

#[derive(Debug, Clone)]
struct Candidate {
    ticker: String,
    score: f64,
    trend: f64,
    avg_volume: f64,
}

/// Cross-sectional trend picker.
///
/// Every warm instrument gets a denoised trend score (half-split trend of
/// the wavelet-filtered price window, divided by its average volume). The
/// instruments are ranked by score and only the one at `pickRank` is
/// bought; everything else holds.
pub struct WaveletTrendStrategy {
    pub template_id: String,
    window_size: usize,
    threshold: f64,
    pick_rank: usize,
    basis: WaveletBasis,
    reset_each_period: bool,
    instruments: HashMap<String, InstrumentState>,
}

impl WaveletTrendStrategy {
    pub fn new(parameters: &HashMap<String, f64>, basis: Option<&str>) -> EngineResult<Self> {
        let window_size = require_window(parameters, "windowSize", 32)?;
        if window_size < 2 {
            return Err(EngineError::config("windowSize must be at least 2"));
        }
        let threshold = get_param_f64(parameters, "threshold", 0.63);
        if !threshold.is_finite() || threshold < 0.0 {
            return Err(EngineError::config(format!(
                "threshold must be a non-negative number (value: {})",
                threshold
            )));
        }
        let basis = match basis {
            Some(name) => name.parse::<WaveletBasis>()?,
            None => WaveletBasis::Db4,
        };

        Ok(Self {
            template_id: "wavelet_trend".to_string(),
            window_size,
            threshold,
            pick_rank: get_param_usize(parameters, "pickRank", 0),
            basis,
            reset_each_period: get_param_flag(parameters, "resetEachPeriod", false),
            instruments: HashMap::new(),
        })
    }

    pub fn basis(&self) -> WaveletBasis {
        self.basis
    }

    /// Appends the observation and scores the instrument once its window is
    /// warm. Instruments without a positive average volume are left out.
    fn observe(&mut self, ticker: &str, price: f64, volume: f64) -> Option<Candidate> {
        let window_size = self.window_size;
        let state = self
            .instruments
            .entry(ticker.to_string())
            .or_insert_with(|| InstrumentState {
                prices: RollingWindow::new(window_size),
                volumes: RollingWindow::new(window_size),
            });
        state.prices.push(price);
        state.volumes.push(volume);
        if !state.prices.is_full() {
            return None;
        }

        let avg_volume = state.volumes.mean()?;
        if avg_volume <= 0.0 {
            return None;
        }
        let filtered = match wavelet::lowpass_filter(&state.prices.to_vec(), self.threshold, self.basis) {
            Ok(filtered) => filtered,
            Err(err) => {
                debug!("Skipping {}: {}", ticker, err);
                return None;
            }
        };
        let trend = indicators::half_split_trend(&filtered)?;
        Some(Candidate {
            ticker: ticker.to_string(),
            score: trend / avg_volume,
            trend,
            avg_volume,
        })
    }
}

impl super::Strategy for WaveletTrendStrategy {
    fn get_template_id(&self) -> &str {
        &self.template_id
    }

    fn decide(&mut self, step: &MarketStep) -> Decisions {
        let mut candidates = Vec::new();
        for (ticker, snapshot) in step {
            let volume = snapshot.volume.filter(|v| v.is_finite());
            if let (Some(price), Some(volume)) = (snapshot.close_price(), volume) {
                if let Some(candidate) = self.observe(ticker, price, volume) {
                    candidates.push(candidate);
                }
            }
        }

        candidates.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.ticker.cmp(&b.ticker))
        });

        let mut decisions: Decisions = step
            .keys()
            .map(|ticker| (ticker.clone(), hold_decision()))
            .collect();
        if let Some(pick) = candidates.get(self.pick_rank) {
            let decision = buy_decision(
                "top_wavelet_trend",
                &[
                    ("score", pick.score),
                    ("trend", pick.trend),
                    ("avg_volume", pick.avg_volume),
                    ("rank", self.pick_rank as f64),
                    ("candidates", candidates.len() as f64),
                ],
            );
            decisions.insert(pick.ticker.clone(), decision);
        }
        decisions
    }

    fn reset_for_new_period(&mut self) {
        if self.reset_each_period {
            self.instruments.clear();
        }
    }

    fn get_min_data_points(&self) -> usize {
        self.window_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategy::Strategy;

    fn strategy(window_size: f64, pick_rank: f64) -> WaveletTrendStrategy {
        let mut params = HashMap::new();
        params.insert("windowSize".to_string(), window_size);
        params.insert("pickRank".to_string(), pick_rank);
        params.insert("threshold".to_string(), 0.05);
        WaveletTrendStrategy::new(&params, Some("haar")).unwrap()
    }

    fn step(i: usize) -> MarketStep {
        let t = i as f64;
        let mut step = MarketStep::new();
        step.insert("FLAT".to_string(), Snapshot::flat(100.0, 1000.0));
        step.insert("SLOW".to_string(), Snapshot::flat(100.0 + t, 1000.0));
        step.insert("FAST".to_string(), Snapshot::flat(100.0 + 5.0 * t, 1000.0));
        step.insert("DEAD".to_string(), Snapshot::flat(100.0 + 9.0 * t, 0.0));
        step
    }

    fn buys(decisions: &Decisions) -> Vec<String> {
        decisions
            .iter()
            .filter(|(_, d)| d.action == SignalAction::Buy)
            .map(|(ticker, _)| ticker.clone())
            .collect()
    }

    #[test]
    fn holds_until_windows_are_warm() {
        let mut strategy = strategy(8.0, 0.0);
        for i in 0..7 {
            assert!(buys(&strategy.decide(&step(i))).is_empty());
        }
        assert_eq!(buys(&strategy.decide(&step(7))), vec!["FAST".to_string()]);
    }

    #[test]
    fn picks_by_rank_and_skips_zero_volume() {
        let mut strategy = strategy(8.0, 1.0);
        let last = (0..10).map(|i| strategy.decide(&step(i))).last().unwrap();
        assert_eq!(buys(&last), vec!["SLOW".to_string()]);
        assert_eq!(last.len(), 4);
        assert!(last["DEAD"].is_empty());
    }

    #[test]
    fn rank_past_candidates_holds_everywhere() {
        let mut strategy = strategy(4.0, 5.0);
        for i in 0..6 {
            assert!(buys(&strategy.decide(&step(i))).is_empty());
        }
    }

    #[test]
    fn missing_volume_is_not_observed() {
        let mut strategy = strategy(2.0, 0.0);
        let mut step = MarketStep::new();
        step.insert(
            "AAA".to_string(),
            Snapshot {
                volume: None,
                ..Snapshot::flat(10.0, 0.0)
            },
        );
        for _ in 0..4 {
            assert!(buys(&strategy.decide(&step)).is_empty());
        }
        assert!(strategy.instruments.is_empty());
    }

    #[test]
    fn period_reset_restarts_warm_up_when_enabled() {
        let mut resetting = strategy(8.0, 0.0);
        resetting.reset_each_period = true;
        for i in 0..8 {
            resetting.decide(&step(i));
        }
        resetting.reset_for_new_period();
        assert!(resetting.instruments.is_empty());
        for i in 8..15 {
            assert!(buys(&resetting.decide(&step(i))).is_empty(), "fired at {}", i);
        }
        assert_eq!(buys(&resetting.decide(&step(15))), vec!["FAST".to_string()]);

        let mut keeping = strategy(8.0, 0.0);
        for i in 0..8 {
            keeping.decide(&step(i));
        }
        keeping.reset_for_new_period();
        assert_eq!(buys(&keeping.decide(&step(8))), vec!["FAST".to_string()]);
    }

    #[test]
    fn rejects_oversized_window() {
        let mut params = HashMap::new();
        params.insert("windowSize".to_string(), 1e11);
        assert!(WaveletTrendStrategy::new(&params, None).is_err());
    }

    #[test]
    fn defaults_to_db4_and_rejects_unknown_basis() {
        let default = WaveletTrendStrategy::new(&HashMap::new(), None).unwrap();
        assert_eq!(default.basis(), WaveletBasis::Db4);
        assert!(WaveletTrendStrategy::new(&HashMap::new(), Some("coif3")).is_err());
    }
}
