use crate::error::{EngineError, EngineResult};
use crate::models::*;
use crate::strategy_utils::{buy_decision, hold_all, sell_decision};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_distr::{Distribution, Poisson};
use std::collections::HashMap;

#[derive(Debug, Clone)]
struct HeldPick {
    ticker: String,
    holding_steps: u64,
    remaining: u64,
}

/// Baseline that ignores history and buys one instrument chosen uniformly
/// among those with a price in the step.
///
/// Without `avgHolding` it emits a BUY every step. With it, each pick is held
/// for `Poisson(avgHolding) + 1` steps counted from the BUY decision, then
/// sold, and the next pick waits another sampled number of steps.
pub struct RandomPickStrategy {
    pub template_id: String,
    rng: StdRng,
    holding: Option<Poisson<f64>>,
    held: Option<HeldPick>,
    wait: u64,
}

impl RandomPickStrategy {
    pub fn new(parameters: &HashMap<String, f64>, seed: u64) -> EngineResult<Self> {
        let holding = match parameters.get("avgHolding") {
            Some(&avg) if avg.is_finite() && avg > 0.0 => Some(Poisson::new(avg).map_err(|err| {
                EngineError::config(format!("avgHolding {} is not a valid Poisson mean: {}", avg, err))
            })?),
            Some(avg) => {
                return Err(EngineError::config(format!(
                    "avgHolding must be a positive number (value: {})",
                    avg
                )))
            }
            None => None,
        };

        Ok(Self {
            template_id: "random".to_string(),
            rng: StdRng::seed_from_u64(seed),
            holding,
            held: None,
            wait: 0,
        })
    }

    fn sample_steps(&mut self, holding: &Poisson<f64>) -> u64 {
        let draw: f64 = holding.sample(&mut self.rng);
        draw as u64 + 1
    }

    fn pick(&mut self, step: &MarketStep) -> Option<(String, usize)> {
        let present: Vec<&String> = step
            .iter()
            .filter(|(_, snapshot)| snapshot.close_price().is_some())
            .map(|(ticker, _)| ticker)
            .collect();
        present
            .choose(&mut self.rng)
            .map(|ticker| ((*ticker).clone(), present.len()))
    }
}

impl super::Strategy for RandomPickStrategy {
    fn get_template_id(&self) -> &str {
        &self.template_id
    }

    fn decide(&mut self, step: &MarketStep) -> Decisions {
        let mut decisions = hold_all(step);
        let Some(holding) = self.holding.clone() else {
            if let Some((ticker, candidates)) = self.pick(step) {
                decisions.insert(
                    ticker,
                    buy_decision("random_pick", &[("candidates", candidates as f64)]),
                );
            }
            return decisions;
        };

        if let Some(held) = self.held.as_mut() {
            held.remaining = held.remaining.saturating_sub(1);
            if held.remaining == 0 {
                let decision = sell_decision(
                    "holding_period_elapsed",
                    &[("holding_steps", held.holding_steps as f64)],
                );
                decisions.insert(held.ticker.clone(), decision);
                self.held = None;
                self.wait = self.sample_steps(&holding);
            }
            return decisions;
        }

        if self.wait > 0 {
            self.wait -= 1;
            return decisions;
        }

        if let Some((ticker, candidates)) = self.pick(step) {
            let holding_steps = self.sample_steps(&holding);
            decisions.insert(
                ticker.clone(),
                buy_decision(
                    "random_pick",
                    &[
                        ("candidates", candidates as f64),
                        ("holding_steps", holding_steps as f64),
                    ],
                ),
            );
            self.held = Some(HeldPick {
                ticker,
                holding_steps,
                remaining: holding_steps,
            });
        }
        decisions
    }

    fn get_min_data_points(&self) -> usize {
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategy::Strategy;

    fn step() -> MarketStep {
        let mut step = MarketStep::new();
        step.insert("AAA".to_string(), Snapshot::flat(10.0, 1.0));
        step.insert("BBB".to_string(), Snapshot::flat(20.0, 1.0));
        step.insert("CCC".to_string(), Snapshot::default());
        step
    }

    fn every_step(seed: u64) -> RandomPickStrategy {
        RandomPickStrategy::new(&HashMap::new(), seed).unwrap()
    }

    fn with_holding(avg: f64, seed: u64) -> RandomPickStrategy {
        let params: HashMap<String, f64> = [("avgHolding".to_string(), avg)].into_iter().collect();
        RandomPickStrategy::new(&params, seed).unwrap()
    }

    fn picks(strategy: &mut RandomPickStrategy, rounds: usize) -> Vec<String> {
        (0..rounds)
            .map(|_| {
                let decisions = strategy.decide(&step());
                let buys: Vec<String> = decisions
                    .iter()
                    .filter(|(_, d)| d.action == SignalAction::Buy)
                    .map(|(ticker, _)| ticker.clone())
                    .collect();
                assert_eq!(buys.len(), 1);
                buys[0].clone()
            })
            .collect()
    }

    #[test]
    fn same_seed_same_picks() {
        let first = picks(&mut every_step(11), 20);
        let second = picks(&mut every_step(11), 20);
        assert_eq!(first, second);
    }

    #[test]
    fn never_picks_instrument_without_price() {
        let chosen = picks(&mut every_step(3), 50);
        assert!(chosen.iter().all(|ticker| ticker != "CCC"));
    }

    #[test]
    fn empty_step_holds() {
        let mut strategy = every_step(1);
        assert!(strategy.decide(&MarketStep::new()).is_empty());
    }

    #[test]
    fn held_pick_is_sold_after_its_sampled_holding_period() {
        let mut strategy = with_holding(3.0, 9);
        let mut open: Option<(String, u64, usize)> = None;
        let mut round_trips = 0;
        for index in 0..400 {
            let decisions = strategy.decide(&step());
            let fired: Vec<(&String, &Decision)> =
                decisions.iter().filter(|(_, d)| !d.is_empty()).collect();
            assert!(fired.len() <= 1);
            let Some((ticker, decision)) = fired.first() else {
                continue;
            };
            match decision.action {
                SignalAction::Buy => {
                    assert!(open.is_none(), "bought while holding at {}", index);
                    let steps = decision.variable("holding_steps").unwrap() as u64;
                    assert!(steps >= 1);
                    open = Some(((*ticker).clone(), steps, index));
                }
                SignalAction::Sell => {
                    let (held, steps, bought_at) = open.take().unwrap();
                    assert_eq!(**ticker, held);
                    assert_eq!((index - bought_at) as u64, steps);
                    round_trips += 1;
                }
                SignalAction::Hold => unreachable!(),
            }
        }
        assert!(round_trips > 10);
    }

    #[test]
    fn rejects_non_positive_holding() {
        for avg in [0.0, -2.0, f64::NAN] {
            let params: HashMap<String, f64> = [("avgHolding".to_string(), avg)].into_iter().collect();
            assert!(RandomPickStrategy::new(&params, 1).is_err());
        }
    }
}
