use crate::config::{ExecutorConfig, StrategySettings};
use crate::data_context::{MarketData, MarketFeed, ReplayFeed};
use crate::error::{EngineError, EngineResult};
use crate::models::*;
use crate::performance::{DrawdownTracker, PerformanceCalculator};
use crate::portfolio::Portfolio;
use crate::strategy::Strategy;
use crate::time_keys;
use log::{debug, error, info, warn};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::Arc;

/// Event-driven replay over a [`MarketFeed`].
///
/// Each step runs in a fixed order:
///
/// 1. settle orders queued at earlier steps against this step's prices, and
///    on the final step optionally close every open lot,
/// 2. record net worth and gain, update the drawdown tracker and check the
///    capital floor,
/// 3. on the closing bar of a period queue sells for every open lot and
///    skip the strategy, otherwise ask the strategy for decisions,
/// 4. turn decisions into orders deferred to the next step.
///
/// Decisions made at step `t` therefore never fill at `t`'s prices.
pub struct Executor<F: MarketFeed> {
    feed: F,
    strategy: Box<dyn Strategy + Send>,
    config: ExecutorConfig,
    allowed: HashSet<String>,
    portfolio: Portfolio,
    drawdown: DrawdownTracker,
    pending: Vec<OrderIntent>,
    values: Vec<DataPoint>,
    gains: Vec<DataPoint>,
    decisions: BTreeMap<String, Decisions>,
    current_date: Option<String>,
    acted_this_period: bool,
    steps: usize,
    total_steps: usize,
    termination: Option<EngineError>,
}

impl<F: MarketFeed> Executor<F> {
    pub fn new(feed: F, strategy: Box<dyn Strategy + Send>, config: ExecutorConfig) -> EngineResult<Self> {
        config.validate()?;
        let total_steps = feed.time_keys().len();
        Ok(Self {
            feed,
            strategy,
            allowed: config.instruments.iter().cloned().collect(),
            portfolio: Portfolio::new(config.initial_cash),
            config,
            drawdown: DrawdownTracker::new(),
            pending: Vec::new(),
            values: Vec::new(),
            gains: Vec::new(),
            decisions: BTreeMap::new(),
            current_date: None,
            acted_this_period: false,
            steps: 0,
            total_steps,
            termination: None,
        })
    }

    /// Replays every time key. Recoverable errors skip the rest of their step.
    /// Capital exhaustion stops the replay and is returned as the error;
    /// [`Executor::report`] still describes the steps that ran.
    pub fn run(&mut self) -> EngineResult<BacktestReport> {
        let time_keys = self.feed.time_keys().to_vec();
        info!(
            "Replaying {} steps with strategy {} (seed {})",
            time_keys.len(),
            self.strategy.get_template_id(),
            self.config.seed
        );

        for (index, time_key) in time_keys.iter().enumerate() {
            let next_key = time_keys.get(index + 1).map(String::as_str);
            if let Err(err) = self.process_step(time_key, next_key) {
                if !err.is_terminal() {
                    warn!("Skipping the rest of step {}: {}", time_key, err);
                    continue;
                }
                error!("Stopping replay at {}: {}", time_key, err);
                self.termination = Some(err.clone());
                return Err(err);
            }
        }

        let report = self.report();
        info!(
            "Replay finished: value {:.2} ({:+.2}%), {} closed lots, max drawdown {:.2}",
            report.performance.final_value,
            report.performance.total_gain_percent,
            report.performance.closed_lots,
            report.drawdown.max_drawdown
        );
        Ok(report)
    }

    fn process_step(&mut self, time_key: &str, next_key: Option<&str>) -> EngineResult<()> {
        self.steps += 1;
        self.advance_period(time_key);
        self.settle_pending(time_key, next_key);
        if next_key.is_none() && self.config.liquidate_at_end {
            self.close_out(time_key);
        }
        self.record_value(time_key)?;

        if self.config.is_end_of_period(time_key) {
            self.liquidate(time_key, next_key);
            return Ok(());
        }
        if self.config.single_action_per_period && self.acted_this_period {
            return Ok(());
        }

        let mut step = self.feed.step(time_key);
        if !self.allowed.is_empty() {
            step.retain(|ticker, _| self.allowed.contains(ticker));
        }
        let decisions = self.strategy.decide(&step);
        let fired: Decisions = decisions
            .into_iter()
            .filter(|(_, decision)| !decision.is_empty())
            .collect();
        if fired.is_empty() {
            return Ok(());
        }

        let placed = self.place_orders(&fired, time_key, next_key);
        self.decisions.insert(time_key.to_string(), fired);
        if placed > 0 && self.config.single_action_per_period {
            self.acted_this_period = true;
        }
        Ok(())
    }

    fn advance_period(&mut self, time_key: &str) {
        let date = time_keys::calendar_date(time_key);
        if self.current_date.as_deref() == Some(date) {
            return;
        }
        let first_period = self.current_date.is_none();
        self.current_date = Some(date.to_string());
        if !first_period {
            self.acted_this_period = false;
            self.strategy.reset_for_new_period();
        }
    }

    /// Sells settle before buys so that freed cash is available.
    fn settle_pending(&mut self, time_key: &str, next_key: Option<&str>) {
        let (due, waiting): (Vec<OrderIntent>, Vec<OrderIntent>) = std::mem::take(&mut self.pending)
            .into_iter()
            .partition(|order| order.defer_to.as_str() <= time_key);
        self.pending = waiting;

        let (sells, buys): (Vec<OrderIntent>, Vec<OrderIntent>) = due
            .into_iter()
            .partition(|order| order.side == OrderSide::Sell);

        for mut order in sells.into_iter().chain(buys) {
            let price = match self.feed.fill_price(order.side, &order.ticker, time_key) {
                Some(price) => price,
                None => {
                    order.attempts += 1;
                    debug!(
                        "{} order for {}: {} (attempt {})",
                        order.side.as_str(),
                        order.ticker,
                        EngineError::MissingData {
                            time_key: time_key.to_string(),
                            instrument: order.ticker.clone(),
                        },
                        order.attempts
                    );
                    match next_key {
                        Some(next) if order.attempts < self.config.max_fill_attempts => {
                            order.defer_to = next.to_string();
                            self.pending.push(order);
                        }
                        Some(_) => warn!(
                            "Dropping {} order for {} decided at {} after {} attempts",
                            order.side.as_str(),
                            order.ticker,
                            order.decided_at,
                            order.attempts
                        ),
                        // nothing left to retry against; report it as pending
                        None => self.pending.push(order),
                    }
                    continue;
                }
            };

            match order.side {
                OrderSide::Buy => {
                    let result = self.portfolio.add(&order.ticker, price, time_key, order.quantity);
                    if let Err(err) = result {
                        warn!("Buy order rejected at {}: {}", time_key, err);
                    }
                }
                OrderSide::Sell => {
                    let result = self.portfolio.sold(&order.ticker, price, time_key, order.quantity);
                    if let Err(err) = result {
                        debug!("Sell order ignored at {}: {}", time_key, err);
                    }
                }
            }
        }
    }

    fn record_value(&mut self, time_key: &str) -> EngineResult<()> {
        let value = self.portfolio.total_value();
        self.values.push(DataPoint {
            time_key: time_key.to_string(),
            value,
        });
        self.gains.push(DataPoint {
            time_key: time_key.to_string(),
            value: self.portfolio.total_gain(),
        });
        self.drawdown.update(value, time_key)?;

        let minimum = self.config.minimum_net_worth();
        if value < minimum {
            return Err(EngineError::CapitalExhausted {
                time_key: time_key.to_string(),
                net_worth: value,
                minimum,
            });
        }
        Ok(())
    }

    fn liquidate(&mut self, time_key: &str, next_key: Option<&str>) {
        let Some(next) = next_key else {
            return;
        };
        let tickers: BTreeSet<String> = self
            .portfolio
            .active
            .iter()
            .map(|holding| holding.ticker.clone())
            .collect();

        for ticker in tickers {
            if self.has_pending(OrderSide::Sell, &ticker) {
                continue;
            }
            let quantity = self.portfolio.open_quantity(&ticker);
            info!(
                "End of period at {}: closing {} x{} at {}",
                time_key, ticker, quantity, next
            );
            self.pending.push(OrderIntent {
                side: OrderSide::Sell,
                ticker,
                quantity,
                decided_at: time_key.to_string(),
                defer_to: next.to_string(),
                attempts: 0,
            });
        }
    }

    /// Final step only: there is no later key to defer to, so open lots are
    /// sold at this step's fill price. Lots without a price stay open.
    fn close_out(&mut self, time_key: &str) {
        let tickers: BTreeSet<String> = self
            .portfolio
            .active
            .iter()
            .map(|holding| holding.ticker.clone())
            .collect();

        for ticker in tickers {
            let Some(price) = self.feed.fill_price(OrderSide::Sell, &ticker, time_key) else {
                warn!("No price to close {} at the end of the replay ({})", ticker, time_key);
                continue;
            };
            let quantity = self.portfolio.open_quantity(&ticker);
            info!("Replay ends at {}: closing {} x{}", time_key, ticker, quantity);
            while self.portfolio.has_position(&ticker) {
                if let Err(err) = self.portfolio.sold(&ticker, price, time_key, quantity) {
                    debug!("Close-out sell ignored at {}: {}", time_key, err);
                    break;
                }
            }
        }
        let portfolio = &self.portfolio;
        self.pending
            .retain(|order| order.side == OrderSide::Buy || portfolio.has_position(&order.ticker));
    }

    /// Queues orders for fired decisions and returns how many were placed.
    /// Buys need a flat instrument and sells need an open lot.
    fn place_orders(&mut self, fired: &Decisions, time_key: &str, next_key: Option<&str>) -> usize {
        let Some(next) = next_key else {
            debug!("No step after {}; decisions are recorded but not traded", time_key);
            return 0;
        };

        let mut placed = 0;
        for (ticker, decision) in fired {
            let side = match decision.action {
                SignalAction::Buy => OrderSide::Buy,
                SignalAction::Sell => OrderSide::Sell,
                SignalAction::Hold => continue,
            };
            let open = self.portfolio.has_position(ticker);
            let allowed = match side {
                OrderSide::Buy => !open && !self.has_pending(OrderSide::Buy, ticker),
                OrderSide::Sell => open && !self.has_pending(OrderSide::Sell, ticker),
            };
            if !allowed {
                continue;
            }

            self.pending.push(OrderIntent {
                side,
                ticker: ticker.clone(),
                quantity: self.config.order_quantity,
                decided_at: time_key.to_string(),
                defer_to: next.to_string(),
                attempts: 0,
            });
            placed += 1;
        }
        placed
    }

    fn has_pending(&self, side: OrderSide, ticker: &str) -> bool {
        self.pending
            .iter()
            .any(|order| order.side == side && order.ticker == ticker)
    }

    pub fn portfolio(&self) -> &Portfolio {
        &self.portfolio
    }

    pub fn pending_orders(&self) -> &[OrderIntent] {
        &self.pending
    }

    pub fn values(&self) -> &[DataPoint] {
        &self.values
    }

    pub fn gains(&self) -> &[DataPoint] {
        &self.gains
    }

    pub fn decisions(&self) -> &BTreeMap<String, Decisions> {
        &self.decisions
    }

    pub fn report(&self) -> BacktestReport {
        BacktestReport {
            strategy_id: self.strategy.get_template_id().to_string(),
            seed: self.config.seed,
            completed: self.termination.is_none() && self.steps == self.total_steps,
            termination: self.termination.as_ref().map(|err| err.to_string()),
            steps: self.steps,
            values: self.values.clone(),
            gains: self.gains.clone(),
            decisions: self.decisions.clone(),
            closed_holdings: self.portfolio.historical.clone(),
            open_holdings: self.portfolio.active.clone(),
            pending_orders: self.pending.clone(),
            drawdown: self.drawdown.info(),
            performance: PerformanceCalculator::summarize(&self.portfolio, &self.values),
        }
    }
}

/// Builds the strategy and feed for one run and replays it.
///
/// Capital exhaustion still yields a report, flagged as not completed;
/// configuration problems are returned as errors.
pub fn replay(
    data: Arc<MarketData>,
    settings: &StrategySettings,
    config: &ExecutorConfig,
) -> EngineResult<BacktestReport> {
    let strategy = settings.build(config.seed)?;
    let feed = ReplayFeed::new(data, config.fill_policy, config.seed);
    let mut executor = Executor::new(feed, strategy, config.clone())?;
    match executor.run() {
        Ok(report) => Ok(report),
        Err(err @ EngineError::CapitalExhausted { .. }) => {
            warn!("Replay of {} ended early: {}", settings.template_id, err);
            Ok(executor.report())
        }
        Err(err) => Err(err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FillPricePolicy;

    /// Plays back `(call index, ticker, action)` decisions.
    struct Scripted {
        script: Vec<(usize, &'static str, SignalAction)>,
        calls: usize,
    }

    impl Strategy for Scripted {
        fn get_template_id(&self) -> &str {
            "scripted"
        }

        fn decide(&mut self, step: &MarketStep) -> Decisions {
            let call = self.calls;
            self.calls += 1;
            let mut decisions = crate::strategy_utils::hold_all(step);
            for (_, ticker, action) in self.script.iter().filter(|(at, _, _)| *at == call) {
                decisions.insert(
                    ticker.to_string(),
                    Decision {
                        action: *action,
                        variables: BTreeMap::new(),
                        rationale: "scripted".to_string(),
                    },
                );
            }
            decisions
        }

        fn get_min_data_points(&self) -> usize {
            0
        }
    }

    fn intraday_data() -> Arc<MarketData> {
        let keys = [
            "2020-01-02 09:30:00",
            "2020-01-02 12:00:00",
            "2020-01-02 15:55:00",
            "2020-01-03 09:30:00",
            "2020-01-03 12:00:00",
        ];
        let rows = keys.iter().enumerate().map(|(i, key)| {
            let price = 10.0 + i as f64;
            (key.to_string(), "AAA".to_string(), Snapshot::flat(price, 100.0))
        });
        Arc::new(MarketData::from_rows(rows).unwrap())
    }

    fn executor(
        script: Vec<(usize, &'static str, SignalAction)>,
        config: ExecutorConfig,
    ) -> Executor<ReplayFeed> {
        let feed = ReplayFeed::new(intraday_data(), FillPricePolicy::Open, config.seed);
        let strategy = Box::new(Scripted { script, calls: 0 });
        Executor::new(feed, strategy, config).unwrap()
    }

    #[test]
    fn end_of_period_liquidates_and_skips_strategy() {
        let config = ExecutorConfig {
            end_of_period_time: Some("15:55:00".to_string()),
            ..ExecutorConfig::default()
        };
        let mut executor = executor(vec![(0, "AAA", SignalAction::Buy)], config);
        let report = executor.run().unwrap();

        // bought at the 12:00 open, sold at the next morning's open
        assert_eq!(report.closed_holdings.len(), 1);
        let lot = &report.closed_holdings[0];
        assert_eq!(lot.buy_price, 11.0);
        assert_eq!(lot.sell_price, Some(13.0));
        assert_eq!(lot.sell_time_key.as_deref(), Some("2020-01-03 09:30:00"));
        assert!(report.open_holdings.is_empty());
        assert!(report.completed);
    }

    #[test]
    fn single_action_per_period_waits_for_next_date() {
        let config = ExecutorConfig {
            single_action_per_period: true,
            ..ExecutorConfig::default()
        };
        let script = vec![(0, "AAA", SignalAction::Buy), (1, "AAA", SignalAction::Sell)];
        let mut executor = executor(script, config);
        let report = executor.run().unwrap();

        // after the morning buy the strategy is not consulted again that day
        let decided_at: Vec<&String> = report.decisions.keys().collect();
        assert_eq!(decided_at, ["2020-01-02 09:30:00", "2020-01-03 09:30:00"]);
        assert_eq!(report.closed_holdings.len(), 1);
        assert_eq!(
            report.closed_holdings[0].sell_time_key.as_deref(),
            Some("2020-01-03 12:00:00")
        );
    }

    #[test]
    fn quiet_strategy_runs_every_step_without_trading() {
        let mut executor = executor(Vec::new(), ExecutorConfig::default());
        let report = executor.run().unwrap();
        assert_eq!(report.steps, 5);
        assert!(report.completed);
        assert!(report.decisions.is_empty());
        assert!(report.values.iter().all(|point| point.value == 1000.0));
    }

    #[test]
    fn last_step_decisions_are_recorded_but_not_queued() {
        let mut executor = executor(vec![(4, "AAA", SignalAction::Buy)], ExecutorConfig::default());
        let report = executor.run().unwrap();
        assert!(report.decisions.contains_key("2020-01-03 12:00:00"));
        assert!(report.pending_orders.is_empty());
    }

    #[test]
    fn final_step_closes_open_lots_when_enabled() {
        let config = ExecutorConfig {
            liquidate_at_end: true,
            ..ExecutorConfig::default()
        };
        let mut closing = executor(vec![(0, "AAA", SignalAction::Buy)], config);
        let report = closing.run().unwrap();

        assert!(report.open_holdings.is_empty());
        assert_eq!(report.closed_holdings.len(), 1);
        let lot = &report.closed_holdings[0];
        assert_eq!(lot.sell_price, Some(14.0));
        assert_eq!(lot.sell_time_key.as_deref(), Some("2020-01-03 12:00:00"));
        // the last recorded value already includes the close-out
        assert_eq!(report.values.last().map(|point| point.value), Some(1003.0));
        assert!((report.performance.realized_profit - 3.0).abs() < 1e-9);

        let mut keeping = executor(vec![(0, "AAA", SignalAction::Buy)], ExecutorConfig::default());
        assert_eq!(keeping.run().unwrap().open_holdings.len(), 1);
    }

    #[test]
    fn rejects_invalid_config() {
        let feed = ReplayFeed::new(intraday_data(), FillPricePolicy::Open, 1);
        let strategy = Box::new(Scripted {
            script: Vec::new(),
            calls: 0,
        });
        let config = ExecutorConfig {
            initial_cash: -5.0,
            ..ExecutorConfig::default()
        };
        assert!(matches!(
            Executor::new(feed, strategy, config),
            Err(EngineError::Configuration(_))
        ));
    }
}
