use crate::portfolio::Holding;
use anyhow::anyhow;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::str::FromStr;

/// One instrument's OHLCV record for a single time key. Any field may be
/// absent when the instrument did not trade during the period.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    #[serde(default)]
    pub open: Option<f64>,
    #[serde(default)]
    pub close: Option<f64>,
    #[serde(default)]
    pub high: Option<f64>,
    #[serde(default)]
    pub low: Option<f64>,
    #[serde(default)]
    pub volume: Option<f64>,
}

impl Snapshot {
    /// Snapshot where every price field is `price`.
    pub fn flat(price: f64, volume: f64) -> Self {
        Self {
            open: Some(price),
            close: Some(price),
            high: Some(price),
            low: Some(price),
            volume: Some(volume),
        }
    }

    pub fn ohlcv(open: f64, high: f64, low: f64, close: f64, volume: f64) -> Self {
        Self {
            open: Some(open),
            close: Some(close),
            high: Some(high),
            low: Some(low),
            volume: Some(volume),
        }
    }

    pub fn close_price(&self) -> Option<f64> {
        self.close.filter(|value| value.is_finite())
    }
}

/// Instrument symbol → snapshot for one time step. Instruments without a
/// record are simply absent.
pub type MarketStep = BTreeMap<String, Snapshot>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SignalAction {
    Buy,
    Sell,
    Hold,
}

impl SignalAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            SignalAction::Buy => "buy",
            SignalAction::Sell => "sell",
            SignalAction::Hold => "hold",
        }
    }
}

impl FromStr for SignalAction {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "buy" => Ok(SignalAction::Buy),
            "sell" => Ok(SignalAction::Sell),
            "hold" | "none" => Ok(SignalAction::Hold),
            other => Err(anyhow!("Unknown signal action '{}'", other)),
        }
    }
}

/// A strategy's verdict for one instrument at one step.
///
/// `variables` carries the diagnostics that made a BUY/SELL fire and stays
/// empty for `Hold`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    pub action: SignalAction,
    #[serde(default)]
    pub variables: BTreeMap<String, f64>,
    #[serde(default)]
    pub rationale: String,
}

impl Decision {
    pub fn is_empty(&self) -> bool {
        self.action == SignalAction::Hold
    }

    pub fn variable(&self, name: &str) -> Option<f64> {
        self.variables.get(name).copied()
    }
}

pub type Decisions = BTreeMap<String, Decision>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderSide::Buy => "buy",
            OrderSide::Sell => "sell",
        }
    }
}

/// A decided but not yet executed order. It becomes eligible once the
/// replay reaches `defer_to`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderIntent {
    pub side: OrderSide,
    pub ticker: String,
    pub quantity: u32,
    pub decided_at: String,
    pub defer_to: String,
    pub attempts: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataPoint {
    pub time_key: String,
    pub value: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DrawdownInfo {
    pub peak_value: Option<f64>,
    pub peak_time_key: Option<String>,
    pub max_drawdown: f64,
    pub max_drawdown_percent: f64,
    pub max_drawdown_seconds: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PerformanceSummary {
    pub closed_lots: usize,
    pub winning_lots: usize,
    pub losing_lots: usize,
    pub win_rate: f64,
    pub realized_profit: f64,
    pub avg_gain_percent: f64,
    pub best_gain_percent: f64,
    pub worst_gain_percent: f64,
    pub final_value: f64,
    pub total_gain_percent: f64,
    pub step_return_volatility: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BacktestReport {
    pub strategy_id: String,
    pub seed: u64,
    pub completed: bool,
    pub termination: Option<String>,
    pub steps: usize,
    pub values: Vec<DataPoint>,
    pub gains: Vec<DataPoint>,
    pub decisions: BTreeMap<String, Decisions>,
    pub closed_holdings: Vec<Holding>,
    pub open_holdings: Vec<Holding>,
    pub pending_orders: Vec<OrderIntent>,
    pub drawdown: DrawdownInfo,
    pub performance: PerformanceSummary,
}
