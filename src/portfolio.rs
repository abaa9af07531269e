use crate::error::{EngineError, EngineResult};
use log::info;
use serde::{Deserialize, Serialize};

/// One lot of one instrument.
///
/// Created open by [`Portfolio::add`]; [`Holding::sell`] closes it once and
/// freezes the sale fields. `profit` is per share.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Holding {
    pub ticker: String,
    pub quantity: u32,
    pub buy_price: f64,
    pub buy_time_key: String,
    pub sold: bool,
    pub sell_price: Option<f64>,
    pub sell_time_key: Option<String>,
    pub profit: Option<f64>,
    pub gain: Option<f64>,
}

impl Holding {
    pub fn new(ticker: &str, buy_price: f64, buy_time_key: &str, quantity: u32) -> Self {
        Self {
            ticker: ticker.to_string(),
            quantity,
            buy_price,
            buy_time_key: buy_time_key.to_string(),
            sold: false,
            sell_price: None,
            sell_time_key: None,
            profit: None,
            gain: None,
        }
    }

    pub fn sell(&mut self, sell_price: f64, sell_time_key: &str) {
        if self.sold {
            return;
        }
        self.sold = true;
        self.sell_price = Some(sell_price);
        self.sell_time_key = Some(sell_time_key.to_string());
        self.profit = Some(sell_price - self.buy_price);
        self.gain = if self.buy_price != 0.0 {
            Some(sell_price / self.buy_price * 100.0)
        } else {
            None
        };
    }

    pub fn cost(&self) -> f64 {
        self.buy_price * self.quantity as f64
    }

    /// Profit over the whole lot, zero while open.
    pub fn realized_profit(&self) -> f64 {
        self.profit.unwrap_or(0.0) * self.quantity as f64
    }
}

/// Open and closed lots plus free cash.
///
/// Buys debit `price * quantity` and sells credit `price * sold_quantity`, so
/// realized profit is already inside `cash` and
/// `cash + open cost - initial_cash == realized_profit()` at all times.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Portfolio {
    pub active: Vec<Holding>,
    pub historical: Vec<Holding>,
    pub cash: f64,
    pub initial_cash: f64,
}

impl Portfolio {
    pub fn new(cash: f64) -> Self {
        Self {
            active: Vec::new(),
            historical: Vec::new(),
            cash,
            initial_cash: cash,
        }
    }

    /// Opens a new lot. Rejected without side effects when the cost exceeds
    /// free cash.
    pub fn add(&mut self, ticker: &str, price: f64, time_key: &str, quantity: u32) -> EngineResult<()> {
        let required = price * quantity as f64;
        if !required.is_finite() || required > self.cash {
            return Err(EngineError::InsufficientFunds {
                instrument: ticker.to_string(),
                required,
                available: self.cash,
            });
        }
        info!("Bought {} x{} at {:.4} on {}", ticker, quantity, price, time_key);
        self.cash -= required;
        self.active.push(Holding::new(ticker, price, time_key, quantity));
        Ok(())
    }

    /// Sells against the oldest open lot of `ticker` and returns the quantity
    /// actually sold.
    ///
    /// A smaller quantity splits the lot: the sold part moves to history and
    /// the remainder stays open. A larger quantity sells only what the lot
    /// holds.
    pub fn sold(&mut self, ticker: &str, price: f64, time_key: &str, quantity: u32) -> EngineResult<u32> {
        let index = self
            .active
            .iter()
            .position(|holding| holding.ticker == ticker)
            .ok_or_else(|| EngineError::InvalidSellTarget {
                instrument: ticker.to_string(),
            })?;

        let sold_quantity = if self.active[index].quantity > quantity {
            let holding = &mut self.active[index];
            holding.quantity -= quantity;
            let mut sold_part = holding.clone();
            sold_part.quantity = quantity;
            sold_part.sell(price, time_key);
            self.historical.push(sold_part);
            quantity
        } else {
            let mut holding = self.active.remove(index);
            holding.sell(price, time_key);
            let held = holding.quantity;
            self.historical.push(holding);
            held
        };

        info!("Sold {} x{} at {:.4} on {}", ticker, sold_quantity, price, time_key);
        self.cash += price * sold_quantity as f64;
        Ok(sold_quantity)
    }

    pub fn has_position(&self, ticker: &str) -> bool {
        self.active.iter().any(|holding| holding.ticker == ticker)
    }

    pub fn open_quantity(&self, ticker: &str) -> u32 {
        self.active
            .iter()
            .filter(|holding| holding.ticker == ticker)
            .map(|holding| holding.quantity)
            .sum()
    }

    pub fn open_cost(&self) -> f64 {
        self.active.iter().map(Holding::cost).sum()
    }

    pub fn realized_profit(&self) -> f64 {
        self.historical.iter().map(Holding::realized_profit).sum()
    }

    /// Net worth with open lots carried at cost. Recomputed on every call.
    pub fn total_value(&self) -> f64 {
        self.cash + self.open_cost()
    }

    /// Cumulative gain in percent of initial cash.
    pub fn total_gain(&self) -> f64 {
        if self.initial_cash == 0.0 {
            return 0.0;
        }
        100.0 * (self.total_value() - self.initial_cash) / self.initial_cash
    }
}
