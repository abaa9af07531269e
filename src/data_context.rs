use crate::config::FillPricePolicy;
use crate::error::{EngineError, EngineResult};
use crate::models::{MarketStep, OrderSide, Snapshot};
use crate::time_keys::{self, TimeKeyFormat};
use anyhow::{Context, Result};
use chrono::prelude::*;
use log::{debug, info};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;
use std::sync::Arc;

const MARKET_DATA_SNAPSHOT_VERSION: u32 = 1;

#[derive(Serialize, Deserialize)]
struct MarketDataSnapshot {
    version: u32,
    generated_at: DateTime<Utc>,
    steps: BTreeMap<String, MarketStep>,
}

/// Read-only store of `time key -> instrument -> Snapshot`.
///
/// Keys iterate in ascending order, which is chronological for both
/// supported key formats.
#[derive(Debug, Clone, PartialEq)]
pub struct MarketData {
    steps: BTreeMap<String, MarketStep>,
    time_keys: Vec<String>,
    instruments: Vec<String>,
    format: Option<TimeKeyFormat>,
}

impl MarketData {
    pub fn from_steps(steps: BTreeMap<String, MarketStep>) -> EngineResult<Self> {
        let format = time_keys::validate_keys(steps.keys())?;
        let instruments: BTreeSet<String> = steps
            .values()
            .flat_map(|step| step.keys().cloned())
            .collect();
        Ok(Self {
            time_keys: steps.keys().cloned().collect(),
            instruments: instruments.into_iter().collect(),
            steps,
            format,
        })
    }

    /// Builds a store from `(time key, instrument, snapshot)` rows.
    pub fn from_rows<I>(rows: I) -> EngineResult<Self>
    where
        I: IntoIterator<Item = (String, String, Snapshot)>,
    {
        let mut steps: BTreeMap<String, MarketStep> = BTreeMap::new();
        for (time_key, ticker, snapshot) in rows {
            steps.entry(time_key).or_default().insert(ticker, snapshot);
        }
        Self::from_steps(steps)
    }

    pub fn has_data(&self) -> bool {
        !self.time_keys.is_empty()
    }

    pub fn time_keys(&self) -> &[String] {
        &self.time_keys
    }

    pub fn instruments(&self) -> &[String] {
        &self.instruments
    }

    pub fn format(&self) -> Option<TimeKeyFormat> {
        self.format
    }

    pub fn step(&self, time_key: &str) -> Option<&MarketStep> {
        self.steps.get(time_key)
    }

    pub fn snapshot(&self, time_key: &str, ticker: &str) -> Option<&Snapshot> {
        self.steps.get(time_key).and_then(|step| step.get(ticker))
    }

    /// Number of steps in which each instrument has a usable close.
    pub fn coverage(&self) -> BTreeMap<String, usize> {
        let mut coverage: BTreeMap<String, usize> =
            self.instruments.iter().map(|ticker| (ticker.clone(), 0)).collect();
        for step in self.steps.values() {
            for (ticker, snapshot) in step {
                if snapshot.close_price().is_some() {
                    *coverage.entry(ticker.clone()).or_default() += 1;
                }
            }
        }
        coverage
    }

    pub fn restrict_to_instruments(self, allowed: &[String]) -> EngineResult<Self> {
        if allowed.is_empty() {
            return Ok(self);
        }
        let allowed: HashSet<&String> = allowed.iter().collect();
        if !self.instruments.iter().any(|ticker| allowed.contains(ticker)) {
            return Err(EngineError::Snapshot(
                "market data does not contain any of the requested instruments".to_string(),
            ));
        }

        let steps = self
            .steps
            .into_iter()
            .map(|(time_key, step)| {
                let filtered: MarketStep = step
                    .into_iter()
                    .filter(|(ticker, _)| allowed.contains(ticker))
                    .collect();
                (time_key, filtered)
            })
            .collect();
        Self::from_steps(steps)
    }

    pub fn restrict_to_date_range(
        self,
        start_date: Option<NaiveDate>,
        end_date: Option<NaiveDate>,
    ) -> EngineResult<Self> {
        if start_date.is_none() && end_date.is_none() {
            return Ok(self);
        }
        if let (Some(start), Some(end)) = (start_date, end_date) {
            if start > end {
                return Err(EngineError::config(format!(
                    "invalid date range: {} is after {}",
                    start, end
                )));
            }
        }

        let mut steps = BTreeMap::new();
        for (time_key, step) in self.steps {
            let date = time_keys::parse_time_key(&time_key)?.date();
            let after_start = start_date.map_or(true, |start| date >= start);
            let before_end = end_date.map_or(true, |end| date <= end);
            if after_start && before_end {
                steps.insert(time_key, step);
            }
        }
        Self::from_steps(steps)
    }

    /// Loads a `.json` mapping or a versioned binary snapshot.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!("Loading market data from {}", path.display());
        let file = File::open(path)
            .with_context(|| format!("Failed to open market data at {}", path.display()))?;
        let reader = BufReader::new(file);

        let steps: BTreeMap<String, MarketStep> = if is_json(path) {
            let raw: BTreeMap<String, BTreeMap<String, Option<Snapshot>>> = serde_json::from_reader(reader)
                .with_context(|| format!("Invalid market data JSON in {}", path.display()))?;
            drop_absent(raw)
        } else {
            let snapshot: MarketDataSnapshot =
                bincode::deserialize_from(reader).context("Snapshot decode failed")?;
            if snapshot.version != MARKET_DATA_SNAPSHOT_VERSION {
                return Err(EngineError::Snapshot(format!(
                    "version mismatch (found {}, expected {})",
                    snapshot.version, MARKET_DATA_SNAPSHOT_VERSION
                ))
                .into());
            }
            snapshot.steps
        };

        let data = Self::from_steps(steps)?;
        info!(
            "Loaded {} steps across {} instruments",
            data.time_keys.len(),
            data.instruments.len()
        );
        Ok(data)
    }

    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).with_context(|| {
                    format!("Failed to create snapshot directory {}", parent.display())
                })?;
            }
        }

        let file = File::create(path)
            .with_context(|| format!("Unable to create market data file at {}", path.display()))?;
        let mut writer = BufWriter::new(file);
        if is_json(path) {
            serde_json::to_writer_pretty(&mut writer, &self.steps)
                .context("Failed to serialize market data")?;
        } else {
            let snapshot = MarketDataSnapshot {
                version: MARKET_DATA_SNAPSHOT_VERSION,
                generated_at: Utc::now(),
                steps: self.steps.clone(),
            };
            bincode::serialize_into(&mut writer, &snapshot)
                .context("Failed to serialize market data snapshot")?;
        }
        writer
            .flush()
            .context("Failed to flush market data to disk")?;
        Ok(())
    }
}

/// `null` instrument entries mean the instrument has no record at that key.
fn drop_absent(raw: BTreeMap<String, BTreeMap<String, Option<Snapshot>>>) -> BTreeMap<String, MarketStep> {
    raw.into_iter()
        .map(|(time_key, step)| {
            let step: MarketStep = step
                .into_iter()
                .filter_map(|(ticker, snapshot)| snapshot.map(|snapshot| (ticker, snapshot)))
                .collect();
            (time_key, step)
        })
        .collect()
}

fn is_json(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.eq_ignore_ascii_case("json"))
        .unwrap_or(false)
}

/// Source of replay steps and settlement prices for the executor.
pub trait MarketFeed {
    /// Ascending replay order.
    fn time_keys(&self) -> &[String];
    /// Every instrument recorded at `time_key`; empty for unknown keys.
    fn step(&self, time_key: &str) -> MarketStep;
    /// Settlement price for an order, or `None` when the instrument has no
    /// usable bar at `time_key`.
    fn fill_price(&mut self, side: OrderSide, ticker: &str, time_key: &str) -> Option<f64>;
}

/// Replays a shared [`MarketData`] store with a configurable fill policy.
/// The generator is owned so that parallel replays never share state.
pub struct ReplayFeed {
    data: Arc<MarketData>,
    policy: FillPricePolicy,
    rng: StdRng,
}

impl ReplayFeed {
    pub fn new(data: Arc<MarketData>, policy: FillPricePolicy, seed: u64) -> Self {
        Self {
            data,
            policy,
            rng: StdRng::seed_from_u64(seed),
        }
    }
}

impl MarketFeed for ReplayFeed {
    fn time_keys(&self) -> &[String] {
        self.data.time_keys()
    }

    fn step(&self, time_key: &str) -> MarketStep {
        self.data.step(time_key).cloned().unwrap_or_default()
    }

    fn fill_price(&mut self, side: OrderSide, ticker: &str, time_key: &str) -> Option<f64> {
        let snapshot = self.data.snapshot(time_key, ticker)?;
        let price = match self.policy {
            FillPricePolicy::Open => snapshot.open,
            FillPricePolicy::RandomRange => match (snapshot.low, snapshot.high) {
                (Some(low), Some(high)) => {
                    let r: f64 = self.rng.gen();
                    Some(low * r + high * (1.0 - r))
                }
                _ => None,
            },
        };
        let price = price.filter(|value| value.is_finite() && *value > 0.0);
        if price.is_none() {
            debug!(
                "No {} fill price for {} {} at {}",
                self.policy.as_str(),
                side.as_str(),
                ticker,
                time_key
            );
        }
        price
    }
}
