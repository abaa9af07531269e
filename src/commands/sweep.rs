use crate::commands::RunOptions;
use crate::engine;
use anyhow::{anyhow, Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use log::{info, warn};
use rayon::prelude::*;
use serde::Serialize;
use std::cmp::Ordering;
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SweepResult {
    pub parameter: Option<String>,
    pub value: Option<f64>,
    pub seed: u64,
    pub completed: bool,
    pub final_value: f64,
    pub total_gain_percent: f64,
    pub max_drawdown_percent: f64,
    pub closed_lots: usize,
    pub win_rate: f64,
}

pub struct SweepGrid<'a> {
    pub parameter: Option<&'a str>,
    pub values: &'a [f64],
    pub seeds: &'a [u64],
}

/// Runs one independent replay per (value, seed) pair in parallel and logs
/// the best `top` by total gain.
pub fn run(options: &RunOptions, grid: SweepGrid<'_>, top: usize, output: Option<&Path>) -> Result<()> {
    if grid.parameter.is_some() == grid.values.is_empty() {
        return Err(anyhow!("--sweep-param and --values must be given together"));
    }
    let prepared = options.prepare()?;

    let values: Vec<Option<f64>> = if grid.values.is_empty() {
        vec![None]
    } else {
        grid.values.iter().copied().map(Some).collect()
    };
    let seeds: Vec<u64> = if grid.seeds.is_empty() {
        vec![prepared.executor.seed]
    } else {
        grid.seeds.to_vec()
    };
    let jobs: Vec<(Option<f64>, u64)> = values
        .iter()
        .flat_map(|value| seeds.iter().map(move |seed| (*value, *seed)))
        .collect();
    info!(
        "Sweeping {} over {} runs ({} values x {} seeds)",
        prepared.strategy.template_id,
        jobs.len(),
        values.len(),
        seeds.len()
    );

    let pb = ProgressBar::new(jobs.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta})")
            .map_err(|err| anyhow!("Invalid progress template: {}", err))?
            .progress_chars("#>-"),
    );

    let outcomes: Vec<Result<SweepResult, String>> = jobs
        .par_iter()
        .map(|(value, seed)| {
            let mut settings = prepared.strategy.clone();
            if let (Some(name), Some(value)) = (grid.parameter, value) {
                settings.parameters.insert(name.to_string(), *value);
            }
            let mut config = prepared.executor.clone();
            config.seed = *seed;

            let outcome = engine::replay(prepared.data.clone(), &settings, &config)
                .map(|report| SweepResult {
                    parameter: grid.parameter.map(str::to_string),
                    value: *value,
                    seed: *seed,
                    completed: report.completed,
                    final_value: report.performance.final_value,
                    total_gain_percent: report.performance.total_gain_percent,
                    max_drawdown_percent: report.drawdown.max_drawdown_percent,
                    closed_lots: report.performance.closed_lots,
                    win_rate: report.performance.win_rate,
                })
                .map_err(|err| format!("value {:?} seed {}: {}", value, seed, err));
            pb.inc(1);
            outcome
        })
        .collect();

    let mut results = Vec::with_capacity(outcomes.len());
    let mut failures = 0;
    for outcome in outcomes {
        match outcome {
            Ok(result) => results.push(result),
            Err(message) => {
                failures += 1;
                warn!("Sweep run failed: {}", message);
            }
        }
    }
    if failures > 0 {
        pb.finish_with_message("Sweep completed with errors");
    } else {
        pb.finish_with_message("Sweep completed");
    }

    sort_results(&mut results);
    for (rank, result) in results.iter().take(top).enumerate() {
        info!(
            "#{} {}={} seed {}: gain {:+.2}%, max DD {:.2}%, lots {}, win rate {:.1}%{}",
            rank + 1,
            result.parameter.as_deref().unwrap_or("-"),
            result
                .value
                .map(|v| format!("{}", v))
                .unwrap_or_else(|| "-".to_string()),
            result.seed,
            result.total_gain_percent,
            result.max_drawdown_percent,
            result.closed_lots,
            result.win_rate * 100.0,
            if result.completed { "" } else { " (stopped early)" }
        );
    }

    if let Some(path) = output {
        let json = serde_json::to_string_pretty(&results).context("Failed to serialize sweep results")?;
        fs::write(path, json)
            .with_context(|| format!("Failed to write sweep results to {}", path.display()))?;
        info!("Sweep results written to {}", path.display());
    }
    Ok(())
}

/// Best total gain first; ties keep grid order.
pub fn sort_results(results: &mut [SweepResult]) {
    results.sort_by(|a, b| {
        b.total_gain_percent
            .partial_cmp(&a.total_gain_percent)
            .unwrap_or(Ordering::Equal)
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(value: f64, gain: f64) -> SweepResult {
        SweepResult {
            parameter: Some("avgRange".to_string()),
            value: Some(value),
            seed: 1,
            completed: true,
            final_value: 1000.0 + gain * 10.0,
            total_gain_percent: gain,
            max_drawdown_percent: 0.0,
            closed_lots: 0,
            win_rate: 0.0,
        }
    }

    #[test]
    fn sorts_by_gain_descending_and_stable() {
        let mut results = vec![result(5.0, 1.0), result(10.0, 3.0), result(15.0, 1.0)];
        sort_results(&mut results);
        let order: Vec<f64> = results.iter().filter_map(|r| r.value).collect();
        assert_eq!(order, vec![10.0, 5.0, 15.0]);
    }
}
