use crate::commands::RunOptions;
use crate::engine;
use crate::models::BacktestReport;
use anyhow::{Context, Result};
use log::{info, warn};
use std::fs;
use std::path::Path;

pub fn run(options: &RunOptions, output: Option<&Path>) -> Result<()> {
    let prepared = options.prepare()?;
    info!(
        "Backtesting {} with parameters {:?} (cash {:.2}, fill {}, seed {})",
        prepared.strategy.template_id,
        prepared.strategy.parameters,
        prepared.executor.initial_cash,
        prepared.executor.fill_policy.as_str(),
        prepared.executor.seed
    );

    let report = engine::replay(prepared.data, &prepared.strategy, &prepared.executor)?;
    log_summary(&report);

    if let Some(path) = output {
        write_report(&report, path)?;
        info!("Report written to {}", path.display());
    }
    Ok(())
}

fn log_summary(report: &BacktestReport) {
    let performance = &report.performance;
    if let Some(reason) = &report.termination {
        warn!("Replay stopped after {} steps: {}", report.steps, reason);
    }
    info!(
        "Final value {:.2} ({:+.2}%), realized profit {:.2}",
        performance.final_value, performance.total_gain_percent, performance.realized_profit
    );
    info!(
        "Closed lots: {} (won {}, lost {}, win rate {:.1}%), avg gain {:+.2}%, best {:+.2}%, worst {:+.2}%",
        performance.closed_lots,
        performance.winning_lots,
        performance.losing_lots,
        performance.win_rate * 100.0,
        performance.avg_gain_percent,
        performance.best_gain_percent,
        performance.worst_gain_percent
    );
    info!(
        "Max drawdown {:.2} ({:.2}%) lasting {}s; {} open lots, {} pending orders",
        report.drawdown.max_drawdown,
        report.drawdown.max_drawdown_percent,
        report.drawdown.max_drawdown_seconds,
        report.open_holdings.len(),
        report.pending_orders.len()
    );
}

pub fn write_report(report: &BacktestReport, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create report directory {}", parent.display()))?;
        }
    }
    let json = serde_json::to_string_pretty(report).context("Failed to serialize report")?;
    fs::write(path, json).with_context(|| format!("Failed to write report to {}", path.display()))?;
    Ok(())
}
