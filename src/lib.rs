pub mod commands;
pub mod config;
pub mod data_context;
pub mod engine;
pub mod error;
pub mod indicators;
pub mod models;
pub mod param_utils;
pub mod performance;
pub mod portfolio;
pub mod strategy;
pub mod strategy_utils;
pub mod time_keys;
pub mod wavelet;
