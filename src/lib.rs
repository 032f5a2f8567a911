pub mod commands;
pub mod config;
pub mod context;
pub mod error;
pub mod features;
pub mod harness;
pub mod indicators;
pub mod models;
pub mod param_utils;
pub mod price_source;
mod retry;
pub mod rules;
pub mod run_log;
pub mod trainer;
