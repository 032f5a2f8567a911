pub mod evaluate;
pub mod export_prices;
pub mod indicators;
pub mod merge_logs;
