use thiserror::Error;

/// Failures that end a single evaluation combination or settings parse.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("invalid configuration: {0}")]
    Configuration(String),
    #[error("price source failed for {symbol}: {message}")]
    Upstream { symbol: String, message: String },
    #[error("no usable price rows for {symbol}")]
    NoUsableRows { symbol: String },
}
