use thiserror::Error;

/// Errors returned by the bar series generator.
///
/// All variants describe bad input; none are retried.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum GenerateError {
    #[error("base price must be positive and finite, got {0}")]
    InvalidBasePrice(f64),
    #[error("window must be between 1 and 3650 days, got {0}")]
    InvalidWindow(i64),
    #[error("invalid generator parameter: {0}")]
    InvalidParams(String),
}
