//! Error types for the demand_forecast crate

use thiserror::Error;

/// Custom error types for the demand_forecast crate
#[derive(Debug, Error)]
pub enum ForecastError {
    /// Error related to input validation (missing columns, bad dates, empty data)
    #[error("Validation error: {0}")]
    Validation(String),

    /// Not enough history survives lag/rolling-window filtering
    #[error(
        "Insufficient data: no rows remain after feature filtering; \
         at least {needed_days} days of history per group are required"
    )]
    InsufficientData {
        /// Minimum history in days implied by the configured lags and windows
        needed_days: u32,
    },

    /// The site filter excludes every row of the dataset
    #[error("No data for specified forecast site codes")]
    EmptySiteFilter,

    /// A partition exceeded its maximum execution time
    #[error("Partition timed out after {elapsed_secs:.1}s (limit {limit_secs}s)")]
    Timeout {
        /// Seconds elapsed when the timeout was detected
        elapsed_secs: f64,
        /// Configured per-partition limit in seconds
        limit_secs: u64,
    },

    /// The job was cancelled by an external request
    #[error("Job cancelled")]
    Cancelled,

    /// Error from model fitting or prediction
    #[error("Model error: {0}")]
    Model(String),

    /// Error from IO operations
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Error from CSV parsing or writing
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// Error from JSON serialization
    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type with our custom error
pub type Result<T> = std::result::Result<T, ForecastError>;
