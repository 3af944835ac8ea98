//! # Demand Forecast
//!
//! A Rust library for per-item, per-location daily demand forecasting with
//! partitioned batch processing.
//!
//! ## Features
//!
//! - CSV ingest with column validation and flexible date parsing
//! - Gap-free series completion and per-group outlier clipping
//! - Calendar + lag/rolling-window feature engineering (no lookahead)
//! - Pluggable fit/predict estimator with a ridge regression default
//! - Autoregressive multi-day forecasting with warm-up gap filling
//! - Site- or size-based dataset partitioning with a hard shard cap
//! - Batch orchestration with timeouts, skip-vs-fail classification, and
//!   all-or-nothing rollback
//!
//! ## Quick Start
//!
//! ```no_run
//! use demand_forecast::batch::{run_forecast, CancelToken, NullSink};
//! use demand_forecast::data::DataLoader;
//! use demand_forecast::engine::ForecastConfig;
//! use demand_forecast::model::ModelRegistry;
//!
//! # fn main() -> demand_forecast::Result<()> {
//! let dataset = DataLoader::from_csv("demand.csv", true)?;
//! let config = ForecastConfig {
//!     forecast_horizon: 14,
//!     ..Default::default()
//! };
//! let registry = ModelRegistry::new();
//! let rows = run_forecast(&dataset, &config, &registry, &NullSink, &CancelToken::new())?;
//! for row in rows.iter().take(5) {
//!     println!("{} {} {} -> {}", row.partnumber, row.site_code, row.date, row.rounded_value);
//! }
//! # Ok(())
//! # }
//! ```

pub mod batch;
pub mod data;
pub mod engine;
pub mod error;
pub mod features;
pub mod metrics;
pub mod model;
pub mod partition;
pub mod preprocess;

// Re-export commonly used types
pub use crate::batch::{BatchConfig, BatchOrchestrator, BatchReport, JobStatus};
pub use crate::data::{DataLoader, Dataset, DemandRecord};
pub use crate::engine::{ForecastConfig, ForecastRow, Forecaster, RoundingMode};
pub use crate::error::{ForecastError, Result};
pub use crate::model::{Estimator, ModelRegistry};
pub use crate::partition::{PartitionPlanner, PartitionStrategy};

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const NAME: &str = env!("CARGO_PKG_NAME");
