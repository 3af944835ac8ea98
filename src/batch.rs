//! Batch orchestration: partition sequencing, timeouts, rollback
//!
//! Drives planned partitions through preprocess, train, and forecast one at
//! a time, classifying each outcome as completed, skipped, timed out, or
//! failed. Any failure or timeout rolls the whole batch back; a partition
//! whose sites are entirely filtered out is skipped, which is not a
//! failure. Progress goes through a caller-supplied [`StatusSink`] and
//! cancellation through a [`CancelToken`], both checked between partitions
//! only.

use crate::data::{write_forecast_csv, Dataset};
use crate::engine::{ForecastConfig, ForecastRow, Forecaster};
use crate::error::{ForecastError, Result};
use crate::features::prepare_features;
use crate::model::{model_fingerprint, train_and_validate, ModelRegistry};
use crate::partition::{
    estimate_processing_time, Partition, PartitionPlanner, PartitionStrategy, TimeEstimate,
};
use crate::preprocess::{preprocess, to_dataset};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Lifecycle of a job or batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Queued,
    Processing,
    Completed,
    Failed,
    RolledBack,
    Cancelled,
}

impl JobStatus {
    /// Whether this status ends the job lifecycle.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, JobStatus::Queued | JobStatus::Processing)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            JobStatus::Queued => "QUEUED",
            JobStatus::Processing => "PROCESSING",
            JobStatus::Completed => "COMPLETED",
            JobStatus::Failed => "FAILED",
            JobStatus::RolledBack => "ROLLED_BACK",
            JobStatus::Cancelled => "CANCELLED",
        };
        f.write_str(s)
    }
}

/// How one partition ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OutcomeStatus {
    Completed,
    /// Site filter excluded every group in the partition; not a failure
    Skipped,
    TimedOut,
    Failed,
}

/// Record of one partition's processing.
#[derive(Debug, Clone, Serialize)]
pub struct PartitionOutcome {
    pub partition_id: usize,
    pub status: OutcomeStatus,
    /// Forecast rows produced (completed partitions only)
    pub rows_forecast: usize,
    pub execution_secs: f64,
    pub error: Option<String>,
    pub skip_reason: Option<String>,
    pub output_file: Option<PathBuf>,
}

/// A progress notification pushed to the status sink.
#[derive(Debug, Clone, Serialize)]
pub struct StatusUpdate {
    pub status: JobStatus,
    /// 0-100
    pub progress: u8,
    pub stage: String,
}

/// Receives progress updates from the orchestrator.
///
/// Decouples orchestration from whatever persistence or transport the
/// caller uses for job status.
pub trait StatusSink {
    fn update(&self, update: StatusUpdate);
}

/// Sink that discards all updates.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl StatusSink for NullSink {
    fn update(&self, _update: StatusUpdate) {}
}

/// Best-effort external cancellation signal, checked between partitions.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// Batch processing configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    pub partition_strategy: PartitionStrategy,
    pub max_rows_per_partition: usize,
    /// Per-partition execution limit in seconds
    pub max_execution_time: u64,
    pub max_partitions: usize,
    /// Directory for per-partition forecast files; `None` keeps results in
    /// memory only
    pub output_dir: Option<PathBuf>,
    pub forecast: ForecastConfig,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            partition_strategy: PartitionStrategy::default(),
            max_rows_per_partition: 2000,
            max_execution_time: 300,
            max_partitions: 20,
            output_dir: None,
            forecast: ForecastConfig::default(),
        }
    }
}

/// Final state of a batch run.
#[derive(Debug, Serialize)]
pub struct BatchReport {
    pub batch_id: String,
    pub status: JobStatus,
    pub total_partitions: usize,
    pub completed: usize,
    pub skipped: usize,
    pub failed: usize,
    pub outcomes: Vec<PartitionOutcome>,
    /// Concatenated output of completed partitions, sorted
    pub combined: Vec<ForecastRow>,
    pub error_message: Option<String>,
    pub time_estimate: TimeEstimate,
}

impl BatchReport {
    /// JSON rendering for status endpoints and job logs.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Sequences partitions through the forecast pipeline.
pub struct BatchOrchestrator {
    config: BatchConfig,
    registry: Arc<ModelRegistry>,
}

impl BatchOrchestrator {
    pub fn new(config: BatchConfig, registry: Arc<ModelRegistry>) -> Self {
        Self { config, registry }
    }

    /// Run the whole batch to a terminal state.
    ///
    /// Errors are returned only for invalid configuration; processing
    /// failures are reported through the batch status instead.
    pub fn run(
        &self,
        batch_id: &str,
        dataset: &Dataset,
        sink: &dyn StatusSink,
        cancel: &CancelToken,
    ) -> Result<BatchReport> {
        self.config.forecast.validate()?;

        sink.update(StatusUpdate {
            status: JobStatus::Processing,
            progress: 5,
            stage: "Analyzing data".to_string(),
        });

        let planner = PartitionPlanner::new(
            self.config.max_rows_per_partition,
            self.config.partition_strategy,
            self.config.max_partitions,
        );
        let partitions = planner.create_partitions(dataset);
        let time_estimate = estimate_processing_time(&partitions);
        log::info!(
            "[batch {}] {} partitions, estimated {:.0}s sequential / {:.0}s parallel ({:.2}x)",
            batch_id,
            partitions.len(),
            time_estimate.sequential_total_seconds,
            time_estimate.parallel_total_seconds,
            time_estimate.speedup_factor,
        );

        let mut report = BatchReport {
            batch_id: batch_id.to_string(),
            status: JobStatus::Processing,
            total_partitions: partitions.len(),
            completed: 0,
            skipped: 0,
            failed: 0,
            outcomes: Vec::new(),
            combined: Vec::new(),
            error_message: None,
            time_estimate,
        };

        sink.update(StatusUpdate {
            status: JobStatus::Processing,
            progress: 15,
            stage: format!("Processing {} partitions", partitions.len()),
        });

        for (i, partition) in partitions.iter().enumerate() {
            if cancel.is_cancelled() {
                log::warn!("[batch {}] cancelled before partition {}", batch_id, partition.id);
                report.status = JobStatus::Cancelled;
                sink.update(StatusUpdate {
                    status: JobStatus::Cancelled,
                    progress: 15 + (i * 70 / partitions.len()) as u8,
                    stage: "Cancelled".to_string(),
                });
                return Ok(report);
            }

            let progress = 15 + (i * 70 / partitions.len()) as u8;
            sink.update(StatusUpdate {
                status: JobStatus::Processing,
                progress,
                stage: format!("Partition {}/{}", i + 1, partitions.len()),
            });

            let (outcome, rows) = self.process_partition(batch_id, partition);
            let status = outcome.status;
            report.outcomes.push(outcome);

            match status {
                OutcomeStatus::Completed => {
                    report.completed += 1;
                    report.combined.extend(rows.unwrap_or_default());
                }
                OutcomeStatus::Skipped => {
                    report.skipped += 1;
                }
                OutcomeStatus::TimedOut | OutcomeStatus::Failed => {
                    report.failed += 1;
                    // Rollback: stop here, keep prior partition files on
                    // disk for diagnostics, and mark the batch unusable.
                    let cause = report
                        .outcomes
                        .last()
                        .and_then(|o| o.error.clone())
                        .unwrap_or_else(|| "partition failed".to_string());
                    report.error_message =
                        Some(format!("Rolled back due to partition {}: {}", partition.id, cause));
                    report.status = JobStatus::RolledBack;
                    log::error!("[batch {}] {}", batch_id, report.error_message.as_deref().unwrap_or(""));
                    sink.update(StatusUpdate {
                        status: JobStatus::RolledBack,
                        progress,
                        stage: format!("Rolled back at partition {}", partition.id),
                    });
                    return Ok(report);
                }
            }
        }

        if report.completed == 0 {
            report.status = JobStatus::Failed;
            report.error_message = Some(
                "No partitions produced forecasts; check the forecast_site_codes filter"
                    .to_string(),
            );
            sink.update(StatusUpdate {
                status: JobStatus::Failed,
                progress: 90,
                stage: "No partitions produced forecasts".to_string(),
            });
            return Ok(report);
        }

        report.combined.sort_by(|a, b| {
            a.partnumber
                .cmp(&b.partnumber)
                .then_with(|| a.site_code.cmp(&b.site_code))
                .then_with(|| a.date.cmp(&b.date))
        });
        report.status = JobStatus::Completed;
        log::info!(
            "[batch {}] completed: {} ok, {} skipped, {} failed, {} output rows",
            batch_id,
            report.completed,
            report.skipped,
            report.failed,
            report.combined.len()
        );
        sink.update(StatusUpdate {
            status: JobStatus::Completed,
            progress: 100,
            stage: "Completed".to_string(),
        });
        Ok(report)
    }

    /// Process one partition and classify the outcome. Never panics or
    /// propagates: every error becomes an outcome record.
    fn process_partition(
        &self,
        batch_id: &str,
        partition: &Partition,
    ) -> (PartitionOutcome, Option<Vec<ForecastRow>>) {
        let start = Instant::now();
        log::info!(
            "[batch {}] partition {}: {} rows, {} sites, {} partnumbers",
            batch_id,
            partition.id,
            partition.metadata.rows,
            partition.metadata.site_count,
            partition.metadata.partnumber_count,
        );

        let mut outcome = PartitionOutcome {
            partition_id: partition.id,
            status: OutcomeStatus::Failed,
            rows_forecast: 0,
            execution_secs: 0.0,
            error: None,
            skip_reason: None,
            output_file: None,
        };

        let result = self.run_partition(batch_id, partition, start);
        outcome.execution_secs = start.elapsed().as_secs_f64();

        match result {
            Ok(rows) => {
                if let Some(dir) = &self.config.output_dir {
                    let path = dir
                        .join(batch_id)
                        .join(format!("partition_{:03}_forecast.csv", partition.id));
                    if let Err(e) = write_forecast_csv(&rows, &path) {
                        outcome.error = Some(format!("failed to persist forecast: {}", e));
                        return (outcome, None);
                    }
                    outcome.output_file = Some(path);
                }
                outcome.status = OutcomeStatus::Completed;
                outcome.rows_forecast = rows.len();
                (outcome, Some(rows))
            }
            Err(ForecastError::EmptySiteFilter) => {
                log::info!(
                    "[batch {}] partition {} skipped: sites not in forecast_site_codes filter",
                    batch_id,
                    partition.id
                );
                outcome.status = OutcomeStatus::Skipped;
                outcome.skip_reason =
                    Some("Sites not in forecast_site_codes filter".to_string());
                (outcome, None)
            }
            Err(e @ ForecastError::Timeout { .. }) => {
                outcome.status = OutcomeStatus::TimedOut;
                outcome.error = Some(e.to_string());
                (outcome, None)
            }
            Err(e) => {
                outcome.error = Some(e.to_string());
                (outcome, None)
            }
        }
    }

    /// Preprocess, train (through the registry), and forecast one
    /// partition, with timeout checkpoints between stages.
    fn run_partition(
        &self,
        batch_id: &str,
        partition: &Partition,
        start: Instant,
    ) -> Result<Vec<ForecastRow>> {
        let cfg = &self.config.forecast;

        let grouped = preprocess(&partition.data)?;
        let processed = to_dataset(&grouped);
        let prepared = prepare_features(&grouped, &cfg.feature_set, cfg.auto_adjust)?;
        self.check_timeout(start)?;

        let fingerprint = model_fingerprint(cfg, &processed);
        log::debug!("[batch {}] partition {} model {}", batch_id, partition.id, fingerprint);
        let model = self
            .registry
            .get_or_train(&fingerprint, || train_and_validate(&prepared, cfg))?;
        self.check_timeout(start)?;

        Forecaster::new(model, cfg.clone()).forecast(&processed)
    }

    fn check_timeout(&self, start: Instant) -> Result<()> {
        let elapsed = start.elapsed().as_secs_f64();
        if elapsed > self.config.max_execution_time as f64 {
            return Err(ForecastError::Timeout {
                elapsed_secs: elapsed,
                limit_secs: self.config.max_execution_time,
            });
        }
        Ok(())
    }
}

/// Run a single (non-batch) forecast job over a whole dataset.
///
/// Same pipeline as one partition, without timeouts: preprocess, build
/// features, train through the registry, forecast. Cancellation is checked
/// between stages.
pub fn run_forecast(
    dataset: &Dataset,
    config: &ForecastConfig,
    registry: &ModelRegistry,
    sink: &dyn StatusSink,
    cancel: &CancelToken,
) -> Result<Vec<ForecastRow>> {
    config.validate()?;

    let stage = |progress: u8, stage: &str| {
        sink.update(StatusUpdate {
            status: JobStatus::Processing,
            progress,
            stage: stage.to_string(),
        });
    };

    stage(10, "Preprocessing data");
    let grouped = preprocess(dataset)?;
    let processed = to_dataset(&grouped);
    if cancel.is_cancelled() {
        return Err(ForecastError::Cancelled);
    }

    stage(30, "Building features");
    let prepared = prepare_features(&grouped, &config.feature_set, config.auto_adjust)?;
    if cancel.is_cancelled() {
        return Err(ForecastError::Cancelled);
    }

    stage(60, "Training model");
    let fingerprint = model_fingerprint(config, &processed);
    let model = registry.get_or_train(&fingerprint, || train_and_validate(&prepared, config))?;
    if cancel.is_cancelled() {
        return Err(ForecastError::Cancelled);
    }

    stage(90, "Generating forecast");
    let rows = Forecaster::new(model, config.clone()).forecast(&processed)?;

    sink.update(StatusUpdate {
        status: JobStatus::Completed,
        progress: 100,
        stage: "Completed".to_string(),
    });
    Ok(rows)
}
