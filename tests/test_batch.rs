use chrono::{Duration, NaiveDate};
use demand_forecast::batch::{
    run_forecast, BatchConfig, BatchOrchestrator, CancelToken, JobStatus, NullSink,
    OutcomeStatus, StatusSink, StatusUpdate,
};
use demand_forecast::data::{Dataset, DemandRecord};
use demand_forecast::engine::ForecastConfig;
use demand_forecast::error::ForecastError;
use demand_forecast::features::FeatureSet;
use demand_forecast::model::ModelRegistry;
use demand_forecast::partition::PartitionStrategy;
use std::sync::{Arc, Mutex};

fn start() -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 1, 1).unwrap()
}

/// 60 days of varying demand for one partnumber at each given site.
fn history(sites: &[&str]) -> Dataset {
    let mut records = Vec::new();
    for site in sites {
        for i in 0..60i64 {
            records.push(DemandRecord {
                partnumber: "P1".to_string(),
                site_code: site.to_string(),
                date: start() + Duration::days(i),
                demand_qty: (i % 5 + 1) as f64,
            });
        }
    }
    Dataset::new(records)
}

fn small_feature_config() -> ForecastConfig {
    ForecastConfig {
        feature_set: FeatureSet {
            lags: vec![1],
            windows: vec![],
        },
        ..Default::default()
    }
}

/// One partition per site for the 60-row-per-site histories above.
fn batch_config() -> BatchConfig {
    BatchConfig {
        partition_strategy: PartitionStrategy::Site,
        max_rows_per_partition: 60,
        max_partitions: 20,
        forecast: small_feature_config(),
        ..Default::default()
    }
}

/// Sink that keeps every update for inspection.
#[derive(Default)]
struct RecordingSink {
    updates: Mutex<Vec<StatusUpdate>>,
}

impl StatusSink for RecordingSink {
    fn update(&self, update: StatusUpdate) {
        self.updates.lock().unwrap().push(update);
    }
}

fn orchestrator(config: BatchConfig) -> BatchOrchestrator {
    BatchOrchestrator::new(config, Arc::new(ModelRegistry::new()))
}

#[test]
fn test_batch_completes_over_site_partitions() {
    let report = orchestrator(batch_config())
        .run("b1", &history(&["S1", "S2"]), &NullSink, &CancelToken::new())
        .unwrap();

    assert_eq!(report.status, JobStatus::Completed);
    assert_eq!(report.total_partitions, 2);
    assert_eq!(report.completed, 2);
    assert_eq!(report.skipped, 0);
    assert_eq!(report.failed, 0);
    // One group per site, default 7-day horizon
    assert_eq!(report.combined.len(), 14);

    // Combined output is sorted across partitions
    let keys: Vec<(String, NaiveDate)> = report
        .combined
        .iter()
        .map(|r| (r.site_code.clone(), r.date))
        .collect();
    let mut sorted = keys.clone();
    sorted.sort();
    assert_eq!(keys, sorted);

    // Status values serialize in wire format
    let json = report.to_json().unwrap();
    assert!(json.contains("\"COMPLETED\""));
}

#[test]
fn test_filtered_out_partition_is_skipped_not_failed() {
    let mut config = batch_config();
    config.forecast.forecast_site_codes = Some(vec!["S1".to_string()]);

    let report = orchestrator(config)
        .run("b2", &history(&["S1", "S2"]), &NullSink, &CancelToken::new())
        .unwrap();

    assert_eq!(report.status, JobStatus::Completed);
    assert_eq!(report.completed, 1);
    assert_eq!(report.skipped, 1);
    assert_eq!(report.failed, 0);
    assert!(report.combined.iter().all(|r| r.site_code == "S1"));

    let skipped = report
        .outcomes
        .iter()
        .find(|o| o.status == OutcomeStatus::Skipped)
        .unwrap();
    assert!(skipped.skip_reason.is_some());
    assert!(skipped.error.is_none());
}

#[test]
fn test_batch_with_nothing_to_forecast_fails() {
    let mut config = batch_config();
    config.forecast.forecast_site_codes = Some(vec!["NOPE".to_string()]);

    let report = orchestrator(config)
        .run("b3", &history(&["S1", "S2"]), &NullSink, &CancelToken::new())
        .unwrap();

    assert_eq!(report.status, JobStatus::Failed);
    assert_eq!(report.completed, 0);
    assert_eq!(report.skipped, 2);
    assert!(report.error_message.is_some());
    assert!(report.combined.is_empty());
}

#[test]
fn test_timeout_rolls_back_and_stops() {
    let mut config = batch_config();
    config.max_execution_time = 0; // first checkpoint trips immediately

    let report = orchestrator(config)
        .run("b4", &history(&["S1", "S2"]), &NullSink, &CancelToken::new())
        .unwrap();

    assert_eq!(report.status, JobStatus::RolledBack);
    assert_eq!(report.failed, 1);
    assert_eq!(report.completed, 0);
    // Rollback stops at the first bad partition; the second never runs
    assert_eq!(report.outcomes.len(), 1);
    assert_eq!(report.outcomes[0].status, OutcomeStatus::TimedOut);
    assert!(report
        .error_message
        .as_deref()
        .unwrap()
        .contains("Rolled back"));
    assert!(report.combined.is_empty());
}

#[test]
fn test_cancelled_before_first_partition() {
    let cancel = CancelToken::new();
    cancel.cancel();

    let report = orchestrator(batch_config())
        .run("b5", &history(&["S1"]), &NullSink, &cancel)
        .unwrap();

    assert_eq!(report.status, JobStatus::Cancelled);
    assert!(report.outcomes.is_empty());
    assert!(report.combined.is_empty());
}

#[test]
fn test_status_updates_progress_monotonically() {
    let sink = RecordingSink::default();
    orchestrator(batch_config())
        .run("b6", &history(&["S1", "S2"]), &sink, &CancelToken::new())
        .unwrap();

    let updates = sink.updates.lock().unwrap();
    assert!(updates.len() >= 3);
    assert_eq!(updates.first().unwrap().progress, 5);
    let last = updates.last().unwrap();
    assert_eq!(last.status, JobStatus::Completed);
    assert_eq!(last.progress, 100);
    for pair in updates.windows(2) {
        assert!(pair[0].progress <= pair[1].progress);
    }
}

#[test]
fn test_completed_partitions_write_output_files() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = batch_config();
    config.output_dir = Some(dir.path().to_path_buf());

    let report = orchestrator(config)
        .run("b7", &history(&["S1", "S2"]), &NullSink, &CancelToken::new())
        .unwrap();

    assert_eq!(report.completed, 2);
    for outcome in &report.outcomes {
        let path = outcome.output_file.as_ref().unwrap();
        assert!(path.exists(), "missing output file {:?}", path);
        let contents = std::fs::read_to_string(path).unwrap();
        assert!(contents.starts_with("partnumber,site_code,date"));
    }
}

#[test]
fn test_run_forecast_caches_model_in_registry() {
    let registry = ModelRegistry::new();
    let config = small_feature_config();
    let dataset = history(&["S1"]);

    let rows = run_forecast(&dataset, &config, &registry, &NullSink, &CancelToken::new()).unwrap();
    assert_eq!(rows.len(), 7);
    assert_eq!(registry.len(), 1);

    // Same config and data: the cached model is reused, not retrained
    run_forecast(&dataset, &config, &registry, &NullSink, &CancelToken::new()).unwrap();
    assert_eq!(registry.len(), 1);
}

#[test]
fn test_run_forecast_honors_cancellation() {
    let cancel = CancelToken::new();
    cancel.cancel();

    let err = run_forecast(
        &history(&["S1"]),
        &small_feature_config(),
        &ModelRegistry::new(),
        &NullSink,
        &cancel,
    )
    .unwrap_err();
    assert!(matches!(err, ForecastError::Cancelled));
}
