//! End-to-end runs from CSV input through to forecast output.

use chrono::{Duration, NaiveDate};
use demand_forecast::batch::{run_forecast, CancelToken, NullSink};
use demand_forecast::data::DataLoader;
use demand_forecast::engine::ForecastConfig;
use demand_forecast::model::ModelRegistry;
use std::io::Write;
use tempfile::NamedTempFile;

fn start() -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 1, 1).unwrap()
}

/// CSV with two sites: A has `a_days` of history, B has `b_days`, both
/// ending on the same date.
fn write_two_site_csv(a_days: i64, b_days: i64) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    writeln!(file, "partnumber,site_code,date,demand_qty").unwrap();
    let end = start() + Duration::days(a_days - 1);
    for i in 0..a_days {
        let date = start() + Duration::days(i);
        writeln!(file, "P1,A,{},{}", date.format("%Y-%m-%d"), (i % 4) + 1).unwrap();
    }
    for i in 0..b_days {
        let date = end - Duration::days(b_days - 1 - i);
        writeln!(file, "P1,B,{},{}", date.format("%Y-%m-%d"), (i % 3) + 1).unwrap();
    }
    file
}

#[test]
fn test_csv_to_forecast_pipeline() {
    let file = write_two_site_csv(90, 90);
    let dataset = DataLoader::from_csv(file.path(), true).unwrap();
    assert_eq!(dataset.len(), 180);

    let config = ForecastConfig::default();
    let rows = run_forecast(
        &dataset,
        &config,
        &ModelRegistry::new(),
        &NullSink,
        &CancelToken::new(),
    )
    .unwrap();

    // Two groups over the default 7-day horizon
    assert_eq!(rows.len(), 14);
    let last_hist = start() + Duration::days(89);
    for row in &rows {
        assert!(row.date > last_hist, "forecast date inside history");
        assert!(row.raw_prediction >= 0.0);
        assert!(row.rounded_value >= 0);
        // Threshold discipline: either zeroed or at least the threshold
        assert!(
            row.thresholded_value == 0.0 || row.thresholded_value >= config.zero_threshold
        );
    }
    let dates_a: Vec<NaiveDate> = rows
        .iter()
        .filter(|r| r.site_code == "A")
        .map(|r| r.date)
        .collect();
    let expected: Vec<NaiveDate> = (1..=7).map(|i| last_hist + Duration::days(i)).collect();
    assert_eq!(dates_a, expected);
}

#[test]
fn test_short_history_site_kept_with_auto_adjust() {
    // A has 90 days of history; B only 10, far less than the default
    // lag/window requirement. With shrinking enabled B still forecasts.
    let file = write_two_site_csv(90, 10);
    let dataset = DataLoader::from_csv(file.path(), true).unwrap();

    let config = ForecastConfig {
        auto_adjust: true,
        ..Default::default()
    };
    let rows = run_forecast(
        &dataset,
        &config,
        &ModelRegistry::new(),
        &NullSink,
        &CancelToken::new(),
    )
    .unwrap();

    let b_rows = rows.iter().filter(|r| r.site_code == "B").count();
    let a_rows = rows.iter().filter(|r| r.site_code == "A").count();
    assert_eq!(a_rows, 7);
    assert_eq!(b_rows, 7);
}

#[test]
fn test_short_history_site_dropped_without_auto_adjust() {
    let file = write_two_site_csv(90, 10);
    let dataset = DataLoader::from_csv(file.path(), true).unwrap();

    let config = ForecastConfig {
        auto_adjust: false,
        ..Default::default()
    };
    let rows = run_forecast(
        &dataset,
        &config,
        &ModelRegistry::new(),
        &NullSink,
        &CancelToken::new(),
    )
    .unwrap();

    // B never trained, so it produces no forecast rows at all
    assert!(rows.iter().all(|r| r.site_code == "A"));
    assert_eq!(rows.len(), 7);
}
