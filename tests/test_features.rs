use chrono::{Duration, NaiveDate};
use demand_forecast::error::ForecastError;
use demand_forecast::features::{
    add_group_lags_rolls, prepare_features, CalendarFeatures, FeatureSet,
};
use demand_forecast::preprocess::{GroupKey, GroupedSeries};

fn start() -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 1, 1).unwrap()
}

/// One group whose demand equals its day index: 0, 1, 2, ...
fn counting_series(key: GroupKey, days: usize) -> GroupedSeries {
    let mut grouped = GroupedSeries::new();
    let series = (0..days)
        .map(|i| (start() + Duration::days(i as i64), i as f64))
        .collect();
    grouped.insert(key, series);
    grouped
}

#[test]
fn test_calendar_features_are_deterministic() {
    let date = NaiveDate::from_ymd_opt(2025, 6, 16).unwrap(); // a Monday
    let f = CalendarFeatures::for_date(date);
    assert_eq!(f.year, 2025);
    assert_eq!(f.month, 6);
    assert_eq!(f.day, 16);
    assert_eq!(f.dayofweek, 0);
    assert_eq!(f, CalendarFeatures::for_date(date));
}

#[test]
fn test_lag_1_is_previous_day() {
    let grouped = counting_series(GroupKey::new("P1", "S1"), 10);
    let set = FeatureSet {
        lags: vec![1],
        windows: vec![],
    };
    let rows = add_group_lags_rolls(&grouped, &set);
    assert_eq!(rows.len(), 10);
    assert_eq!(rows[0].lags[0], None);
    for (t, row) in rows.iter().enumerate().skip(1) {
        assert_eq!(row.lags[0], Some((t - 1) as f64), "lag_1 at t={}", t);
    }
}

#[test]
fn test_rolling_mean_excludes_current_day() {
    let grouped = counting_series(GroupKey::new("P1", "S1"), 10);
    let set = FeatureSet {
        lags: vec![],
        windows: vec![3],
    };
    let rows = add_group_lags_rolls(&grouped, &set);
    // Undefined until a full trailing window exists
    for row in rows.iter().take(3) {
        assert_eq!(row.rolls[0], None);
    }
    // At t, the window is t-3, t-2, t-1; with counting demand the mean is
    // t-2. If day t leaked in, the value would be t-1.5 instead.
    for (t, row) in rows.iter().enumerate().skip(3) {
        assert_eq!(row.rolls[0], Some((t as f64) - 2.0), "rollmean_3 at t={}", t);
    }
}

#[test]
fn test_rolling_mean_ignores_future_values() {
    // Two series identical up to day 6 but wildly different afterwards
    // must produce identical rollmean values up to day 6.
    let mut a = GroupedSeries::new();
    a.insert(
        GroupKey::new("P1", "S1"),
        (0..10i64)
            .map(|i| (start() + Duration::days(i), 1.0))
            .collect(),
    );
    let mut b = GroupedSeries::new();
    b.insert(
        GroupKey::new("P1", "S1"),
        (0..10i64)
            .map(|i| (start() + Duration::days(i), if i < 7 { 1.0 } else { 500.0 }))
            .collect(),
    );
    let set = FeatureSet {
        lags: vec![],
        windows: vec![3],
    };
    let rows_a = add_group_lags_rolls(&a, &set);
    let rows_b = add_group_lags_rolls(&b, &set);
    for t in 0..=6 {
        assert_eq!(rows_a[t].rolls[0], rows_b[t].rolls[0], "divergence at t={}", t);
    }
}

#[test]
fn test_rows_with_undefined_features_are_filtered() {
    let grouped = counting_series(GroupKey::new("P1", "S1"), 90);
    let set = FeatureSet::default(); // lags up to 28, windows up to 28
    let prepared = prepare_features(&grouped, &set, false).unwrap();
    // First defined row needs lag_28 and rollmean_28: index 28+28 = 56
    assert_eq!(prepared.rows.len(), 90 - 56);
    assert!(prepared
        .rows
        .iter()
        .all(|r| r.lags.iter().chain(r.rolls.iter()).all(|v| v.is_some())));
}

#[test]
fn test_insufficient_history_reports_needed_days() {
    let grouped = counting_series(GroupKey::new("P1", "S1"), 10);
    let err = prepare_features(&grouped, &FeatureSet::default(), false).unwrap_err();
    match err {
        ForecastError::InsufficientData { needed_days } => assert_eq!(needed_days, 56),
        other => panic!("expected InsufficientData, got {:?}", other),
    }
}

#[test]
fn test_auto_adjust_retains_short_group() {
    // A: 90 days (full feature set), B: 10 days (shrinks to lag_1 only)
    let mut grouped = counting_series(GroupKey::new("P1", "A"), 90);
    grouped.append(&mut counting_series(GroupKey::new("P1", "B"), 10));

    let set = FeatureSet::default();
    let prepared = prepare_features(&grouped, &set, true).unwrap();

    let b_rows: Vec<_> = prepared
        .rows
        .iter()
        .filter(|r| r.key.site_code == "B")
        .collect();
    // B keeps every row that has lag_1 defined
    assert_eq!(b_rows.len(), 9);
    for row in &b_rows {
        // lag_1 is real history
        assert!(row.lags[0].is_some());
        // columns outside B's effective set are zero-filled, not dropped
        assert_eq!(row.lags[1], Some(0.0)); // lag_7
        assert!(row.rolls.iter().all(|v| *v == Some(0.0)));
    }

    // A is unaffected by B's shrinking
    let a_rows = prepared.rows.iter().filter(|r| r.key.site_code == "A").count();
    assert_eq!(a_rows, 90 - 56);
}

#[test]
fn test_without_auto_adjust_short_group_is_eliminated() {
    let mut grouped = counting_series(GroupKey::new("P1", "A"), 90);
    grouped.append(&mut counting_series(GroupKey::new("P1", "B"), 10));

    let prepared = prepare_features(&grouped, &FeatureSet::default(), false).unwrap();
    assert!(prepared.rows.iter().all(|r| r.key.site_code == "A"));
}
