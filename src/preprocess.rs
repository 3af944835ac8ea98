//! Series completion and outlier control
//!
//! Turns raw demand rows into gap-free per-group daily series: same-day
//! duplicates are summed, missing calendar days become explicit zero-demand
//! rows, and per-group spikes are clipped at the group's own 99th
//! percentile. Lag and rolling-window features downstream assume the
//! contiguous calendar this module guarantees.

use crate::data::{Dataset, DemandRecord};
use crate::error::{ForecastError, Result};
use chrono::NaiveDate;
use statrs::statistics::{Data, OrderStatistics};
use std::collections::BTreeMap;

/// Identifies one demand series: a (partnumber, site_code) pair.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct GroupKey {
    pub partnumber: String,
    pub site_code: String,
}

impl GroupKey {
    pub fn new(partnumber: impl Into<String>, site_code: impl Into<String>) -> Self {
        Self {
            partnumber: partnumber.into(),
            site_code: site_code.into(),
        }
    }
}

impl std::fmt::Display for GroupKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.partnumber, self.site_code)
    }
}

/// One group's daily series, ordered by date.
pub type Series = Vec<(NaiveDate, f64)>;

/// Ordered map from group key to its owned daily series.
pub type GroupedSeries = BTreeMap<GroupKey, Series>;

/// Group rows by (partnumber, site_code), summing same-day duplicates.
pub fn aggregate_daily(dataset: &Dataset) -> BTreeMap<GroupKey, BTreeMap<NaiveDate, f64>> {
    let mut groups: BTreeMap<GroupKey, BTreeMap<NaiveDate, f64>> = BTreeMap::new();
    for record in dataset.records() {
        let key = GroupKey::new(record.partnumber.clone(), record.site_code.clone());
        *groups
            .entry(key)
            .or_default()
            .entry(record.date)
            .or_insert(0.0) += record.demand_qty;
    }
    groups
}

/// Fill a single aggregated series with zero-demand rows for every missing
/// day between its first and last observation. Never extends past either end.
pub fn complete_calendar_daily(aggregated: &BTreeMap<NaiveDate, f64>) -> Series {
    let mut series = Series::new();
    let (first, last) = match (aggregated.keys().next(), aggregated.keys().next_back()) {
        (Some(first), Some(last)) => (*first, *last),
        _ => return series,
    };

    let mut day = first;
    while day <= last {
        series.push((day, aggregated.get(&day).copied().unwrap_or(0.0)));
        match day.succ_opt() {
            Some(next) => day = next,
            None => break,
        }
    }
    series
}

/// Clamp a series to [0, p99] of its own demand distribution.
///
/// Keeps rare spikes from dominating lag and rolling statistics without
/// dropping any rows.
pub fn clip_outliers_p99(series: &mut Series) {
    if series.is_empty() {
        return;
    }
    let values: Vec<f64> = series.iter().map(|(_, v)| *v).collect();
    let mut data = Data::new(values);
    let p99 = data.percentile(99);
    for (_, value) in series.iter_mut() {
        *value = value.clamp(0.0, p99.max(0.0));
    }
}

/// Full preprocessing pipeline: aggregate, complete, clip.
///
/// Returns the grouped gap-free series, each group independently spanning
/// its own observed date range.
pub fn preprocess(dataset: &Dataset) -> Result<GroupedSeries> {
    if dataset.is_empty() {
        return Err(ForecastError::Validation(
            "Cannot preprocess an empty dataset".to_string(),
        ));
    }

    let mut grouped = GroupedSeries::new();
    for (key, aggregated) in aggregate_daily(dataset) {
        let mut series = complete_calendar_daily(&aggregated);
        clip_outliers_p99(&mut series);
        grouped.insert(key, series);
    }
    Ok(grouped)
}

/// Flatten grouped series back into a dataset, sorted by group then date.
pub fn to_dataset(grouped: &GroupedSeries) -> Dataset {
    let mut records = Vec::new();
    for (key, series) in grouped {
        for (date, demand_qty) in series {
            records.push(DemandRecord {
                partnumber: key.partnumber.clone(),
                site_code: key.site_code.clone(),
                date: *date,
                demand_qty: *demand_qty,
            });
        }
    }
    Dataset::new(records)
}

/// Group an already-preprocessed dataset without re-aggregating.
pub fn group_series(dataset: &Dataset) -> GroupedSeries {
    let mut grouped = GroupedSeries::new();
    for record in dataset.records() {
        grouped
            .entry(GroupKey::new(
                record.partnumber.clone(),
                record.site_code.clone(),
            ))
            .or_default()
            .push((record.date, record.demand_qty));
    }
    for series in grouped.values_mut() {
        series.sort_by_key(|(date, _)| *date);
    }
    grouped
}
