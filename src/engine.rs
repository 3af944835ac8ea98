//! Autoregressive multi-day forecast engine
//!
//! One day is forecast at a time from a rolling history window; each day's
//! rounded output is appended back into the history as synthetic demand so
//! lag and rolling features stay contiguous across the horizon. When the
//! requested start date sits past the end of the history, the gap days are
//! forecast the same way as a warm-up and never appear in the output.

use crate::data::Dataset;
use crate::error::{ForecastError, Result};
use crate::features::{add_group_lags_rolls, CalendarFeatures, FeatureRow, FeatureSet};
use crate::model::TrainedModel;
use crate::preprocess::{group_series, GroupKey, GroupedSeries};
use chrono::{Duration, NaiveDate};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

/// How the thresholded prediction is turned into an integer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoundingMode {
    /// `floor(x + 0.5)`: 0.5 rounds up
    HalfUp,
    /// Round half away from zero
    Round,
    /// Always round up
    Ceiling,
    /// Always round down
    Floor,
}

impl Default for RoundingMode {
    fn default() -> Self {
        RoundingMode::HalfUp
    }
}

impl RoundingMode {
    /// Apply the rounding rule.
    pub fn apply(&self, value: f64) -> i64 {
        match self {
            RoundingMode::HalfUp => (value + 0.5).floor() as i64,
            RoundingMode::Round => value.round() as i64,
            RoundingMode::Ceiling => value.ceil() as i64,
            RoundingMode::Floor => value.floor() as i64,
        }
    }
}

/// Forecast configuration recognized by the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ForecastConfig {
    /// Days to forecast
    pub forecast_horizon: u32,
    /// Optional allow-list of site codes; `None` forecasts all sites
    pub forecast_site_codes: Option<Vec<String>>,
    /// Explicit start date; default is last historical date + 1
    pub forecast_start_date: Option<NaiveDate>,
    /// Predictions below this value clamp to zero
    pub zero_threshold: f64,
    /// Integer rounding rule applied to the thresholded value
    pub rounding_mode: RoundingMode,
    /// Seed recorded for reproducible fitting
    pub random_state: u64,
    /// Date-parsing preference for ambiguous input dates
    pub dayfirst: bool,
    /// Shrink the lag/window set for short-history groups instead of
    /// dropping them
    pub auto_adjust: bool,
    /// Configured lag offsets and rolling windows
    pub feature_set: FeatureSet,
}

impl Default for ForecastConfig {
    fn default() -> Self {
        Self {
            forecast_horizon: 7,
            forecast_site_codes: None,
            forecast_start_date: None,
            zero_threshold: 0.5,
            rounding_mode: RoundingMode::default(),
            random_state: 42,
            dayfirst: true,
            auto_adjust: true,
            feature_set: FeatureSet::default(),
        }
    }
}

impl ForecastConfig {
    /// Validate option values.
    pub fn validate(&self) -> Result<()> {
        if self.forecast_horizon == 0 {
            return Err(ForecastError::Validation(
                "forecast_horizon must be a positive number of days".to_string(),
            ));
        }
        if self.zero_threshold < 0.0 {
            return Err(ForecastError::Validation(
                "zero_threshold must be non-negative".to_string(),
            ));
        }
        if self.feature_set.lags.is_empty() {
            return Err(ForecastError::Validation(
                "at least one lag offset must be configured".to_string(),
            ));
        }
        Ok(())
    }
}

/// One forecast output row.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ForecastRow {
    pub partnumber: String,
    pub site_code: String,
    pub date: NaiveDate,
    /// Model output clamped to be non-negative
    pub raw_prediction: f64,
    /// Raw prediction, or 0 below the zero threshold
    pub thresholded_value: f64,
    /// Integer value fed back into history for subsequent days
    pub rounded_value: i64,
}

/// Drives a trained estimator through the one-day and multi-day forecasts.
pub struct Forecaster {
    model: Arc<TrainedModel>,
    config: ForecastConfig,
}

impl Forecaster {
    pub fn new(model: Arc<TrainedModel>, config: ForecastConfig) -> Self {
        Self { model, config }
    }

    /// Predict one day for every target group from the current history.
    ///
    /// Features are recomputed over the whole history with the same
    /// lag/window set the estimator was trained with; each group
    /// contributes its most recent feature snapshot. Groups without any
    /// history get zero-filled lag/roll features.
    pub fn one_day_forecast(
        &self,
        history: &GroupedSeries,
        target_groups: &[GroupKey],
        date: NaiveDate,
    ) -> Result<Vec<ForecastRow>> {
        let set = &self.model.feature_set;
        let history_rows = add_group_lags_rolls(history, set);

        // Latest lag/roll snapshot per group; undefined features become 0.
        let mut snapshot: BTreeMap<&GroupKey, (&Vec<Option<f64>>, &Vec<Option<f64>>)> =
            BTreeMap::new();
        for row in &history_rows {
            snapshot.insert(&row.key, (&row.lags, &row.rolls));
        }

        let rows: Vec<FeatureRow> = target_groups
            .iter()
            .map(|key| {
                let (lags, rolls) = match snapshot.get(key) {
                    Some((lags, rolls)) => (
                        lags.iter().map(|v| Some(v.unwrap_or(0.0))).collect(),
                        rolls.iter().map(|v| Some(v.unwrap_or(0.0))).collect(),
                    ),
                    None => (
                        vec![Some(0.0); set.lags.len()],
                        vec![Some(0.0); set.windows.len()],
                    ),
                };
                FeatureRow {
                    key: key.clone(),
                    date,
                    demand_qty: 0.0,
                    calendar: CalendarFeatures::for_date(date),
                    lags,
                    rolls,
                }
            })
            .collect();

        let predictions = self.model.estimator.predict(&rows)?;
        let output = rows
            .iter()
            .zip(predictions)
            .map(|(row, prediction)| {
                let raw = prediction.max(0.0);
                let thresholded = if raw < self.config.zero_threshold {
                    0.0
                } else {
                    raw
                };
                ForecastRow {
                    partnumber: row.key.partnumber.clone(),
                    site_code: row.key.site_code.clone(),
                    date,
                    raw_prediction: raw,
                    thresholded_value: thresholded,
                    rounded_value: self.config.rounding_mode.apply(thresholded),
                }
            })
            .collect();
        Ok(output)
    }

    /// Multi-day autoregressive forecast over preprocessed demand history.
    ///
    /// The returned rows cover exactly the configured horizon starting at
    /// the configured (or derived) start date, sorted by partnumber, site
    /// code, date. Warm-up days forecast to bridge a gap between history
    /// and start date are internal only.
    pub fn forecast(&self, dataset: &Dataset) -> Result<Vec<ForecastRow>> {
        self.config.validate()?;

        let filtered = dataset.filter_sites(self.config.forecast_site_codes.as_deref());
        if filtered.is_empty() {
            return Err(ForecastError::EmptySiteFilter);
        }

        let (_, max_hist) = filtered
            .date_range()
            .ok_or_else(|| ForecastError::Validation("Dataset has no dates".to_string()))?;

        let start_date = self
            .config
            .forecast_start_date
            .unwrap_or(max_hist + Duration::days(1));

        // History ends the day before the forecast start; a start inside
        // the observed range truncates, a start past it keeps everything.
        let mut history: GroupedSeries = if start_date <= max_hist {
            let cutoff = start_date - Duration::days(1);
            group_series(&Dataset::new(
                filtered
                    .records()
                    .iter()
                    .filter(|r| r.date <= cutoff)
                    .cloned()
                    .collect(),
            ))
        } else {
            group_series(&filtered)
        };
        if history.values().all(|s| s.is_empty()) || history.is_empty() {
            return Err(ForecastError::Validation(
                "No history remains before the requested forecast start date".to_string(),
            ));
        }

        // Target groups come from the filtered dataset (not the truncated
        // history), restricted to groups the model actually trained on.
        // A group with no history rows before the start date still gets
        // forecast rows via zero-filled features; a group eliminated by the
        // training filter produces no output at all.
        let target_groups: Vec<GroupKey> = group_series(&filtered)
            .keys()
            .filter(|k| self.model.trained_groups.contains(*k))
            .cloned()
            .collect();
        if target_groups.is_empty() {
            return Err(ForecastError::Validation(
                "No forecastable groups: every group was eliminated by feature filtering"
                    .to_string(),
            ));
        }

        // Warm-up: forecast any gap days so the feature window stays
        // contiguous. These rows never reach the output.
        let last_history = history
            .values()
            .filter_map(|s| s.last().map(|(d, _)| *d))
            .max()
            .ok_or_else(|| ForecastError::Validation("History is empty".to_string()))?;
        let mut gap_day = last_history + Duration::days(1);
        while gap_day < start_date {
            log::debug!("warm-up forecast for gap day {}", gap_day);
            let rows = self.one_day_forecast(&history, &target_groups, gap_day)?;
            append_back(&mut history, &rows);
            gap_day += Duration::days(1);
        }

        let mut output = Vec::new();
        for offset in 0..self.config.forecast_horizon {
            let day = start_date + Duration::days(offset as i64);
            log::debug!("forecasting {}", day);
            let rows = self.one_day_forecast(&history, &target_groups, day)?;
            append_back(&mut history, &rows);
            output.extend(rows);
        }

        output.sort_by(|a, b| {
            a.partnumber
                .cmp(&b.partnumber)
                .then_with(|| a.site_code.cmp(&b.site_code))
                .then_with(|| a.date.cmp(&b.date))
        });
        Ok(output)
    }
}

/// Append each group's rounded prediction back into its history series as
/// if it were observed demand.
fn append_back(history: &mut GroupedSeries, rows: &[ForecastRow]) {
    for row in rows {
        let key = GroupKey::new(row.partnumber.clone(), row.site_code.clone());
        history
            .entry(key)
            .or_default()
            .push((row.date, row.rounded_value as f64));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(RoundingMode::HalfUp, 0.5, 1)]
    #[case(RoundingMode::HalfUp, 0.49, 0)]
    #[case(RoundingMode::HalfUp, 2.5, 3)]
    #[case(RoundingMode::Round, 2.5, 3)]
    #[case(RoundingMode::Ceiling, 2.1, 3)]
    #[case(RoundingMode::Floor, 2.9, 2)]
    fn rounding_rules(#[case] mode: RoundingMode, #[case] input: f64, #[case] expected: i64) {
        assert_eq!(mode.apply(input), expected);
    }

    #[test]
    fn horizon_zero_rejected() {
        let config = ForecastConfig {
            forecast_horizon: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
