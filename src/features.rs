//! Calendar and lag/rolling-window feature engineering
//!
//! All lag and rolling features are strictly trailing: the value at day D is
//! derived only from days before D, so a row's label can never leak into its
//! own features. Short-history groups are either shrunk to a feature set
//! that fits their span (auto-adjust) or eliminated by the training filter.

use crate::error::{ForecastError, Result};
use crate::preprocess::{GroupKey, GroupedSeries};
use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};

/// Calendar attributes derived from a date. Pure and deterministic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CalendarFeatures {
    pub year: i32,
    pub month: u32,
    pub day: u32,
    /// Monday = 0 .. Sunday = 6
    pub dayofweek: u32,
    /// ISO week number
    pub weekofyear: u32,
    pub is_month_start: bool,
    pub is_month_end: bool,
}

impl CalendarFeatures {
    /// Derive calendar features for one date.
    pub fn for_date(date: NaiveDate) -> Self {
        let is_month_end = match date.succ_opt() {
            Some(next) => next.month() != date.month(),
            None => true,
        };
        Self {
            year: date.year(),
            month: date.month(),
            day: date.day(),
            dayofweek: date.weekday().num_days_from_monday(),
            weekofyear: date.iso_week().week(),
            is_month_start: date.day() == 1,
            is_month_end,
        }
    }
}

/// The configured set of lag offsets and rolling-window sizes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureSet {
    /// Lag offsets in days (`lag_L[t] = target[t - L]`)
    pub lags: Vec<u32>,
    /// Trailing rolling-mean window sizes in days
    pub windows: Vec<u32>,
}

impl Default for FeatureSet {
    fn default() -> Self {
        Self {
            lags: vec![1, 7, 14, 28],
            windows: vec![7, 14, 28],
        }
    }
}

impl FeatureSet {
    pub fn max_lag(&self) -> u32 {
        self.lags.iter().copied().max().unwrap_or(0)
    }

    pub fn max_window(&self) -> u32 {
        self.windows.iter().copied().max().unwrap_or(0)
    }

    /// Days of history a group needs before any row has every feature defined.
    pub fn min_history_days(&self) -> u32 {
        self.max_lag() + self.max_window()
    }

    /// Whether a group spanning `span_days` needs a shrunk feature set.
    pub fn needs_shrink(&self, span_days: i64) -> bool {
        span_days < self.min_history_days() as i64
    }

    /// Shrink the set for a group spanning `span_days` days.
    ///
    /// Keeps a lag or window only if it leaves at least a week of trainable
    /// rows behind it. Falls back to lag 1 with no windows so very short
    /// groups are retained rather than discarded.
    pub fn shrink_for_span(&self, span_days: i64) -> FeatureSet {
        let fits = |n: u32| (n as i64) < span_days - 7;
        let mut lags: Vec<u32> = self.lags.iter().copied().filter(|l| fits(*l)).collect();
        let windows: Vec<u32> = self.windows.iter().copied().filter(|w| fits(*w)).collect();
        if lags.is_empty() {
            lags = vec![1];
            return FeatureSet {
                lags,
                windows: Vec::new(),
            };
        }
        FeatureSet { lags, windows }
    }

    /// Column labels in matrix order, `lag_L` then `rollmean_W`.
    pub fn column_names(&self) -> Vec<String> {
        self.lags
            .iter()
            .map(|l| format!("lag_{}", l))
            .chain(self.windows.iter().map(|w| format!("rollmean_{}", w)))
            .collect()
    }
}

/// A demand observation extended with calendar and lag/roll features.
///
/// `lags` and `rolls` are positionally aligned with the [`FeatureSet`] used
/// to build the row; `None` means the group has insufficient history at
/// that offset.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureRow {
    pub key: GroupKey,
    pub date: NaiveDate,
    pub demand_qty: f64,
    pub calendar: CalendarFeatures,
    pub lags: Vec<Option<f64>>,
    pub rolls: Vec<Option<f64>>,
}

/// Feature rows ready for training, plus the column layout they were built
/// with.
#[derive(Debug, Clone)]
pub struct PreparedFeatures {
    pub rows: Vec<FeatureRow>,
    pub feature_set: FeatureSet,
}

/// Compute lag and trailing rolling-mean features for every row of every
/// group.
///
/// Each group's series must be sorted and gap-free (see
/// [`crate::preprocess::preprocess`]); lag offsets are then plain index
/// offsets. `rollmean_W[t]` averages days `t-W ..= t-1` and never includes
/// day `t` itself.
pub fn add_group_lags_rolls(grouped: &GroupedSeries, set: &FeatureSet) -> Vec<FeatureRow> {
    let mut rows = Vec::new();
    for (key, series) in grouped {
        let values: Vec<f64> = series.iter().map(|(_, v)| *v).collect();
        for (t, (date, demand_qty)) in series.iter().enumerate() {
            let lags: Vec<Option<f64>> = set
                .lags
                .iter()
                .map(|l| {
                    let l = *l as usize;
                    if t >= l {
                        Some(values[t - l])
                    } else {
                        None
                    }
                })
                .collect();
            let rolls: Vec<Option<f64>> = set
                .windows
                .iter()
                .map(|w| {
                    let w = *w as usize;
                    if t >= w {
                        Some(values[t - w..t].iter().sum::<f64>() / w as f64)
                    } else {
                        None
                    }
                })
                .collect();
            rows.push(FeatureRow {
                key: key.clone(),
                date: *date,
                demand_qty: *demand_qty,
                calendar: CalendarFeatures::for_date(*date),
                lags,
                rolls,
            });
        }
    }
    rows
}

/// Build training-eligible feature rows from preprocessed grouped series.
///
/// A row qualifies only if every lag/roll feature in its group's effective
/// set is defined. With `auto_adjust` the effective set shrinks per group
/// when the group's span cannot support the full configuration; columns
/// outside the shrunk set are zero-filled so the matrix stays rectangular.
/// Without `auto_adjust` the full set applies to everyone and short groups
/// drop out entirely.
pub fn prepare_features(
    grouped: &GroupedSeries,
    set: &FeatureSet,
    auto_adjust: bool,
) -> Result<PreparedFeatures> {
    let mut rows = Vec::new();

    for (key, series) in grouped {
        let span_days = match (series.first(), series.last()) {
            (Some((first, _)), Some((last, _))) => (*last - *first).num_days(),
            _ => continue,
        };

        let effective = if auto_adjust && set.needs_shrink(span_days) {
            let shrunk = set.shrink_for_span(span_days);
            log::debug!(
                "group {} spans {} days; shrinking features to lags {:?}, windows {:?}",
                key,
                span_days,
                shrunk.lags,
                shrunk.windows
            );
            shrunk
        } else {
            set.clone()
        };

        let mut single = GroupedSeries::new();
        single.insert(key.clone(), series.clone());

        for mut row in add_group_lags_rolls(&single, set) {
            let mut eligible = true;
            for (i, lag) in set.lags.iter().enumerate() {
                if effective.lags.contains(lag) {
                    eligible &= row.lags[i].is_some();
                } else {
                    row.lags[i] = Some(0.0);
                }
            }
            for (i, window) in set.windows.iter().enumerate() {
                if effective.windows.contains(window) {
                    eligible &= row.rolls[i].is_some();
                } else {
                    row.rolls[i] = Some(0.0);
                }
            }
            if eligible {
                rows.push(row);
            }
        }
    }

    if rows.is_empty() {
        return Err(ForecastError::InsufficientData {
            needed_days: set.min_history_days(),
        });
    }

    log::info!("prepared {} feature rows for training", rows.len());
    Ok(PreparedFeatures {
        rows,
        feature_set: set.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn month_boundaries() {
        let f = CalendarFeatures::for_date(NaiveDate::from_ymd_opt(2025, 2, 1).unwrap());
        assert!(f.is_month_start);
        assert!(!f.is_month_end);
        let f = CalendarFeatures::for_date(NaiveDate::from_ymd_opt(2025, 2, 28).unwrap());
        assert!(f.is_month_end);
    }

    #[test]
    fn shrink_keeps_short_groups() {
        let set = FeatureSet::default();
        // 10 observed days = span of 9
        assert!(set.needs_shrink(9));
        let shrunk = set.shrink_for_span(9);
        assert_eq!(shrunk.lags, vec![1]);
        assert!(shrunk.windows.is_empty());
    }

    #[test]
    fn no_shrink_for_long_span() {
        let set = FeatureSet::default();
        assert!(!set.needs_shrink(89));
    }
}
