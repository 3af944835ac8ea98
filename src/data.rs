//! Demand history ingest and tabular output
//!
//! Loads raw transaction tables from CSV, validates the required columns,
//! normalizes keys and dates, and writes forecast results back out. The
//! input schema is case-insensitive on headers: `partnumber`, `site_code`,
//! `date`, `demand_qty`.

use crate::error::{ForecastError, Result};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::io::Read;
use std::path::Path;

/// Required input columns, in canonical order.
pub const REQUIRED_COLUMNS: [&str; 4] = ["demand_qty", "date", "partnumber", "site_code"];

/// One demand observation for a (partnumber, site_code) pair on one day.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DemandRecord {
    /// Item key
    pub partnumber: String,
    /// Location key
    pub site_code: String,
    /// Calendar day of the observation
    pub date: NaiveDate,
    /// Observed demand quantity
    pub demand_qty: f64,
}

/// An owned collection of demand records.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Dataset {
    records: Vec<DemandRecord>,
}

impl Dataset {
    /// Create a dataset from raw records.
    pub fn new(records: Vec<DemandRecord>) -> Self {
        Self { records }
    }

    /// Number of rows.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether the dataset has no rows.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Borrow the underlying records.
    pub fn records(&self) -> &[DemandRecord] {
        &self.records
    }

    /// Consume the dataset, returning the records.
    pub fn into_records(self) -> Vec<DemandRecord> {
        self.records
    }

    /// Distinct site codes, sorted.
    pub fn distinct_sites(&self) -> Vec<String> {
        let set: BTreeSet<&str> = self.records.iter().map(|r| r.site_code.as_str()).collect();
        set.into_iter().map(String::from).collect()
    }

    /// Distinct partnumbers, sorted.
    pub fn distinct_partnumbers(&self) -> Vec<String> {
        let set: BTreeSet<&str> = self.records.iter().map(|r| r.partnumber.as_str()).collect();
        set.into_iter().map(String::from).collect()
    }

    /// Row count per site, ordered by descending volume (ties by site code).
    pub fn site_distribution(&self) -> Vec<(String, usize)> {
        let mut counts: std::collections::BTreeMap<&str, usize> = std::collections::BTreeMap::new();
        for r in &self.records {
            *counts.entry(r.site_code.as_str()).or_insert(0) += 1;
        }
        let mut dist: Vec<(String, usize)> =
            counts.into_iter().map(|(s, c)| (s.to_string(), c)).collect();
        dist.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        dist
    }

    /// Minimum and maximum observation date, if any rows exist.
    pub fn date_range(&self) -> Option<(NaiveDate, NaiveDate)> {
        let min = self.records.iter().map(|r| r.date).min()?;
        let max = self.records.iter().map(|r| r.date).max()?;
        Some((min, max))
    }

    /// Total demand over all rows.
    pub fn demand_sum(&self) -> f64 {
        self.records.iter().map(|r| r.demand_qty).sum()
    }

    /// Rows whose site code is in the allow-list. `None` keeps everything.
    pub fn filter_sites(&self, sites: Option<&[String]>) -> Dataset {
        match sites {
            None => self.clone(),
            Some(allowed) => Dataset::new(
                self.records
                    .iter()
                    .filter(|r| allowed.iter().any(|s| s == &r.site_code))
                    .cloned()
                    .collect(),
            ),
        }
    }

    /// Sort rows by (partnumber, site_code, date).
    pub fn sort(&mut self) {
        self.records.sort_by(|a, b| {
            a.partnumber
                .cmp(&b.partnumber)
                .then_with(|| a.site_code.cmp(&b.site_code))
                .then_with(|| a.date.cmp(&b.date))
        });
    }
}

impl FromIterator<DemandRecord> for Dataset {
    fn from_iter<I: IntoIterator<Item = DemandRecord>>(iter: I) -> Self {
        Dataset::new(iter.into_iter().collect())
    }
}

/// Data loader for demand history tables
#[derive(Debug)]
pub struct DataLoader;

impl DataLoader {
    /// Load and normalize demand history from a CSV file.
    ///
    /// `dayfirst` selects the preference for ambiguous dates such as
    /// `03/04/2025` (true = DD/MM/YYYY, false = MM/DD/YYYY).
    pub fn from_csv<P: AsRef<Path>>(path: P, dayfirst: bool) -> Result<Dataset> {
        let file = std::fs::File::open(path)?;
        Self::from_reader(file, dayfirst)
    }

    /// Load and normalize demand history from any reader producing CSV.
    pub fn from_reader<R: Read>(reader: R, dayfirst: bool) -> Result<Dataset> {
        let mut csv_reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .trim(csv::Trim::All)
            .from_reader(reader);

        let headers: Vec<String> = csv_reader
            .headers()?
            .iter()
            .map(|h| h.trim().to_lowercase())
            .collect();

        let missing: Vec<&str> = REQUIRED_COLUMNS
            .iter()
            .filter(|c| !headers.iter().any(|h| h == *c))
            .copied()
            .collect();
        if !missing.is_empty() {
            return Err(ForecastError::Validation(format!(
                "Missing required columns: {}. Found headers: {}",
                missing.join(", "),
                headers.join(", ")
            )));
        }

        let col = |name: &str| headers.iter().position(|h| h == name);
        let demand_idx = col("demand_qty").unwrap_or(0);
        let date_idx = col("date").unwrap_or(0);
        let part_idx = col("partnumber").unwrap_or(0);
        let site_idx = col("site_code").unwrap_or(0);

        let mut records = Vec::new();
        for (row_num, row) in csv_reader.records().enumerate() {
            let row = row?;
            let date_str = row.get(date_idx).unwrap_or("").trim();
            let date = parse_date_flexible(date_str, dayfirst).ok_or_else(|| {
                ForecastError::Validation(format!(
                    "Unparsable date '{}' at data row {}",
                    date_str,
                    row_num + 1
                ))
            })?;

            // Numeric coercion: unparsable demand becomes 0, never a dropped row.
            let demand_qty = row
                .get(demand_idx)
                .unwrap_or("")
                .trim()
                .parse::<f64>()
                .unwrap_or(0.0);

            records.push(DemandRecord {
                partnumber: row.get(part_idx).unwrap_or("").trim().to_string(),
                site_code: row.get(site_idx).unwrap_or("").trim().to_string(),
                date,
                demand_qty,
            });
        }

        let mut dataset = Dataset::new(records);
        dataset.sort();
        Ok(dataset)
    }
}

/// Parse a date string against a list of common formats.
///
/// The `dayfirst` flag decides which of the ambiguous slash/dash formats is
/// tried first; ISO dates always parse regardless of the flag.
pub fn parse_date_flexible(value: &str, dayfirst: bool) -> Option<NaiveDate> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }

    let formats: [&str; 7] = if dayfirst {
        [
            "%d/%m/%Y", "%m/%d/%Y", "%Y-%m-%d", "%d-%m-%Y", "%m-%d-%Y", "%d/%m/%y", "%m/%d/%y",
        ]
    } else {
        [
            "%m/%d/%Y", "%d/%m/%Y", "%Y-%m-%d", "%m-%d-%Y", "%d-%m-%Y", "%m/%d/%y", "%d/%m/%y",
        ]
    };

    formats
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(value, fmt).ok())
}

/// Write forecast rows to a CSV file, creating parent directories as needed.
pub fn write_forecast_csv<P: AsRef<Path>>(
    rows: &[crate::engine::ForecastRow],
    path: P,
) -> Result<()> {
    if let Some(parent) = path.as_ref().parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut writer = csv::Writer::from_path(path.as_ref())?;
    writer.write_record(["partnumber", "site_code", "date", "yhat_raw", "yhat_thr", "yhat_round"])?;
    for row in rows {
        writer.write_record([
            row.partnumber.as_str(),
            row.site_code.as_str(),
            &row.date.format("%Y-%m-%d").to_string(),
            &format!("{:.6}", row.raw_prediction),
            &format!("{:.6}", row.thresholded_value),
            &row.rounded_value.to_string(),
        ])?;
    }
    writer.flush()?;
    Ok(())
}
