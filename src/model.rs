//! Estimator contract, default ridge regression, and the model registry
//!
//! The forecasting engine only ever sees the [`Estimator`] trait, so any
//! regression implementation with a fit/predict contract can be substituted.
//! The default is a ridge regression over one-hot encoded group keys plus
//! the numeric calendar and lag/roll features, fit on a log1p-transformed
//! target and solved through the normal equations with a Cholesky
//! decomposition.

use crate::engine::ForecastConfig;
use crate::error::{ForecastError, Result};
use crate::features::{FeatureRow, FeatureSet, PreparedFeatures};
use crate::metrics::{evaluate_forecast, evaluate_with_rounding, ForecastMetrics};
use crate::preprocess::GroupKey;
use chrono::Duration;
use std::collections::hash_map::DefaultHasher;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Mutex};

/// Common interface for regression estimators.
///
/// Object-safe so models can be boxed and swapped without touching the
/// forecast engine.
pub trait Estimator: Send + Sync {
    /// Fit the estimator to feature rows and their targets.
    fn fit(&mut self, features: &[FeatureRow], target: &[f64]) -> Result<()>;

    /// Predict one value per feature row.
    fn predict(&self, features: &[FeatureRow]) -> Result<Vec<f64>>;

    /// Display name of the estimator.
    fn name(&self) -> &str;
}

/// Numeric (non-categorical) feature vector for one row: calendar fields
/// followed by lag and rolling-mean columns. Undefined lag/roll features
/// encode as 0, matching the cold-start fill on the forecast side.
fn numeric_features(row: &FeatureRow) -> Vec<f64> {
    let c = &row.calendar;
    let mut x = vec![
        c.year as f64,
        c.month as f64,
        c.day as f64,
        c.dayofweek as f64,
        c.weekofyear as f64,
        c.is_month_start as u8 as f64,
        c.is_month_end as u8 as f64,
    ];
    x.extend(row.lags.iter().map(|v| v.unwrap_or(0.0)));
    x.extend(row.rolls.iter().map(|v| v.unwrap_or(0.0)));
    x
}

/// Ridge regression on one-hot group keys + numeric features, with a log1p
/// target transform (predictions are inverse-transformed with expm1).
#[derive(Debug, Clone)]
pub struct RidgeEstimator {
    alpha: f64,
    part_index: BTreeMap<String, usize>,
    site_index: BTreeMap<String, usize>,
    beta: Vec<f64>,
    num_numeric: usize,
}

impl Default for RidgeEstimator {
    fn default() -> Self {
        Self::new(1.0)
    }
}

impl RidgeEstimator {
    /// Create an unfitted estimator with the given ridge penalty.
    pub fn new(alpha: f64) -> Self {
        Self {
            alpha,
            part_index: BTreeMap::new(),
            site_index: BTreeMap::new(),
            beta: Vec::new(),
            num_numeric: 0,
        }
    }

    fn num_params(&self) -> usize {
        // intercept + numeric + one-hot part + one-hot site
        1 + self.num_numeric + self.part_index.len() + self.site_index.len()
    }

    /// Full design vector for one row, intercept first. Categories unseen
    /// during fit encode as all-zero.
    fn design_vector(&self, row: &FeatureRow) -> Vec<f64> {
        let mut x = vec![0.0; self.num_params()];
        x[0] = 1.0;
        for (i, v) in numeric_features(row).into_iter().enumerate() {
            x[1 + i] = v;
        }
        let part_offset = 1 + self.num_numeric;
        if let Some(i) = self.part_index.get(&row.key.partnumber) {
            x[part_offset + i] = 1.0;
        }
        let site_offset = part_offset + self.part_index.len();
        if let Some(i) = self.site_index.get(&row.key.site_code) {
            x[site_offset + i] = 1.0;
        }
        x
    }
}

impl Estimator for RidgeEstimator {
    fn fit(&mut self, features: &[FeatureRow], target: &[f64]) -> Result<()> {
        if features.is_empty() {
            return Err(ForecastError::Model(
                "Cannot fit estimator on zero rows".to_string(),
            ));
        }
        if features.len() != target.len() {
            return Err(ForecastError::Model(format!(
                "Feature rows ({}) and targets ({}) differ in length",
                features.len(),
                target.len()
            )));
        }

        self.part_index.clear();
        self.site_index.clear();
        for row in features {
            let next = self.part_index.len();
            self.part_index
                .entry(row.key.partnumber.clone())
                .or_insert(next);
            let next = self.site_index.len();
            self.site_index
                .entry(row.key.site_code.clone())
                .or_insert(next);
        }
        self.num_numeric = numeric_features(&features[0]).len();

        let p = self.num_params();
        let mut xtx = vec![vec![0.0; p]; p];
        let mut xty = vec![0.0; p];

        for (row, y) in features.iter().zip(target.iter()) {
            let x = self.design_vector(row);
            let y = y.max(0.0).ln_1p();
            for i in 0..p {
                if x[i] == 0.0 {
                    continue;
                }
                xty[i] += x[i] * y;
                for j in 0..p {
                    xtx[i][j] += x[i] * x[j];
                }
            }
        }

        // Ridge penalty on everything but the intercept, plus a small jitter
        // so the Cholesky factorization stays positive definite.
        xtx[0][0] += 1e-8;
        for i in 1..p {
            xtx[i][i] += self.alpha + 1e-8;
        }

        self.beta = solve_symmetric(&xtx, &xty).ok_or_else(|| {
            ForecastError::Model("Ridge fit failed: matrix not positive definite".to_string())
        })?;
        Ok(())
    }

    fn predict(&self, features: &[FeatureRow]) -> Result<Vec<f64>> {
        if self.beta.is_empty() {
            return Err(ForecastError::Model(
                "Estimator has not been fitted".to_string(),
            ));
        }
        let predictions = features
            .iter()
            .map(|row| {
                let x = self.design_vector(row);
                let z: f64 = x.iter().zip(self.beta.iter()).map(|(a, b)| a * b).sum();
                z.exp_m1()
            })
            .collect();
        Ok(predictions)
    }

    fn name(&self) -> &str {
        "ridge_log"
    }
}

/// Solve a symmetric positive definite system via Cholesky decomposition.
fn solve_symmetric(a: &[Vec<f64>], b: &[f64]) -> Option<Vec<f64>> {
    let n = b.len();
    if n == 0 || a.len() != n {
        return None;
    }

    let mut l = vec![vec![0.0; n]; n];
    for i in 0..n {
        for j in 0..=i {
            let mut sum = a[i][j];
            for k in 0..j {
                sum -= l[i][k] * l[j][k];
            }
            if i == j {
                if sum <= 0.0 {
                    return None;
                }
                l[i][j] = sum.sqrt();
            } else {
                l[i][j] = sum / l[j][j];
            }
        }
    }

    // Forward substitution: L z = b
    let mut z = vec![0.0; n];
    for i in 0..n {
        let mut sum = b[i];
        for k in 0..i {
            sum -= l[i][k] * z[k];
        }
        z[i] = sum / l[i][i];
    }

    // Back substitution: L' x = z
    let mut x = vec![0.0; n];
    for i in (0..n).rev() {
        let mut sum = z[i];
        for k in (i + 1)..n {
            sum -= l[k][i] * x[k];
        }
        x[i] = sum / l[i][i];
    }
    Some(x)
}

/// Raw and rounded validation metrics from the hold-out split.
#[derive(Debug, Clone)]
pub struct ValidationReport {
    pub raw: ForecastMetrics,
    pub rounded: ForecastMetrics,
    pub train_rows: usize,
    pub valid_rows: usize,
}

/// A fitted estimator together with the feature layout it was trained with
/// and the groups that contributed training rows.
pub struct TrainedModel {
    pub estimator: Box<dyn Estimator>,
    pub feature_set: FeatureSet,
    /// Groups with at least one training-eligible row; groups filtered out
    /// by insufficient history never appear in forecast output.
    pub trained_groups: BTreeSet<GroupKey>,
    pub validation: ValidationReport,
}

impl std::fmt::Debug for TrainedModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrainedModel")
            .field("estimator", &self.estimator.name())
            .field("feature_set", &self.feature_set)
            .field("validation", &self.validation)
            .finish()
    }
}

/// Train the default ridge estimator on prepared features and validate it
/// on a time-based hold-out.
///
/// The cutoff sits `max(28, 2 * horizon)` days before the last feature row;
/// when that leaves too little on either side (train < 10 or valid < 3
/// rows) an 80/20 index split is used instead.
pub fn train_and_validate(
    prepared: &PreparedFeatures,
    config: &ForecastConfig,
) -> Result<TrainedModel> {
    train_with_estimator(prepared, config, Box::new(RidgeEstimator::default()))
}

/// Train an arbitrary estimator on prepared features.
pub fn train_with_estimator(
    prepared: &PreparedFeatures,
    config: &ForecastConfig,
    mut estimator: Box<dyn Estimator>,
) -> Result<TrainedModel> {
    let rows = &prepared.rows;
    let max_date = rows
        .iter()
        .map(|r| r.date)
        .max()
        .ok_or_else(|| ForecastError::Validation("No feature rows to train on".to_string()))?;

    let cutoff_days = 28i64.max(2 * config.forecast_horizon as i64);
    let cutoff = max_date - Duration::days(cutoff_days);

    let mut train: Vec<&FeatureRow> = rows.iter().filter(|r| r.date <= cutoff).collect();
    let mut valid: Vec<&FeatureRow> = rows.iter().filter(|r| r.date > cutoff).collect();

    if train.len() < 10 || valid.len() < 3 {
        log::warn!(
            "time cutoff left {} train / {} valid rows; falling back to 80/20 split",
            train.len(),
            valid.len()
        );
        let split = (rows.len() * 4) / 5;
        train = rows[..split].iter().collect();
        valid = rows[split..].iter().collect();
    }

    if train.is_empty() || valid.is_empty() {
        return Err(ForecastError::Validation(
            "Not enough rows to split into train and validation sets".to_string(),
        ));
    }

    let train_rows: Vec<FeatureRow> = train.iter().map(|r| (*r).clone()).collect();
    let valid_rows: Vec<FeatureRow> = valid.iter().map(|r| (*r).clone()).collect();
    let y_train: Vec<f64> = train_rows.iter().map(|r| r.demand_qty).collect();
    let y_valid: Vec<f64> = valid_rows.iter().map(|r| r.demand_qty).collect();

    log::info!(
        "training {} on {} rows, validating on {}",
        estimator.name(),
        train_rows.len(),
        valid_rows.len()
    );
    estimator.fit(&train_rows, &y_train)?;

    let predicted: Vec<f64> = estimator
        .predict(&valid_rows)?
        .into_iter()
        .map(|p| p.max(0.0))
        .collect();
    let raw = evaluate_forecast(&y_valid, &predicted)?;
    let rounded = evaluate_with_rounding(
        &y_valid,
        &predicted,
        config.zero_threshold,
        config.rounding_mode,
    )?;
    log::info!("validation MAPE {:.2}% (rounded {:.2}%)", raw.mape, rounded.mape);

    let trained_groups: BTreeSet<GroupKey> = rows.iter().map(|r| r.key.clone()).collect();

    Ok(TrainedModel {
        estimator,
        feature_set: prepared.feature_set.clone(),
        trained_groups,
        validation: ValidationReport {
            raw,
            rounded,
            train_rows: train_rows.len(),
            valid_rows: valid_rows.len(),
        },
    })
}

/// Fingerprint of (training configuration, data snapshot) used as the model
/// registry key. Two jobs share a model only when both match.
pub fn model_fingerprint(config: &ForecastConfig, dataset: &crate::data::Dataset) -> String {
    let mut hasher = DefaultHasher::new();
    config.feature_set.lags.hash(&mut hasher);
    config.feature_set.windows.hash(&mut hasher);
    config.auto_adjust.hash(&mut hasher);
    config.random_state.hash(&mut hasher);
    dataset.len().hash(&mut hasher);
    if let Some((min, max)) = dataset.date_range() {
        min.hash(&mut hasher);
        max.hash(&mut hasher);
    }
    dataset.distinct_partnumbers().hash(&mut hasher);
    dataset.distinct_sites().hash(&mut hasher);
    format!("{:016x}", hasher.finish())
}

/// In-process registry of trained models keyed by fingerprint.
///
/// Replaces an implicit load-if-exists-else-train model file: training
/// happens at most once per fingerprint, and the registry lock enforces the
/// single-writer policy while concurrent readers share the `Arc`.
#[derive(Default)]
pub struct ModelRegistry {
    models: Mutex<HashMap<String, Arc<TrainedModel>>>,
}

impl ModelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fetch the model for `fingerprint`, training it with `train` when
    /// absent.
    pub fn get_or_train<F>(&self, fingerprint: &str, train: F) -> Result<Arc<TrainedModel>>
    where
        F: FnOnce() -> Result<TrainedModel>,
    {
        let mut models = self
            .models
            .lock()
            .map_err(|_| ForecastError::Model("Model registry lock poisoned".to_string()))?;
        if let Some(model) = models.get(fingerprint) {
            log::debug!("model registry hit for {}", fingerprint);
            return Ok(Arc::clone(model));
        }
        let model = Arc::new(train()?);
        models.insert(fingerprint.to_string(), Arc::clone(&model));
        Ok(model)
    }

    /// Number of cached models.
    pub fn len(&self) -> usize {
        self.models.lock().map(|m| m.len()).unwrap_or(0)
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
