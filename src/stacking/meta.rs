//! Second-stage (meta) model training
//!
//! Fits a logistic model on the assembled meta-feature matrix. Rows with a
//! missing base-learner score or label are excluded, counted, and logged,
//! never raised as an error. An optional cross-validated AUC diagnostic
//! runs before the final fit and never gates it.

use crate::error::{Result, StackError};
use crate::folds::{FoldAssignment, FoldOptions};
use crate::learners::{LogisticConfig, LogisticRegression};
use crate::metrics::{roc_auc, FoldScores};
use crate::stacking::assembler::MetaFeatureMatrix;
use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// Meta-training options
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetaTrainerConfig {
    /// Folds for the pre-fit CV diagnostic; `None` disables it
    pub cv_folds: Option<usize>,
    /// Seed for the diagnostic's fold shuffle
    pub seed: u64,
    /// Meta-model hyperparameters
    pub logistic: LogisticConfig,
}

impl Default for MetaTrainerConfig {
    fn default() -> Self {
        Self {
            cv_folds: Some(5),
            seed: 42,
            logistic: LogisticConfig::default(),
        }
    }
}

/// Accounting for one meta-training call
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetaTrainingReport {
    /// Mean CV AUC diagnostic, when it could be computed
    pub cv_auc: Option<f64>,
    /// Rows used for the final fit
    pub rows_used: usize,
    /// Rows excluded for missing scores or labels
    pub rows_dropped: usize,
}

/// Fitted meta-model bound to the column layout it was trained on
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetaModel {
    model: LogisticRegression,
    columns: Vec<String>,
}

impl MetaModel {
    /// Column names the model expects, in order
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Score a matrix with the same column layout. Rows with NaN cells
    /// produce NaN scores.
    pub fn predict_score(&self, matrix: &MetaFeatureMatrix) -> Result<Array1<f64>> {
        if matrix.columns() != self.columns.as_slice() {
            return Err(StackError::ShapeMismatch {
                expected: format!("columns {:?}", self.columns),
                actual: format!("columns {:?}", matrix.columns()),
            });
        }
        self.model.predict_proba(matrix.values())
    }
}

/// Second-stage trainer
#[derive(Debug, Clone, Default)]
pub struct MetaTrainer {
    config: MetaTrainerConfig,
}

impl MetaTrainer {
    /// Create a trainer
    pub fn new(config: MetaTrainerConfig) -> Self {
        Self { config }
    }

    /// Fit the meta-model on position-aligned labels.
    ///
    /// Labels may contain NaN for entities without ground truth; those rows
    /// are dropped along with rows missing any base-learner score.
    pub fn fit(
        &self,
        matrix: &MetaFeatureMatrix,
        labels: &Array1<f64>,
    ) -> Result<(MetaModel, MetaTrainingReport)> {
        let n = matrix.n_rows();
        if labels.len() != n {
            return Err(StackError::ShapeMismatch {
                expected: format!("{} labels", n),
                actual: format!("{} labels", labels.len()),
            });
        }

        let kept: Vec<usize> = (0..n)
            .filter(|&i| {
                labels[i].is_finite() && matrix.values().row(i).iter().all(|v| v.is_finite())
            })
            .collect();
        let rows_dropped = n - kept.len();

        if rows_dropped > 0 {
            warn!(
                "excluding {} of {} rows with missing base-learner scores or labels from meta-training",
                rows_dropped, n
            );
        }
        if kept.is_empty() {
            return Err(StackError::DataError(
                "no complete rows left for meta-training".to_string(),
            ));
        }

        let x = Array2::from_shape_fn((kept.len(), matrix.n_cols()), |(i, j)| {
            matrix.values()[[kept[i], j]]
        });
        let y = Array1::from_iter(kept.iter().map(|&i| labels[i]));

        let cv_auc = match self.config.cv_folds {
            Some(k) => match self.cv_diagnostic(&x, &y, k) {
                Ok(scores) => {
                    info!(
                        "meta-model CV AUC: {:.5} (+/- {:.5}) over {} folds",
                        scores.mean, scores.std, k
                    );
                    Some(scores.mean)
                }
                Err(e) => {
                    warn!("meta-model CV diagnostic skipped: {}", e);
                    None
                }
            },
            None => None,
        };

        let mut model = LogisticRegression::new(self.config.logistic.clone());
        model.fit(&x, &y)?;

        let report = MetaTrainingReport {
            cv_auc,
            rows_used: kept.len(),
            rows_dropped,
        };

        Ok((
            MetaModel {
                model,
                columns: matrix.columns().to_vec(),
            },
            report,
        ))
    }

    fn cv_diagnostic(&self, x: &Array2<f64>, y: &Array1<f64>, k: usize) -> Result<FoldScores> {
        let options = FoldOptions {
            n_folds: k,
            shuffle: true,
            seed: self.config.seed,
        };
        let assignment = FoldAssignment::partition(x.nrows(), &options)?;

        let mut scores = Vec::with_capacity(k);
        for fold in 0..k {
            let train_rows = assignment.training_indices(fold);
            let valid_rows = assignment.validation_indices(fold);

            let x_tr = Array2::from_shape_fn((train_rows.len(), x.ncols()), |(i, j)| {
                x[[train_rows[i], j]]
            });
            let y_tr = Array1::from_iter(train_rows.iter().map(|&i| y[i]));
            let x_val = Array2::from_shape_fn((valid_rows.len(), x.ncols()), |(i, j)| {
                x[[valid_rows[i], j]]
            });
            let y_val = Array1::from_iter(valid_rows.iter().map(|&i| y[i]));

            let mut model = LogisticRegression::new(self.config.logistic.clone());
            model.fit(&x_tr, &y_tr)?;
            let fold_scores = model.predict_proba(&x_val)?;
            scores.push(roc_auc(&y_val, &fold_scores)?);
        }

        Ok(FoldScores::from_scores(scores))
    }
}
