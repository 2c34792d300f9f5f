//! End-to-end stacking orchestration
//!
//! Stratified holdout, one shared fold assignment, per-learner OOF passes,
//! meta-feature assembly, meta training, and a final blended prediction
//! over the holdout, with optional artifact persistence.

use crate::artifacts::ArtifactStore;
use crate::data::{EntityId, EntityTable};
use crate::error::{Result, StackError};
use crate::folds::{FoldAssignment, FoldOptions};
use crate::learners::BaseLearnerSpec;
use crate::stacking::assembler::MetaFeatureMatrix;
use crate::stacking::meta::{MetaModel, MetaTrainer, MetaTrainerConfig, MetaTrainingReport};
use crate::stacking::oof::{generate_oof, OofPredictionSet};
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// What a single base learner's failure does to the run
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum FailurePolicy {
    /// Abort the whole run
    Abort,
    /// Skip the learner with a warning; siblings continue
    Skip,
}

/// Full configuration of a stacking run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StackingConfig {
    /// Name of the binary label column
    pub label_column: String,
    /// Fold count for OOF generation
    pub n_folds: usize,
    /// Seed shared by the holdout split and the fold shuffle
    pub seed: u64,
    /// Shuffle rows before fold partitioning
    pub shuffle: bool,
    /// Fraction of rows held out for the final evaluation split
    pub holdout_fraction: f64,
    /// Stratify the holdout split by label
    pub stratify_holdout: bool,
    /// Base learners, in stacking column order
    pub learners: Vec<BaseLearnerSpec>,
    /// Failure policy for individual learners
    pub on_learner_failure: FailurePolicy,
    /// Folds for the meta-model CV diagnostic; `None` disables it
    pub meta_cv_folds: Option<usize>,
    /// Fit folds in parallel worker tasks
    pub parallel_folds: bool,
    /// When set, persist artifacts and tabular outputs here
    pub output_dir: Option<PathBuf>,
}

impl StackingConfig {
    /// Defaults: 5 folds, seed 42, 20% stratified holdout.
    pub fn new(label_column: impl Into<String>) -> Self {
        Self {
            label_column: label_column.into(),
            n_folds: 5,
            seed: 42,
            shuffle: true,
            holdout_fraction: 0.20,
            stratify_holdout: true,
            learners: Vec::new(),
            on_learner_failure: FailurePolicy::Abort,
            meta_cv_folds: Some(5),
            parallel_folds: false,
            output_dir: None,
        }
    }

    /// Add a base learner
    pub fn with_learner(mut self, spec: BaseLearnerSpec) -> Self {
        self.learners.push(spec);
        self
    }

    /// Set the fold count
    pub fn with_n_folds(mut self, n_folds: usize) -> Self {
        self.n_folds = n_folds;
        self
    }

    /// Set the shared seed
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Set the holdout fraction
    pub fn with_holdout_fraction(mut self, fraction: f64) -> Self {
        self.holdout_fraction = fraction;
        self
    }

    /// Set the failure policy
    pub fn with_failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.on_learner_failure = policy;
        self
    }

    /// Enable parallel fold fitting
    pub fn with_parallel_folds(mut self, parallel: bool) -> Self {
        self.parallel_folds = parallel;
        self
    }

    /// Set the meta CV diagnostic fold count
    pub fn with_meta_cv_folds(mut self, folds: Option<usize>) -> Self {
        self.meta_cv_folds = folds;
        self
    }

    /// Persist artifacts to a directory
    pub fn with_output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_dir = Some(dir.into());
        self
    }
}

/// Everything a completed run produced
#[derive(Debug)]
pub struct StackingOutcome {
    /// Per-learner OOF sets, in learner order
    pub oof_sets: Vec<OofPredictionSet>,
    /// Stacked training matrix
    pub train_matrix: MetaFeatureMatrix,
    /// Stacked holdout matrix
    pub test_matrix: MetaFeatureMatrix,
    /// Fitted meta-model
    pub meta_model: MetaModel,
    /// Meta-training accounting
    pub meta_report: MetaTrainingReport,
    /// Final blended probabilities over the holdout, keyed by entity
    pub predictions: Vec<(EntityId, f64)>,
}

impl StackingOutcome {
    /// Blended predictions as a DataFrame (identifier + probability)
    pub fn predictions_frame(&self, id_column: &str) -> Result<DataFrame> {
        let all_int = self
            .predictions
            .iter()
            .all(|(id, _)| matches!(id, EntityId::Int(_)));

        let id_series: Series = if all_int {
            let ints: Vec<i64> = self
                .predictions
                .iter()
                .map(|(id, _)| match id {
                    EntityId::Int(v) => *v,
                    EntityId::Str(_) => unreachable!(),
                })
                .collect();
            Series::new(id_column.into(), ints)
        } else {
            let strs: Vec<String> = self.predictions.iter().map(|(id, _)| id.to_string()).collect();
            Series::new(id_column.into(), strs)
        };

        let scores: Vec<f64> = self.predictions.iter().map(|(_, s)| *s).collect();
        Ok(DataFrame::new(vec![
            id_series.into(),
            Series::new("probability".into(), scores).into(),
        ])?)
    }
}

/// Orchestrates a full stacking run
pub struct StackingPipeline {
    config: StackingConfig,
}

impl StackingPipeline {
    /// Create a pipeline
    pub fn new(config: StackingConfig) -> Self {
        Self { config }
    }

    /// The pipeline's configuration
    pub fn config(&self) -> &StackingConfig {
        &self.config
    }

    fn validate(&self) -> Result<()> {
        if self.config.learners.is_empty() {
            return Err(StackError::ConfigError(
                "learner list is empty".to_string(),
            ));
        }
        let mut names = HashSet::new();
        for spec in &self.config.learners {
            if !names.insert(spec.name.as_str()) {
                return Err(StackError::ConfigError(format!(
                    "duplicate learner name '{}'",
                    spec.name
                )));
            }
        }
        if self.config.n_folds < 2 {
            return Err(StackError::ConfigError(format!(
                "n_folds must be at least 2, got {}",
                self.config.n_folds
            )));
        }
        Ok(())
    }

    /// Run the full protocol on one training table.
    pub fn run(&self, table: &EntityTable) -> Result<StackingOutcome> {
        self.validate()?;
        let label = &self.config.label_column;

        info!(
            "starting stacking run: {} rows, {} learners, {} folds",
            table.n_rows(),
            self.config.learners.len(),
            self.config.n_folds
        );

        // The holdout stays unseen by every fold model and the meta-model
        let (train, holdout) = table.holdout_split(
            label,
            self.config.holdout_fraction,
            self.config.stratify_holdout,
            self.config.seed,
        )?;

        let feature_cols = train.feature_columns(Some(label));
        if feature_cols.is_empty() {
            return Err(StackError::ConfigError(
                "table has no feature columns".to_string(),
            ));
        }
        let x_train = train.features(&feature_cols)?;
        let y_train = train.labels(label)?;
        let x_test = holdout.features(&feature_cols)?;

        // One fold assignment shared by every learner in the run
        let fold_options = FoldOptions {
            n_folds: self.config.n_folds,
            shuffle: self.config.shuffle,
            seed: self.config.seed,
        };
        let assignment = FoldAssignment::partition(x_train.nrows(), &fold_options)?;

        let mut oof_sets: Vec<OofPredictionSet> = Vec::with_capacity(self.config.learners.len());
        for spec in &self.config.learners {
            match generate_oof(
                spec,
                &x_train,
                &y_train,
                &x_test,
                &assignment,
                self.config.parallel_folds,
            ) {
                Ok(set) => oof_sets.push(set),
                Err(e) => match self.config.on_learner_failure {
                    FailurePolicy::Abort => return Err(e),
                    FailurePolicy::Skip => {
                        warn!("skipping base learner '{}': {}", spec.name, e)
                    }
                },
            }
        }

        if oof_sets.is_empty() {
            return Err(StackError::DataError(
                "all base learners failed; nothing to stack".to_string(),
            ));
        }

        let train_matrix = MetaFeatureMatrix::from_oof_train(train.ids()?, &oof_sets)?;
        let test_matrix = MetaFeatureMatrix::from_oof_test(holdout.ids()?, &oof_sets)?;

        let trainer = MetaTrainer::new(MetaTrainerConfig {
            cv_folds: self.config.meta_cv_folds,
            seed: self.config.seed,
            ..MetaTrainerConfig::default()
        });
        let (meta_model, meta_report) = trainer.fit(&train_matrix, &y_train)?;

        let scores = meta_model.predict_score(&test_matrix)?;
        let predictions: Vec<(EntityId, f64)> = test_matrix
            .ids()
            .iter()
            .cloned()
            .zip(scores.iter().copied())
            .collect();

        let outcome = StackingOutcome {
            oof_sets,
            train_matrix,
            test_matrix,
            meta_model,
            meta_report,
            predictions,
        };

        if let Some(dir) = &self.config.output_dir {
            self.persist(dir, table.id_column(), &outcome)?;
        }

        info!(
            "stacking run complete: {} learners stacked, {} holdout predictions",
            outcome.oof_sets.len(),
            outcome.predictions.len()
        );

        Ok(outcome)
    }

    fn persist(&self, dir: &Path, id_column: &str, outcome: &StackingOutcome) -> Result<()> {
        let store = ArtifactStore::open(dir)?;

        for set in &outcome.oof_sets {
            for (fold, artifact) in set.fold_models.iter().enumerate() {
                store.save_model(&format!("{}_fold_{}", set.learner, fold), artifact)?;
            }
        }
        store.save_blob("meta_model", &outcome.meta_model)?;

        let mut train_df = outcome.train_matrix.to_dataframe(id_column)?;
        store.save_table("meta_features_train", &mut train_df)?;
        let mut test_df = outcome.test_matrix.to_dataframe(id_column)?;
        store.save_table("meta_features_test", &mut test_df)?;
        let mut predictions_df = outcome.predictions_frame(id_column)?;
        store.save_table("stacking_predictions", &mut predictions_df)?;

        info!("persisted stacking artifacts to {}", dir.display());
        Ok(())
    }
}
