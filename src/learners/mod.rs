//! Base learner adapter
//!
//! Every learner family is a variant behind the same capability pair:
//! `BaseLearnerSpec::fit` builds a fresh model instance and returns an
//! immutable [`TrainedArtifact`]; `TrainedArtifact::predict_score` returns
//! positive-class probabilities. Nothing downstream branches on the concrete
//! learner identity.

pub mod boosting;
pub mod forest;
pub mod linear;
pub mod tree;

pub use boosting::{BoostingConfig, GradientBoostedTrees};
pub use forest::{FeatureSubset, ForestConfig, SplitMode, TreeEnsemble};
pub use linear::{LogisticConfig, LogisticRegression};

use crate::error::{Result, StackError};
use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};

/// Hyperparameter configuration, one variant per learner family
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum LearnerConfig {
    Logistic(LogisticConfig),
    GradientBoosting(BoostingConfig),
    RandomForest(ForestConfig),
    ExtraTrees(ForestConfig),
}

/// A named base learner with an immutable configuration.
///
/// `fit` instantiates a fresh model every call, so folds of the same
/// learner never share state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BaseLearnerSpec {
    pub name: String,
    pub config: LearnerConfig,
}

impl BaseLearnerSpec {
    /// Create a spec from a name and configuration
    pub fn new(name: impl Into<String>, config: LearnerConfig) -> Self {
        Self {
            name: name.into(),
            config,
        }
    }

    /// Train a fresh model instance on the given rows.
    ///
    /// Fails with a `DataError` when the labels are degenerate (a single
    /// class); a failed fit leaves no partially-built artifact behind.
    pub fn fit(&self, x: &Array2<f64>, y: &Array1<f64>) -> Result<TrainedArtifact> {
        let has_pos = y.iter().any(|&v| v > 0.5);
        let has_neg = y.iter().any(|&v| v <= 0.5);
        if !(has_pos && has_neg) {
            return Err(StackError::DataError(
                "training labels contain a single class".to_string(),
            ));
        }

        match &self.config {
            LearnerConfig::Logistic(config) => {
                let mut model = LogisticRegression::new(config.clone());
                model.fit(x, y)?;
                Ok(TrainedArtifact::Logistic(model))
            }
            LearnerConfig::GradientBoosting(config) => {
                let mut model = GradientBoostedTrees::new(config.clone());
                model.fit(x, y)?;
                Ok(TrainedArtifact::GradientBoosting(model))
            }
            LearnerConfig::RandomForest(config) => {
                let mut model = TreeEnsemble::random_forest(config.clone());
                model.fit(x, y)?;
                Ok(TrainedArtifact::Forest(model))
            }
            LearnerConfig::ExtraTrees(config) => {
                let mut model = TreeEnsemble::extra_trees(config.clone());
                model.fit(x, y)?;
                Ok(TrainedArtifact::Forest(model))
            }
        }
    }
}

/// A fitted model, immutable once trained
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum TrainedArtifact {
    Logistic(LogisticRegression),
    GradientBoosting(GradientBoostedTrees),
    Forest(TreeEnsemble),
}

impl TrainedArtifact {
    /// Positive-class probabilities, all values in [0, 1]
    pub fn predict_score(&self, x: &Array2<f64>) -> Result<Array1<f64>> {
        match self {
            TrainedArtifact::Logistic(m) => m.predict_proba(x),
            TrainedArtifact::GradientBoosting(m) => m.predict_score(x),
            TrainedArtifact::Forest(m) => m.predict_score(x),
        }
    }

    /// Serialize to an opaque blob
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    /// Deserialize from an opaque blob
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Ok(bincode::deserialize(bytes)?)
    }
}
