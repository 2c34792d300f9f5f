//! Bagged tree ensembles: random forests and extremely-randomized trees

use crate::error::{Result, StackError};
use crate::learners::tree::{DecisionTree, SplitCriterion, SplitRule};
use ndarray::{Array1, Array2};
use rand::seq::index::sample;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// How many feature columns each tree sees
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub enum FeatureSubset {
    /// Square root of the feature count
    Sqrt,
    /// Fixed fraction of the feature count
    Fraction(f64),
    /// All features
    All,
}

impl FeatureSubset {
    fn resolve(&self, n_features: usize) -> usize {
        let k = match self {
            FeatureSubset::Sqrt => (n_features as f64).sqrt().round() as usize,
            FeatureSubset::Fraction(f) => (n_features as f64 * f).round() as usize,
            FeatureSubset::All => n_features,
        };
        k.clamp(1, n_features)
    }
}

/// Tree-ensemble hyperparameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForestConfig {
    /// Number of trees
    pub n_estimators: usize,
    /// Maximum depth per tree
    pub max_depth: Option<usize>,
    /// Minimum samples in a leaf
    pub min_samples_leaf: usize,
    /// Feature columns sampled per tree
    pub max_features: FeatureSubset,
    /// Sample rows with replacement per tree
    pub bootstrap: bool,
    /// Random seed
    pub seed: u64,
}

impl Default for ForestConfig {
    fn default() -> Self {
        Self {
            n_estimators: 200,
            max_depth: Some(12),
            min_samples_leaf: 2,
            max_features: FeatureSubset::Sqrt,
            bootstrap: true,
            seed: 42,
        }
    }
}

/// Threshold-selection mode distinguishing the two ensemble flavors
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum SplitMode {
    /// Exhaustive best-split search (random forest)
    BestFirst,
    /// Random thresholds (extremely-randomized trees)
    Random,
}

/// Bagged ensemble of classification trees
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TreeEnsemble {
    config: ForestConfig,
    mode: SplitMode,
    trees: Vec<DecisionTree>,
    col_subsets: Vec<Vec<usize>>,
    n_features: usize,
}

impl TreeEnsemble {
    /// Random-forest flavor: best splits, bootstrap rows
    pub fn random_forest(config: ForestConfig) -> Self {
        Self::with_mode(config, SplitMode::BestFirst)
    }

    /// Extra-trees flavor: random thresholds; rows are left unsampled unless
    /// the config enables bootstrapping
    pub fn extra_trees(config: ForestConfig) -> Self {
        Self::with_mode(config, SplitMode::Random)
    }

    fn with_mode(config: ForestConfig, mode: SplitMode) -> Self {
        Self {
            config,
            mode,
            trees: Vec::new(),
            col_subsets: Vec::new(),
            n_features: 0,
        }
    }

    /// Fit all trees. Each tree draws its own seeded RNG so the ensemble is
    /// reproducible under parallel fitting.
    pub fn fit(&mut self, x: &Array2<f64>, y: &Array1<f64>) -> Result<&mut Self> {
        let n_samples = x.nrows();
        let n_features = x.ncols();

        if n_samples != y.len() {
            return Err(StackError::ShapeMismatch {
                expected: format!("y length = {}", n_samples),
                actual: format!("y length = {}", y.len()),
            });
        }
        if n_samples == 0 {
            return Err(StackError::DataError(
                "cannot fit a tree ensemble on zero rows".to_string(),
            ));
        }

        self.n_features = n_features;
        let n_cols = self.config.max_features.resolve(n_features);

        let rule = match self.mode {
            SplitMode::BestFirst => SplitRule::Best,
            SplitMode::Random => SplitRule::RandomThreshold,
        };

        let fitted: Result<Vec<(DecisionTree, Vec<usize>)>> = (0..self.config.n_estimators)
            .into_par_iter()
            .map(|tree_idx| {
                let mut rng =
                    ChaCha8Rng::seed_from_u64(self.config.seed.wrapping_add(tree_idx as u64));

                let mut cols: Vec<usize> = sample(&mut rng, n_features, n_cols).into_vec();
                cols.sort_unstable();

                let rows: Vec<usize> = if self.config.bootstrap {
                    (0..n_samples).map(|_| rng.gen_range(0..n_samples)).collect()
                } else {
                    (0..n_samples).collect()
                };

                let x_sub = Array2::from_shape_fn((rows.len(), cols.len()), |(i, j)| {
                    x[[rows[i], cols[j]]]
                });
                let y_sub = Array1::from_iter(rows.iter().map(|&i| y[i]));

                let mut tree = DecisionTree::new(SplitCriterion::Gini, rule)
                    .with_min_samples_leaf(self.config.min_samples_leaf)
                    .with_min_samples_split((2 * self.config.min_samples_leaf).max(2));
                if let Some(depth) = self.config.max_depth {
                    tree = tree.with_max_depth(depth);
                }
                tree.fit(&x_sub, &y_sub, &mut rng)?;

                Ok((tree, cols))
            })
            .collect();

        let (trees, col_subsets) = fitted?.into_iter().unzip();
        self.trees = trees;
        self.col_subsets = col_subsets;

        Ok(self)
    }

    /// Mean positive-class probability over all trees
    pub fn predict_score(&self, x: &Array2<f64>) -> Result<Array1<f64>> {
        if self.trees.is_empty() {
            return Err(StackError::ModelNotFitted);
        }
        if x.ncols() != self.n_features {
            return Err(StackError::ShapeMismatch {
                expected: format!("{} feature columns", self.n_features),
                actual: format!("{} feature columns", x.ncols()),
            });
        }

        let n = x.nrows();
        let mut sum: Array1<f64> = Array1::zeros(n);

        for (tree, cols) in self.trees.iter().zip(self.col_subsets.iter()) {
            let x_sub =
                Array2::from_shape_fn((n, cols.len()), |(i, j)| x[[i, cols[j]]]);
            sum = sum + tree.predict(&x_sub)?;
        }

        Ok(sum / self.trees.len() as f64)
    }
}
