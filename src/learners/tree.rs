//! Decision tree used by the forest and boosting learners
//!
//! Specialized to this crate's needs: Gini splits with probability leaves
//! for classification, variance splits with mean leaves for the booster's
//! residual fits. Supports exhaustive best-split search and the
//! random-threshold rule used by extremely-randomized ensembles.

use crate::error::{Result, StackError};
use ndarray::{Array1, Array2, ArrayView1};
use rand::Rng;
use serde::{Deserialize, Serialize};

/// Decision tree node
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum TreeNode {
    /// Leaf holding the mean target of its training rows
    Leaf { value: f64, n_samples: usize },
    /// Internal split on `feature_idx <= threshold`
    Split {
        feature_idx: usize,
        threshold: f64,
        left: Box<TreeNode>,
        right: Box<TreeNode>,
    },
}

/// Impurity criterion
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum SplitCriterion {
    /// Gini impurity over binary labels
    Gini,
    /// Variance reduction over continuous targets
    Variance,
}

/// How candidate thresholds are chosen
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum SplitRule {
    /// Scan all midpoints between distinct sorted values
    Best,
    /// One uniformly random threshold per feature
    RandomThreshold,
}

/// Decision tree model
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionTree {
    root: Option<TreeNode>,
    pub max_depth: Option<usize>,
    pub min_samples_split: usize,
    pub min_samples_leaf: usize,
    pub criterion: SplitCriterion,
    pub rule: SplitRule,
}

/// Running statistics for one side of a candidate split
#[derive(Debug, Clone, Copy, Default)]
struct SideStats {
    n: usize,
    sum: f64,
    sq_sum: f64,
}

impl SideStats {
    fn push(&mut self, y: f64) {
        self.n += 1;
        self.sum += y;
        self.sq_sum += y * y;
    }
}

impl DecisionTree {
    /// Create an unfitted tree
    pub fn new(criterion: SplitCriterion, rule: SplitRule) -> Self {
        Self {
            root: None,
            max_depth: None,
            min_samples_split: 2,
            min_samples_leaf: 1,
            criterion,
            rule,
        }
    }

    /// Set maximum depth
    pub fn with_max_depth(mut self, depth: usize) -> Self {
        self.max_depth = Some(depth);
        self
    }

    /// Set minimum samples in a leaf
    pub fn with_min_samples_leaf(mut self, min_samples: usize) -> Self {
        self.min_samples_leaf = min_samples;
        self
    }

    /// Set minimum samples required to attempt a split
    pub fn with_min_samples_split(mut self, min_samples: usize) -> Self {
        self.min_samples_split = min_samples;
        self
    }

    /// Fit the tree. The RNG is only consulted by the random-threshold rule.
    pub fn fit<R: Rng>(
        &mut self,
        x: &Array2<f64>,
        y: &Array1<f64>,
        rng: &mut R,
    ) -> Result<&mut Self> {
        if x.nrows() != y.len() {
            return Err(StackError::ShapeMismatch {
                expected: format!("y length = {}", x.nrows()),
                actual: format!("y length = {}", y.len()),
            });
        }
        if x.nrows() == 0 {
            return Err(StackError::DataError(
                "cannot fit a tree on zero rows".to_string(),
            ));
        }

        let indices: Vec<usize> = (0..x.nrows()).collect();
        self.root = Some(self.build(x, y, &indices, 0, rng));
        Ok(self)
    }

    fn build<R: Rng>(
        &self,
        x: &Array2<f64>,
        y: &Array1<f64>,
        indices: &[usize],
        depth: usize,
        rng: &mut R,
    ) -> TreeNode {
        let n = indices.len();
        let mean = indices.iter().map(|&i| y[i]).sum::<f64>() / n as f64;

        let at_max_depth = self.max_depth.map_or(false, |d| depth >= d);
        if n < self.min_samples_split || at_max_depth || self.is_pure(y, indices) {
            return TreeNode::Leaf {
                value: mean,
                n_samples: n,
            };
        }

        let split = match self.rule {
            SplitRule::Best => self.find_best_split(x, y, indices),
            SplitRule::RandomThreshold => self.find_random_split(x, y, indices, rng),
        };

        match split {
            Some((feature_idx, threshold)) => {
                let (left_idx, right_idx): (Vec<usize>, Vec<usize>) = indices
                    .iter()
                    .partition(|&&i| x[[i, feature_idx]] <= threshold);

                if left_idx.len() < self.min_samples_leaf.max(1)
                    || right_idx.len() < self.min_samples_leaf.max(1)
                {
                    return TreeNode::Leaf {
                        value: mean,
                        n_samples: n,
                    };
                }

                let left = Box::new(self.build(x, y, &left_idx, depth + 1, rng));
                let right = Box::new(self.build(x, y, &right_idx, depth + 1, rng));

                TreeNode::Split {
                    feature_idx,
                    threshold,
                    left,
                    right,
                }
            }
            None => TreeNode::Leaf {
                value: mean,
                n_samples: n,
            },
        }
    }

    fn is_pure(&self, y: &Array1<f64>, indices: &[usize]) -> bool {
        let first = y[indices[0]];
        indices.iter().all(|&i| (y[i] - first).abs() < 1e-12)
    }

    fn impurity(&self, stats: &SideStats) -> f64 {
        let n = stats.n as f64;
        match self.criterion {
            SplitCriterion::Gini => {
                let p = stats.sum / n;
                2.0 * p * (1.0 - p)
            }
            SplitCriterion::Variance => (stats.sq_sum / n - (stats.sum / n).powi(2)).max(0.0),
        }
    }

    /// Scan every feature's sorted midpoints via a single prefix pass
    fn find_best_split(
        &self,
        x: &Array2<f64>,
        y: &Array1<f64>,
        indices: &[usize],
    ) -> Option<(usize, f64)> {
        let n = indices.len();
        let mut parent = SideStats::default();
        for &i in indices {
            parent.push(y[i]);
        }
        let parent_impurity = self.impurity(&parent);

        let mut best: Option<(usize, f64, f64)> = None;

        for feature_idx in 0..x.ncols() {
            let mut values: Vec<(f64, f64)> = indices
                .iter()
                .map(|&i| (x[[i, feature_idx]], y[i]))
                .collect();
            values.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal));

            let mut left = SideStats::default();
            for pos in 1..n {
                left.push(values[pos - 1].1);

                if values[pos].0 <= values[pos - 1].0 {
                    continue;
                }
                if left.n < self.min_samples_leaf || n - left.n < self.min_samples_leaf {
                    continue;
                }

                let right = SideStats {
                    n: parent.n - left.n,
                    sum: parent.sum - left.sum,
                    sq_sum: parent.sq_sum - left.sq_sum,
                };

                let weighted = (left.n as f64 * self.impurity(&left)
                    + right.n as f64 * self.impurity(&right))
                    / n as f64;
                let gain = parent_impurity - weighted;

                if gain > 1e-12 && best.map_or(true, |(_, _, g)| gain > g) {
                    let threshold = (values[pos - 1].0 + values[pos].0) / 2.0;
                    best = Some((feature_idx, threshold, gain));
                }
            }
        }

        best.map(|(f, t, _)| (f, t))
    }

    /// One random threshold per feature, keep the highest-gain feature
    fn find_random_split<R: Rng>(
        &self,
        x: &Array2<f64>,
        y: &Array1<f64>,
        indices: &[usize],
        rng: &mut R,
    ) -> Option<(usize, f64)> {
        let n = indices.len();
        let mut parent = SideStats::default();
        for &i in indices {
            parent.push(y[i]);
        }
        let parent_impurity = self.impurity(&parent);

        let mut best: Option<(usize, f64, f64)> = None;

        for feature_idx in 0..x.ncols() {
            let mut lo = f64::INFINITY;
            let mut hi = f64::NEG_INFINITY;
            for &i in indices {
                let v = x[[i, feature_idx]];
                lo = lo.min(v);
                hi = hi.max(v);
            }
            if hi - lo < 1e-12 {
                continue;
            }

            let threshold = rng.gen_range(lo..hi);

            let mut left = SideStats::default();
            let mut right = SideStats::default();
            for &i in indices {
                if x[[i, feature_idx]] <= threshold {
                    left.push(y[i]);
                } else {
                    right.push(y[i]);
                }
            }

            if left.n < self.min_samples_leaf || right.n < self.min_samples_leaf {
                continue;
            }

            let weighted = (left.n as f64 * self.impurity(&left)
                + right.n as f64 * self.impurity(&right))
                / n as f64;
            let gain = parent_impurity - weighted;

            if gain > 1e-12 && best.map_or(true, |(_, _, g)| gain > g) {
                best = Some((feature_idx, threshold, gain));
            }
        }

        best.map(|(f, t, _)| (f, t))
    }

    /// Predict a single row
    pub fn predict_row(&self, row: ArrayView1<f64>) -> Result<f64> {
        let mut node = self.root.as_ref().ok_or(StackError::ModelNotFitted)?;
        loop {
            match node {
                TreeNode::Leaf { value, .. } => return Ok(*value),
                TreeNode::Split {
                    feature_idx,
                    threshold,
                    left,
                    right,
                } => {
                    node = if row[*feature_idx] <= *threshold {
                        left
                    } else {
                        right
                    };
                }
            }
        }
    }

    /// Predict every row of a matrix
    pub fn predict(&self, x: &Array2<f64>) -> Result<Array1<f64>> {
        let mut out = Array1::zeros(x.nrows());
        for (i, row) in x.rows().into_iter().enumerate() {
            out[i] = self.predict_row(row)?;
        }
        Ok(out)
    }
}
