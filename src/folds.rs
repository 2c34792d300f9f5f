//! Fold partitioning for cross-validated OOF generation

use crate::error::{Result, StackError};
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

/// Options controlling how training rows are split into folds
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FoldOptions {
    /// Number of folds
    pub n_folds: usize,
    /// Whether to shuffle row order before partitioning
    pub shuffle: bool,
    /// Seed for the shuffle permutation
    pub seed: u64,
}

impl Default for FoldOptions {
    fn default() -> Self {
        Self {
            n_folds: 5,
            shuffle: true,
            seed: 42,
        }
    }
}

/// Assignment of every training-row index to exactly one fold.
///
/// Folds partition the full index set; sizes differ by at most one row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FoldAssignment {
    fold_of: Vec<usize>,
    n_folds: usize,
}

impl FoldAssignment {
    /// Partition `n_rows` row indices into `options.n_folds` folds.
    ///
    /// With shuffling enabled, indices are permuted with a seeded RNG first,
    /// so membership is reproducible for a fixed seed but uncorrelated with
    /// the original row order.
    pub fn partition(n_rows: usize, options: &FoldOptions) -> Result<Self> {
        let k = options.n_folds;
        if k < 2 {
            return Err(StackError::ConfigError(format!(
                "n_folds must be at least 2, got {}",
                k
            )));
        }
        if k > n_rows {
            return Err(StackError::ConfigError(format!(
                "n_folds ({}) must not exceed the number of rows ({})",
                k, n_rows
            )));
        }

        let mut indices: Vec<usize> = (0..n_rows).collect();
        if options.shuffle {
            let mut rng = ChaCha8Rng::seed_from_u64(options.seed);
            indices.shuffle(&mut rng);
        }

        // First (n_rows % k) folds get one extra row
        let base = n_rows / k;
        let remainder = n_rows % k;

        let mut fold_of = vec![0usize; n_rows];
        let mut cursor = 0;
        for fold in 0..k {
            let size = if fold < remainder { base + 1 } else { base };
            for &row in &indices[cursor..cursor + size] {
                fold_of[row] = fold;
            }
            cursor += size;
        }

        Ok(Self { fold_of, n_folds: k })
    }

    /// Number of folds
    pub fn n_folds(&self) -> usize {
        self.n_folds
    }

    /// Number of rows assigned
    pub fn n_rows(&self) -> usize {
        self.fold_of.len()
    }

    /// Fold number of a given row
    pub fn fold_of(&self, row: usize) -> usize {
        self.fold_of[row]
    }

    /// Row indices validated by fold `fold`
    pub fn validation_indices(&self, fold: usize) -> Vec<usize> {
        self.fold_of
            .iter()
            .enumerate()
            .filter(|(_, &f)| f == fold)
            .map(|(i, _)| i)
            .collect()
    }

    /// Row indices trained on by fold `fold` (the complement of its
    /// validation set)
    pub fn training_indices(&self, fold: usize) -> Vec<usize> {
        self.fold_of
            .iter()
            .enumerate()
            .filter(|(_, &f)| f != fold)
            .map(|(i, _)| i)
            .collect()
    }

    /// Validation-set size per fold
    pub fn fold_sizes(&self) -> Vec<usize> {
        let mut sizes = vec![0usize; self.n_folds];
        for &f in &self.fold_of {
            sizes[f] += 1;
        }
        sizes
    }
}
