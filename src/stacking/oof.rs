//! Out-of-fold prediction generation
//!
//! For one base learner: K fresh fold models, each scoring only the rows it
//! never trained on, plus a fold-averaged score over the held-out test set.
//! Every training row's OOF value is written exactly once, by exactly one
//! fold's model.

use crate::error::{Result, StackError};
use crate::folds::FoldAssignment;
use crate::learners::{BaseLearnerSpec, TrainedArtifact};
use crate::metrics::roc_auc;
use ndarray::{Array1, Array2};
use rayon::prelude::*;
use tracing::{debug, info};

/// The OOF output of one base learner over one full pass.
///
/// Created once per learner per pass and never mutated afterward.
#[derive(Debug)]
pub struct OofPredictionSet {
    /// Learner name
    pub learner: String,
    /// OOF scores, position-aligned to the training rows
    pub train_scores: Array1<f64>,
    /// Fold-averaged scores over the test rows
    pub test_scores: Array1<f64>,
    /// One fitted artifact per fold, in fold order
    pub fold_models: Vec<TrainedArtifact>,
    /// AUC of the OOF scores against the training labels
    pub train_auc: f64,
}

struct FoldOutput {
    valid_rows: Vec<usize>,
    valid_scores: Array1<f64>,
    test_scores: Array1<f64>,
    artifact: TrainedArtifact,
}

fn select_rows(x: &Array2<f64>, rows: &[usize]) -> Array2<f64> {
    Array2::from_shape_fn((rows.len(), x.ncols()), |(i, j)| x[[rows[i], j]])
}

/// Run one full OOF pass for `spec`.
///
/// The fold assignment must be shared across all learners of a run so their
/// OOF columns are directly comparable. When `parallel_folds` is set, folds
/// fit concurrently; each fold's writes target disjoint row indices, and the
/// merge below accumulates in fold order either way, so results are
/// identical to the sequential path.
pub fn generate_oof(
    spec: &BaseLearnerSpec,
    x_train: &Array2<f64>,
    y_train: &Array1<f64>,
    x_test: &Array2<f64>,
    assignment: &FoldAssignment,
    parallel_folds: bool,
) -> Result<OofPredictionSet> {
    let n_train = x_train.nrows();
    let n_test = x_test.nrows();
    let k = assignment.n_folds();

    if assignment.n_rows() != n_train {
        return Err(StackError::ShapeMismatch {
            expected: format!("fold assignment over {} rows", n_train),
            actual: format!("fold assignment over {} rows", assignment.n_rows()),
        });
    }
    if y_train.len() != n_train {
        return Err(StackError::ShapeMismatch {
            expected: format!("y length = {}", n_train),
            actual: format!("y length = {}", y_train.len()),
        });
    }
    if x_test.ncols() != x_train.ncols() {
        return Err(StackError::ShapeMismatch {
            expected: format!("{} test feature columns", x_train.ncols()),
            actual: format!("{} test feature columns", x_test.ncols()),
        });
    }

    let fit_fold = |fold: usize| -> Result<FoldOutput> {
        let wrap = |reason: String| StackError::TrainingError {
            learner: spec.name.clone(),
            fold,
            reason,
        };

        let train_rows = assignment.training_indices(fold);
        let valid_rows = assignment.validation_indices(fold);

        let x_tr = select_rows(x_train, &train_rows);
        let y_tr = Array1::from_iter(train_rows.iter().map(|&i| y_train[i]));

        let artifact = spec.fit(&x_tr, &y_tr).map_err(|e| wrap(e.to_string()))?;

        let x_val = select_rows(x_train, &valid_rows);
        let valid_scores = artifact
            .predict_score(&x_val)
            .map_err(|e| wrap(e.to_string()))?;
        let test_scores = artifact
            .predict_score(x_test)
            .map_err(|e| wrap(e.to_string()))?;

        debug!(
            "fitted fold {}/{} of learner '{}' ({} train rows, {} validation rows)",
            fold + 1,
            k,
            spec.name,
            train_rows.len(),
            valid_rows.len()
        );

        Ok(FoldOutput {
            valid_rows,
            valid_scores,
            test_scores,
            artifact,
        })
    };

    // Fold models are mutually independent; an indexed parallel collect
    // preserves fold order, so the merge below is deterministic.
    let outputs: Vec<FoldOutput> = if parallel_folds {
        (0..k).into_par_iter().map(fit_fold).collect::<Result<_>>()?
    } else {
        (0..k).map(fit_fold).collect::<Result<_>>()?
    };

    // OOF slots start as NaN; full coverage is verified after the merge
    let mut train_scores = Array1::from_elem(n_train, f64::NAN);
    let mut test_sum: Array1<f64> = Array1::zeros(n_test);
    let mut fold_models = Vec::with_capacity(k);

    for output in outputs {
        for (pos, &row) in output.valid_rows.iter().enumerate() {
            train_scores[row] = output.valid_scores[pos];
        }
        test_sum = test_sum + &output.test_scores;
        fold_models.push(output.artifact);
    }

    if train_scores.iter().any(|v| v.is_nan()) {
        return Err(StackError::DataError(format!(
            "OOF vector for learner '{}' was not fully covered by the fold assignment",
            spec.name
        )));
    }

    let test_scores = test_sum / k as f64;
    let train_auc = roc_auc(y_train, &train_scores)?;

    info!("learner '{}' OOF AUC: {:.5}", spec.name, train_auc);

    Ok(OofPredictionSet {
        learner: spec.name.clone(),
        train_scores,
        test_scores,
        fold_models,
        train_auc,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::folds::FoldOptions;
    use crate::learners::{LearnerConfig, LogisticConfig};
    use ndarray::Array2;
    use rand::{Rng, SeedableRng};
    use rand_chacha::ChaCha8Rng;

    fn synthetic(n: usize, seed: u64) -> (Array2<f64>, Array1<f64>) {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let x = Array2::from_shape_fn((n, 3), |_| rng.gen_range(-1.0..1.0));
        let y = Array1::from_iter((0..n).map(|i| {
            let signal = x[[i, 0]] + 0.5 * x[[i, 1]];
            if signal + rng.gen_range(-0.3..0.3) > 0.0 {
                1.0
            } else {
                0.0
            }
        }));
        (x, y)
    }

    fn logit_spec() -> BaseLearnerSpec {
        BaseLearnerSpec::new("logit", LearnerConfig::Logistic(LogisticConfig::default()))
    }

    #[test]
    fn test_oof_vector_is_fully_written() {
        let (x, y) = synthetic(60, 1);
        let (x_test, _) = synthetic(20, 2);
        let assignment = FoldAssignment::partition(60, &FoldOptions::default()).unwrap();

        let set = generate_oof(&logit_spec(), &x, &y, &x_test, &assignment, false).unwrap();

        assert_eq!(set.train_scores.len(), 60);
        assert_eq!(set.test_scores.len(), 20);
        assert!(set.train_scores.iter().all(|v| v.is_finite()));
        assert!((0.0..=1.0).contains(&set.train_auc));
        assert_eq!(set.fold_models.len(), 5);
    }

    #[test]
    fn test_test_scores_are_fold_mean() {
        let (x, y) = synthetic(50, 3);
        let (x_test, _) = synthetic(15, 4);
        let assignment = FoldAssignment::partition(50, &FoldOptions::default()).unwrap();

        let set = generate_oof(&logit_spec(), &x, &y, &x_test, &assignment, false).unwrap();

        // Recompute the mean from the persisted fold models
        let mut expected: Array1<f64> = Array1::zeros(15);
        for artifact in &set.fold_models {
            expected = expected + &artifact.predict_score(&x_test).unwrap();
        }
        expected /= set.fold_models.len() as f64;

        for (a, b) in set.test_scores.iter().zip(expected.iter()) {
            assert!((a - b).abs() < 1e-12);
        }
    }

    #[test]
    fn test_parallel_folds_match_sequential() {
        let (x, y) = synthetic(40, 5);
        let (x_test, _) = synthetic(10, 6);
        let assignment = FoldAssignment::partition(40, &FoldOptions::default()).unwrap();

        let sequential =
            generate_oof(&logit_spec(), &x, &y, &x_test, &assignment, false).unwrap();
        let parallel = generate_oof(&logit_spec(), &x, &y, &x_test, &assignment, true).unwrap();

        assert_eq!(sequential.train_scores, parallel.train_scores);
        assert_eq!(sequential.test_scores, parallel.test_scores);
    }

    #[test]
    fn test_single_class_training_partition_fails_with_fold_context() {
        // Unshuffled 5-fold split over 50 rows: fold 0 validates rows 0..10.
        // All positives live in rows 0..10, so fold 0 trains on negatives only.
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        let x = Array2::from_shape_fn((50, 3), |_| rng.gen_range(-1.0..1.0));
        let y = Array1::from_iter((0..50).map(|i| if i < 10 { 1.0 } else { 0.0 }));
        let (x_test, _) = synthetic(10, 8);

        let options = FoldOptions {
            n_folds: 5,
            shuffle: false,
            seed: 0,
        };
        let assignment = FoldAssignment::partition(50, &options).unwrap();

        let err = generate_oof(&logit_spec(), &x, &y, &x_test, &assignment, false).unwrap_err();
        match err {
            StackError::TrainingError {
                learner,
                fold,
                reason,
            } => {
                assert_eq!(learner, "logit");
                assert_eq!(fold, 0);
                assert!(reason.contains("single class"));
            }
            other => panic!("expected TrainingError, got {:?}", other),
        }
    }

    #[test]
    fn test_mismatched_assignment_rejected() {
        let (x, y) = synthetic(30, 9);
        let (x_test, _) = synthetic(5, 10);
        let assignment = FoldAssignment::partition(20, &FoldOptions::default()).unwrap();

        assert!(matches!(
            generate_oof(&logit_spec(), &x, &y, &x_test, &assignment, false),
            Err(StackError::ShapeMismatch { .. })
        ));
    }
}
