//! Classification metrics and fold-score summaries

use crate::error::{Result, StackError};
use ndarray::Array1;
use serde::{Deserialize, Serialize};

/// Area under the ROC curve via the rank statistic.
///
/// Ties in the scores receive their average rank, so exhaustively tied
/// scores come out at exactly 0.5.
pub fn roc_auc(y_true: &Array1<f64>, scores: &Array1<f64>) -> Result<f64> {
    if y_true.len() != scores.len() {
        return Err(StackError::ShapeMismatch {
            expected: format!("scores length = {}", y_true.len()),
            actual: format!("scores length = {}", scores.len()),
        });
    }
    if y_true.is_empty() {
        return Err(StackError::DataError(
            "cannot compute AUC on empty input".to_string(),
        ));
    }

    let n = y_true.len();
    let n_pos = y_true.iter().filter(|&&v| v > 0.5).count();
    let n_neg = n - n_pos;

    if n_pos == 0 || n_neg == 0 {
        return Err(StackError::DataError(
            "AUC requires both label classes to be present".to_string(),
        ));
    }

    // Sort indices by ascending score
    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by(|&a, &b| {
        scores[a]
            .partial_cmp(&scores[b])
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    // Assign average ranks to tied score groups (ranks start at 1)
    let mut ranks = vec![0.0; n];
    let mut i = 0;
    while i < n {
        let mut j = i;
        while j + 1 < n && scores[order[j + 1]] == scores[order[i]] {
            j += 1;
        }
        let avg_rank = (i + j) as f64 / 2.0 + 1.0;
        for k in i..=j {
            ranks[order[k]] = avg_rank;
        }
        i = j + 1;
    }

    let pos_rank_sum: f64 = y_true
        .iter()
        .zip(ranks.iter())
        .filter(|(&t, _)| t > 0.5)
        .map(|(_, &r)| r)
        .sum();

    let auc = (pos_rank_sum - (n_pos * (n_pos + 1)) as f64 / 2.0) / (n_pos * n_neg) as f64;
    Ok(auc)
}

/// Summary over per-fold scores
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FoldScores {
    /// Score for each fold
    pub scores: Vec<f64>,
    /// Mean score across folds
    pub mean: f64,
    /// Standard deviation of the fold scores
    pub std: f64,
}

impl FoldScores {
    /// Summarize a set of per-fold scores
    pub fn from_scores(scores: Vec<f64>) -> Self {
        let n = scores.len() as f64;
        let mean = scores.iter().sum::<f64>() / n;
        let variance = scores.iter().map(|s| (s - mean).powi(2)).sum::<f64>() / n;

        Self {
            scores,
            mean,
            std: variance.sqrt(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_auc_perfect_ranking() {
        let y = array![0.0, 0.0, 1.0, 1.0];
        let scores = array![0.1, 0.2, 0.8, 0.9];
        assert!((roc_auc(&y, &scores).unwrap() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_auc_inverted_ranking() {
        let y = array![0.0, 0.0, 1.0, 1.0];
        let scores = array![0.9, 0.8, 0.2, 0.1];
        assert!(roc_auc(&y, &scores).unwrap().abs() < 1e-12);
    }

    #[test]
    fn test_auc_all_tied() {
        let y = array![0.0, 1.0, 0.0, 1.0, 0.0, 1.0];
        let scores = array![0.5, 0.5, 0.5, 0.5, 0.5, 0.5];
        assert!((roc_auc(&y, &scores).unwrap() - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_auc_partial_ranking() {
        // One inversion among 2x2 pairs: AUC = 3/4
        let y = array![0.0, 1.0, 0.0, 1.0];
        let scores = array![0.1, 0.4, 0.6, 0.9];
        assert!((roc_auc(&y, &scores).unwrap() - 0.75).abs() < 1e-12);
    }

    #[test]
    fn test_auc_single_class_errors() {
        let y = array![1.0, 1.0, 1.0];
        let scores = array![0.1, 0.2, 0.3];
        assert!(roc_auc(&y, &scores).is_err());
    }

    #[test]
    fn test_auc_length_mismatch_errors() {
        let y = array![0.0, 1.0];
        let scores = array![0.1, 0.2, 0.3];
        assert!(matches!(
            roc_auc(&y, &scores),
            Err(StackError::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn test_fold_scores_summary() {
        let summary = FoldScores::from_scores(vec![0.7, 0.8, 0.9]);
        assert!((summary.mean - 0.8).abs() < 1e-12);
        assert!(summary.std > 0.0);
        assert_eq!(summary.scores.len(), 3);
    }
}
