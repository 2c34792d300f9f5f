//! Meta-feature assembly
//!
//! Turns per-learner OOF score columns into one entity-keyed matrix, and
//! merges matrices produced from heterogeneous upstream feature sources by
//! entity identifier.

use crate::data::EntityId;
use crate::error::{Result, StackError};
use crate::stacking::oof::OofPredictionSet;
use ndarray::{Array1, Array2, ArrayView1};
use polars::prelude::*;
use std::collections::{HashMap, HashSet};
use tracing::warn;

/// Entity-keyed matrix of base-learner score columns.
///
/// Column order always matches the input learner order; columns are named
/// `<learner-name>_oof`. Cells can be NaN only after an identifier-based
/// merge left a gap.
#[derive(Debug, Clone)]
pub struct MetaFeatureMatrix {
    ids: Vec<EntityId>,
    columns: Vec<String>,
    values: Array2<f64>,
}

/// Per-source gap counts from an identifier-based merge
#[derive(Debug, Clone)]
pub struct AlignmentReport {
    /// Number of merged entities absent from each source, in source order
    pub missing_per_source: Vec<usize>,
    /// Total entities in the merged matrix
    pub total_entities: usize,
}

enum Side {
    Train,
    Test,
}

impl MetaFeatureMatrix {
    /// Build the training-side matrix from OOF score columns
    pub fn from_oof_train(ids: Vec<EntityId>, sets: &[OofPredictionSet]) -> Result<Self> {
        Self::from_oof(ids, sets, Side::Train)
    }

    /// Build the test-side matrix from fold-averaged score columns
    pub fn from_oof_test(ids: Vec<EntityId>, sets: &[OofPredictionSet]) -> Result<Self> {
        Self::from_oof(ids, sets, Side::Test)
    }

    fn from_oof(ids: Vec<EntityId>, sets: &[OofPredictionSet], side: Side) -> Result<Self> {
        if sets.is_empty() {
            return Err(StackError::ConfigError(
                "learner list is empty; nothing to assemble".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        for set in sets {
            if !seen.insert(set.learner.as_str()) {
                return Err(StackError::ConfigError(format!(
                    "duplicate learner name '{}'",
                    set.learner
                )));
            }
        }

        let n_rows = ids.len();
        for set in sets {
            let scores = match side {
                Side::Train => &set.train_scores,
                Side::Test => &set.test_scores,
            };
            if scores.len() != n_rows {
                return Err(StackError::ShapeMismatch {
                    expected: format!("{} scores per learner", n_rows),
                    actual: format!("{} scores for learner '{}'", scores.len(), set.learner),
                });
            }
        }

        let columns: Vec<String> = sets.iter().map(|s| format!("{}_oof", s.learner)).collect();
        let values = Array2::from_shape_fn((n_rows, sets.len()), |(i, j)| match side {
            Side::Train => sets[j].train_scores[i],
            Side::Test => sets[j].test_scores[i],
        });

        Ok(Self {
            ids,
            columns,
            values,
        })
    }

    /// Build directly from named columns (for collaborator-supplied scores)
    pub fn from_columns(
        ids: Vec<EntityId>,
        columns: Vec<String>,
        values: Array2<f64>,
    ) -> Result<Self> {
        if values.nrows() != ids.len() {
            return Err(StackError::ShapeMismatch {
                expected: format!("{} rows", ids.len()),
                actual: format!("{} rows", values.nrows()),
            });
        }
        if values.ncols() != columns.len() {
            return Err(StackError::ShapeMismatch {
                expected: format!("{} columns", columns.len()),
                actual: format!("{} columns", values.ncols()),
            });
        }
        Ok(Self {
            ids,
            columns,
            values,
        })
    }

    /// Outer-merge several matrices by entity identifier.
    ///
    /// Entities keep the order they are first seen in across sources. An
    /// entity absent from a source gets NaN in that source's columns; gap
    /// counts are reported and logged, never raised.
    pub fn merge(sources: &[&MetaFeatureMatrix]) -> Result<(MetaFeatureMatrix, AlignmentReport)> {
        if sources.is_empty() {
            return Err(StackError::ConfigError(
                "cannot merge an empty list of matrices".to_string(),
            ));
        }

        let mut column_names = HashSet::new();
        for source in sources {
            for name in &source.columns {
                if !column_names.insert(name.as_str()) {
                    return Err(StackError::ConfigError(format!(
                        "duplicate column '{}' across merged sources",
                        name
                    )));
                }
            }
        }

        // Union of ids, first-seen order
        let mut ids: Vec<EntityId> = Vec::new();
        let mut row_of: HashMap<EntityId, usize> = HashMap::new();
        for source in sources {
            for id in &source.ids {
                if !row_of.contains_key(id) {
                    row_of.insert(id.clone(), ids.len());
                    ids.push(id.clone());
                }
            }
        }

        let n_rows = ids.len();
        let n_cols: usize = sources.iter().map(|s| s.columns.len()).sum();
        let mut values = Array2::from_elem((n_rows, n_cols), f64::NAN);
        let mut columns = Vec::with_capacity(n_cols);
        let mut missing_per_source = Vec::with_capacity(sources.len());

        let mut col_offset = 0;
        for (source_idx, source) in sources.iter().enumerate() {
            columns.extend(source.columns.iter().cloned());

            for (src_row, id) in source.ids.iter().enumerate() {
                let dst_row = row_of[id];
                for c in 0..source.columns.len() {
                    values[[dst_row, col_offset + c]] = source.values[[src_row, c]];
                }
            }

            let missing = n_rows - source.ids.len();
            if missing > 0 {
                warn!(
                    "entity alignment gap: {} of {} entities missing from source {}",
                    missing, n_rows, source_idx
                );
            }
            missing_per_source.push(missing);
            col_offset += source.columns.len();
        }

        let report = AlignmentReport {
            missing_per_source,
            total_entities: n_rows,
        };

        Ok((
            MetaFeatureMatrix {
                ids,
                columns,
                values,
            },
            report,
        ))
    }

    /// Entity identifiers in row order
    pub fn ids(&self) -> &[EntityId] {
        &self.ids
    }

    /// Column names in learner order
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// The score matrix
    pub fn values(&self) -> &Array2<f64> {
        &self.values
    }

    /// Number of rows
    pub fn n_rows(&self) -> usize {
        self.ids.len()
    }

    /// Number of columns
    pub fn n_cols(&self) -> usize {
        self.columns.len()
    }

    /// A single named column
    pub fn column(&self, name: &str) -> Option<ArrayView1<'_, f64>> {
        let idx = self.columns.iter().position(|c| c == name)?;
        Some(self.values.column(idx))
    }

    /// Convert to a DataFrame with the given identifier column name
    pub fn to_dataframe(&self, id_column: &str) -> Result<DataFrame> {
        let all_int = self.ids.iter().all(|id| matches!(id, EntityId::Int(_)));

        let id_series: Series = if all_int {
            let ints: Vec<i64> = self
                .ids
                .iter()
                .map(|id| match id {
                    EntityId::Int(v) => *v,
                    EntityId::Str(_) => unreachable!(),
                })
                .collect();
            Series::new(id_column.into(), ints)
        } else {
            let strs: Vec<String> = self.ids.iter().map(|id| id.to_string()).collect();
            Series::new(id_column.into(), strs)
        };

        let mut columns: Vec<Column> = vec![id_series.into()];
        for (idx, name) in self.columns.iter().enumerate() {
            let data: Vec<f64> = self.values.column(idx).to_vec();
            columns.push(Series::new(name.as_str().into(), data).into());
        }

        Ok(DataFrame::new(columns)?)
    }
}

/// Position-aligned label vector for a matrix, NaN where the label map has
/// no entry for an entity.
pub fn labels_for_matrix(
    matrix: &MetaFeatureMatrix,
    label_map: &HashMap<EntityId, f64>,
) -> Array1<f64> {
    Array1::from_iter(
        matrix
            .ids()
            .iter()
            .map(|id| label_map.get(id).copied().unwrap_or(f64::NAN)),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{array, Array1};

    fn oof_set(name: &str, train: Vec<f64>, test: Vec<f64>) -> OofPredictionSet {
        OofPredictionSet {
            learner: name.to_string(),
            train_scores: Array1::from_vec(train),
            test_scores: Array1::from_vec(test),
            fold_models: Vec::new(),
            train_auc: 0.5,
        }
    }

    fn int_ids(range: std::ops::Range<i64>) -> Vec<EntityId> {
        range.map(EntityId::Int).collect()
    }

    #[test]
    fn test_columns_follow_learner_order_and_naming() {
        let sets = vec![
            oof_set("xgb", vec![0.1, 0.2, 0.3], vec![0.5]),
            oof_set("rf", vec![0.4, 0.5, 0.6], vec![0.6]),
        ];
        let matrix = MetaFeatureMatrix::from_oof_train(int_ids(0..3), &sets).unwrap();

        assert_eq!(matrix.n_rows(), 3);
        assert_eq!(matrix.n_cols(), 2);
        assert_eq!(matrix.columns(), &["xgb_oof".to_string(), "rf_oof".to_string()]);
        assert_eq!(matrix.values().column(0).to_vec(), vec![0.1, 0.2, 0.3]);
        assert_eq!(matrix.values().column(1).to_vec(), vec![0.4, 0.5, 0.6]);
    }

    #[test]
    fn test_test_side_uses_averaged_scores() {
        let sets = vec![oof_set("xgb", vec![0.1, 0.2], vec![0.7, 0.8, 0.9])];
        let matrix = MetaFeatureMatrix::from_oof_test(int_ids(0..3), &sets).unwrap();
        assert_eq!(matrix.values().column(0).to_vec(), vec![0.7, 0.8, 0.9]);
    }

    #[test]
    fn test_mismatched_lengths_rejected() {
        let sets = vec![
            oof_set("a", vec![0.1, 0.2, 0.3], vec![]),
            oof_set("b", vec![0.4, 0.5], vec![]),
        ];
        assert!(matches!(
            MetaFeatureMatrix::from_oof_train(int_ids(0..3), &sets),
            Err(StackError::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn test_empty_learner_list_rejected() {
        assert!(matches!(
            MetaFeatureMatrix::from_oof_train(int_ids(0..3), &[]),
            Err(StackError::ConfigError(_))
        ));
    }

    #[test]
    fn test_duplicate_learner_names_rejected() {
        let sets = vec![
            oof_set("same", vec![0.1], vec![]),
            oof_set("same", vec![0.2], vec![]),
        ];
        assert!(matches!(
            MetaFeatureMatrix::from_oof_train(int_ids(0..1), &sets),
            Err(StackError::ConfigError(_))
        ));
    }

    #[test]
    fn test_merge_fills_gaps_with_nan_and_counts_them() {
        let a = MetaFeatureMatrix::from_columns(
            int_ids(0..4),
            vec!["a_oof".to_string()],
            array![[0.1], [0.2], [0.3], [0.4]],
        )
        .unwrap();
        // Source b is missing entities 1 and 3
        let b = MetaFeatureMatrix::from_columns(
            vec![EntityId::Int(0), EntityId::Int(2)],
            vec!["b_oof".to_string()],
            array![[0.5], [0.6]],
        )
        .unwrap();

        let (merged, report) = MetaFeatureMatrix::merge(&[&a, &b]).unwrap();

        assert_eq!(merged.n_rows(), 4);
        assert_eq!(merged.n_cols(), 2);
        assert_eq!(report.missing_per_source, vec![0, 2]);
        assert_eq!(report.total_entities, 4);

        let b_col = merged.column("b_oof").unwrap();
        assert!((b_col[0] - 0.5).abs() < 1e-12);
        assert!(b_col[1].is_nan());
        assert!((b_col[2] - 0.6).abs() < 1e-12);
        assert!(b_col[3].is_nan());
    }

    #[test]
    fn test_merge_rejects_duplicate_columns() {
        let a = MetaFeatureMatrix::from_columns(
            int_ids(0..1),
            vec!["x_oof".to_string()],
            array![[0.1]],
        )
        .unwrap();
        let b = MetaFeatureMatrix::from_columns(
            int_ids(0..1),
            vec!["x_oof".to_string()],
            array![[0.2]],
        )
        .unwrap();
        assert!(matches!(
            MetaFeatureMatrix::merge(&[&a, &b]),
            Err(StackError::ConfigError(_))
        ));
    }

    #[test]
    fn test_labels_for_matrix_marks_missing_as_nan() {
        let matrix = MetaFeatureMatrix::from_columns(
            int_ids(0..3),
            vec!["a_oof".to_string()],
            array![[0.1], [0.2], [0.3]],
        )
        .unwrap();

        let mut label_map = HashMap::new();
        label_map.insert(EntityId::Int(0), 1.0);
        label_map.insert(EntityId::Int(2), 0.0);

        let labels = labels_for_matrix(&matrix, &label_map);
        assert_eq!(labels[0], 1.0);
        assert!(labels[1].is_nan());
        assert_eq!(labels[2], 0.0);
    }

    #[test]
    fn test_to_dataframe_round_trip_columns() {
        let matrix = MetaFeatureMatrix::from_columns(
            int_ids(10..13),
            vec!["a_oof".to_string(), "b_oof".to_string()],
            array![[0.1, 0.9], [0.2, 0.8], [0.3, 0.7]],
        )
        .unwrap();

        let df = matrix.to_dataframe("id").unwrap();
        assert_eq!(df.height(), 3);
        assert_eq!(df.width(), 3);
        assert!(df.column("a_oof").is_ok());
        assert!(df.column("b_oof").is_ok());
    }
}
