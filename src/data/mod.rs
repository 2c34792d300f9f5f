//! Entity-keyed tabular data
//!
//! Wraps a Polars DataFrame with the contract the stacking engine needs:
//! one row per entity identifier, named feature columns, and an optional
//! binary label column.

use crate::error::{Result, StackError};
use ndarray::{Array1, Array2};
use polars::prelude::*;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fs::File;
use std::path::Path;

/// Entity identifier: integer or string key
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntityId {
    Int(i64),
    Str(String),
}

impl std::fmt::Display for EntityId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EntityId::Int(v) => write!(f, "{}", v),
            EntityId::Str(s) => write!(f, "{}", s),
        }
    }
}

/// An entity-keyed table of feature columns, with one row per entity.
#[derive(Debug, Clone)]
pub struct EntityTable {
    df: DataFrame,
    id_column: String,
}

impl EntityTable {
    /// Wrap a DataFrame, validating that the identifier column exists and
    /// contains no duplicates.
    pub fn new(df: DataFrame, id_column: impl Into<String>) -> Result<Self> {
        let id_column = id_column.into();
        let table = Self { df, id_column };

        let ids = table.ids()?;
        let mut seen = HashSet::with_capacity(ids.len());
        for id in &ids {
            if !seen.insert(id) {
                return Err(StackError::DataError(format!(
                    "duplicate entity identifier '{}' in column '{}'",
                    id, table.id_column
                )));
            }
        }

        Ok(table)
    }

    /// Load a CSV file into an entity table
    pub fn from_csv(path: impl AsRef<Path>, id_column: impl Into<String>) -> Result<Self> {
        let file = File::open(path.as_ref())?;

        let df = CsvReadOptions::default()
            .with_has_header(true)
            .with_infer_schema_length(Some(100))
            .into_reader_with_file_handle(file)
            .finish()?;

        Self::new(df, id_column)
    }

    /// Underlying DataFrame
    pub fn df(&self) -> &DataFrame {
        &self.df
    }

    /// Name of the entity identifier column
    pub fn id_column(&self) -> &str {
        &self.id_column
    }

    /// Number of rows (= number of entities)
    pub fn n_rows(&self) -> usize {
        self.df.height()
    }

    /// Entity identifiers in row order
    pub fn ids(&self) -> Result<Vec<EntityId>> {
        let column = self
            .df
            .column(&self.id_column)
            .map_err(|_| StackError::ColumnNotFound(self.id_column.clone()))?;

        match column.dtype() {
            DataType::String => {
                let values = column.str().map_err(|e| StackError::DataError(e.to_string()))?;
                values
                    .into_iter()
                    .map(|v| {
                        v.map(|s| EntityId::Str(s.to_string())).ok_or_else(|| {
                            StackError::DataError(format!(
                                "null entity identifier in column '{}'",
                                self.id_column
                            ))
                        })
                    })
                    .collect()
            }
            _ => {
                let as_int = column
                    .cast(&DataType::Int64)
                    .map_err(|e| StackError::DataError(e.to_string()))?;
                let values = as_int.i64().map_err(|e| StackError::DataError(e.to_string()))?;
                values
                    .into_iter()
                    .map(|v| {
                        v.map(EntityId::Int).ok_or_else(|| {
                            StackError::DataError(format!(
                                "null entity identifier in column '{}'",
                                self.id_column
                            ))
                        })
                    })
                    .collect()
            }
        }
    }

    /// Names of the feature columns: everything except the identifier and
    /// (when given) the label column.
    pub fn feature_columns(&self, label_column: Option<&str>) -> Vec<String> {
        self.df
            .get_column_names()
            .into_iter()
            .filter(|name| {
                name.as_str() != self.id_column
                    && label_column.map_or(true, |l| name.as_str() != l)
            })
            .map(|s| s.to_string())
            .collect()
    }

    /// Extract named columns into a row-major feature matrix
    pub fn features(&self, columns: &[String]) -> Result<Array2<f64>> {
        let n_rows = self.df.height();
        let n_cols = columns.len();

        let col_data: Vec<Vec<f64>> = columns
            .iter()
            .map(|name| {
                let column = self
                    .df
                    .column(name)
                    .map_err(|_| StackError::ColumnNotFound(name.clone()))?;
                let as_f64 = column
                    .cast(&DataType::Float64)
                    .map_err(|e| StackError::DataError(e.to_string()))?;
                let values: Vec<f64> = as_f64
                    .f64()
                    .map_err(|e| StackError::DataError(e.to_string()))?
                    .into_iter()
                    .map(|v| v.unwrap_or(f64::NAN))
                    .collect();
                Ok(values)
            })
            .collect::<Result<Vec<Vec<f64>>>>()?;

        let col_refs: Vec<&[f64]> = col_data.iter().map(|c| c.as_slice()).collect();
        Ok(Array2::from_shape_fn((n_rows, n_cols), |(r, c)| {
            col_refs[c][r]
        }))
    }

    /// Extract the binary label column. Values must be 0 or 1.
    pub fn labels(&self, label_column: &str) -> Result<Array1<f64>> {
        let column = self
            .df
            .column(label_column)
            .map_err(|_| StackError::ColumnNotFound(label_column.to_string()))?;
        let as_f64 = column
            .cast(&DataType::Float64)
            .map_err(|e| StackError::DataError(e.to_string()))?;

        let values: Vec<f64> = as_f64
            .f64()
            .map_err(|e| StackError::DataError(e.to_string()))?
            .into_iter()
            .map(|v| {
                v.ok_or_else(|| {
                    StackError::DataError(format!("null label in column '{}'", label_column))
                })
            })
            .collect::<Result<Vec<f64>>>()?;

        for &v in &values {
            if v != 0.0 && v != 1.0 {
                return Err(StackError::DataError(format!(
                    "label column '{}' must be binary (0/1), found {}",
                    label_column, v
                )));
            }
        }

        Ok(Array1::from_vec(values))
    }

    /// Mapping from entity identifier to label value
    pub fn label_map(&self, label_column: &str) -> Result<HashMap<EntityId, f64>> {
        let ids = self.ids()?;
        let labels = self.labels(label_column)?;
        Ok(ids.into_iter().zip(labels.iter().copied()).collect())
    }

    /// Select a subset of rows into a new table
    pub fn take_rows(&self, rows: &[usize]) -> Result<EntityTable> {
        let idx = IdxCa::from_vec(
            "idx".into(),
            rows.iter().map(|&i| i as IdxSize).collect::<Vec<_>>(),
        );
        let df = self.df.take(&idx)?;
        Ok(EntityTable {
            df,
            id_column: self.id_column.clone(),
        })
    }

    /// Split into (train, holdout) partitions with a seeded shuffle.
    ///
    /// When `stratify` is set, the split preserves the label proportions of
    /// `label_column` in both partitions; the holdout gets at least one row
    /// per observed class.
    pub fn holdout_split(
        &self,
        label_column: &str,
        fraction: f64,
        stratify: bool,
        seed: u64,
    ) -> Result<(EntityTable, EntityTable)> {
        if !(0.0..1.0).contains(&fraction) || fraction == 0.0 {
            return Err(StackError::ConfigError(format!(
                "holdout fraction must be in (0, 1), got {}",
                fraction
            )));
        }

        let n = self.n_rows();
        let mut rng = ChaCha8Rng::seed_from_u64(seed);

        let (mut train_rows, mut holdout_rows) = if stratify {
            let labels = self.labels(label_column)?;
            let mut class_rows: HashMap<i64, Vec<usize>> = HashMap::new();
            for (i, &label) in labels.iter().enumerate() {
                class_rows.entry(label as i64).or_default().push(i);
            }

            let mut train_rows = Vec::new();
            let mut holdout_rows = Vec::new();
            // Deterministic class order
            let mut classes: Vec<i64> = class_rows.keys().copied().collect();
            classes.sort_unstable();

            for class in classes {
                let rows = class_rows.get_mut(&class).unwrap();
                rows.shuffle(&mut rng);
                let class_holdout = ((rows.len() as f64 * fraction).round() as usize)
                    .max(1)
                    .min(rows.len().saturating_sub(1));
                holdout_rows.extend_from_slice(&rows[..class_holdout]);
                train_rows.extend_from_slice(&rows[class_holdout..]);
            }
            (train_rows, holdout_rows)
        } else {
            let mut rows: Vec<usize> = (0..n).collect();
            rows.shuffle(&mut rng);
            let n_holdout = ((n as f64 * fraction).round() as usize)
                .max(1)
                .min(n.saturating_sub(1));
            let holdout_rows = rows[..n_holdout].to_vec();
            let train_rows = rows[n_holdout..].to_vec();
            (train_rows, holdout_rows)
        };

        if train_rows.is_empty() || holdout_rows.is_empty() {
            return Err(StackError::DataError(
                "holdout split produced an empty partition".to_string(),
            ));
        }

        // Keep original row order within each partition
        train_rows.sort_unstable();
        holdout_rows.sort_unstable();

        Ok((self.take_rows(&train_rows)?, self.take_rows(&holdout_rows)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_table() -> EntityTable {
        let df = df!(
            "id" => &[1i64, 2, 3, 4, 5, 6, 7, 8, 9, 10],
            "f1" => &[0.1, 0.2, 0.3, 0.4, 0.5, 0.6, 0.7, 0.8, 0.9, 1.0],
            "f2" => &[1.0, 0.9, 0.8, 0.7, 0.6, 0.5, 0.4, 0.3, 0.2, 0.1],
            "target" => &[0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 1.0, 1.0, 1.0]
        )
        .unwrap();
        EntityTable::new(df, "id").unwrap()
    }

    #[test]
    fn test_rejects_duplicate_ids() {
        let df = df!(
            "id" => &[1i64, 2, 2],
            "f1" => &[0.1, 0.2, 0.3]
        )
        .unwrap();
        assert!(matches!(
            EntityTable::new(df, "id"),
            Err(StackError::DataError(_))
        ));
    }

    #[test]
    fn test_string_ids() {
        let df = df!(
            "id" => &["a", "b", "c"],
            "f1" => &[0.1, 0.2, 0.3]
        )
        .unwrap();
        let table = EntityTable::new(df, "id").unwrap();
        assert_eq!(table.ids().unwrap()[1], EntityId::Str("b".to_string()));
    }

    #[test]
    fn test_feature_extraction_shape() {
        let table = sample_table();
        let cols = table.feature_columns(Some("target"));
        assert_eq!(cols, vec!["f1".to_string(), "f2".to_string()]);

        let x = table.features(&cols).unwrap();
        assert_eq!(x.nrows(), 10);
        assert_eq!(x.ncols(), 2);
        assert!((x[[0, 0]] - 0.1).abs() < 1e-12);
        assert!((x[[9, 1]] - 0.1).abs() < 1e-12);
    }

    #[test]
    fn test_labels_must_be_binary() {
        let df = df!(
            "id" => &[1i64, 2],
            "target" => &[0.0, 2.0]
        )
        .unwrap();
        let table = EntityTable::new(df, "id").unwrap();
        assert!(table.labels("target").is_err());
    }

    #[test]
    fn test_missing_column_errors() {
        let table = sample_table();
        assert!(matches!(
            table.features(&["nope".to_string()]),
            Err(StackError::ColumnNotFound(_))
        ));
    }

    #[test]
    fn test_stratified_holdout_preserves_classes() {
        let table = sample_table();
        let (train, holdout) = table.holdout_split("target", 0.2, true, 42).unwrap();

        assert_eq!(train.n_rows() + holdout.n_rows(), 10);
        // Both classes present in the holdout
        let holdout_labels = holdout.labels("target").unwrap();
        assert!(holdout_labels.iter().any(|&v| v == 0.0));
        assert!(holdout_labels.iter().any(|&v| v == 1.0));
    }

    #[test]
    fn test_holdout_split_deterministic() {
        let table = sample_table();
        let (_, a) = table.holdout_split("target", 0.2, true, 42).unwrap();
        let (_, b) = table.holdout_split("target", 0.2, true, 42).unwrap();
        assert_eq!(a.ids().unwrap(), b.ids().unwrap());
    }

    #[test]
    fn test_holdout_partitions_are_disjoint() {
        let table = sample_table();
        let (train, holdout) = table.holdout_split("target", 0.3, false, 7).unwrap();
        let train_ids: HashSet<EntityId> = train.ids().unwrap().into_iter().collect();
        for id in holdout.ids().unwrap() {
            assert!(!train_ids.contains(&id));
        }
    }

    #[test]
    fn test_invalid_fraction_errors() {
        let table = sample_table();
        assert!(table.holdout_split("target", 1.5, false, 0).is_err());
        assert!(table.holdout_split("target", 0.0, false, 0).is_err());
    }
}
