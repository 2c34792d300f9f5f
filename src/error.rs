//! Error types for the stackfold engine

use thiserror::Error;

/// Result type alias for stackfold operations
pub type Result<T> = std::result::Result<T, StackError>;

/// Main error type for the stacking engine
#[derive(Error, Debug)]
pub enum StackError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Training error for learner '{learner}' on fold {fold}: {reason}")]
    TrainingError {
        learner: String,
        fold: usize,
        reason: String,
    },

    #[error("Shape mismatch: expected {expected}, got {actual}")]
    ShapeMismatch { expected: String, actual: String },

    #[error("Data error: {0}")]
    DataError(String),

    #[error("Column not found: {0}")]
    ColumnNotFound(String),

    #[error("Model not fitted")]
    ModelNotFitted,

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(String),
}

impl From<polars::error::PolarsError> for StackError {
    fn from(err: polars::error::PolarsError) -> Self {
        StackError::DataError(err.to_string())
    }
}

impl From<serde_json::Error> for StackError {
    fn from(err: serde_json::Error) -> Self {
        StackError::SerializationError(err.to_string())
    }
}

impl From<bincode::Error> for StackError {
    fn from(err: bincode::Error) -> Self {
        StackError::SerializationError(err.to_string())
    }
}

impl From<ndarray::ShapeError> for StackError {
    fn from(err: ndarray::ShapeError) -> Self {
        StackError::ShapeMismatch {
            expected: "valid shape".to_string(),
            actual: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = StackError::ConfigError("n_folds must be at least 2".to_string());
        assert_eq!(
            err.to_string(),
            "Configuration error: n_folds must be at least 2"
        );
    }

    #[test]
    fn test_training_error_names_learner_and_fold() {
        let err = StackError::TrainingError {
            learner: "xgb".to_string(),
            fold: 3,
            reason: "labels contain a single class".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("xgb"));
        assert!(msg.contains("fold 3"));
    }

    #[test]
    fn test_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: StackError = io_err.into();
        assert!(matches!(err, StackError::IoError(_)));
    }
}
