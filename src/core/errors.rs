// src/core/errors.rs
use thiserror::Error;

/// Every way an explanation can fail.
///
/// Configuration and shape errors are raised synchronously before any model
/// call is made. Arithmetic and model errors fail the explanation as a whole;
/// no partial attribution is ever returned.
#[derive(Debug, Error)]
pub enum ShapError {
    #[error("Invalid Input: {0}")]
    InvalidInput(String),
    #[error("Invalid Configuration: {0}")]
    InvalidConfiguration(String),
    #[error("Incompatible Dimensions: {0}")]
    IncompatibleDimensions(String),
    #[error("Missing Value: {0}")]
    MissingValue(String),
    #[error("Model Prediction Error: {0}")]
    ModelPredictionError(String),
    /// Zero weight sums, degenerate observation sets and similar numeric dead ends.
    #[error("Arithmetic Error: {0}")]
    ArithmeticError(String),
    #[error("Internal Error: {0}")]
    InternalError(String),
    #[error("Ndarray Error: {0}")]
    NdarrayError(#[from] ndarray::ShapeError),
}

impl ShapError {
    /// True for errors that are detected before any model invocation.
    pub fn is_eager(&self) -> bool {
        matches!(
            self,
            ShapError::InvalidConfiguration(_)
                | ShapError::MissingValue(_)
                | ShapError::IncompatibleDimensions(_)
        )
    }
}

// Convenience type alias for Result
pub type Result<T> = std::result::Result<T, ShapError>;
