//! Error types for demons registration.

use thiserror::Error;

/// Main error type for registration operations.
#[derive(Error, Debug)]
pub enum RegistrationError {
    /// A parameter file line without `=`.
    #[error("Parameter syntax error on line {line}: '{content}'")]
    ParameterSyntax { line: usize, content: String },

    /// A known key whose value does not parse.
    #[error("Invalid value '{value}' for parameter '{key}'")]
    InvalidParameterValue { key: String, value: String },

    /// Invalid configuration.
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// `run` called before the inputs were set.
    #[error("Missing input: {0}")]
    MissingInput(String),

    /// Error in image validation.
    #[error("Image validation error: {0}")]
    ImageValidation(String),

    /// Dimension mismatch.
    #[error("Dimension mismatch: {0}")]
    DimensionMismatch(String),

    /// Shape mismatch.
    #[error("Shape mismatch: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        expected: Vec<usize>,
        actual: Vec<usize>,
    },

    /// Parameter file I/O.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for registration operations.
pub type Result<T> = std::result::Result<T, RegistrationError>;

impl RegistrationError {
    pub fn parameter_syntax(line: usize, content: impl Into<String>) -> Self {
        Self::ParameterSyntax {
            line,
            content: content.into(),
        }
    }

    pub fn invalid_value(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self::InvalidParameterValue {
            key: key.into(),
            value: value.into(),
        }
    }

    /// Create an invalid configuration error.
    pub fn invalid_configuration(msg: impl Into<String>) -> Self {
        Self::InvalidConfiguration(msg.into())
    }

    pub fn missing_input(msg: impl Into<String>) -> Self {
        Self::MissingInput(msg.into())
    }

    /// Create an image validation error.
    pub fn image_validation(msg: impl Into<String>) -> Self {
        Self::ImageValidation(msg.into())
    }

    /// Create a dimension mismatch error.
    pub fn dimension_mismatch(msg: impl Into<String>) -> Self {
        Self::DimensionMismatch(msg.into())
    }
}
