//! Error types for the lentil pipeline.

use thiserror::Error;

/// Fatal pipeline errors. Nothing downstream runs once one is raised.
#[derive(Debug, Error)]
pub enum LentilError {
    /// A required input column is absent.
    #[error("missing required column `{0}`")]
    MissingColumn(String),

    /// An input value cannot be interpreted.
    #[error("line {line}: column `{column}`: {message}")]
    Malformed {
        line: usize,
        column: String,
        message: String,
    },

    /// The model, its priors, or a prediction request are inconsistent.
    #[error("specification error: {0}")]
    Specification(String),

    /// Fixed-effect-only prediction against a model without species
    /// fixed effects.
    #[error("unsupported prediction: {0}")]
    UnsupportedPrediction(String),

    /// Underlying I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization failure.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl LentilError {
    pub fn malformed(line: usize, column: &str, message: impl Into<String>) -> Self {
        Self::Malformed {
            line,
            column: column.to_string(),
            message: message.into(),
        }
    }

    /// Input schema errors: missing or malformed columns
    pub fn is_schema(&self) -> bool {
        matches!(self, Self::MissingColumn(_) | Self::Malformed { .. })
    }

    /// Specification errors, including unsupported predictions
    pub fn is_specification(&self) -> bool {
        matches!(self, Self::Specification(_) | Self::UnsupportedPrediction(_))
    }
}

pub type Result<T> = std::result::Result<T, LentilError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classes() {
        assert!(LentilError::MissingColumn("species".into()).is_schema());
        assert!(LentilError::malformed(3, "egg_count", "not a count").is_schema());
        assert!(LentilError::UnsupportedPrediction("pooled".into()).is_specification());
        assert!(!LentilError::Specification("x".into()).is_schema());
    }

    #[test]
    fn test_display() {
        let e = LentilError::malformed(7, "upbound", "below lowbound");
        assert_eq!(e.to_string(), "line 7: column `upbound`: below lowbound");
    }
}
