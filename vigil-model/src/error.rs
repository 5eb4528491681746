use std::fmt::{self, Display};

/// Errors produced by model constructors and conversions.
#[derive(Debug, Clone, PartialEq)]
pub enum ModelError {
    /// A score map did not contain a required category.
    MissingCategory(&'static str),
    /// A probability was NaN or outside `[0, 1]`.
    InvalidProbability { category: &'static str, value: f32 },
    /// A value could not be parsed into the requested enum.
    UnknownVariant(String),
}

impl Display for ModelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModelError::MissingCategory(name) => {
                write!(f, "missing score for category '{name}'")
            }
            ModelError::InvalidProbability { category, value } => {
                write!(f, "invalid probability {value} for '{category}'")
            }
            ModelError::UnknownVariant(raw) => {
                write!(f, "unknown variant '{raw}'")
            }
        }
    }
}

impl std::error::Error for ModelError {}

pub type Result<T> = std::result::Result<T, ModelError>;
