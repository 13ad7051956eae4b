use thiserror::Error;

/// Crate-wide error type.
///
/// Every variant except [`GalvaniError::ShapeMismatch`] is a configuration
/// error: it is raised while validating or assembling a network and aborts
/// construction. `ShapeMismatch` is raised only on the first forward call,
/// when the input tensor disagrees with the declared input dimensions.
#[derive(Debug, Error)]
pub enum GalvaniError {
    #[error("invalid layer spec at index {index}: {reason}")]
    InvalidSpec { index: usize, reason: String },

    #[error("unknown layer tag {tag:?} at index {index}")]
    UnknownTag { index: usize, tag: String },

    #[error("layer {tag:?} at index {index} takes {expected} fields, got {got}")]
    FieldCount {
        index: usize,
        tag: &'static str,
        expected: usize,
        got: usize,
    },

    #[error("invalid {field} for layer at index {index}: {reason}")]
    InvalidField {
        index: usize,
        field: &'static str,
        reason: String,
    },

    #[error("unknown activation {0:?}")]
    UnknownActivation(String),

    #[error("unknown initialiser {0:?}")]
    UnknownInitialiser(String),

    #[error("invalid y_range ({low}, {high}): lower bound must be strictly below upper")]
    InvalidRange { low: f32, high: f32 },

    #[error("{heads} output head(s) but {activations} output activation(s)")]
    HeadMismatch { heads: usize, activations: usize },

    #[error("invalid input_dim: {0}")]
    InvalidInputDim(String),

    #[error("input shape {got:?} does not match expected input_dim {expected:?}")]
    ShapeMismatch {
        expected: Vec<usize>,
        got: Vec<usize>,
    },
}

impl GalvaniError {
    /// True for errors raised during network construction (as opposed to the
    /// first-forward shape check).
    pub fn is_config(&self) -> bool {
        !matches!(self, GalvaniError::ShapeMismatch { .. })
    }
}

pub type Result<T> = std::result::Result<T, GalvaniError>;
