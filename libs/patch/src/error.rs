use thiserror::Error;

pub type Result<T> = std::result::Result<T, PatchError>;

/// Failure while parsing or applying a patch document.
///
/// Operation-level variants carry the zero-based index of the failing
/// operation and the pointer it was evaluating.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PatchError {
    #[error("malformed patch document: {0}")]
    Malformed(String),

    #[error("operation {index}: invalid JSON pointer '{pointer}'")]
    InvalidPointer { index: usize, pointer: String },

    #[error("operation {index}: path '{path}' not found")]
    PathNotFound { index: usize, path: String },

    #[error("operation {index}: test failed at '{path}'")]
    TestFailed { index: usize, path: String },

    #[error("operation {index}: cannot move '{from}' into its own descendant '{path}'")]
    MoveIntoDescendant {
        index: usize,
        from: String,
        path: String,
    },
}

impl PatchError {
    /// Index of the operation that failed, if the error is operation-level.
    pub fn operation_index(&self) -> Option<usize> {
        match self {
            PatchError::Malformed(_) => None,
            PatchError::InvalidPointer { index, .. }
            | PatchError::PathNotFound { index, .. }
            | PatchError::TestFailed { index, .. }
            | PatchError::MoveIntoDescendant { index, .. } => Some(*index),
        }
    }

    /// True when the document itself could not be understood, as opposed to
    /// a well-formed patch that could not be applied to this resource.
    pub fn is_malformed(&self) -> bool {
        matches!(
            self,
            PatchError::Malformed(_) | PatchError::InvalidPointer { .. }
        )
    }
}

/// A string that is not a valid RFC 6901 JSON pointer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid JSON pointer '{0}'")]
pub struct PointerError(pub String);
