//! Error types for the Hemmer plugin framework.
//!
//! Provider facing failures travel as [`Diagnostics`](crate::diag::Diagnostics)
//! inside every RPC response. [`FrameworkError`] covers the typed failures of
//! the value, path and private state machinery underneath, which the
//! dispatcher folds into diagnostics at the RPC boundary.

use thiserror::Error;

use crate::diag::Diagnostic;
use crate::path::AttributePath;

/// Errors raised by the schema, value and private state machinery.
#[derive(Debug, Error)]
pub enum FrameworkError {
    /// A path step could not be applied to the value found at `path`.
    #[error("{step} still remains in the path at {path}: step cannot be applied to this value")]
    InvalidStep {
        /// The path walked so far.
        path: AttributePath,
        /// The step that could not be applied.
        step: String,
    },

    /// The path points below an attribute that carries no schema of its own,
    /// such as an element of a `list(string)` or anything inside a dynamic value.
    #[error("path leads inside an attribute without a schema of its own: {0}")]
    PathInsideAtomicAttribute(AttributePath),

    /// The path resolves to a block where an attribute was expected.
    #[error("path leads to a block, not an attribute: {0}")]
    PathIsBlock(AttributePath),

    /// A named step has no matching attribute or block in the schema.
    #[error("no attribute or block named {name:?} exists in the schema at {path}")]
    AttributeNotInSchema {
        /// The parent path being resolved.
        path: AttributePath,
        /// The missing name.
        name: String,
    },

    /// A value cannot correspond to its schema position.
    #[error("value at {path} is {found} but the schema expects {expected}")]
    ShapeMismatch {
        /// Position of the value.
        path: AttributePath,
        /// What the schema declares.
        expected: &'static str,
        /// What the value contains.
        found: &'static str,
    },

    /// An unknown value reached a place that needs a fully known value.
    #[error("unknown value at {0} cannot be represented as JSON")]
    UnknownValue(AttributePath),

    /// Private state could not be encoded or decoded.
    #[error("private state: {0}")]
    PrivateState(String),

    /// A serialization/deserialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl FrameworkError {
    /// Whether this error only says "no schema describes this position".
    ///
    /// Walkers treat these positions as schemaless and leave them untouched.
    pub fn is_schemaless_position(&self) -> bool {
        matches!(self, Self::PathInsideAtomicAttribute(_))
    }

    /// Convert into an error diagnostic worded as a framework defect.
    pub fn into_framework_diagnostic(self, summary: impl Into<String>) -> Diagnostic {
        Diagnostic::error(summary).with_detail(format!(
            "An unexpected error was encountered while handling the request. \
             This is always an issue in the Hemmer plugin framework and should be reported \
             to the framework developers.\n\n{}",
            self
        ))
    }

    /// Convert into an error diagnostic worded as a provider defect.
    pub fn into_provider_diagnostic(self, summary: impl Into<String>) -> Diagnostic {
        Diagnostic::error(summary).with_detail(format!(
            "An unexpected error was encountered while handling the request. \
             This is always an issue with the provider and should be reported to the provider \
             developers.\n\n{}",
            self
        ))
    }
}

impl From<FrameworkError> for tonic::Status {
    fn from(err: FrameworkError) -> Self {
        match err {
            FrameworkError::PrivateState(msg) => tonic::Status::invalid_argument(msg),
            FrameworkError::Serialization(err) => {
                tonic::Status::invalid_argument(format!("Serialization error: {}", err))
            },
            FrameworkError::UnknownValue(path) => tonic::Status::failed_precondition(format!(
                "unknown value at {} cannot be represented as JSON",
                path
            )),
            other => tonic::Status::internal(other.to_string()),
        }
    }
}
