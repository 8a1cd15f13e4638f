//! Error handling for the pipeline engine
//!
//! This module defines the engine's error taxonomy and a Result alias for
//! use throughout the crate.
//!
//! Two kinds of failure are deliberately kept apart:
//!
//! - **Invariant violations** (`Cycle`, `UnsafeMutation`, invalid handles) abort
//!   the offending operation before anything is committed.
//! - **Computation failures** never leave a pipeline stage as an error; they are
//!   turned into a [`PipelineStatus`](crate::types::PipelineStatus) carried by the
//!   resulting flow state. `Canceled` is a normal terminal state, not a failure.

use crate::graph::TargetId;
use thiserror::Error;

/// Main error type for engine operations
#[derive(Error, Debug)]
pub enum CoreError {
    /// An owning reference would close a cycle in the ownership graph
    #[error("Reference cycle: {holder} cannot own {target}, which already references it")]
    Cycle { holder: TargetId, target: TargetId },

    /// A shared data object was about to be modified in place
    #[error("Unsafe mutation of shared data object '{0}'")]
    UnsafeMutation(String),

    /// A stage algorithm failed
    #[error("Computation error: {0}")]
    Computation(String),

    /// The operation was canceled before it produced a result
    #[error("Operation canceled")]
    Canceled,

    /// A handle pointing at a deleted or never-existing graph node
    #[error("Invalid target: {0}")]
    InvalidTarget(TargetId),

    /// Field name not declared by the node's class
    #[error("Unknown reference field '{field}' on {class}")]
    UnknownField { class: &'static str, field: String },

    /// Field used with the wrong accessor (single vs. vector)
    #[error("Field kind mismatch: {0}")]
    FieldKind(String),

    /// Vector field index out of bounds
    #[error("Index {index} out of range for field '{field}' (len {len})")]
    IndexOutOfRange {
        field: String,
        index: usize,
        len: usize,
    },

    /// Property name not declared by the node's class
    #[error("Unknown property '{property}' on {class}")]
    UnknownProperty {
        class: &'static str,
        property: String,
    },

    /// No factory registered under this class name
    #[error("Unknown class: {0}")]
    UnknownClass(String),

    /// The node's class cannot be duplicated
    #[error("Class {0} cannot be cloned")]
    NotCloneable(&'static str),

    /// Errors related to configuration loading/saving
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Generic errors with context
    #[error("{context}: {source}")]
    WithContext {
        context: String,
        #[source]
        source: Box<CoreError>,
    },
}

impl CoreError {
    /// Add context to an error
    pub fn with_context(self, context: impl Into<String>) -> Self {
        CoreError::WithContext {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// Strip context wrappers and return the underlying error.
    pub fn root(&self) -> &CoreError {
        match self {
            CoreError::WithContext { source, .. } => source.root(),
            other => other,
        }
    }

    /// Whether this error represents a cancellation rather than a failure.
    pub fn is_canceled(&self) -> bool {
        matches!(self.root(), CoreError::Canceled)
    }
}

/// Result type alias for engine operations
pub type Result<T> = std::result::Result<T, CoreError>;

/// Extension trait for adding context to Results
pub trait ResultExt<T> {
    /// Add context to an error result
    fn context(self, context: impl Into<String>) -> Result<T>;

    /// Add context lazily to an error result
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;
}

impl<T> ResultExt<T> for Result<T> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.with_context(context))
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| e.with_context(f()))
    }
}
