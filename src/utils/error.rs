//! Error Handling Module
//!
//! Defines the error type shared by the co-teaching library.
//! Uses thiserror for ergonomic error definitions.

use std::path::PathBuf;

use thiserror::Error;

/// Main error type for co-teaching operations
#[derive(Error, Debug)]
pub enum CoTeachingError {
    /// Error loading or decoding an image
    #[error("Failed to load image at '{0}': {1}")]
    ImageLoad(PathBuf, String),

    /// Error with dataset operations
    #[error("Dataset error: {0}")]
    Dataset(String),

    /// Batch sampler could not be built from the given labels
    #[error("Sampler error: {0}")]
    Sampler(String),

    /// Error with model construction or forward passes
    #[error("Model error: {0}")]
    Model(String),

    /// Error saving or restoring a checkpoint
    #[error("Checkpoint error: {0}")]
    Checkpoint(String),

    /// Error raised during a training step (e.g. a non-finite loss)
    #[error("Training error: {0}")]
    Training(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Path not found
    #[error("Path not found: {0}")]
    PathNotFound(PathBuf),
}

impl From<serde_json::Error> for CoTeachingError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// Convenience Result type for co-teaching operations
pub type Result<T> = std::result::Result<T, CoTeachingError>;

/// Extension trait for adding context to errors
pub trait ResultExt<T> {
    /// Add context to an error
    fn context(self, msg: &str) -> Result<T>;

    /// Add context with a closure (lazy evaluation)
    fn with_context<F: FnOnce() -> String>(self, f: F) -> Result<T>;
}

impl<T, E: std::fmt::Debug> ResultExt<T> for std::result::Result<T, E> {
    fn context(self, msg: &str) -> Result<T> {
        self.map_err(|e| CoTeachingError::Model(format!("{}: {:?}", msg, e)))
    }

    fn with_context<F: FnOnce() -> String>(self, f: F) -> Result<T> {
        self.map_err(|e| CoTeachingError::Model(format!("{}: {:?}", f(), e)))
    }
}
