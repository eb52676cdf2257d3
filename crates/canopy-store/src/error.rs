//! Error types for object stores.

use thiserror::Error;

/// Errors that can occur when talking to an object store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// I/O error on a local backend.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// No object exists under the key.
    #[error("Object not found: {0}")]
    NotFound(String),

    /// The key is empty, absolute, or escapes the store root.
    #[error("Invalid object key: {0}")]
    InvalidKey(String),

    /// HTTP request error.
    #[error("HTTP request error: {0}")]
    HttpRequest(#[from] reqwest::Error),

    /// The server answered with a non-success status.
    #[error("HTTP {status} for {method} {key}")]
    HttpStatus {
        /// Request method.
        method: &'static str,
        /// Object key or prefix.
        key: String,
        /// HTTP status code.
        status: u16,
    },

    /// The endpoint URL cannot address objects.
    #[error("Invalid endpoint URL: {0}")]
    InvalidEndpoint(String),

    /// A listing response could not be understood.
    #[error("Malformed listing response: {0}")]
    MalformedListing(String),
}

impl StoreError {
    /// Whether retrying the same request may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            StoreError::Io(_) | StoreError::HttpRequest(_) => true,
            StoreError::HttpStatus { status, .. } => *status >= 500 || *status == 429,
            _ => false,
        }
    }
}
