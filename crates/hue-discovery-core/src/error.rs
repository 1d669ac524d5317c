//! Error types for bridge discovery.
//!
//! These errors never cross the public search API: every search outcome is
//! delivered through the completion callback as a [`ReturnCode`]. They are
//! used internally by the protocol tasks (which recover from them locally)
//! and by constructors and config loading.
//!
//! [`ReturnCode`]: crate::types::ReturnCode

use thiserror::Error;

/// Result type alias using DiscoveryError as the error type.
pub type Result<T> = std::result::Result<T, DiscoveryError>;

/// Errors that can occur while discovering bridges
#[derive(Debug, Error)]
pub enum DiscoveryError {
    /// HTTP request failed or returned a non-success status
    #[error("HTTP request to {url} failed: {reason}")]
    Http { url: String, reason: String },

    /// Response body was not the expected JSON shape
    #[error("Invalid JSON response: {0}")]
    Json(#[from] serde_json::Error),

    /// No private IPv4 interface to operate on
    #[error("No usable private IPv4 network interface found")]
    NoNetworkInterface,

    /// mDNS responder failed
    #[error("mDNS error: {0}")]
    Mdns(String),

    /// Configuration failed validation
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Configuration could not be loaded
    #[error("Failed to load configuration from {path}: {reason}")]
    Config { path: String, reason: String },

    /// Async runtime could not be created
    #[error("Failed to start discovery runtime: {0}")]
    Runtime(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl DiscoveryError {
    /// Creates an HTTP error.
    pub fn http(url: impl Into<String>, reason: impl ToString) -> Self {
        Self::Http {
            url: url.into(),
            reason: reason.to_string(),
        }
    }
}
