//! Error types for landmark-rs.
//!
//! Tracking calls never surface these; runtime problems are reported as
//! [`Diagnostic`](crate::diagnostic::Diagnostic)s instead. Errors are for
//! construction, configuration loading, and queries against the dispatcher.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The dispatcher task has stopped and can no longer answer.
    #[error("dispatcher is closed")]
    Closed,

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, Error>;
