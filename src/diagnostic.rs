//! Console-style diagnostics.
//!
//! Nothing the dispatcher does at runtime raises an error to the caller.
//! Problems are reported here instead, and the queue keeps draining.

use std::fmt;
use std::sync::{Arc, Mutex};

use serde_json::Value;
use tracing::warn;

/// A runtime problem worth telling the developer about.
#[derive(Debug, Clone, PartialEq)]
pub enum Diagnostic {
    /// No API key configured; nothing was sent.
    MissingApiKey,
    /// Neither a user id nor a device id is available; nothing was sent.
    IdentityUnavailable,
    /// The request went out but did not succeed.
    TransportFailed { url: String, response: Value },
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Diagnostic::MissingApiKey => {
                write!(f, "[landmark] API Key required. Please call initialize() first.")
            }
            Diagnostic::IdentityUnavailable => {
                write!(f, "[landmark] No user id and cookies are not enabled.")
            }
            Diagnostic::TransportFailed { url, response } => {
                write!(f, "[landmark] GET {url} failed: {response}")
            }
        }
    }
}

/// Receives diagnostics.
pub trait DiagnosticSink: Send + Sync {
    fn report(&self, diagnostic: &Diagnostic);
}

/// Forwards diagnostics to `tracing` at warn level.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl DiagnosticSink for TracingSink {
    fn report(&self, diagnostic: &Diagnostic) {
        warn!("{diagnostic}");
    }
}

/// Records diagnostics in memory, for tests and embedding hosts that want
/// to surface them themselves.
#[derive(Debug, Default, Clone)]
pub struct MemorySink {
    entries: Arc<Mutex<Vec<Diagnostic>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<Diagnostic> {
        self.entries
            .lock()
            .map(|entries| entries.clone())
            .unwrap_or_default()
    }
}

impl DiagnosticSink for MemorySink {
    fn report(&self, diagnostic: &Diagnostic) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.push(diagnostic.clone());
        }
    }
}
