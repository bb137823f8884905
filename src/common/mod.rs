//! Shared plumbing: error types, logging setup, diagnostics sink.

pub mod error;
pub mod logging;

pub use error::{Error, ResolveError, Result};

/// Single-method collaborator for session-lifecycle notices
/// ("Connected to VM", launch failures, ...). No structured format is
/// mandated; consumers route the text wherever they like.
pub trait DiagnosticsSink: Send + Sync {
    fn put_string(&self, text: &str);
}

/// Default sink that forwards diagnostics to the `tracing` pipeline.
pub struct TracingSink;

impl DiagnosticsSink for TracingSink {
    fn put_string(&self, text: &str) {
        tracing::info!(target: "jdbg::diag", "{text}");
    }
}
