//! Error types for the debug session controller
//!
//! Failures scoped to a single breakpoint are carried by [`ResolveError`]
//! so the breakpoint UI can show a per-request explanation; everything
//! else goes through [`Error`]. Expression-evaluation failures have their
//! own type in the `eval` module because they are returned as evaluation
//! outcomes, never propagated.

use std::io;
use thiserror::Error;

use crate::vm::ObjectId;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Session-level error type
#[derive(Error, Debug)]
pub enum Error {
    // === Launch / connection ===
    #[error("Failed to launch target \"{main_class}\": {reason}")]
    LaunchFailure {
        main_class: String,
        reason: String,
        /// Captured stderr/stdout of the failed child, for diagnostics.
        output: String,
    },

    #[error("No active debug session")]
    NoActiveSession,

    #[error("Target VM disconnected")]
    ConnectionLost,

    // === Breakpoints ===
    #[error(transparent)]
    Resolve(#[from] ResolveError),

    // === Execution / selection ===
    #[error("No current thread")]
    NoCurrentThread,

    #[error("No current frame")]
    NoCurrentFrame,

    #[error("Frame {0} not found")]
    FrameNotFound(usize),

    #[error("Object {0} not found")]
    ObjectNotFound(ObjectId),

    // === Remote invocation ===
    #[error("Invoking {method} failed: {reason}")]
    Invocation { method: String, reason: String },

    #[error("Arguments match multiple overloads of {method}")]
    AmbiguousInvocation { method: String },

    #[error("Arguments match no overload of {method}")]
    NoMatchingMethod { method: String },

    // === IO / internal ===
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create an invocation error carrying the underlying cause.
    pub fn invocation(method: &str, reason: impl ToString) -> Self {
        Self::Invocation {
            method: method.to_string(),
            reason: reason.to_string(),
        }
    }
}

/// Why a breakpoint could not be bound to loaded code.
///
/// Non-fatal and scoped to one request; the `Display` strings are the
/// human-readable explanations shown next to an erroneous breakpoint.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ResolveError {
    #[error("No code at line {line} in {class_name}")]
    LineNotFound { class_name: String, line: u32 },

    #[error("No method {method} in {class_name}")]
    NoSuchMethod { class_name: String, method: String },

    #[error("Method {method} is overloaded; specify arguments")]
    AmbiguousMethod { method: String },

    #[error("Malformed member name: {0}")]
    MalformedMemberName(String),

    #[error("No field {field} in {class_name}")]
    NoSuchField { class_name: String, field: String },

    #[error("Breakpoints can be located only in classes; {class_name} is an interface or array")]
    UnsupportedKind { class_name: String },
}
