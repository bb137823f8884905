//! jdbg: a remote debugging session controller
//!
//! Attaches a controller to a JVM-style target process, tracks declared
//! breakpoints against dynamically loading classes, dispatches the
//! target's debug events, and supports pause/resume/step, remote method
//! invocation and expression evaluation against a paused frame.
//!
//! The transport to the target sits behind [`vm::VmConnection`]; the
//! `testing` module provides a scripted implementation for embedders'
//! test suites as well as this crate's own.

pub mod breakpoint;
pub mod common;
pub mod eval;
pub mod session;
pub mod testing;
pub mod vm;

pub use breakpoint::{BreakpointRequest, Declaration, Status};
pub use common::{DiagnosticsSink, Error, ResolveError, Result, TracingSink};
pub use eval::{EvalError, EvalOutcome, ExpressionEvaluator};
pub use session::listener::SessionListener;
pub use session::DebugSession;
pub use vm::launch::{Connector, LaunchSpec};
pub use vm::{Value, VmConnection};
