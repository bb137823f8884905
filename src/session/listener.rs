//! Session listener callbacks
//!
//! All methods have empty defaults so a listener implements only what
//! it cares about. Callbacks run on the dispatcher task; implementations
//! must not block.

use std::sync::Arc;

use crate::breakpoint::BreakpointRequest;
use crate::vm::DebugEvent;

pub trait SessionListener: Send + Sync {
    /// The target launched and the session is live.
    fn app_started(&self) {}

    /// Execution suspended (breakpoint, step, exception, user pause).
    fn app_paused(&self) {}

    /// Execution resumed.
    fn app_resumed(&self) {}

    /// The session ended; the target exited or was disconnected.
    fn app_exited(&self) {}

    /// The current thread or frame selection changed at the user's
    /// request. Event-driven selection changes do not fire this.
    fn frame_changed(&self) {}

    /// Raw event fan-out, after the session updated its own state.
    fn process_debug_event(&self, _event: &DebugEvent) {}

    /// A breakpoint resolved and its event request was installed.
    fn request_set(&self, _request: &Arc<BreakpointRequest>) {}

    /// A breakpoint stayed deferred; no loaded class matches yet.
    fn request_deferred(&self, _request: &Arc<BreakpointRequest>) {}

    /// A breakpoint was removed.
    fn request_deleted(&self, _request: &Arc<BreakpointRequest>) {}

    /// A breakpoint became erroneous; it can never bind.
    fn request_error(&self, _request: &Arc<BreakpointRequest>) {}
}
