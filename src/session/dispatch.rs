//! Event dispatch
//!
//! A dedicated task drains the connection's event channel and applies
//! each event to the session: resolving deferred breakpoints on class
//! prepare, moving the selection to the triggering thread, and
//! reconciling the target's suspend state with whether the session
//! actually wants to stay paused. Events that suspended the target but
//! did not produce a reason to stay paused resume it quietly.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::common::Error;
use crate::session::SessionInner;
use crate::vm::{DebugEvent, EventKind, SuspendPolicy};

pub(crate) fn spawn(
    inner: Arc<SessionInner>,
    mut rx: mpsc::UnboundedReceiver<DebugEvent>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let event = match rx.recv().await {
                Some(event) => event,
                // Channel closed without a disconnect event; the
                // connection died out from under us.
                None => {
                    inner.failure(&Error::ConnectionLost.to_string());
                    inner.end_session().await;
                    break;
                }
            };
            let disconnect = matches!(event.kind, EventKind::VmDisconnect);
            inner.dispatch_event(event).await;
            if disconnect {
                break;
            }
        }
    })
}

impl SessionInner {
    pub(crate) async fn dispatch_event(&self, event: DebugEvent) {
        debug!(target: "jdbg::dispatch", ?event, "event");
        let suspended = event.suspend_policy != SuspendPolicy::None;

        // A remote invocation resumes the target under us; events that
        // slip out during it must not disturb the session state. Class
        // loads still feed breakpoint resolution.
        if self.is_invoking() {
            if let EventKind::ClassPrepare { class, .. } = &event.kind {
                self.resolve_deferred(class).await;
            }
            if suspended {
                let conn = self.conn.lock().unwrap().clone();
                if let Some(conn) = conn {
                    let _ = conn.resume_all().await;
                }
            }
            return;
        }

        let mut wants_pause = self.paused.load(Ordering::SeqCst);

        match &event.kind {
            EventKind::VmDisconnect => {
                self.end_session().await;
                return;
            }
            EventKind::ClassPrepare { class, .. } => {
                self.resolve_deferred(class).await;
            }
            EventKind::LocationTrigger { thread, location, .. } => {
                self.clear_run_to_marker(&location.class_name, location.line)
                    .await;
                self.set_current_thread_quiet(Some(*thread), 0);
                wants_pause = true;
            }
            EventKind::ExceptionThrown { thread, .. } => {
                self.set_current_thread_quiet(Some(*thread), 0);
                wants_pause = true;
            }
            // Watchpoints stop the target but leave the selection where
            // the user had it.
            EventKind::AccessWatchpoint { .. } | EventKind::ModificationWatchpoint { .. } => {
                wants_pause = true;
            }
            EventKind::VmStart { .. }
            | EventKind::ThreadStart { .. }
            | EventKind::ThreadDeath { .. }
            | EventKind::ClassUnload { .. } => {}
        }

        // Reconcile the target's suspension with the session's wish.
        if suspended {
            if !wants_pause {
                let _ = self.resume_quiet().await;
            } else if !self.paused.swap(true, Ordering::SeqCst) {
                self.notify_listeners(|l| l.app_paused());
            }
        }

        self.notify_listeners(|l| l.process_debug_event(&event));
    }

    async fn resolve_deferred(&self, class: &crate::vm::ClassInfo) {
        let deferred: Vec<_> = {
            let breakpoints = self.breakpoints.lock().unwrap();
            breakpoints.iter().filter(|bp| bp.is_deferred()).cloned().collect()
        };
        for bp in deferred {
            self.attempt_resolve(&bp, class).await;
        }
    }
}
