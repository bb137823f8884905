//! Debug session controller
//!
//! `DebugSession` owns the connection to one target VM, the declared
//! breakpoints, the current thread/frame selection, and the listener
//! set. Control methods are called from any task; debug events arrive
//! on a dedicated dispatcher task (see `dispatch`). Shared state lives
//! in an `Arc<SessionInner>` guarded by short-lived std mutexes and
//! atomics; no lock is ever held across an await.

pub mod dispatch;
pub mod input;
pub mod listener;
pub mod views;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tokio::task::JoinHandle;
use tracing::debug;

use crate::breakpoint::{self, BreakpointRequest, Declaration};
use crate::common::{DiagnosticsSink, Error, Result, TracingSink};
use crate::vm::launch::{Connector, LaunchSpec};
use crate::vm::{
    ClassInfo, FrameInfo, ObjectId, ObjectRef, RequestSpec, StepDepth, StepSize,
    SuspendPolicy, ThreadId, TypeRegistry, Value, VmConnection,
};
use input::InputQueue;
use listener::SessionListener;
use views::{FrameView, ThreadView};

/// Current thread and frame selection. Frame index -1 means no frame.
#[derive(Debug, Clone, Copy)]
struct Selection {
    thread: Option<ThreadId>,
    frame_index: i32,
}

impl Default for Selection {
    fn default() -> Self {
        Self { thread: None, frame_index: -1 }
    }
}

pub(crate) struct SessionInner {
    connector: Box<dyn Connector>,
    launch_spec: Mutex<LaunchSpec>,
    conn: Mutex<Option<Arc<dyn VmConnection>>>,

    running: AtomicBool,
    paused: AtomicBool,
    terminated: AtomicBool,
    /// Set around a remote method invocation; events arriving while set
    /// are acknowledged but not acted upon.
    invoking: AtomicBool,

    selection: Mutex<Selection>,

    breakpoints: Mutex<Vec<Arc<BreakpointRequest>>>,
    listeners: Mutex<Vec<Arc<dyn SessionListener>>>,
    /// Declaration of a transient run-to-line breakpoint, removed when
    /// it first triggers.
    run_to_marker: Mutex<Option<Declaration>>,

    diagnostics: Arc<dyn DiagnosticsSink>,
    pub(crate) types: TypeRegistry,
    input: Arc<InputQueue>,

    dispatcher: Mutex<Option<JoinHandle<()>>>,
    input_task: Mutex<Option<JoinHandle<()>>>,
}

pub struct DebugSession {
    inner: Arc<SessionInner>,
}

impl DebugSession {
    pub fn new(connector: Box<dyn Connector>, spec: LaunchSpec) -> Self {
        Self::with_diagnostics(connector, spec, Arc::new(TracingSink))
    }

    pub fn with_diagnostics(
        connector: Box<dyn Connector>,
        spec: LaunchSpec,
        diagnostics: Arc<dyn DiagnosticsSink>,
    ) -> Self {
        Self {
            inner: Arc::new(SessionInner {
                connector,
                launch_spec: Mutex::new(spec),
                conn: Mutex::new(None),
                running: AtomicBool::new(false),
                paused: AtomicBool::new(false),
                terminated: AtomicBool::new(false),
                invoking: AtomicBool::new(false),
                selection: Mutex::new(Selection::default()),
                breakpoints: Mutex::new(Vec::new()),
                listeners: Mutex::new(Vec::new()),
                run_to_marker: Mutex::new(None),
                diagnostics,
                types: TypeRegistry::new(),
                input: Arc::new(InputQueue::new()),
                dispatcher: Mutex::new(None),
                input_task: Mutex::new(None),
            }),
        }
    }

    // === State ===

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    pub fn is_paused(&self) -> bool {
        self.inner.paused.load(Ordering::SeqCst)
    }

    pub fn is_terminated(&self) -> bool {
        self.inner.terminated.load(Ordering::SeqCst)
    }

    pub fn current_thread(&self) -> Option<ThreadId> {
        self.inner.selection.lock().unwrap().thread
    }

    pub fn current_frame_index(&self) -> i32 {
        self.inner.selection.lock().unwrap().frame_index
    }

    pub fn launch_spec(&self) -> LaunchSpec {
        self.inner.launch_spec.lock().unwrap().clone()
    }

    // === Lifecycle ===

    /// Launch the target and begin dispatching its events.
    pub async fn start(&self) -> Result<()> {
        let spec = self.launch_spec();
        if spec.main_class.is_empty() {
            return Err(Error::LaunchFailure {
                main_class: String::new(),
                reason: "No main class specified".into(),
                output: String::new(),
            });
        }

        // A session restarts cleanly over the same controller.
        self.end_session().await;

        let conn = self
            .inner
            .connector
            .launch(&spec, self.inner.diagnostics.as_ref())
            .await?;
        debug!(main_class = %spec.main_class, "target launched");

        self.inner.terminated.store(false, Ordering::SeqCst);
        self.inner.paused.store(false, Ordering::SeqCst);
        self.inner.running.store(true, Ordering::SeqCst);
        *self.inner.conn.lock().unwrap() = Some(conn.clone());
        self.inner.notice("Connected to VM");

        self.install_session_requests(&conn).await?;

        // Install declared breakpoints against already-loaded classes.
        let declared: Vec<Arc<BreakpointRequest>> =
            self.inner.breakpoints.lock().unwrap().clone();
        for bp in declared {
            self.inner.install(&bp).await;
        }

        let rx = conn
            .take_event_receiver()
            .ok_or_else(|| Error::Internal("event receiver already taken".into()))?;
        *self.inner.dispatcher.lock().unwrap() = Some(dispatch::spawn(self.inner.clone(), rx));

        if let Some(stdin) = conn.take_stdin() {
            *self.inner.input_task.lock().unwrap() =
                Some(input::spawn_relay(self.inner.input.clone(), stdin));
        }

        self.inner.notify_listeners(|l| l.app_started());
        Ok(())
    }

    async fn install_session_requests(&self, conn: &Arc<dyn VmConnection>) -> Result<()> {
        conn.create_request(RequestSpec::ClassPrepare, SuspendPolicy::All, None)
            .await?;
        conn.create_request(RequestSpec::ClassUnload, SuspendPolicy::None, None)
            .await?;
        conn.create_request(RequestSpec::ThreadStart, SuspendPolicy::None, None)
            .await?;
        conn.create_request(RequestSpec::ThreadDeath, SuspendPolicy::None, None)
            .await?;
        conn.create_request(
            RequestSpec::Exception { class_name: None, notify_caught: false, notify_uncaught: true },
            SuspendPolicy::All,
            None,
        )
        .await?;
        Ok(())
    }

    /// End the session, killing the target. Idempotent.
    pub async fn terminate(&self) -> Result<()> {
        self.end_session().await;
        Ok(())
    }

    async fn end_session(&self) {
        self.inner.end_session().await;
    }

    // === Execution control ===

    /// Suspend all target threads.
    pub async fn pause(&self) -> Result<()> {
        let conn = match self.inner.active_conn() {
            Some(c) => c,
            None => {
                self.inner.failure("No active debug session");
                return Err(Error::NoActiveSession);
            }
        };
        // Remember the prior pause state so a failed suspend does not
        // clobber it.
        let was_paused = self.inner.paused.swap(true, Ordering::SeqCst);
        match conn.suspend_all().await {
            Ok(()) => {
                self.inner.notify_listeners(|l| l.app_paused());
                Ok(())
            }
            Err(e) => {
                self.inner.paused.store(was_paused, Ordering::SeqCst);
                self.inner.failure(&format!("Pause failed: {e}"));
                Err(e)
            }
        }
    }

    /// Resume all target threads.
    pub async fn resume(&self) -> Result<()> {
        self.inner.resume_quiet().await?;
        self.inner.notify_listeners(|l| l.app_resumed());
        Ok(())
    }

    /// Take one step on the current thread. Replaces any step already
    /// pending on that thread.
    pub async fn step(&self, size: StepSize, depth: StepDepth) -> Result<()> {
        let thread = match self.current_thread() {
            Some(t) => t,
            None => {
                self.inner.failure("No current thread");
                return Ok(());
            }
        };
        let conn = match self.inner.active_conn() {
            Some(c) => c,
            None => return Err(Error::NoActiveSession),
        };
        conn.clear_step_requests(thread).await?;
        conn.create_request(
            RequestSpec::Step { thread, size, depth },
            SuspendPolicy::All,
            Some(1),
        )
        .await?;
        self.inner.resume_quiet().await
    }

    pub async fn step_into(&self) -> Result<()> {
        self.step(StepSize::Line, StepDepth::Into).await
    }

    pub async fn step_over(&self) -> Result<()> {
        self.step(StepSize::Line, StepDepth::Over).await
    }

    pub async fn step_out(&self) -> Result<()> {
        self.step(StepSize::Line, StepDepth::Out).await
    }

    /// Run until the given line is reached, via a transient breakpoint
    /// that removes itself when hit.
    pub async fn run_to_line(&self, class_name: &str, line: u32) -> Result<()> {
        let decl = Declaration::Line { class_name: class_name.to_string(), line };
        *self.inner.run_to_marker.lock().unwrap() = Some(decl.clone());
        self.add_breakpoint(decl).await;
        self.resume().await
    }

    // === Selection ===

    /// Change the current thread and frame at the user's request.
    /// Listeners are told via `frame_changed` when the selection
    /// actually changes.
    pub fn set_current_thread(&self, thread: Option<ThreadId>, frame_index: i32) {
        if self.inner.set_current_thread_quiet(thread, frame_index) {
            self.inner.notify_listeners(|l| l.frame_changed());
        }
    }

    pub fn set_current_frame_index(&self, frame_index: i32) {
        let thread = self.current_thread();
        self.set_current_thread(thread, frame_index);
    }

    // === Breakpoints ===

    /// Declare a breakpoint, installing it immediately when the session
    /// is live. A duplicate declaration returns the existing request.
    pub async fn add_breakpoint(&self, declaration: Declaration) -> Arc<BreakpointRequest> {
        {
            let breakpoints = self.inner.breakpoints.lock().unwrap();
            if let Some(existing) =
                breakpoints.iter().find(|bp| bp.declaration == declaration)
            {
                self.inner
                    .notice(&format!("Breakpoint {declaration} already declared"));
                return existing.clone();
            }
        }
        let bp = Arc::new(BreakpointRequest::new(declaration));
        self.inner.breakpoints.lock().unwrap().push(bp.clone());
        if self.is_running() {
            self.inner.install(&bp).await;
        }
        bp
    }

    /// Remove a declared breakpoint. Removing an unknown declaration is
    /// a no-op.
    pub async fn remove_breakpoint(&self, declaration: &Declaration) {
        let removed = {
            let mut breakpoints = self.inner.breakpoints.lock().unwrap();
            match breakpoints.iter().position(|bp| bp.declaration == *declaration) {
                Some(i) => Some(breakpoints.remove(i)),
                None => None,
            }
        };
        if let Some(bp) = removed {
            self.inner.delete_breakpoint(&bp).await;
        }
    }

    /// Delete a breakpoint request directly. Safe from any state, and
    /// every call notifies `request_deleted`, so a caller holding a
    /// stale handle still sees its deletion acknowledged.
    pub async fn delete_breakpoint(&self, bp: &Arc<BreakpointRequest>) {
        self.inner
            .breakpoints
            .lock()
            .unwrap()
            .retain(|known| !Arc::ptr_eq(known, bp));
        self.inner.delete_breakpoint(bp).await;
    }

    pub fn breakpoints(&self) -> Vec<Arc<BreakpointRequest>> {
        self.inner.breakpoints.lock().unwrap().clone()
    }

    // === Listeners ===

    pub fn add_listener(&self, listener: Arc<dyn SessionListener>) {
        self.inner.listeners.lock().unwrap().push(listener);
    }

    pub fn remove_listener(&self, listener: &Arc<dyn SessionListener>) {
        self.inner
            .listeners
            .lock()
            .unwrap()
            .retain(|l| !Arc::ptr_eq(l, listener));
    }

    // === Inspection ===

    /// All target threads, name-sorted. Empty when the query fails; the
    /// thread list is presentation data, not control flow.
    pub async fn get_threads(&self) -> Vec<ThreadView> {
        let conn = match self.inner.active_conn() {
            Some(c) => c,
            None => return Vec::new(),
        };
        match conn.all_threads().await {
            Ok(mut threads) => {
                threads.sort_by(|a, b| a.name.cmp(&b.name));
                threads.into_iter().map(ThreadView::new).collect()
            }
            Err(_) => Vec::new(),
        }
    }

    /// Stack frames of the current thread, top first.
    pub async fn get_frames(&self) -> Result<Vec<FrameView>> {
        let thread = self.current_thread().ok_or(Error::NoCurrentThread)?;
        let conn = self.inner.active_conn().ok_or(Error::NoActiveSession)?;
        let frames = conn.frames(thread).await?;
        Ok(frames
            .into_iter()
            .enumerate()
            .map(|(i, f)| FrameView::new(thread, i, f.location))
            .collect())
    }

    pub(crate) async fn current_frame(&self) -> Result<FrameInfo> {
        let thread = self.current_thread().ok_or(Error::NoCurrentThread)?;
        let index = self.current_frame_index();
        if index < 0 {
            return Err(Error::NoCurrentFrame);
        }
        let conn = self.inner.active_conn().ok_or(Error::NoActiveSession)?;
        let frames = conn.frames(thread).await?;
        frames
            .into_iter()
            .nth(index as usize)
            .ok_or(Error::FrameNotFound(index as usize))
    }

    /// `this` of the current frame, when the frame has one.
    pub async fn this_object(&self) -> Result<Option<Value>> {
        Ok(self.current_frame().await?.this_object)
    }

    /// Variable visible in the current frame.
    pub async fn visible_variable(&self, name: &str) -> Result<Option<Value>> {
        let thread = self.current_thread().ok_or(Error::NoCurrentThread)?;
        let index = self.current_frame_index();
        if index < 0 {
            return Err(Error::NoCurrentFrame);
        }
        let conn = self.inner.active_conn().ok_or(Error::NoActiveSession)?;
        conn.visible_variable(thread, index as usize, name).await
    }

    pub async fn field_value(&self, object: &ObjectRef, field: &str) -> Result<Option<Value>> {
        let conn = self.inner.active_conn().ok_or(Error::NoActiveSession)?;
        conn.field_value(object.id, field).await
    }

    pub async fn array_element(&self, array: ObjectId, index: usize) -> Result<Value> {
        let conn = self.inner.active_conn().ok_or(Error::NoActiveSession)?;
        conn.array_element(array, index).await
    }

    // === Remote invocation ===

    /// Invoke an instance method on a remote object from the current
    /// thread. Events that arrive while the invocation runs are
    /// suppressed.
    pub async fn invoke_method(
        &self,
        receiver: &Value,
        name: &str,
        args: Vec<Value>,
    ) -> Result<Value> {
        let thread = self.current_thread().ok_or(Error::NoCurrentThread)?;
        let conn = self.inner.active_conn().ok_or(Error::NoActiveSession)?;

        let (receiver_id, type_name) = match receiver {
            Value::Object(o) => (o.id, o.ty.name()),
            Value::Array(a) => (a.id, a.ty.name()),
            other => {
                return Err(Error::invocation(
                    name,
                    format!("receiver is {}, not an object", other.kind_name()),
                ))
            }
        };

        let classes = conn.classes_by_name(&type_name).await?;
        let mut candidates = Vec::new();
        for class in &classes {
            for method in &class.methods {
                if method.name == name && !method.is_static {
                    candidates.push(method);
                }
            }
        }
        if candidates.is_empty() {
            return Err(Error::NoMatchingMethod { method: name.to_string() });
        }
        let method = crate::vm::types::select_overload(&candidates, &args, &self.inner.types)?;

        debug!(method = %name, thread = %thread, "remote invocation");
        self.inner.invoking.store(true, Ordering::SeqCst);
        let result = conn.invoke_method(thread, receiver_id, method, args).await;
        self.inner.invoking.store(false, Ordering::SeqCst);

        match result {
            Ok(value) => Ok(value),
            Err(e) => {
                // A failed invocation leaves the thread suspended; keep
                // the session's view consistent with that.
                self.inner.paused.store(true, Ordering::SeqCst);
                self.inner.failure(&format!("Invoking {name} failed: {e}"));
                Err(Error::invocation(name, e))
            }
        }
    }

    /// Render a value for display, following object and array
    /// references into the target.
    pub async fn value_to_string(&self, value: &Value) -> String {
        match value {
            Value::Str(s) => s.clone(),
            Value::Array(a) => {
                let conn = match self.inner.active_conn() {
                    Some(c) => c,
                    None => return value.to_string(),
                };
                let elements = match conn.array_elements(a.id).await {
                    Ok(e) => e,
                    Err(_) => return value.to_string(),
                };
                let mut parts = Vec::with_capacity(elements.len());
                for element in &elements {
                    // Nested arrays render by reference, not content.
                    let text = match element {
                        Value::Array(_) => element.to_string(),
                        _ => Box::pin(self.value_to_string(element)).await,
                    };
                    parts.push(text);
                }
                format!("[{}]", parts.join(", "))
            }
            Value::Object(_) => {
                match Box::pin(self.invoke_method(value, "toString", Vec::new())).await {
                    Ok(result) => Box::pin(self.value_to_string(&result)).await,
                    Err(_) => value.to_string(),
                }
            }
            other => other.to_string(),
        }
    }

    // === Target stdin ===

    /// Queue a line of input for the target's stdin.
    pub fn send_line_to_app(&self, line: impl Into<String>) {
        self.inner.input.push(line);
    }
}

impl SessionInner {
    fn active_conn(&self) -> Option<Arc<dyn VmConnection>> {
        if !self.running.load(Ordering::SeqCst) {
            return None;
        }
        self.conn.lock().unwrap().clone()
    }

    /// Tear down the session. Safe to call from the dispatcher task
    /// itself; aborting the dispatcher handle is done last and only
    /// takes effect at its next await point.
    pub(crate) async fn end_session(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        self.terminated.store(true, Ordering::SeqCst);
        self.paused.store(false, Ordering::SeqCst);

        let conn = self.conn.lock().unwrap().take();
        if let Some(conn) = conn {
            // Best effort; the target may already be gone.
            let _ = conn.dispose().await;
            let _ = conn.destroy_process().await;
        }
        self.notice("Disconnected from VM");

        self.set_current_thread_quiet(None, -1);
        if let Some(handle) = self.input_task.lock().unwrap().take() {
            handle.abort();
        }
        self.notify_listeners(|l| l.app_exited());
        if let Some(handle) = self.dispatcher.lock().unwrap().take() {
            handle.abort();
        }
    }

    /// Resume without the `app_resumed` callback, for steps and
    /// internal reconciliation.
    pub(crate) async fn resume_quiet(&self) -> Result<()> {
        let conn = self.active_conn().ok_or(Error::NoActiveSession)?;
        self.paused.store(false, Ordering::SeqCst);
        let current = self.selection.lock().unwrap().thread;
        self.set_current_thread_quiet(current, -1);
        conn.resume_all().await
    }

    /// Update the selection without notifying listeners. Returns true
    /// when the selection changed.
    pub(crate) fn set_current_thread_quiet(
        &self,
        thread: Option<ThreadId>,
        frame_index: i32,
    ) -> bool {
        let mut selection = self.selection.lock().unwrap();
        if selection.thread == thread && selection.frame_index == frame_index {
            return false;
        }
        selection.thread = thread;
        selection.frame_index = frame_index;
        true
    }

    /// Try to install a breakpoint against the already-loaded classes.
    /// Stays deferred when nothing matches yet.
    pub(crate) async fn install(&self, bp: &Arc<BreakpointRequest>) {
        let conn = match self.active_conn() {
            Some(c) => c,
            None => return,
        };
        let classes = match conn.all_classes().await {
            Ok(c) => c,
            Err(e) => {
                self.failure(&format!("Class list unavailable: {e}"));
                return;
            }
        };
        let matched = classes
            .iter()
            .find(|c| breakpoint::class_matches(&bp.declaration, c));
        match matched {
            Some(class) => {
                self.resolve_and_install(bp, class, &classes, &conn).await;
            }
            None => {
                self.notify_listeners(|l| l.request_deferred(bp));
            }
        }
    }

    /// Resolution attempt when a class prepares. Skips requests that
    /// already left the Deferred state or do not match the class.
    pub(crate) async fn attempt_resolve(&self, bp: &Arc<BreakpointRequest>, class: &ClassInfo) {
        if !bp.is_deferred() || !breakpoint::class_matches(&bp.declaration, class) {
            return;
        }
        let conn = match self.active_conn() {
            Some(c) => c,
            None => return,
        };
        let loaded = conn.all_classes().await.unwrap_or_default();
        self.resolve_and_install(bp, class, &loaded, &conn).await;
    }

    async fn resolve_and_install(
        &self,
        bp: &Arc<BreakpointRequest>,
        class: &ClassInfo,
        loaded: &[ClassInfo],
        conn: &Arc<dyn VmConnection>,
    ) {
        match breakpoint::resolve_spec(&bp.declaration, class, loaded) {
            Ok(spec) => {
                match conn.create_request(spec, SuspendPolicy::All, None).await {
                    Ok(id) => {
                        if bp.mark_resolved(id) {
                            self.notice(&format!("Set breakpoint {}", bp.declaration));
                            self.notify_listeners(|l| l.request_set(bp));
                        }
                    }
                    Err(e) => {
                        // Transient connection trouble; stay deferred.
                        self.failure(&format!(
                            "Installing breakpoint {} failed: {e}",
                            bp.declaration
                        ));
                    }
                }
            }
            Err(resolve_error) => {
                let message = resolve_error.to_string();
                if bp.mark_erroneous(resolve_error) {
                    self.error(&message);
                    self.notify_listeners(|l| l.request_error(bp));
                }
            }
        }
    }

    /// Delete a breakpoint's installed event request and tell listeners.
    pub(crate) async fn delete_breakpoint(&self, bp: &Arc<BreakpointRequest>) {
        if let (Some(conn), Some(id)) = (self.active_conn(), bp.request_id()) {
            if let Err(e) = conn.delete_request(id).await {
                self.failure(&format!(
                    "Deleting breakpoint {} failed: {e}",
                    bp.declaration
                ));
            }
        }
        self.notify_listeners(|l| l.request_deleted(bp));
    }

    /// Remove a triggered run-to-line breakpoint, when one is pending
    /// at the given location.
    pub(crate) async fn clear_run_to_marker(&self, class_name: &str, line: u32) {
        let marker = {
            let mut marker = self.run_to_marker.lock().unwrap();
            match &*marker {
                Some(Declaration::Line { class_name: c, line: l })
                    if c == class_name && *l == line =>
                {
                    marker.take()
                }
                _ => None,
            }
        };
        if let Some(declaration) = marker {
            let removed = {
                let mut breakpoints = self.breakpoints.lock().unwrap();
                match breakpoints.iter().position(|bp| bp.declaration == declaration) {
                    Some(i) => Some(breakpoints.remove(i)),
                    None => None,
                }
            };
            if let Some(bp) = removed {
                self.delete_breakpoint(&bp).await;
            }
        }
    }

    pub(crate) fn is_invoking(&self) -> bool {
        self.invoking.load(Ordering::SeqCst)
    }

    /// Snapshot the listener list, then call back outside the lock.
    pub(crate) fn notify_listeners(&self, f: impl Fn(&dyn SessionListener)) {
        let listeners: Vec<Arc<dyn SessionListener>> =
            self.listeners.lock().unwrap().clone();
        for listener in listeners {
            f(listener.as_ref());
        }
    }

    pub(crate) fn notice(&self, text: &str) {
        self.diagnostics.put_string(text);
    }

    pub(crate) fn failure(&self, text: &str) {
        self.diagnostics.put_string(text);
        tracing::warn!(target: "jdbg::session", "{text}");
    }

    pub(crate) fn error(&self, text: &str) {
        self.diagnostics.put_string(text);
        tracing::error!(target: "jdbg::session", "{text}");
    }
}
