//! Scripted connection for tests
//!
//! `MockVm` implements [`VmConnection`] over in-memory tables: tests
//! preload classes, threads, frames and values, push events into the
//! session's dispatcher, and inspect what the session asked the target
//! to do.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::io::AsyncWrite;
use tokio::sync::mpsc;

use crate::common::{DiagnosticsSink, Error, Result};
use crate::vm::launch::{Connector, LaunchSpec};
use crate::vm::{
    ClassInfo, DebugEvent, EventKind, FrameInfo, MethodInfo, ObjectId, RequestId,
    RequestSpec, SuspendPolicy, ThreadId, ThreadInfo, Value, VmConnection,
};

#[derive(Debug, Clone)]
pub struct InstalledRequest {
    pub id: RequestId,
    pub spec: RequestSpec,
    pub policy: SuspendPolicy,
    pub count_filter: Option<u32>,
}

#[derive(Debug, Clone)]
pub struct RecordedInvocation {
    pub thread: ThreadId,
    pub receiver: ObjectId,
    pub method: String,
    pub args: Vec<Value>,
}

pub struct MockVm {
    classes: Mutex<Vec<ClassInfo>>,
    threads: Mutex<Vec<ThreadInfo>>,
    frames: Mutex<HashMap<ThreadId, Vec<FrameInfo>>>,
    locals: Mutex<HashMap<(ThreadId, usize, String), Value>>,
    fields: Mutex<HashMap<(ObjectId, String), Value>>,
    arrays: Mutex<HashMap<ObjectId, Vec<Value>>>,
    invoke_results: Mutex<HashMap<(ObjectId, String), Value>>,
    /// Events emitted mid-invocation, to exercise event suppression.
    invoke_events: Mutex<Vec<DebugEvent>>,
    fail_invokes: AtomicBool,

    installed: Mutex<Vec<InstalledRequest>>,
    deleted: Mutex<Vec<RequestId>>,
    invocations: Mutex<Vec<RecordedInvocation>>,
    next_request: AtomicU64,
    resumes: AtomicUsize,
    suspends: AtomicUsize,
    disposed: AtomicBool,

    event_tx: Mutex<Option<mpsc::UnboundedSender<DebugEvent>>>,
    event_rx: Mutex<Option<mpsc::UnboundedReceiver<DebugEvent>>>,
}

impl MockVm {
    pub fn new() -> Arc<Self> {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        Arc::new(Self {
            classes: Mutex::new(Vec::new()),
            threads: Mutex::new(Vec::new()),
            frames: Mutex::new(HashMap::new()),
            locals: Mutex::new(HashMap::new()),
            fields: Mutex::new(HashMap::new()),
            arrays: Mutex::new(HashMap::new()),
            invoke_results: Mutex::new(HashMap::new()),
            invoke_events: Mutex::new(Vec::new()),
            fail_invokes: AtomicBool::new(false),
            installed: Mutex::new(Vec::new()),
            deleted: Mutex::new(Vec::new()),
            invocations: Mutex::new(Vec::new()),
            next_request: AtomicU64::new(1),
            resumes: AtomicUsize::new(0),
            suspends: AtomicUsize::new(0),
            disposed: AtomicBool::new(false),
            event_tx: Mutex::new(Some(event_tx)),
            event_rx: Mutex::new(Some(event_rx)),
        })
    }

    // === Scripting ===

    pub fn add_class(&self, class: ClassInfo) {
        self.classes.lock().unwrap().push(class);
    }

    pub fn add_thread(&self, thread: ThreadInfo) {
        self.threads.lock().unwrap().push(thread);
    }

    pub fn set_frames(&self, thread: ThreadId, frames: Vec<FrameInfo>) {
        self.frames.lock().unwrap().insert(thread, frames);
    }

    pub fn set_local(&self, thread: ThreadId, frame: usize, name: &str, value: Value) {
        self.locals
            .lock()
            .unwrap()
            .insert((thread, frame, name.to_string()), value);
    }

    pub fn set_field(&self, object: ObjectId, name: &str, value: Value) {
        self.fields
            .lock()
            .unwrap()
            .insert((object, name.to_string()), value);
    }

    pub fn set_array(&self, array: ObjectId, elements: Vec<Value>) {
        self.arrays.lock().unwrap().insert(array, elements);
    }

    pub fn script_invoke(&self, receiver: ObjectId, method: &str, result: Value) {
        self.invoke_results
            .lock()
            .unwrap()
            .insert((receiver, method.to_string()), result);
    }

    /// Queue an event that fires while the next invocation is running.
    pub fn script_invoke_event(&self, event: DebugEvent) {
        self.invoke_events.lock().unwrap().push(event);
    }

    pub fn fail_invokes(&self, fail: bool) {
        self.fail_invokes.store(fail, Ordering::SeqCst);
    }

    /// Deliver an event to the session's dispatcher.
    pub fn push_event(&self, event: DebugEvent) {
        if let Some(tx) = &*self.event_tx.lock().unwrap() {
            let _ = tx.send(event);
        }
    }

    /// Close the event channel without a disconnect event, as a dying
    /// transport would.
    pub fn close_events(&self) {
        self.event_tx.lock().unwrap().take();
    }

    /// Add a class and announce it with a suspending class-prepare
    /// event, as the target does when new code loads.
    pub fn emit_class_prepare(&self, thread: ThreadId, class: ClassInfo) {
        self.add_class(class.clone());
        self.push_event(DebugEvent::suspended(EventKind::ClassPrepare { thread, class }));
    }

    // === Inspection ===

    pub fn installed_requests(&self) -> Vec<InstalledRequest> {
        self.installed.lock().unwrap().clone()
    }

    pub fn deleted_requests(&self) -> Vec<RequestId> {
        self.deleted.lock().unwrap().clone()
    }

    pub fn invocations(&self) -> Vec<RecordedInvocation> {
        self.invocations.lock().unwrap().clone()
    }

    pub fn step_requests(&self, thread: ThreadId) -> Vec<InstalledRequest> {
        self.installed
            .lock()
            .unwrap()
            .iter()
            .filter(|r| matches!(r.spec, RequestSpec::Step { thread: t, .. } if t == thread))
            .cloned()
            .collect()
    }

    pub fn resume_count(&self) -> usize {
        self.resumes.load(Ordering::SeqCst)
    }

    pub fn suspend_count(&self) -> usize {
        self.suspends.load(Ordering::SeqCst)
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl VmConnection for MockVm {
    async fn all_classes(&self) -> Result<Vec<ClassInfo>> {
        Ok(self.classes.lock().unwrap().clone())
    }

    async fn classes_by_name(&self, name: &str) -> Result<Vec<ClassInfo>> {
        Ok(self
            .classes
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.name == name)
            .cloned()
            .collect())
    }

    async fn create_request(
        &self,
        spec: RequestSpec,
        policy: SuspendPolicy,
        count_filter: Option<u32>,
    ) -> Result<RequestId> {
        let id = RequestId(self.next_request.fetch_add(1, Ordering::SeqCst));
        self.installed.lock().unwrap().push(InstalledRequest {
            id,
            spec,
            policy,
            count_filter,
        });
        Ok(id)
    }

    async fn delete_request(&self, id: RequestId) -> Result<()> {
        self.installed.lock().unwrap().retain(|r| r.id != id);
        self.deleted.lock().unwrap().push(id);
        Ok(())
    }

    async fn clear_step_requests(&self, thread: ThreadId) -> Result<()> {
        self.installed.lock().unwrap().retain(|r| {
            !matches!(r.spec, RequestSpec::Step { thread: t, .. } if t == thread)
        });
        Ok(())
    }

    async fn suspend_all(&self) -> Result<()> {
        self.suspends.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn resume_all(&self) -> Result<()> {
        self.resumes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn all_threads(&self) -> Result<Vec<ThreadInfo>> {
        Ok(self.threads.lock().unwrap().clone())
    }

    async fn frames(&self, thread: ThreadId) -> Result<Vec<FrameInfo>> {
        Ok(self
            .frames
            .lock()
            .unwrap()
            .get(&thread)
            .cloned()
            .unwrap_or_default())
    }

    async fn visible_variable(
        &self,
        thread: ThreadId,
        frame_index: usize,
        name: &str,
    ) -> Result<Option<Value>> {
        Ok(self
            .locals
            .lock()
            .unwrap()
            .get(&(thread, frame_index, name.to_string()))
            .cloned())
    }

    async fn field_value(&self, object: ObjectId, field: &str) -> Result<Option<Value>> {
        Ok(self
            .fields
            .lock()
            .unwrap()
            .get(&(object, field.to_string()))
            .cloned())
    }

    async fn array_element(&self, array: ObjectId, index: usize) -> Result<Value> {
        self.arrays
            .lock()
            .unwrap()
            .get(&array)
            .and_then(|elements| elements.get(index).cloned())
            .ok_or(Error::ObjectNotFound(array))
    }

    async fn array_elements(&self, array: ObjectId) -> Result<Vec<Value>> {
        self.arrays
            .lock()
            .unwrap()
            .get(&array)
            .cloned()
            .ok_or(Error::ObjectNotFound(array))
    }

    async fn invoke_method(
        &self,
        thread: ThreadId,
        receiver: ObjectId,
        method: &MethodInfo,
        args: Vec<Value>,
    ) -> Result<Value> {
        self.invocations.lock().unwrap().push(RecordedInvocation {
            thread,
            receiver,
            method: method.name.clone(),
            args,
        });

        // Fire any scripted mid-invocation events and yield so the
        // dispatcher sees them while the invocation is in flight.
        let events: Vec<DebugEvent> = self.invoke_events.lock().unwrap().drain(..).collect();
        if !events.is_empty() {
            for event in events {
                self.push_event(event);
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }

        if self.fail_invokes.load(Ordering::SeqCst) {
            return Err(Error::Internal("scripted invocation failure".into()));
        }
        self.invoke_results
            .lock()
            .unwrap()
            .get(&(receiver, method.name.clone()))
            .cloned()
            .ok_or_else(|| Error::Internal(format!("no scripted result for {}", method.name)))
    }

    async fn dispose(&self) -> Result<()> {
        self.disposed.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn destroy_process(&self) -> Result<()> {
        Ok(())
    }

    fn take_event_receiver(&self) -> Option<mpsc::UnboundedReceiver<DebugEvent>> {
        self.event_rx.lock().unwrap().take()
    }

    fn take_stdin(&self) -> Option<Box<dyn AsyncWrite + Send + Unpin>> {
        None
    }
}

/// Connector handing out a prebuilt [`MockVm`].
pub struct MockConnector {
    vm: Arc<MockVm>,
}

impl MockConnector {
    pub fn new(vm: Arc<MockVm>) -> Box<Self> {
        Box::new(Self { vm })
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn launch(
        &self,
        _spec: &LaunchSpec,
        _diagnostics: &dyn DiagnosticsSink,
    ) -> Result<Arc<dyn VmConnection>> {
        Ok(self.vm.clone())
    }
}

/// Connector whose launches always fail.
pub struct FailingConnector;

#[async_trait]
impl Connector for FailingConnector {
    async fn launch(
        &self,
        spec: &LaunchSpec,
        _diagnostics: &dyn DiagnosticsSink,
    ) -> Result<Arc<dyn VmConnection>> {
        Err(Error::LaunchFailure {
            main_class: spec.main_class.clone(),
            reason: "scripted launch failure".into(),
            output: String::new(),
        })
    }
}

/// Minimal class description for tests.
pub fn class_fixture(name: &str) -> ClassInfo {
    ClassInfo {
        name: name.to_string(),
        kind: crate::vm::ClassKind::Class,
        sandboxed_loader: false,
        methods: Vec::new(),
        fields: Vec::new(),
        line_locations: Vec::new(),
    }
}
