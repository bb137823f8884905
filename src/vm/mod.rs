//! Target VM model: identifiers, class and thread metadata, debug
//! events, and the [`VmConnection`] seam behind which the actual
//! platform debugging transport lives.

pub mod launch;
pub mod types;
pub mod value;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::AsyncWrite;
use tokio::sync::mpsc;

use crate::common::Result;
pub use types::{ArgMatch, PrimitiveType, TypeDesc, TypeRegistry};
pub use value::Value;

/// Opaque thread identifier in the target VM.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ThreadId(pub u64);

impl fmt::Display for ThreadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque object identifier in the target VM.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObjectId(pub u64);

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:x}", self.0)
    }
}

/// Identifier of an installed event request (breakpoint, step, ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequestId(pub u64);

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "req#{}", self.0)
    }
}

/// Reference to a remote object.
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectRef {
    pub id: ObjectId,
    pub ty: Arc<TypeDesc>,
}

/// Reference to a remote array.
#[derive(Debug, Clone, PartialEq)]
pub struct ArrayRef {
    pub id: ObjectId,
    pub ty: Arc<TypeDesc>,
    pub length: usize,
}

/// A source position in the target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Location {
    pub class_name: String,
    pub method_name: Option<String>,
    pub line: u32,
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.method_name {
            Some(m) => write!(f, "{}.{}() line: {}", self.class_name, m, self.line),
            None => write!(f, "{} line: {}", self.class_name, self.line),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodInfo {
    pub name: String,
    /// Fully-qualified parameter type names, arrays with `[]` suffixes.
    pub arg_type_names: Vec<String>,
    pub is_varargs: bool,
    pub is_static: bool,
    pub location: Location,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldInfo {
    pub name: String,
    pub type_name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClassKind {
    Class,
    Interface,
    Array,
}

/// Metadata for a loaded class.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassInfo {
    pub name: String,
    pub kind: ClassKind,
    /// True when the class was loaded by a throwaway loader that the
    /// target uses for scratch code; such classes never match
    /// breakpoint declarations.
    pub sandboxed_loader: bool,
    pub methods: Vec<MethodInfo>,
    pub fields: Vec<FieldInfo>,
    /// Executable locations keyed by line.
    pub line_locations: Vec<Location>,
}

impl ClassInfo {
    pub fn locations_of_line(&self, line: u32) -> Vec<&Location> {
        self.line_locations.iter().filter(|l| l.line == line).collect()
    }

    pub fn field_by_name(&self, name: &str) -> Option<&FieldInfo> {
        self.fields.iter().find(|f| f.name == name)
    }
}

/// Which threads an event suspends when it fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SuspendPolicy {
    All,
    EventThread,
    None,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DebugEvent {
    pub kind: EventKind,
    pub suspend_policy: SuspendPolicy,
}

impl DebugEvent {
    pub fn suspended(kind: EventKind) -> Self {
        Self { kind, suspend_policy: SuspendPolicy::All }
    }

    pub fn unsuspended(kind: EventKind) -> Self {
        Self { kind, suspend_policy: SuspendPolicy::None }
    }

    /// Thread the event occurred on, when it has one.
    pub fn thread(&self) -> Option<ThreadId> {
        match &self.kind {
            EventKind::VmStart { thread } => Some(*thread),
            EventKind::ThreadStart { thread } | EventKind::ThreadDeath { thread } => Some(*thread),
            EventKind::ClassPrepare { thread, .. } => Some(*thread),
            EventKind::LocationTrigger { thread, .. } => Some(*thread),
            EventKind::ExceptionThrown { thread, .. } => Some(*thread),
            EventKind::AccessWatchpoint { thread, .. } => Some(*thread),
            EventKind::ModificationWatchpoint { thread, .. } => Some(*thread),
            EventKind::VmDisconnect | EventKind::ClassUnload { .. } => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum EventKind {
    VmStart { thread: ThreadId },
    VmDisconnect,
    ThreadStart { thread: ThreadId },
    ThreadDeath { thread: ThreadId },
    ClassPrepare { thread: ThreadId, class: ClassInfo },
    ClassUnload { class_name: String },
    /// Breakpoint hit or step completed.
    LocationTrigger {
        thread: ThreadId,
        location: Location,
        request: RequestId,
    },
    ExceptionThrown {
        thread: ThreadId,
        exception: Value,
        catch_location: Option<Location>,
    },
    AccessWatchpoint {
        thread: ThreadId,
        field: FieldInfo,
        value: Value,
    },
    ModificationWatchpoint {
        thread: ThreadId,
        field: FieldInfo,
        value_to_be: Value,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepSize {
    Instruction,
    Line,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepDepth {
    Into,
    Over,
    Out,
}

/// What kind of event request to install in the target.
#[derive(Debug, Clone, PartialEq)]
pub enum RequestSpec {
    Breakpoint { location: Location },
    Exception {
        /// None requests notification for all throwable classes.
        class_name: Option<String>,
        notify_caught: bool,
        notify_uncaught: bool,
    },
    AccessWatchpoint { class_name: String, field: String },
    ModificationWatchpoint { class_name: String, field: String },
    Step { thread: ThreadId, size: StepSize, depth: StepDepth },
    ClassPrepare,
    ClassUnload,
    ThreadStart,
    ThreadDeath,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadStatus {
    Unknown,
    Zombie,
    Running,
    Sleeping,
    Monitor,
    Wait,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThreadInfo {
    pub id: ThreadId,
    pub name: String,
    pub status: ThreadStatus,
    pub suspended: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FrameInfo {
    pub location: Location,
    pub this_object: Option<Value>,
}

/// Transport-agnostic connection to a live target VM.
///
/// One implementation speaks the real wire protocol; tests use a
/// scripted mock. Event delivery is a channel handed out once via
/// `take_event_receiver`; the session's dispatcher owns it afterwards.
#[async_trait]
pub trait VmConnection: Send + Sync {
    async fn all_classes(&self) -> Result<Vec<ClassInfo>>;

    async fn classes_by_name(&self, name: &str) -> Result<Vec<ClassInfo>>;

    /// Install an event request. `count_filter` limits how many times
    /// the request fires before the target disables it.
    async fn create_request(
        &self,
        spec: RequestSpec,
        policy: SuspendPolicy,
        count_filter: Option<u32>,
    ) -> Result<RequestId>;

    async fn delete_request(&self, id: RequestId) -> Result<()>;

    /// Remove all step requests for the given thread.
    async fn clear_step_requests(&self, thread: ThreadId) -> Result<()>;

    async fn suspend_all(&self) -> Result<()>;

    async fn resume_all(&self) -> Result<()>;

    async fn all_threads(&self) -> Result<Vec<ThreadInfo>>;

    async fn frames(&self, thread: ThreadId) -> Result<Vec<FrameInfo>>;

    /// Look up a variable visible in the given frame.
    async fn visible_variable(
        &self,
        thread: ThreadId,
        frame_index: usize,
        name: &str,
    ) -> Result<Option<Value>>;

    async fn field_value(&self, object: ObjectId, field: &str) -> Result<Option<Value>>;

    async fn array_element(&self, array: ObjectId, index: usize) -> Result<Value>;

    async fn array_elements(&self, array: ObjectId) -> Result<Vec<Value>>;

    /// Run a method in the target on the given thread. The thread must
    /// be suspended by an event; it is resumed for the duration of the
    /// call and re-suspended afterwards by the target.
    async fn invoke_method(
        &self,
        thread: ThreadId,
        receiver: ObjectId,
        method: &MethodInfo,
        args: Vec<Value>,
    ) -> Result<Value>;

    /// Detach from the target, letting it run free.
    async fn dispose(&self) -> Result<()>;

    /// Kill the target process.
    async fn destroy_process(&self) -> Result<()>;

    /// Hand out the event stream. Returns `None` after the first call.
    fn take_event_receiver(&self) -> Option<mpsc::UnboundedReceiver<DebugEvent>>;

    /// Hand out the target's stdin for input relay, when the connection
    /// launched the process itself. Returns `None` after the first call
    /// or for attached targets.
    fn take_stdin(&self) -> Option<Box<dyn AsyncWrite + Send + Unpin>>;
}
