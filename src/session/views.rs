//! Thread and frame views
//!
//! Lightweight presentation wrappers over the raw thread and frame
//! data. Frame descriptions are computed once and cached; a frame view
//! is discarded whenever its thread resumes, so the cache can never go
//! stale.

use std::sync::OnceLock;

use crate::vm::{Location, ThreadId, ThreadInfo, ThreadStatus};

pub struct ThreadView {
    pub info: ThreadInfo,
}

impl ThreadView {
    pub fn new(info: ThreadInfo) -> Self {
        Self { info }
    }

    pub fn id(&self) -> ThreadId {
        self.info.id
    }

    pub fn name(&self) -> &str {
        &self.info.name
    }

    /// Human-readable status, with a suspended marker.
    pub fn status_description(&self) -> String {
        let status = match self.info.status {
            ThreadStatus::Unknown => "unknown",
            ThreadStatus::Zombie => "zombie",
            ThreadStatus::Running => "running",
            ThreadStatus::Sleeping => "sleeping",
            ThreadStatus::Monitor => "waiting on monitor",
            ThreadStatus::Wait => "waiting",
        };
        if self.info.suspended {
            format!("{status} (suspended)")
        } else {
            status.to_string()
        }
    }
}

pub struct FrameView {
    pub thread: ThreadId,
    pub index: usize,
    pub location: Location,
    desc: OnceLock<String>,
}

impl FrameView {
    pub fn new(thread: ThreadId, index: usize, location: Location) -> Self {
        Self { thread, index, location, desc: OnceLock::new() }
    }

    /// "Class.method() line: N", cached after the first call.
    pub fn description(&self) -> &str {
        self.desc.get_or_init(|| self.location.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_description_marks_suspension() {
        let view = ThreadView::new(ThreadInfo {
            id: ThreadId(1),
            name: "main".into(),
            status: ThreadStatus::Wait,
            suspended: true,
        });
        assert_eq!(view.status_description(), "waiting (suspended)");
    }

    #[test]
    fn frame_description_is_cached() {
        let frame = FrameView::new(
            ThreadId(1),
            0,
            Location {
                class_name: "app.Foo".into(),
                method_name: Some("run".into()),
                line: 12,
            },
        );
        let first = frame.description() as *const str;
        let second = frame.description() as *const str;
        assert_eq!(frame.description(), "app.Foo.run() line: 12");
        assert_eq!(first, second);
    }
}
