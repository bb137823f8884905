//! Input relay to the target's stdin
//!
//! Lines queued before the target starts (or while its stdin is busy)
//! are buffered and forwarded in order by a relay task.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::Notify;
use tokio::task::JoinHandle;

#[derive(Default)]
pub struct InputQueue {
    lines: Mutex<VecDeque<String>>,
    notify: Notify,
}

impl InputQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, line: impl Into<String>) {
        self.lines.lock().unwrap().push_back(line.into());
        self.notify.notify_one();
    }

    pub fn pop(&self) -> Option<String> {
        self.lines.lock().unwrap().pop_front()
    }

    /// Wait for the next queued line.
    pub async fn next_line(&self) -> String {
        loop {
            if let Some(line) = self.pop() {
                return line;
            }
            self.notify.notified().await;
        }
    }
}

/// Forward queued lines to the target's stdin, newline-terminated.
/// Ends when the write side closes.
pub fn spawn_relay(
    queue: Arc<InputQueue>,
    mut writer: Box<dyn AsyncWrite + Send + Unpin>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let line = queue.next_line().await;
            if writer.write_all(line.as_bytes()).await.is_err() {
                break;
            }
            if writer.write_all(b"\n").await.is_err() {
                break;
            }
            let _ = writer.flush().await;
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn queued_lines_come_out_in_order() {
        let queue = InputQueue::new();
        queue.push("first");
        queue.push("second");
        assert_eq!(queue.next_line().await, "first");
        assert_eq!(queue.next_line().await, "second");
        assert_eq!(queue.pop(), None);
    }

    #[tokio::test]
    async fn relay_writes_newline_terminated_lines() {
        let queue = Arc::new(InputQueue::new());
        let (client, mut server) = tokio::io::duplex(256);
        let handle = spawn_relay(queue.clone(), Box::new(client));

        queue.push("hello");
        let mut buf = [0u8; 6];
        tokio::io::AsyncReadExt::read_exact(&mut server, &mut buf).await.unwrap();
        assert_eq!(&buf, b"hello\n");
        handle.abort();
    }
}
