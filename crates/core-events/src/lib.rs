//! Background-to-editor message queue.
//!
//! The editor core is single-threaded: every document mutation, highlight
//! update, and plugin dispatch runs on the editor thread. Background I/O
//! (file loads, language-server traffic) runs on its own threads and talks
//! back exclusively by posting messages here. The editor thread drains the
//! queue at designated points (between keystrokes, never mid-operation), so
//! edits are observed in submission order.
//!
//! The channel is bounded for memory safety. Producers use try-semantics:
//! a full queue drops the message and bumps a counter rather than blocking
//! an I/O thread against a wedged UI, on the theory that a reader who falls
//! this far behind needs a resync, not a backlog.

use std::sync::atomic::{AtomicU64, Ordering};

use core_text::EditKind;
use crossbeam_channel::{Receiver, Sender, TrySendError, bounded};
use tracing::warn;

pub const MSG_QUEUE_CAP: usize = 4096;

/// Messages dropped because the queue was full (process-wide telemetry).
pub static QUEUE_DROPS: AtomicU64 = AtomicU64::new(0);

/// One message posted from a background thread to the editor thread.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EditorMsg {
    /// A background file read finished.
    FileLoaded { path: String, text: String },
    /// Language-server diagnostics for a document version.
    Diagnostics {
        version: u64,
        items: Vec<Diagnostic>,
    },
    /// Language-server edit request, applied by the editor thread only.
    ApplyEdit { expected_version: u64, edit: EditKind },
    /// A plugin or tool emitted a log line for the operational log.
    PluginLog { plugin_id: String, line: String },
    Shutdown,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub start_byte: usize,
    pub end_byte: usize,
    pub severity: Severity,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Error,
    Warning,
    Info,
    Hint,
}

/// Producer handle cloned into background threads.
#[derive(Clone)]
pub struct MsgSender {
    tx: Sender<EditorMsg>,
}

impl MsgSender {
    /// Post without blocking. Returns false (and counts the drop) when the
    /// queue is full or the editor is gone.
    pub fn post(&self, msg: EditorMsg) -> bool {
        match self.tx.try_send(msg) {
            Ok(()) => true,
            Err(TrySendError::Full(msg)) => {
                QUEUE_DROPS.fetch_add(1, Ordering::Relaxed);
                warn!(target: "events", ?msg, "message queue full, dropping");
                false
            }
            Err(TrySendError::Disconnected(_)) => false,
        }
    }
}

/// Editor-thread end of the queue.
pub struct MsgQueue {
    tx: Sender<EditorMsg>,
    rx: Receiver<EditorMsg>,
}

impl Default for MsgQueue {
    fn default() -> Self {
        Self::new(MSG_QUEUE_CAP)
    }
}

impl MsgQueue {
    pub fn new(capacity: usize) -> Self {
        let (tx, rx) = bounded(capacity);
        Self { tx, rx }
    }

    pub fn sender(&self) -> MsgSender {
        MsgSender {
            tx: self.tx.clone(),
        }
    }

    /// Drain everything currently queued, in FIFO order. Non-blocking; the
    /// editor thread calls this between keystrokes.
    pub fn drain(&self) -> Vec<EditorMsg> {
        let mut out = Vec::new();
        while let Ok(msg) = self.rx.try_recv() {
            out.push(msg);
        }
        out
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fifo_order_preserved() {
        let queue = MsgQueue::new(8);
        let sender = queue.sender();
        for i in 0..3 {
            sender.post(EditorMsg::PluginLog {
                plugin_id: "p".to_string(),
                line: format!("line {i}"),
            });
        }
        let drained = queue.drain();
        assert_eq!(drained.len(), 3);
        assert_eq!(
            drained[0],
            EditorMsg::PluginLog {
                plugin_id: "p".to_string(),
                line: "line 0".to_string()
            }
        );
        assert!(queue.is_empty());
    }

    #[test]
    fn cross_thread_posting() {
        let queue = MsgQueue::default();
        let sender = queue.sender();
        let handle = std::thread::spawn(move || {
            sender.post(EditorMsg::FileLoaded {
                path: "/tmp/a".to_string(),
                text: "content".to_string(),
            })
        });
        assert!(handle.join().unwrap());
        assert_eq!(queue.drain().len(), 1);
    }

    #[test]
    fn full_queue_drops_and_counts() {
        let queue = MsgQueue::new(1);
        let sender = queue.sender();
        let before = QUEUE_DROPS.load(Ordering::Relaxed);
        assert!(sender.post(EditorMsg::Shutdown));
        assert!(!sender.post(EditorMsg::Shutdown));
        assert_eq!(QUEUE_DROPS.load(Ordering::Relaxed), before + 1);
        assert_eq!(queue.drain().len(), 1);
    }

    #[test]
    fn edits_apply_in_submission_order() {
        let queue = MsgQueue::default();
        let sender = queue.sender();
        sender.post(EditorMsg::ApplyEdit {
            expected_version: 0,
            edit: EditKind::Insert {
                offset: 0,
                text: "ab".to_string(),
            },
        });
        sender.post(EditorMsg::ApplyEdit {
            expected_version: 1,
            edit: EditKind::Insert {
                offset: 2,
                text: "cd".to_string(),
            },
        });

        let mut doc = core_text::Document::new();
        for msg in queue.drain() {
            if let EditorMsg::ApplyEdit {
                expected_version,
                edit,
            } = msg
            {
                assert_eq!(doc.version(), expected_version);
                doc.apply(&edit).unwrap();
            }
        }
        assert_eq!(doc.to_text(), "abcd");
    }
}
