//! Bounded undo/redo stacks of reversible edit records.
//!
//! Policy:
//! - `record` pushes onto the undo stack and clears the redo stack.
//! - `undo` pops, applies the record's inverse to the document, and moves the
//!   record to the redo stack. `redo` is symmetric.
//! - When the undo stack exceeds the configured depth the oldest record is
//!   discarded; that history cannot be recovered.
//!
//! Coalescing: a run of single-grapheme inserts at adjacent offsets within
//! the coalesce window (default 250 ms) collapses into one record, so a
//! typing burst undoes as a unit. Single-grapheme deletes coalesce the same
//! way but only while the direction holds (a backspace run or a
//! forward-delete run); a direction change starts a new record. The engine
//! serves a single editor thread, so "same actor" needs no explicit field.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use core_text::{Document, EditKind, EditRecord, TextError};
use tracing::trace;

pub const DEFAULT_UNDO_DEPTH: usize = 1000;
pub const DEFAULT_COALESCE_WINDOW: Duration = Duration::from_millis(250);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DeleteDirection {
    Backward,
    Forward,
}

pub struct UndoEngine {
    undo_stack: VecDeque<EditRecord>,
    redo_stack: Vec<EditRecord>,
    depth: usize,
    coalesce_window: Duration,
    last_record_at: Option<Instant>,
    /// Direction of the delete run being coalesced at the top of the stack.
    /// `None` until a second delete establishes it.
    delete_run_dir: Option<DeleteDirection>,
    evicted: u64,
}

impl Default for UndoEngine {
    fn default() -> Self {
        Self::new(DEFAULT_UNDO_DEPTH)
    }
}

impl UndoEngine {
    pub fn new(depth: usize) -> Self {
        Self {
            undo_stack: VecDeque::new(),
            redo_stack: Vec::new(),
            depth: depth.max(1),
            coalesce_window: DEFAULT_COALESCE_WINDOW,
            last_record_at: None,
            delete_run_dir: None,
            evicted: 0,
        }
    }

    pub fn with_coalesce_window(mut self, window: Duration) -> Self {
        self.coalesce_window = window;
        self
    }

    pub fn undo_depth(&self) -> usize {
        self.undo_stack.len()
    }

    pub fn redo_depth(&self) -> usize {
        self.redo_stack.len()
    }

    /// Count of records dropped off the bottom of the history.
    pub fn evicted(&self) -> u64 {
        self.evicted
    }

    /// Push a freshly applied edit. `now` is the wall-clock instant of the
    /// edit; callers outside tests pass `Instant::now()` via `record_now`.
    pub fn record(&mut self, edit: EditRecord, now: Instant) {
        self.redo_stack.clear();
        if self.try_coalesce(&edit, now) {
            trace!(target: "state.undo", undo_depth = self.undo_stack.len(), "record_coalesced");
        } else {
            self.delete_run_dir = None;
            self.undo_stack.push_back(edit);
            trace!(target: "state.undo", undo_depth = self.undo_stack.len(), "record_push");
            if self.undo_stack.len() > self.depth {
                self.undo_stack.pop_front();
                self.evicted += 1;
                trace!(target: "state.undo", evicted = self.evicted, "undo_stack_trimmed");
            }
        }
        self.last_record_at = Some(now);
    }

    pub fn record_now(&mut self, edit: EditRecord) {
        self.record(edit, Instant::now());
    }

    /// Undo the most recent edit, mutating `doc` back to its prior content.
    /// Returns the record that was undone.
    pub fn undo(&mut self, doc: &mut Document) -> Result<Option<EditRecord>, TextError> {
        let Some(record) = self.undo_stack.pop_back() else {
            return Ok(None);
        };
        let inverse = record.invert();
        if let Err(err) = doc.apply(&inverse.kind) {
            // History no longer matches the document; keep the record so the
            // caller can inspect the inconsistency.
            self.undo_stack.push_back(record);
            return Err(err);
        }
        self.end_coalescing();
        trace!(target: "state.undo", undo_depth = self.undo_stack.len(), redo_depth = self.redo_stack.len() + 1, "undo_pop");
        self.redo_stack.push(record.clone());
        Ok(Some(record))
    }

    /// Re-apply the most recently undone edit.
    pub fn redo(&mut self, doc: &mut Document) -> Result<Option<EditRecord>, TextError> {
        let Some(record) = self.redo_stack.pop() else {
            return Ok(None);
        };
        if let Err(err) = doc.apply(&record.kind) {
            self.redo_stack.push(record);
            return Err(err);
        }
        self.end_coalescing();
        trace!(target: "state.undo", undo_depth = self.undo_stack.len() + 1, redo_depth = self.redo_stack.len(), "redo_pop");
        self.undo_stack.push_back(record.clone());
        Ok(Some(record))
    }

    pub fn clear(&mut self) {
        self.undo_stack.clear();
        self.redo_stack.clear();
        self.end_coalescing();
    }

    fn end_coalescing(&mut self) {
        self.last_record_at = None;
        self.delete_run_dir = None;
    }

    /// Merge `edit` into the top record when it continues a typing or delete
    /// run. Returns true when merged.
    fn try_coalesce(&mut self, edit: &EditRecord, now: Instant) -> bool {
        let Some(last_at) = self.last_record_at else {
            return false;
        };
        if now.duration_since(last_at) > self.coalesce_window {
            return false;
        }
        let run_dir = self.delete_run_dir;
        let Some(top) = self.undo_stack.back_mut() else {
            return false;
        };
        match (&mut top.kind, &edit.kind) {
            (
                EditKind::Insert {
                    offset: top_offset,
                    text: top_text,
                },
                EditKind::Insert { offset, text },
            ) => {
                if core_text::grapheme::is_single_cluster(text)
                    && *offset == *top_offset + top_text.len()
                {
                    top_text.push_str(text);
                    top.post_version = edit.post_version;
                    return true;
                }
                false
            }
            (
                EditKind::Delete {
                    offset: top_offset,
                    text: top_text,
                },
                EditKind::Delete { offset, text },
            ) => {
                if !core_text::grapheme::is_single_cluster(text) {
                    return false;
                }
                let candidate = if *offset + text.len() == *top_offset {
                    DeleteDirection::Backward
                } else if *offset == *top_offset {
                    DeleteDirection::Forward
                } else {
                    return false;
                };
                if run_dir.is_some_and(|d| d != candidate) {
                    // Direction change: never merge.
                    return false;
                }
                match candidate {
                    DeleteDirection::Backward => {
                        let mut merged = text.clone();
                        merged.push_str(top_text);
                        *top_text = merged;
                        *top_offset = *offset;
                    }
                    DeleteDirection::Forward => top_text.push_str(text),
                }
                top.post_version = edit.post_version;
                self.delete_run_dir = Some(candidate);
                true
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn type_str(doc: &mut Document, engine: &mut UndoEngine, at: usize, s: &str, t: Instant) {
        let mut offset = at;
        for g in core_text::grapheme::iter(s).collect::<Vec<_>>() {
            let rec = doc.insert(offset, g).unwrap().unwrap();
            offset += g.len();
            engine.record(rec, t);
        }
    }

    #[test]
    fn record_clears_redo() {
        let mut doc = Document::new();
        let mut engine = UndoEngine::default();
        let t = Instant::now();
        let rec = doc.insert(0, "abc").unwrap().unwrap();
        engine.record(rec, t);
        engine.undo(&mut doc).unwrap();
        assert_eq!(engine.redo_depth(), 1);
        let rec = doc.insert(0, "x").unwrap().unwrap();
        engine.record(rec, t + Duration::from_secs(1));
        assert_eq!(engine.redo_depth(), 0);
    }

    #[test]
    fn typing_burst_coalesces_and_undoes_as_unit() {
        let mut doc = Document::new();
        let mut engine = UndoEngine::default();
        let t = Instant::now();
        type_str(&mut doc, &mut engine, 0, "hello", t);
        assert_eq!(engine.undo_depth(), 1);
        engine.undo(&mut doc).unwrap();
        assert_eq!(doc.to_text(), "");
    }

    #[test]
    fn window_expiry_splits_records() {
        let mut doc = Document::new();
        let mut engine = UndoEngine::default();
        let t = Instant::now();
        type_str(&mut doc, &mut engine, 0, "ab", t);
        type_str(&mut doc, &mut engine, 2, "cd", t + Duration::from_secs(2));
        assert_eq!(engine.undo_depth(), 2);
        engine.undo(&mut doc).unwrap();
        assert_eq!(doc.to_text(), "ab");
    }

    #[test]
    fn multichar_insert_never_coalesces() {
        let mut doc = Document::new();
        let mut engine = UndoEngine::default();
        let t = Instant::now();
        let rec = doc.insert(0, "a").unwrap().unwrap();
        engine.record(rec, t);
        let rec = doc.insert(1, "pasted text").unwrap().unwrap();
        engine.record(rec, t);
        assert_eq!(engine.undo_depth(), 2);
    }

    #[test]
    fn backspace_run_coalesces() {
        let mut doc = Document::from_str("abcd");
        let mut engine = UndoEngine::default();
        let t = Instant::now();
        // Backspace from the end: delete 'd', then 'c'.
        let rec = doc.delete(3, 1).unwrap().unwrap();
        engine.record(rec, t);
        let rec = doc.delete(2, 1).unwrap().unwrap();
        engine.record(rec, t);
        assert_eq!(engine.undo_depth(), 1);
        engine.undo(&mut doc).unwrap();
        assert_eq!(doc.to_text(), "abcd");
    }

    #[test]
    fn delete_direction_change_splits() {
        let mut doc = Document::from_str("abcd");
        let mut engine = UndoEngine::default();
        let t = Instant::now();
        // Forward-delete twice at offset 2: removes 'c', then 'd'.
        let rec = doc.delete(2, 1).unwrap().unwrap();
        engine.record(rec, t);
        let rec = doc.delete(2, 1).unwrap().unwrap();
        engine.record(rec, t);
        assert_eq!(engine.undo_depth(), 1);
        // Now backspace 'b': direction change, new record.
        let rec = doc.delete(1, 1).unwrap().unwrap();
        engine.record(rec, t);
        assert_eq!(engine.undo_depth(), 2);
    }

    #[test]
    fn depth_bound_evicts_oldest() {
        let mut doc = Document::new();
        let mut engine = UndoEngine::new(2).with_coalesce_window(Duration::ZERO);
        let mut t = Instant::now();
        for s in ["aa", "bb", "cc"] {
            let rec = doc.insert(doc.len(), s).unwrap().unwrap();
            t += Duration::from_secs(1);
            engine.record(rec, t);
        }
        assert_eq!(engine.undo_depth(), 2);
        assert_eq!(engine.evicted(), 1);
        engine.undo(&mut doc).unwrap();
        engine.undo(&mut doc).unwrap();
        assert!(engine.undo(&mut doc).unwrap().is_none());
        // The first record fell off the bottom: "aa" is unrecoverable.
        assert_eq!(doc.to_text(), "aa");
    }

    #[test]
    fn redo_round_trip() {
        let mut doc = Document::new();
        let mut engine = UndoEngine::default();
        let rec = doc.insert(0, "hello").unwrap().unwrap();
        engine.record_now(rec);
        let before = doc.to_text();
        engine.undo(&mut doc).unwrap();
        assert_eq!(doc.to_text(), "");
        engine.redo(&mut doc).unwrap();
        assert_eq!(doc.to_text(), before);
        assert_eq!(engine.undo_depth(), 1);
        assert_eq!(engine.redo_depth(), 0);
    }
}
