//! Mutable editor state layered on the document core.
//!
//! This crate owns the undo engine: a bounded history of reversible edit
//! records over a single `Document`. Whole-buffer snapshots were rejected
//! here; the engine stores `core_text::EditRecord`s, whose inverses restore
//! the prior byte sequence exactly, keeping history memory proportional to
//! edit payloads instead of document size.

pub mod undo;

pub use undo::{DEFAULT_COALESCE_WINDOW, DEFAULT_UNDO_DEPTH, UndoEngine};
