//! Rope-backed document core.
//!
//! A `Document` is the mutable byte sequence behind one open buffer. It is
//! backed by a `ropey::Rope`, giving O(log n) insert/delete/slice, and keeps
//! a monotonic version counter incremented on every successful mutation.
//! `snapshot()` captures an immutable view in O(log n): ropey ropes are
//! persistent trees, so cloning the root shares all nodes and later edits
//! path-copy without disturbing existing snapshots.
//!
//! Offsets are byte-addressed. Content is UTF-8, so every offset handed to a
//! mutating or slicing call must fall on a character boundary; a misaligned
//! offset is rejected with `TextError::NotCharBoundary` before any state
//! changes. Failing operations never touch the version counter.
//!
//! Line rules: line indices are 0-based, `\n` terminates a line, and the text
//! following the final `\n` (if any) is the last line. Internal nodes of the
//! rope cache cumulative byte and newline counts, so position<->line
//! translation is O(log n) in both directions.

use ropey::Rope;
use thiserror::Error;

pub mod grapheme;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TextError {
    /// Offset or range bound past the end of the document, or a reversed
    /// range (`start > end`, reported against `start`).
    #[error("offset {offset} out of range (document length {len})")]
    OutOfRange { offset: usize, len: usize },
    /// Byte offset inside a multi-byte UTF-8 sequence.
    #[error("offset {offset} is not a character boundary")]
    NotCharBoundary { offset: usize },
}

/// The two primitive mutations a document supports. Deletes carry the
/// removed text so every edit is invertible without consulting the document
/// it was applied to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EditKind {
    Insert { offset: usize, text: String },
    Delete { offset: usize, text: String },
}

impl EditKind {
    /// Byte length of the payload.
    pub fn len(&self) -> usize {
        match self {
            EditKind::Insert { text, .. } | EditKind::Delete { text, .. } => text.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn offset(&self) -> usize {
        match self {
            EditKind::Insert { offset, .. } | EditKind::Delete { offset, .. } => *offset,
        }
    }
}

/// Record of one successful mutation. Applying `invert()` to the
/// post-version document restores the pre-version document byte-for-byte.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EditRecord {
    pub kind: EditKind,
    pub pre_version: u64,
    pub post_version: u64,
}

impl EditRecord {
    /// The inverse edit: insert becomes delete and vice versa. Version
    /// fields are swapped so the inverse reads as a transition back.
    pub fn invert(&self) -> EditRecord {
        let kind = match &self.kind {
            EditKind::Insert { offset, text } => EditKind::Delete {
                offset: *offset,
                text: text.clone(),
            },
            EditKind::Delete { offset, text } => EditKind::Insert {
                offset: *offset,
                text: text.clone(),
            },
        };
        EditRecord {
            kind,
            pre_version: self.post_version,
            post_version: self.pre_version,
        }
    }
}

/// Mutable rope-backed byte sequence with a monotonic version counter.
#[derive(Debug, Clone, Default)]
pub struct Document {
    rope: Rope,
    version: u64,
}

impl Document {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_str(content: &str) -> Self {
        Self {
            rope: Rope::from_str(content),
            version: 0,
        }
    }

    /// Total length in bytes.
    pub fn len(&self) -> usize {
        self.rope.len_bytes()
    }

    pub fn is_empty(&self) -> bool {
        self.rope.len_bytes() == 0
    }

    /// Version counter; incremented by exactly one per successful mutation.
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Number of lines. A trailing `\n` opens one final (possibly empty) line.
    pub fn line_count(&self) -> usize {
        self.rope.len_lines()
    }

    /// Insert `text` at byte `offset`. Returns the edit record, or `None`
    /// for the empty-payload no-op (which does not bump the version).
    pub fn insert(&mut self, offset: usize, text: &str) -> Result<Option<EditRecord>, TextError> {
        let char_idx = checked_byte_to_char(&self.rope, offset)?;
        if text.is_empty() {
            return Ok(None);
        }
        self.rope.insert(char_idx, text);
        let pre = self.version;
        self.version += 1;
        Ok(Some(EditRecord {
            kind: EditKind::Insert {
                offset,
                text: text.to_string(),
            },
            pre_version: pre,
            post_version: self.version,
        }))
    }

    /// Delete `len` bytes starting at byte `offset`. Returns the edit record
    /// carrying the removed text, or `None` for the zero-length no-op.
    pub fn delete(&mut self, offset: usize, len: usize) -> Result<Option<EditRecord>, TextError> {
        let end = offset.checked_add(len).ok_or(TextError::OutOfRange {
            offset,
            len: self.len(),
        })?;
        let start_char = checked_byte_to_char(&self.rope, offset)?;
        let end_char = checked_byte_to_char(&self.rope, end)?;
        if len == 0 {
            return Ok(None);
        }
        let removed = self.rope.slice(start_char..end_char).to_string();
        self.rope.remove(start_char..end_char);
        let pre = self.version;
        self.version += 1;
        Ok(Some(EditRecord {
            kind: EditKind::Delete {
                offset,
                text: removed,
            },
            pre_version: pre,
            post_version: self.version,
        }))
    }

    /// Apply an edit kind produced elsewhere (undo/redo, language-server
    /// edits arriving over the message queue).
    pub fn apply(&mut self, kind: &EditKind) -> Result<Option<EditRecord>, TextError> {
        match kind {
            EditKind::Insert { offset, text } => self.insert(*offset, text),
            EditKind::Delete { offset, text } => self.delete(*offset, text.len()),
        }
    }

    /// Owned copy of the byte range `[start, end)`.
    pub fn slice(&self, start: usize, end: usize) -> Result<String, TextError> {
        slice_rope(&self.rope, start, end)
    }

    /// Immutable O(log n) view of the document at the current version.
    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            rope: self.rope.clone(),
            version: self.version,
        }
    }

    /// 0-based line index containing byte `offset` (`offset == len` maps to
    /// the last line).
    pub fn line_of(&self, offset: usize) -> Result<usize, TextError> {
        line_of_rope(&self.rope, offset)
    }

    /// Byte offset of the first byte of `line`. `line == line_count()` is
    /// accepted and yields the document length, so callers can form
    /// half-open line ranges.
    pub fn offset_of_line(&self, line: usize) -> Result<usize, TextError> {
        offset_of_line_rope(&self.rope, line)
    }

    /// Line content including any trailing newline.
    pub fn line(&self, idx: usize) -> Option<String> {
        if idx < self.rope.len_lines() {
            Some(self.rope.line(idx).to_string())
        } else {
            None
        }
    }

    /// Entire content as an owned string.
    pub fn to_text(&self) -> String {
        self.rope.to_string()
    }
}

/// Immutable view over a document at a specific version. Cheap to create and
/// clone; independently disposable; never invalidated by later edits.
#[derive(Debug, Clone)]
pub struct Snapshot {
    rope: Rope,
    version: u64,
}

impl Snapshot {
    pub fn len(&self) -> usize {
        self.rope.len_bytes()
    }

    pub fn is_empty(&self) -> bool {
        self.rope.len_bytes() == 0
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn line_count(&self) -> usize {
        self.rope.len_lines()
    }

    pub fn slice(&self, start: usize, end: usize) -> Result<String, TextError> {
        slice_rope(&self.rope, start, end)
    }

    pub fn line_of(&self, offset: usize) -> Result<usize, TextError> {
        line_of_rope(&self.rope, offset)
    }

    pub fn offset_of_line(&self, line: usize) -> Result<usize, TextError> {
        offset_of_line_rope(&self.rope, line)
    }

    /// Line content including any trailing newline.
    pub fn line(&self, idx: usize) -> Option<String> {
        if idx < self.rope.len_lines() {
            Some(self.rope.line(idx).to_string())
        } else {
            None
        }
    }

    pub fn to_text(&self) -> String {
        self.rope.to_string()
    }
}

/// Translate a byte offset to a char index, validating range and boundary.
fn checked_byte_to_char(rope: &Rope, offset: usize) -> Result<usize, TextError> {
    let len = rope.len_bytes();
    if offset > len {
        return Err(TextError::OutOfRange { offset, len });
    }
    let char_idx = rope.byte_to_char(offset);
    if rope.char_to_byte(char_idx) != offset {
        return Err(TextError::NotCharBoundary { offset });
    }
    Ok(char_idx)
}

fn slice_rope(rope: &Rope, start: usize, end: usize) -> Result<String, TextError> {
    let len = rope.len_bytes();
    if start > end {
        return Err(TextError::OutOfRange { offset: start, len });
    }
    let start_char = checked_byte_to_char(rope, start)?;
    let end_char = checked_byte_to_char(rope, end)?;
    Ok(rope.slice(start_char..end_char).to_string())
}

fn line_of_rope(rope: &Rope, offset: usize) -> Result<usize, TextError> {
    let len = rope.len_bytes();
    if offset > len {
        return Err(TextError::OutOfRange { offset, len });
    }
    Ok(rope.byte_to_line(offset))
}

fn offset_of_line_rope(rope: &Rope, line: usize) -> Result<usize, TextError> {
    let lines = rope.len_lines();
    if line > lines {
        return Err(TextError::OutOfRange {
            offset: line,
            len: lines,
        });
    }
    let char_idx = rope.line_to_char(line);
    Ok(rope.char_to_byte(char_idx))
}
