//! Capability bridge: the editor-facing interface handed to plugins.
//!
//! `EditorSession` is the lifecycle root for one open buffer: it owns the
//! document, undo engine, highlight cache, cursor, and bookmark table. The
//! `Bridge` borrows the session for the duration of a plugin call and tags
//! every call with the caller's opaque token for audit. Instances never own
//! the bridge; the borrow shape is what prevents the manager/instance/bridge
//! reference cycle from becoming shared ownership.
//!
//! All bridge operations run synchronously on the editor thread. The bridge
//! is deliberately `!Send` so a script or native shim cannot smuggle it onto
//! an auxiliary thread.

use std::collections::BTreeMap;
use std::marker::PhantomData;
use std::time::Instant;

use core_script::{Action, Capabilities, Sandbox, ScriptError};
use core_state::UndoEngine;
use core_syntax::{HighlightCache, Span};
use core_text::{Document, EditRecord, Snapshot, TextError};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info};

pub mod cabi;
pub mod fuzzy;
pub mod git;
pub mod syntax_ops;

pub use cabi::{GrimLifetime, GrimOwnedStr, grim_str_free};

#[derive(Debug, Error)]
pub enum BridgeError {
    #[error(transparent)]
    Text(#[from] TextError),
    /// Sandbox denial or budget exhaustion from the calling plugin's host.
    #[error(transparent)]
    Sandbox(#[from] ScriptError),
    #[error("no bookmark named {name:?}")]
    UnknownBookmark { name: String },
    #[error("not a git repository: {path}")]
    NotARepository { path: String },
    #[error("git: {detail}")]
    Git { detail: String },
    #[error("io: {detail}")]
    Io { detail: String },
}

/// Serialize a compound result into the compact JSON wire form used across
/// the plugin boundary.
pub fn to_wire<T: Serialize>(value: &T) -> String {
    serde_json::to_string(value).unwrap_or_else(|_| "null".to_string())
}

/// Session-owned editor state for one buffer.
pub struct EditorSession {
    document: Document,
    undo: UndoEngine,
    highlights: HighlightCache,
    cursor: usize,
    bookmarks: BTreeMap<String, usize>,
    /// Messages surfaced by plugins, drained by the UI layer.
    messages: Vec<String>,
    /// Commands registered by plugins: (bridge token, command name).
    commands: Vec<(u64, String)>,
}

impl EditorSession {
    pub fn new(language: &str) -> Self {
        Self {
            document: Document::new(),
            undo: UndoEngine::default(),
            highlights: HighlightCache::new(language),
            cursor: 0,
            bookmarks: BTreeMap::new(),
            messages: Vec::new(),
            commands: Vec::new(),
        }
    }

    pub fn with_text(language: &str, text: &str) -> Self {
        let mut session = Self::new(language);
        session.document = Document::from_str(text);
        session
    }

    pub fn document(&self) -> &Document {
        &self.document
    }

    pub fn snapshot(&self) -> Snapshot {
        self.document.snapshot()
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn set_cursor(&mut self, offset: usize) -> Result<(), BridgeError> {
        if offset > self.document.len() {
            return Err(TextError::OutOfRange {
                offset,
                len: self.document.len(),
            }
            .into());
        }
        self.cursor = offset;
        Ok(())
    }

    /// Insert at `offset`, recording undo history and invalidating the
    /// highlight cache.
    pub fn insert(&mut self, offset: usize, text: &str) -> Result<(), BridgeError> {
        if let Some(record) = self.document.insert(offset, text)? {
            self.note_edit(&record);
        }
        Ok(())
    }

    pub fn delete(&mut self, offset: usize, len: usize) -> Result<(), BridgeError> {
        if let Some(record) = self.document.delete(offset, len)? {
            self.note_edit(&record);
        }
        Ok(())
    }

    fn note_edit(&mut self, record: &EditRecord) {
        match &record.kind {
            core_text::EditKind::Insert { offset, text } => {
                self.highlights.apply_edit(*offset, *offset, text.len());
                if self.cursor >= *offset {
                    self.cursor += text.len();
                }
            }
            core_text::EditKind::Delete { offset, text } => {
                self.highlights
                    .apply_edit(*offset, *offset + text.len(), 0);
                if self.cursor > *offset {
                    self.cursor = self.cursor.saturating_sub(text.len()).max(*offset);
                }
            }
        }
        self.undo.record(record.clone(), Instant::now());
        // Adjust bookmarks so pins keep tracking their text.
        let (at, removed, inserted) = match &record.kind {
            core_text::EditKind::Insert { offset, text } => (*offset, 0usize, text.len()),
            core_text::EditKind::Delete { offset, text } => (*offset, text.len(), 0usize),
        };
        for pin in self.bookmarks.values_mut() {
            if *pin >= at + removed {
                *pin = *pin - removed + inserted;
            } else if *pin > at {
                *pin = at;
            }
        }
    }

    pub fn undo(&mut self) -> Result<Option<EditRecord>, BridgeError> {
        let record = self.undo.undo(&mut self.document)?;
        if let Some(rec) = &record {
            let inv = rec.invert();
            let (a, b, ins) = edit_window(&inv);
            self.highlights.apply_edit(a, b, ins);
            self.cursor = self.cursor.min(self.document.len());
        }
        Ok(record)
    }

    pub fn redo(&mut self) -> Result<Option<EditRecord>, BridgeError> {
        let record = self.undo.redo(&mut self.document)?;
        if let Some(rec) = &record {
            let (a, b, ins) = edit_window(rec);
            self.highlights.apply_edit(a, b, ins);
            self.cursor = self.cursor.min(self.document.len());
        }
        Ok(record)
    }

    pub fn set_language(&mut self, tag: &str) {
        // Unsupported tags fall back inside the cache; nothing to surface.
        let _ = self.highlights.set_language(tag);
    }

    pub fn highlight(&mut self) -> Result<Vec<Span>, core_syntax::SyntaxError> {
        let snapshot = self.document.snapshot();
        self.highlights.highlight(&snapshot).map(<[Span]>::to_vec)
    }

    pub fn messages(&self) -> &[String] {
        &self.messages
    }

    pub fn drain_messages(&mut self) -> Vec<String> {
        std::mem::take(&mut self.messages)
    }

    pub fn commands(&self) -> &[(u64, String)] {
        &self.commands
    }
}

fn edit_window(record: &EditRecord) -> (usize, usize, usize) {
    match &record.kind {
        core_text::EditKind::Insert { offset, text } => (*offset, *offset, text.len()),
        core_text::EditKind::Delete { offset, text } => (*offset, *offset + text.len(), 0),
    }
}

/// Borrowed capability surface for one plugin call. `token` identifies the
/// calling instance for audit and cleanup.
pub struct Bridge<'a> {
    session: &'a mut EditorSession,
    token: u64,
    /// Keeps the bridge off auxiliary threads.
    _not_send: PhantomData<*const ()>,
}

impl<'a> Bridge<'a> {
    pub fn new(session: &'a mut EditorSession, token: u64) -> Self {
        Self {
            session,
            token,
            _not_send: PhantomData,
        }
    }

    pub fn token(&self) -> u64 {
        self.token
    }

    pub fn session(&mut self) -> &mut EditorSession {
        self.session
    }

    // -- rope + cursor ----------------------------------------------------

    pub fn document_len(&self) -> usize {
        self.session.document.len()
    }

    pub fn document_version(&self) -> u64 {
        self.session.document.version()
    }

    pub fn slice(&self, start: usize, end: usize) -> Result<String, BridgeError> {
        Ok(self.session.document.slice(start, end)?)
    }

    pub fn cursor(&self) -> usize {
        self.session.cursor
    }

    pub fn insert_at_cursor(&mut self, text: &str) -> Result<(), BridgeError> {
        let at = self.session.cursor;
        self.session.insert(at, text)
    }

    pub fn show_message(&mut self, text: &str) {
        info!(target: "bridge", token = self.token, message = text, "plugin message");
        self.session.messages.push(text.to_string());
    }

    // -- bookmarks --------------------------------------------------------

    /// Pin the current offset (or an explicit one) under a name.
    pub fn pin(&mut self, name: &str, offset: usize) -> Result<(), BridgeError> {
        if offset > self.session.document.len() {
            return Err(TextError::OutOfRange {
                offset,
                len: self.session.document.len(),
            }
            .into());
        }
        debug!(target: "bridge", token = self.token, name, offset, "pin");
        self.session.bookmarks.insert(name.to_string(), offset);
        Ok(())
    }

    /// Move the cursor to a pinned offset and return it.
    pub fn jump(&mut self, name: &str) -> Result<usize, BridgeError> {
        let offset = *self
            .session
            .bookmarks
            .get(name)
            .ok_or_else(|| BridgeError::UnknownBookmark {
                name: name.to_string(),
            })?;
        let offset = offset.min(self.session.document.len());
        self.session.cursor = offset;
        Ok(offset)
    }

    pub fn unpin(&mut self, name: &str) -> Result<(), BridgeError> {
        self.session
            .bookmarks
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| BridgeError::UnknownBookmark {
                name: name.to_string(),
            })
    }

    pub fn bookmarks(&self) -> &BTreeMap<String, usize> {
        &self.session.bookmarks
    }

    // -- syntax features --------------------------------------------------

    pub fn fold_regions(&self) -> Vec<syntax_ops::FoldRegion> {
        syntax_ops::fold_regions(&self.session.document.snapshot())
    }

    pub fn expand_selection(&self, start: usize, end: usize) -> (usize, usize) {
        syntax_ops::expand_selection(&self.session.document.snapshot(), start, end)
    }

    pub fn shrink_selection(&self, start: usize, end: usize) -> (usize, usize) {
        syntax_ops::shrink_selection(&self.session.document.snapshot(), start, end)
    }

    /// Fold regions in wire form (owned buffer across the C ABI).
    pub fn fold_regions_wire(&self) -> (String, GrimLifetime) {
        (to_wire(&self.fold_regions()), GrimLifetime::Owned)
    }

    // -- workspace + git --------------------------------------------------
    //
    // Filesystem walks are gated on the calling plugin's sandbox; the git
    // operations spawn a subprocess and therefore require the system-call
    // permission.

    pub fn find_files(
        &self,
        sandbox: &mut Sandbox,
        root: &std::path::Path,
        limit: usize,
    ) -> Result<Vec<std::path::PathBuf>, BridgeError> {
        sandbox.validate_file_access(&root.to_string_lossy())?;
        Ok(fuzzy::find_files(root, limit))
    }

    /// Pure scoring; no sandbox interaction.
    pub fn filter(&self, query: &str, candidates: &[String]) -> Vec<fuzzy::Match> {
        fuzzy::filter(query, candidates)
    }

    pub fn detect_repository(
        &self,
        sandbox: &mut Sandbox,
        path: &std::path::Path,
    ) -> Result<std::path::PathBuf, BridgeError> {
        sandbox.check_system_call("git")?;
        git::detect_repository(path)
    }

    pub fn current_branch(
        &self,
        sandbox: &mut Sandbox,
        repo: &std::path::Path,
    ) -> Result<String, BridgeError> {
        sandbox.check_system_call("git")?;
        git::current_branch(repo)
    }

    pub fn file_status(
        &self,
        sandbox: &mut Sandbox,
        repo: &std::path::Path,
        file: &std::path::Path,
    ) -> Result<git::FileStatus, BridgeError> {
        sandbox.check_system_call("git")?;
        git::file_status(repo, file)
    }

    pub fn blame(
        &self,
        sandbox: &mut Sandbox,
        repo: &std::path::Path,
        file: &std::path::Path,
        line: usize,
    ) -> Result<git::BlameInfo, BridgeError> {
        sandbox.check_system_call("git")?;
        git::blame(repo, file, line)
    }

    pub fn stage(
        &self,
        sandbox: &mut Sandbox,
        repo: &std::path::Path,
        file: &std::path::Path,
    ) -> Result<(), BridgeError> {
        sandbox.check_system_call("git")?;
        git::stage(repo, file)
    }

    pub fn unstage(
        &self,
        sandbox: &mut Sandbox,
        repo: &std::path::Path,
        file: &std::path::Path,
    ) -> Result<(), BridgeError> {
        sandbox.check_system_call("git")?;
        git::unstage(repo, file)
    }

    pub fn discard(
        &self,
        sandbox: &mut Sandbox,
        repo: &std::path::Path,
        file: &std::path::Path,
    ) -> Result<(), BridgeError> {
        sandbox.check_system_call("git")?;
        git::discard(repo, file)
    }

    pub fn hunks(
        &self,
        sandbox: &mut Sandbox,
        repo: &std::path::Path,
        file: &std::path::Path,
    ) -> Result<Vec<git::Hunk>, BridgeError> {
        sandbox.check_system_call("git")?;
        git::hunks(repo, file)
    }

    pub fn stage_hunk(
        &self,
        sandbox: &mut Sandbox,
        repo: &std::path::Path,
        file: &std::path::Path,
        index: usize,
    ) -> Result<(), BridgeError> {
        sandbox.check_system_call("git")?;
        git::stage_hunk(repo, file, index)
    }
}

/// Production `Capabilities` implementation: script actions land on the
/// session through the bridge.
impl Capabilities for Bridge<'_> {
    fn apply(&mut self, _sandbox: &mut Sandbox, action: &Action) -> Result<(), ScriptError> {
        match action {
            Action::ShowMessage(text) => {
                self.show_message(text);
                Ok(())
            }
            Action::Log(text) => {
                info!(target: "bridge", token = self.token, "{text}");
                Ok(())
            }
            Action::InsertText(text) => {
                self.insert_at_cursor(text)
                    .map_err(|err| ScriptError::CapabilityFailed {
                        detail: err.to_string(),
                    })
            }
            Action::RegisterCommand(name) => {
                self.session.commands.push((self.token, name.clone()));
                Ok(())
            }
            // Theme registration is routed by the plugin manager before the
            // bridge sees it; accept silently if it arrives unwrapped.
            Action::RegisterTheme(_) => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_edit_undo_redo_updates_cursor() {
        let mut session = EditorSession::new("rust");
        session.insert(0, "hello world").unwrap();
        assert_eq!(session.cursor(), 11);
        session.undo().unwrap();
        assert_eq!(session.document().len(), 0);
        assert_eq!(session.cursor(), 0);
        session.redo().unwrap();
        assert_eq!(session.document().to_text(), "hello world");
    }

    #[test]
    fn bridge_message_and_insert() {
        let mut session = EditorSession::new("rust");
        let mut bridge = Bridge::new(&mut session, 7);
        bridge.show_message("hi");
        bridge.insert_at_cursor("abc").unwrap();
        assert_eq!(bridge.document_len(), 3);
        assert_eq!(session.messages(), ["hi"]);
        assert_eq!(session.document().to_text(), "abc");
    }

    #[test]
    fn bookmarks_pin_jump_unpin() {
        let mut session = EditorSession::with_text("rust", "fn main() {}\nfn other() {}\n");
        let mut bridge = Bridge::new(&mut session, 1);
        bridge.pin("second-fn", 13).unwrap();
        assert_eq!(bridge.jump("second-fn").unwrap(), 13);
        assert_eq!(bridge.cursor(), 13);
        bridge.unpin("second-fn").unwrap();
        assert!(matches!(
            bridge.jump("second-fn"),
            Err(BridgeError::UnknownBookmark { .. })
        ));
    }

    #[test]
    fn bookmarks_track_edits() {
        let mut session = EditorSession::with_text("rust", "aaa bbb ccc");
        {
            let mut bridge = Bridge::new(&mut session, 1);
            bridge.pin("ccc", 8).unwrap();
        }
        session.insert(0, "xx ").unwrap();
        let mut bridge = Bridge::new(&mut session, 1);
        assert_eq!(bridge.jump("ccc").unwrap(), 11);
    }

    #[test]
    fn capabilities_route_actions() {
        let mut session = EditorSession::new("rust");
        let mut sandbox = Sandbox::new(core_script::SandboxConfig::default());
        let mut bridge = Bridge::new(&mut session, 3);
        bridge
            .apply(&mut sandbox, &Action::ShowMessage("ping".into()))
            .unwrap();
        bridge
            .apply(&mut sandbox, &Action::InsertText("body".into()))
            .unwrap();
        bridge
            .apply(&mut sandbox, &Action::RegisterCommand("fmt".into()))
            .unwrap();
        assert_eq!(session.messages(), ["ping"]);
        assert_eq!(session.document().to_text(), "body");
        assert_eq!(session.commands(), [(3, "fmt".to_string())]);
    }

    #[test]
    fn gated_ops_respect_sandbox() {
        let mut session = EditorSession::new("rust");
        let bridge = Bridge::new(&mut session, 4);
        let mut sandbox = Sandbox::new(core_script::SandboxConfig::default());
        let err = bridge
            .find_files(&mut sandbox, std::path::Path::new("/tmp"), 10)
            .unwrap_err();
        assert!(matches!(err, BridgeError::Sandbox(_)));
        assert_eq!(sandbox.stats().violations, 1);
        // Git requires the system-call permission.
        let err = bridge
            .current_branch(&mut sandbox, std::path::Path::new("/tmp"))
            .unwrap_err();
        assert!(matches!(err, BridgeError::Sandbox(_)));
    }

    #[test]
    fn wire_form_is_compact_json() {
        #[derive(Serialize)]
        struct Probe {
            name: &'static str,
            count: u32,
        }
        assert_eq!(
            to_wire(&vec![Probe {
                name: "a",
                count: 2
            }]),
            r#"[{"name":"a","count":2}]"#
        );
    }
}
