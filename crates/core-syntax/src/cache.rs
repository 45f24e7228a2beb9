//! Version-keyed incremental span cache.
//!
//! The cache stores the token stream of the last highlighted snapshot. When
//! an edit replaces `[a, b)` with `insert_len` bytes, tokens entirely before
//! the dirty window are reused verbatim, tokens entirely after it are
//! shifted by the length delta, and the window between is relexed from the
//! new snapshot. The window starts at the line preceding the edit (one line
//! of slack) snapped outward to token boundaries, so multi-line constructs
//! never get cut; if the relex still ends mid-construct the cache falls back
//! to relexing through to the end of the document.
//!
//! Lookups never observe the future: highlighting an older snapshot than the
//! cached one recomputes from that snapshot instead of reusing newer spans.

use core_text::Snapshot;
use tracing::{debug, warn};

use crate::lexer::{Highlighter, PlainLexer, highlighter_for};
use crate::{Span, SyntaxError, fill_gaps, validate_coverage};

#[derive(Debug, Clone, Copy)]
struct PendingEdit {
    a: usize,
    b: usize,
    insert_len: usize,
}

struct Cached {
    version: u64,
    len: usize,
    /// Token spans only (no gap filler); the working set for incrementality.
    tokens: Vec<Span>,
    /// Gap-filled spans covering `[0, len)`; what callers receive.
    filled: Vec<Span>,
}

pub struct HighlightCache {
    tag: String,
    lexer: Box<dyn Highlighter + Send>,
    /// True when `tag` had no lexer table and the plain fallback is active.
    fallback: bool,
    cached: Option<Cached>,
    pending: Vec<PendingEdit>,
    /// Set when a lexer fault forced us to serve stale spans.
    dirty: bool,
}

impl HighlightCache {
    /// Build a cache for `tag`, falling back to the plain lexer for unknown
    /// languages (the caller sees the error from `set_language` but the
    /// cache stays usable).
    pub fn new(tag: &str) -> Self {
        let mut cache = Self {
            tag: String::new(),
            lexer: Box::new(PlainLexer),
            fallback: true,
            cached: None,
            pending: Vec::new(),
            dirty: false,
        };
        let _ = cache.set_language(tag);
        cache
    }

    /// Install a custom highlighter (test seam and embedder extension point).
    pub fn with_highlighter(tag: &str, lexer: Box<dyn Highlighter + Send>) -> Self {
        Self {
            tag: tag.to_string(),
            lexer,
            fallback: false,
            cached: None,
            pending: Vec::new(),
            dirty: false,
        }
    }

    pub fn language(&self) -> &str {
        &self.tag
    }

    pub fn is_fallback(&self) -> bool {
        self.fallback
    }

    /// True when the last good spans are stale (a lexer fault occurred).
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Switch languages. Unknown tags activate the identifier/punctuation
    /// fallback lexer and report `UnsupportedLanguage`.
    pub fn set_language(&mut self, tag: &str) -> Result<(), SyntaxError> {
        self.cached = None;
        self.pending.clear();
        self.dirty = false;
        self.tag = tag.to_string();
        match highlighter_for(tag) {
            Ok(lexer) => {
                self.lexer = lexer;
                self.fallback = false;
                Ok(())
            }
            Err(err) => {
                warn!(target: "syntax.cache", tag, "unsupported language, using fallback lexer");
                self.lexer = Box::new(PlainLexer);
                self.fallback = true;
                Err(err)
            }
        }
    }

    /// Note an edit replacing bytes `[a, b)` with `insert_len` new bytes.
    pub fn apply_edit(&mut self, a: usize, b: usize, insert_len: usize) {
        self.pending.push(PendingEdit { a, b, insert_len });
    }

    /// Force recomputation of a byte range at the next highlight.
    pub fn invalidate(&mut self, start: usize, end: usize) {
        let len = end.saturating_sub(start);
        self.pending.push(PendingEdit {
            a: start,
            b: end,
            insert_len: len,
        });
    }

    /// Highlight spans for `snapshot`: sorted, non-overlapping, covering
    /// `[0, len)` with `None` gap fill. Deterministic per
    /// `(snapshot, language)`.
    pub fn highlight(&mut self, snapshot: &Snapshot) -> Result<&[Span], SyntaxError> {
        let reusable = self
            .cached
            .as_ref()
            .is_some_and(|c| c.version == snapshot.version() && self.pending.is_empty());
        if reusable && !self.dirty {
            return Ok(&self.cached.as_ref().unwrap().filled);
        }

        let incremental_edit = match (&self.cached, self.pending.as_slice()) {
            (Some(c), [edit])
                if !self.dirty
                    && c.version <= snapshot.version()
                    && consistent(c.len, edit, snapshot.len()) =>
            {
                Some(*edit)
            }
            _ => None,
        };

        let result = match incremental_edit {
            Some(edit) => self.relex_incremental(snapshot, edit),
            None => self.relex_full(snapshot),
        };

        match result {
            Ok(cached) => {
                self.cached = Some(cached);
                self.pending.clear();
                self.dirty = false;
                Ok(&self.cached.as_ref().unwrap().filled)
            }
            Err(err) => {
                // Serve the last known good spans and stay dirty so the next
                // call retries.
                warn!(target: "syntax.cache", error = %err, "lexer fault, serving stale spans");
                self.dirty = true;
                match &self.cached {
                    Some(c) => Ok(&c.filled),
                    None => Err(err),
                }
            }
        }
    }

    fn relex_full(&mut self, snapshot: &Snapshot) -> Result<Cached, SyntaxError> {
        let text = snapshot.to_text();
        let lexed = self.lexer.lex_window(&text, 0, text.len())?;
        debug!(target: "syntax.cache", version = snapshot.version(), tokens = lexed.tokens.len(), "full_relex");
        finish(snapshot, lexed.tokens)
    }

    fn relex_incremental(
        &mut self,
        snapshot: &Snapshot,
        edit: PendingEdit,
    ) -> Result<Cached, SyntaxError> {
        let old = self.cached.as_ref().expect("incremental requires a cache");
        let new_len = snapshot.len();
        let delta = edit.insert_len as isize - (edit.b - edit.a) as isize;
        let text = snapshot.to_text();

        // Window start: the line before the edit in the new snapshot, moved
        // outward to the start of any old token crossing it. Positions below
        // `a` are identical in both snapshots.
        let edit_line = snapshot.line_of(edit.a.min(new_len)).unwrap_or(0);
        let mut ws = snapshot
            .offset_of_line(edit_line.saturating_sub(1))
            .unwrap_or(0);
        while let Some(tok) = old
            .tokens
            .iter()
            .find(|t| t.start_byte < ws && ws < t.end_byte)
        {
            ws = tok.start_byte;
        }

        // Window end in old coordinates: one line past the edit in the new
        // snapshot mapped back, moved outward to old token boundaries.
        let edit_end_new = edit.a + edit.insert_len;
        let end_line = snapshot.line_of(edit_end_new.min(new_len)).unwrap_or(0);
        let target_line = (end_line + 2).min(snapshot.line_count());
        let we_new_target = snapshot.offset_of_line(target_line).unwrap_or(new_len);
        let mut we_old = usize::try_from(we_new_target as isize - delta)
            .unwrap_or(old.len)
            .clamp(edit.b.min(old.len), old.len);
        while let Some(tok) = old
            .tokens
            .iter()
            .find(|t| t.start_byte < we_old && we_old < t.end_byte)
        {
            we_old = tok.end_byte;
        }
        let mut we_new = usize::try_from(we_old as isize + delta)
            .unwrap_or(new_len)
            .min(new_len);

        let mut lexed = self.lexer.lex_window(&text, ws, we_new)?;
        if !lexed.clean_end && we_new < new_len {
            // The edit opened a construct that swallows the suffix; give up
            // on reuse past the window.
            debug!(target: "syntax.cache", "window relex ended dirty, extending to eof");
            we_new = new_len;
            we_old = old.len;
            lexed = self.lexer.lex_window(&text, ws, new_len)?;
        }

        let mut tokens: Vec<Span> = old
            .tokens
            .iter()
            .filter(|t| t.end_byte <= ws)
            .copied()
            .collect();
        tokens.extend(lexed.tokens.iter().copied());
        for tok in old.tokens.iter().filter(|t| t.start_byte >= we_old) {
            let start = usize::try_from(tok.start_byte as isize + delta).unwrap_or(new_len);
            let end = usize::try_from(tok.end_byte as isize + delta).unwrap_or(new_len);
            if end <= new_len {
                tokens.push(Span::new(start, end, tok.class));
            }
        }
        debug!(
            target: "syntax.cache",
            version = snapshot.version(),
            window_start = ws,
            window_end = we_new,
            "incremental_relex"
        );
        match finish(snapshot, tokens) {
            Ok(cached) => Ok(cached),
            // Splice inconsistency: recover with a full relex rather than
            // surfacing a fault for a recoverable state.
            Err(_) => self.relex_full(snapshot),
        }
    }
}

/// An edit is only usable for incremental reuse when it matches the cached
/// and new document lengths.
fn consistent(old_len: usize, edit: &PendingEdit, new_len: usize) -> bool {
    edit.a <= edit.b
        && edit.b <= old_len
        && old_len + edit.insert_len == new_len + (edit.b - edit.a)
}

fn finish(snapshot: &Snapshot, tokens: Vec<Span>) -> Result<Cached, SyntaxError> {
    let filled = fill_gaps(&tokens, snapshot.len());
    validate_coverage(&filled, snapshot.len())?;
    Ok(Cached {
        version: snapshot.version(),
        len: snapshot.len(),
        tokens,
        filled,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::TokenClass;
    use crate::lexer::WindowLex;
    use core_text::Document;

    #[test]
    fn deterministic_for_same_snapshot() {
        let doc = Document::from_str("fn main() { let x = 1; }\n");
        let snap = doc.snapshot();
        let mut cache = HighlightCache::new("rust");
        let first = cache.highlight(&snap).unwrap().to_vec();
        let second = cache.highlight(&snap).unwrap().to_vec();
        assert_eq!(first, second);
        validate_coverage(&first, snap.len()).unwrap();
    }

    #[test]
    fn unknown_language_uses_fallback() {
        let mut cache = HighlightCache::new("brainfuck");
        assert!(cache.is_fallback());
        let doc = Document::from_str("hello + world");
        let spans = cache.highlight(&doc.snapshot()).unwrap();
        assert!(spans.iter().all(|s| matches!(
            s.class,
            TokenClass::Identifier | TokenClass::Punctuation | TokenClass::None
        )));
    }

    #[test]
    fn set_language_reports_unsupported() {
        let mut cache = HighlightCache::new("rust");
        assert!(matches!(
            cache.set_language("cobol"),
            Err(SyntaxError::UnsupportedLanguage { .. })
        ));
        assert!(cache.is_fallback());
    }

    #[test]
    fn incremental_matches_full_relex() {
        let src = "fn main() {\n    let alpha = 1;\n    let beta = 2;\n}\n";
        let mut doc = Document::from_str(src);
        let mut cache = HighlightCache::new("rust");
        cache.highlight(&doc.snapshot()).unwrap();

        // Edit the beta line.
        let at = src.find("beta").unwrap();
        doc.delete(at, 4).unwrap();
        doc.insert(at, "gamma_var").unwrap();
        cache.apply_edit(at, at + 4, 0);
        cache.apply_edit(at, at, 9);
        // Two pending edits force the full path; compare against a fresh
        // cache on the same snapshot for equality.
        let snap = doc.snapshot();
        let incremental = cache.highlight(&snap).unwrap().to_vec();
        let mut fresh = HighlightCache::new("rust");
        let full = fresh.highlight(&snap).unwrap().to_vec();
        assert_eq!(incremental, full);
    }

    #[test]
    fn single_edit_incremental_path_is_exact() {
        let src = "// header\nfn one() {}\nfn two() {}\nfn three() {}\n";
        let mut doc = Document::from_str(src);
        let mut cache = HighlightCache::new("rust");
        cache.highlight(&doc.snapshot()).unwrap();

        let at = src.find("two").unwrap();
        doc.insert(at, "twenty_").unwrap();
        cache.apply_edit(at, at, "twenty_".len());
        let snap = doc.snapshot();
        let incremental = cache.highlight(&snap).unwrap().to_vec();
        let mut fresh = HighlightCache::new("rust");
        let full = fresh.highlight(&snap).unwrap().to_vec();
        assert_eq!(incremental, full);
    }

    #[test]
    fn edit_opening_block_comment_invalidates_suffix() {
        let src = "fn a() {}\nfn b() {}\nfn c() {}\n";
        let mut doc = Document::from_str(src);
        let mut cache = HighlightCache::new("rust");
        cache.highlight(&doc.snapshot()).unwrap();

        // Open an unterminated block comment at the top.
        doc.insert(0, "/* ").unwrap();
        cache.apply_edit(0, 0, 3);
        let snap = doc.snapshot();
        let spans = cache.highlight(&snap).unwrap().to_vec();
        let mut fresh = HighlightCache::new("rust");
        let full = fresh.highlight(&snap).unwrap().to_vec();
        assert_eq!(spans, full);
        // Everything should now be one comment token.
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].class, TokenClass::Comment);
    }

    struct FaultyLexer;
    impl Highlighter for FaultyLexer {
        fn name(&self) -> &'static str {
            "faulty"
        }
        fn lex_window(
            &self,
            _text: &str,
            _start: usize,
            _end: usize,
        ) -> Result<WindowLex, SyntaxError> {
            Err(SyntaxError::ParserInternal {
                detail: "injected".into(),
            })
        }
    }

    struct CountingLexer(std::cell::Cell<bool>);
    impl Highlighter for CountingLexer {
        fn name(&self) -> &'static str {
            "counting"
        }
        fn lex_window(
            &self,
            text: &str,
            start: usize,
            end: usize,
        ) -> Result<WindowLex, SyntaxError> {
            if self.0.get() {
                return Err(SyntaxError::ParserInternal {
                    detail: "flipped".into(),
                });
            }
            PlainLexer.lex_window(text, start, end)
        }
    }

    #[test]
    fn parser_fault_without_history_is_an_error() {
        let mut cache = HighlightCache::with_highlighter("x", Box::new(FaultyLexer));
        let doc = Document::from_str("abc");
        assert!(matches!(
            cache.highlight(&doc.snapshot()),
            Err(SyntaxError::ParserInternal { .. })
        ));
    }

    #[test]
    fn parser_fault_serves_last_good_and_marks_dirty() {
        let lexer = CountingLexer(std::cell::Cell::new(false));
        let mut cache = HighlightCache::with_highlighter("x", Box::new(lexer));
        let mut doc = Document::from_str("abc def");
        let good = cache.highlight(&doc.snapshot()).unwrap().to_vec();

        // Flip the lexer into fault mode via the trait object: rebuild with a
        // faulty lexer while keeping the cached spans.
        // (The cache keeps serving the stale result and reports dirty.)
        doc.insert(0, "x").unwrap();
        cache.apply_edit(0, 0, 1);
        // Swap in a faulty lexer by setting the flag through set-language is
        // not possible; emulate the fault by replacing the lexer field via a
        // second cache sharing history is overkill -- instead use FaultyLexer
        // from the start of the second highlight.
        cache.lexer = Box::new(FaultyLexer);
        let stale = cache.highlight(&doc.snapshot()).unwrap().to_vec();
        assert_eq!(stale, good);
        assert!(cache.is_dirty());
    }
}
