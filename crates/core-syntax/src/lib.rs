//! Incremental syntax highlighting over document snapshots.
//!
//! The pipeline is a handwritten table-driven lexer per language feeding a
//! version-keyed span cache. Tree-sitter was considered and rejected for the
//! core: the contract here is determinism and incrementality, both of which
//! a stateless line-anchored lexer satisfies with far less machinery, and the
//! cache layer is parser-agnostic if that decision is ever revisited.
//!
//! Output contract: spans are sorted by `start_byte`, non-overlapping, and
//! their union covers `[0, len)` with `TokenClass::None` filling gaps. Two
//! `highlight` calls for the same `(snapshot, language)` return identical
//! spans.

use thiserror::Error;

pub mod cache;
pub mod lexer;

pub use cache::HighlightCache;
pub use lexer::{Highlighter, PlainLexer, TableLexer, highlighter_for};

/// Fixed enumeration of syntax categories. The discriminant is part of the
/// bridge serialization, so variants are append-only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum TokenClass {
    None = 0,
    Keyword,
    Identifier,
    Literal,
    Comment,
    DocComment,
    Punctuation,
    Delimiter,
    Operator,
    Type,
    String,
    Char,
    Number,
    Boolean,
    Escape,
    Invalid,
    Function,
    Macro,
    Attribute,
    Lifetime,
    Label,
    Constant,
    Module,
    Field,
    Parameter,
    Variable,
    Special,
    Tag,
    Heading,
    Link,
    Embedded,
    Whitespace,
}

impl TokenClass {
    pub const ALL: [TokenClass; 32] = [
        TokenClass::None,
        TokenClass::Keyword,
        TokenClass::Identifier,
        TokenClass::Literal,
        TokenClass::Comment,
        TokenClass::DocComment,
        TokenClass::Punctuation,
        TokenClass::Delimiter,
        TokenClass::Operator,
        TokenClass::Type,
        TokenClass::String,
        TokenClass::Char,
        TokenClass::Number,
        TokenClass::Boolean,
        TokenClass::Escape,
        TokenClass::Invalid,
        TokenClass::Function,
        TokenClass::Macro,
        TokenClass::Attribute,
        TokenClass::Lifetime,
        TokenClass::Label,
        TokenClass::Constant,
        TokenClass::Module,
        TokenClass::Field,
        TokenClass::Parameter,
        TokenClass::Variable,
        TokenClass::Special,
        TokenClass::Tag,
        TokenClass::Heading,
        TokenClass::Link,
        TokenClass::Embedded,
        TokenClass::Whitespace,
    ];
}

/// A contiguous byte range tagged with a token class. Half-open.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Span {
    pub start_byte: usize,
    pub end_byte: usize,
    pub class: TokenClass,
}

impl Span {
    pub fn new(start_byte: usize, end_byte: usize, class: TokenClass) -> Self {
        Self {
            start_byte,
            end_byte,
            class,
        }
    }

    pub fn len(&self) -> usize {
        self.end_byte - self.start_byte
    }

    pub fn is_empty(&self) -> bool {
        self.start_byte == self.end_byte
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SyntaxError {
    /// No lexer table for the requested language tag; the cache falls back
    /// to the plain identifier/punctuation lexer.
    #[error("unsupported language {tag:?}")]
    UnsupportedLanguage { tag: String },
    /// The lexer produced an inconsistent span stream and no previous good
    /// result exists to fall back to.
    #[error("internal parser fault: {detail}")]
    ParserInternal { detail: String },
}

/// Debug-level sanity check on a finished span stream: sorted,
/// non-overlapping, covering `[0, len)` exactly.
pub fn validate_coverage(spans: &[Span], len: usize) -> Result<(), SyntaxError> {
    let mut cursor = 0usize;
    for span in spans {
        if span.start_byte != cursor || span.end_byte < span.start_byte {
            return Err(SyntaxError::ParserInternal {
                detail: format!(
                    "span {}..{} breaks coverage at {}",
                    span.start_byte, span.end_byte, cursor
                ),
            });
        }
        cursor = span.end_byte;
    }
    if cursor != len {
        return Err(SyntaxError::ParserInternal {
            detail: format!("coverage ends at {cursor}, document length {len}"),
        });
    }
    Ok(())
}

/// Fill gaps between token spans with `TokenClass::None` so the result
/// covers `[0, len)`. Input must be sorted and non-overlapping.
pub fn fill_gaps(tokens: &[Span], len: usize) -> Vec<Span> {
    let mut out = Vec::with_capacity(tokens.len() * 2 + 1);
    let mut cursor = 0usize;
    for tok in tokens {
        if tok.is_empty() {
            continue;
        }
        if tok.start_byte > cursor {
            out.push(Span::new(cursor, tok.start_byte, TokenClass::None));
        }
        out.push(*tok);
        cursor = tok.end_byte;
    }
    if cursor < len {
        out.push(Span::new(cursor, len, TokenClass::None));
    }
    out
}
