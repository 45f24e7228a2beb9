//! Table-driven lexers producing token spans.
//!
//! One scanner, many language tables. A window lex starts at a line boundary
//! and assumes the default lexer state there; constructs that can span lines
//! (block comments, multi-line strings) report `clean_end = false` when they
//! run off the end of the window, and the cache widens the window in
//! response. Approximate by design: the token tables classify the common
//! surface of each language, not its full grammar.

use crate::{Span, SyntaxError, TokenClass};

/// Result of lexing one window. Token spans use absolute byte offsets and
/// contain no gap filler.
#[derive(Debug, Clone)]
pub struct WindowLex {
    pub tokens: Vec<Span>,
    /// True when the lexer finished the window in its default state. False
    /// means an unterminated multi-line construct reached the window end.
    pub clean_end: bool,
}

pub trait Highlighter {
    fn name(&self) -> &'static str;
    /// Lex `text[start..end]`. `start` must sit at a line start (or 0) and
    /// both bounds on char boundaries.
    fn lex_window(&self, text: &str, start: usize, end: usize) -> Result<WindowLex, SyntaxError>;
}

/// Static classification tables for one language.
pub struct LanguageSpec {
    pub tag: &'static str,
    pub keywords: &'static [&'static str],
    pub types: &'static [&'static str],
    pub constants: &'static [&'static str],
    pub booleans: &'static [&'static str],
    pub line_comment: Option<&'static str>,
    pub doc_comments: &'static [&'static str],
    pub block_comment: Option<(&'static str, &'static str)>,
    pub multiline_strings: bool,
    pub char_literals: bool,
    pub lifetimes: bool,
    pub attributes: bool,
    pub builtin_at: bool,
    pub uppercase_types: bool,
    pub field_keys: bool,
}

pub const RUST: LanguageSpec = LanguageSpec {
    tag: "rust",
    keywords: &[
        "as", "async", "await", "break", "const", "continue", "crate", "dyn", "else", "enum",
        "extern", "fn", "for", "if", "impl", "in", "let", "loop", "match", "mod", "move", "mut",
        "pub", "ref", "return", "self", "Self", "static", "struct", "super", "trait", "type",
        "unsafe", "use", "where", "while",
    ],
    types: &[
        "bool", "char", "f32", "f64", "i8", "i16", "i32", "i64", "i128", "isize", "str", "u8",
        "u16", "u32", "u64", "u128", "usize", "Box", "Option", "Result", "String", "Vec",
    ],
    constants: &[],
    booleans: &["true", "false"],
    line_comment: Some("//"),
    doc_comments: &["///", "//!"],
    block_comment: Some(("/*", "*/")),
    multiline_strings: true,
    char_literals: true,
    lifetimes: true,
    attributes: true,
    builtin_at: false,
    uppercase_types: true,
    field_keys: false,
};

pub const ZIG: LanguageSpec = LanguageSpec {
    tag: "zig",
    keywords: &[
        "and", "async", "await", "break", "catch", "comptime", "const", "continue", "defer",
        "else", "enum", "errdefer", "error", "export", "extern", "fn", "for", "if", "inline",
        "or", "orelse", "pub", "resume", "return", "struct", "suspend", "switch", "test", "try",
        "union", "unreachable", "usingnamespace", "var", "while",
    ],
    types: &[
        "anyopaque", "anytype", "bool", "f16", "f32", "f64", "i8", "i16", "i32", "i64", "i128",
        "isize", "noreturn", "type", "u8", "u16", "u32", "u64", "u128", "usize", "void",
    ],
    constants: &["null", "undefined"],
    booleans: &["true", "false"],
    line_comment: Some("//"),
    doc_comments: &["///", "//!"],
    block_comment: None,
    multiline_strings: false,
    char_literals: true,
    lifetimes: false,
    attributes: false,
    builtin_at: true,
    uppercase_types: true,
    field_keys: false,
};

pub const TOML: LanguageSpec = LanguageSpec {
    tag: "toml",
    keywords: &[],
    types: &[],
    constants: &[],
    booleans: &["true", "false"],
    line_comment: Some("#"),
    doc_comments: &[],
    block_comment: None,
    multiline_strings: false,
    char_literals: false,
    lifetimes: false,
    attributes: false,
    builtin_at: false,
    uppercase_types: false,
    field_keys: true,
};

/// Look up the lexer for a language tag.
pub fn highlighter_for(tag: &str) -> Result<Box<dyn Highlighter + Send>, SyntaxError> {
    match tag {
        "rust" => Ok(Box::new(TableLexer::new(&RUST))),
        "zig" => Ok(Box::new(TableLexer::new(&ZIG))),
        "toml" => Ok(Box::new(TableLexer::new(&TOML))),
        _ => Err(SyntaxError::UnsupportedLanguage {
            tag: tag.to_string(),
        }),
    }
}

pub struct TableLexer {
    spec: &'static LanguageSpec,
}

impl TableLexer {
    pub fn new(spec: &'static LanguageSpec) -> Self {
        Self { spec }
    }
}

impl Highlighter for TableLexer {
    fn name(&self) -> &'static str {
        self.spec.tag
    }

    fn lex_window(&self, text: &str, start: usize, end: usize) -> Result<WindowLex, SyntaxError> {
        let slice = &text[start..end];
        let mut lex = Lexer {
            spec: self.spec,
            slice,
            base: start,
            pos: 0,
            tokens: Vec::new(),
            clean_end: true,
        };
        lex.run();
        Ok(WindowLex {
            tokens: lex.tokens,
            clean_end: lex.clean_end,
        })
    }
}

struct Lexer<'a> {
    spec: &'static LanguageSpec,
    slice: &'a str,
    base: usize,
    pos: usize,
    tokens: Vec<Span>,
    clean_end: bool,
}

impl<'a> Lexer<'a> {
    fn rest(&self) -> &'a str {
        &self.slice[self.pos..]
    }

    fn peek(&self) -> Option<char> {
        self.rest().chars().next()
    }

    fn push(&mut self, start: usize, end: usize, class: TokenClass) {
        if end > start {
            self.tokens
                .push(Span::new(self.base + start, self.base + end, class));
        }
    }

    fn line_end(&self, from: usize) -> usize {
        match self.slice[from..].find('\n') {
            Some(rel) => from + rel,
            None => self.slice.len(),
        }
    }

    fn run(&mut self) {
        while self.pos < self.slice.len() {
            let c = match self.peek() {
                Some(c) => c,
                None => break,
            };
            if c.is_whitespace() {
                self.pos += c.len_utf8();
                continue;
            }
            if self.doc_or_line_comment() {
                continue;
            }
            if self.block_comment() {
                continue;
            }
            if self.spec.attributes && self.attribute() {
                continue;
            }
            if c == '"' {
                self.string_literal();
                continue;
            }
            if c == '\'' && (self.spec.char_literals || self.spec.lifetimes) {
                self.quote_token();
                continue;
            }
            if self.spec.builtin_at && c == '@' {
                self.builtin();
                continue;
            }
            if c.is_ascii_digit() {
                self.number();
                continue;
            }
            if c == '_' || c.is_alphabetic() {
                self.word();
                continue;
            }
            self.punctuation(c);
        }
    }

    fn doc_or_line_comment(&mut self) -> bool {
        let start = self.pos;
        for doc in self.spec.doc_comments {
            if self.rest().starts_with(doc) {
                let end = self.line_end(start);
                self.push(start, end, TokenClass::DocComment);
                self.pos = end;
                return true;
            }
        }
        if let Some(lc) = self.spec.line_comment {
            if self.rest().starts_with(lc) {
                let end = self.line_end(start);
                self.push(start, end, TokenClass::Comment);
                self.pos = end;
                return true;
            }
        }
        false
    }

    fn block_comment(&mut self) -> bool {
        let Some((open, close)) = self.spec.block_comment else {
            return false;
        };
        if !self.rest().starts_with(open) {
            return false;
        }
        let start = self.pos;
        match self.slice[start + open.len()..].find(close) {
            Some(rel) => {
                let end = start + open.len() + rel + close.len();
                self.push(start, end, TokenClass::Comment);
                self.pos = end;
            }
            None => {
                // Unterminated within the window; the cache widens or falls
                // back to a full relex.
                self.push(start, self.slice.len(), TokenClass::Comment);
                self.pos = self.slice.len();
                self.clean_end = false;
            }
        }
        true
    }

    fn attribute(&mut self) -> bool {
        let rest = self.rest();
        if !(rest.starts_with("#[") || rest.starts_with("#![")) {
            return false;
        }
        let start = self.pos;
        let line_end = self.line_end(start);
        let end = match self.slice[start..line_end].find(']') {
            Some(rel) => start + rel + 1,
            None => line_end,
        };
        self.push(start, end, TokenClass::Attribute);
        self.pos = end;
        true
    }

    fn string_literal(&mut self) {
        let start = self.pos;
        let mut chars = self.slice[start + 1..].char_indices();
        let mut escaped = false;
        while let Some((rel, c)) = chars.next() {
            let abs = start + 1 + rel;
            if escaped {
                escaped = false;
                continue;
            }
            match c {
                '\\' => escaped = true,
                '"' => {
                    self.push(start, abs + 1, TokenClass::String);
                    self.pos = abs + 1;
                    return;
                }
                '\n' if !self.spec.multiline_strings => {
                    // Unterminated single-line string.
                    self.push(start, abs, TokenClass::Invalid);
                    self.pos = abs;
                    return;
                }
                _ => {}
            }
        }
        // Ran off the window.
        self.push(start, self.slice.len(), TokenClass::String);
        self.pos = self.slice.len();
        if self.spec.multiline_strings {
            self.clean_end = false;
        }
    }

    /// A single quote starts either a char literal or (in Rust) a lifetime.
    fn quote_token(&mut self) {
        let start = self.pos;
        let rest = &self.slice[start + 1..];
        if self.spec.char_literals {
            // Try 'x' or '\x' with a closing quote on the same line.
            let mut chars = rest.char_indices();
            if let Some((_, first)) = chars.next() {
                if first == '\\' {
                    // Skip the escaped char, then expect the close.
                    if chars.next().is_some() {
                        if let Some((rel3, c3)) = chars.next() {
                            if c3 == '\'' {
                                let end = start + 1 + rel3 + 1;
                                self.push(start, end, TokenClass::Char);
                                self.pos = end;
                                return;
                            }
                        }
                    }
                } else if first != '\'' && first != '\n' {
                    if let Some((rel2, c2)) = chars.next() {
                        if c2 == '\'' {
                            let end = start + 1 + rel2 + 1;
                            self.push(start, end, TokenClass::Char);
                            self.pos = end;
                            return;
                        }
                    }
                }
            }
        }
        if self.spec.lifetimes {
            let ident_len: usize = rest
                .chars()
                .take_while(|c| *c == '_' || c.is_alphanumeric())
                .map(|c| c.len_utf8())
                .sum();
            if ident_len > 0 {
                let end = start + 1 + ident_len;
                self.push(start, end, TokenClass::Lifetime);
                self.pos = end;
                return;
            }
        }
        self.push(start, start + 1, TokenClass::Punctuation);
        self.pos = start + 1;
    }

    fn builtin(&mut self) {
        let start = self.pos;
        let ident_len: usize = self.slice[start + 1..]
            .chars()
            .take_while(|c| *c == '_' || c.is_alphanumeric())
            .map(|c| c.len_utf8())
            .sum();
        if ident_len == 0 {
            self.push(start, start + 1, TokenClass::Operator);
            self.pos = start + 1;
            return;
        }
        let end = start + 1 + ident_len;
        self.push(start, end, TokenClass::Special);
        self.pos = end;
    }

    fn number(&mut self) {
        let start = self.pos;
        let mut end = start;
        let mut chars = self.slice[start..].char_indices().peekable();
        while let Some((rel, c)) = chars.next() {
            let keep = c.is_ascii_alphanumeric()
                || c == '_'
                || (c == '.'
                    && chars
                        .peek()
                        .is_some_and(|(_, next)| next.is_ascii_digit()));
            if !keep {
                break;
            }
            end = start + rel + c.len_utf8();
        }
        self.push(start, end, TokenClass::Number);
        self.pos = end;
    }

    fn word(&mut self) {
        let start = self.pos;
        let len: usize = self.rest()
            .chars()
            .take_while(|c| *c == '_' || c.is_alphanumeric())
            .map(|c| c.len_utf8())
            .sum();
        let end = start + len;
        let word = &self.slice[start..end];
        let after = self.slice[end..].trim_start();
        let class = if self.spec.keywords.contains(&word) {
            TokenClass::Keyword
        } else if self.spec.booleans.contains(&word) {
            TokenClass::Boolean
        } else if self.spec.constants.contains(&word) {
            TokenClass::Constant
        } else if self.spec.types.contains(&word) {
            TokenClass::Type
        } else if self.slice[end..].starts_with('!') && self.spec.attributes {
            TokenClass::Macro
        } else if self.spec.field_keys && after.starts_with('=') && !after.starts_with("==") {
            TokenClass::Field
        } else if after.starts_with('(') {
            TokenClass::Function
        } else if self.spec.uppercase_types
            && word.chars().next().is_some_and(|c| c.is_uppercase())
        {
            TokenClass::Type
        } else {
            TokenClass::Identifier
        };
        self.push(start, end, class);
        self.pos = end;
    }

    fn punctuation(&mut self, c: char) {
        let start = self.pos;
        let end = start + c.len_utf8();
        let class = match c {
            '(' | ')' | '[' | ']' | '{' | '}' => TokenClass::Delimiter,
            '+' | '-' | '*' | '/' | '%' | '=' | '<' | '>' | '!' | '&' | '|' | '^' | '~' | '?'
            | '@' => TokenClass::Operator,
            ',' | ';' | ':' | '.' | '#' => TokenClass::Punctuation,
            _ if c.is_ascii_graphic() => TokenClass::Punctuation,
            // Anything else (stray non-ASCII outside identifiers) is left to
            // the gap filler.
            _ => {
                self.pos = end;
                return;
            }
        };
        self.push(start, end, class);
        self.pos = end;
    }
}

/// Fallback lexer for unsupported languages: identifiers and punctuation
/// only, never stateful across lines.
pub struct PlainLexer;

impl Highlighter for PlainLexer {
    fn name(&self) -> &'static str {
        "plain"
    }

    fn lex_window(&self, text: &str, start: usize, end: usize) -> Result<WindowLex, SyntaxError> {
        let slice = &text[start..end];
        let mut tokens = Vec::new();
        let mut pos = 0usize;
        while pos < slice.len() {
            let c = match slice[pos..].chars().next() {
                Some(c) => c,
                None => break,
            };
            if c == '_' || c.is_alphanumeric() {
                let len: usize = slice[pos..]
                    .chars()
                    .take_while(|c| *c == '_' || c.is_alphanumeric())
                    .map(|c| c.len_utf8())
                    .sum();
                tokens.push(Span::new(
                    start + pos,
                    start + pos + len,
                    TokenClass::Identifier,
                ));
                pos += len;
            } else if c.is_ascii_graphic() {
                tokens.push(Span::new(
                    start + pos,
                    start + pos + c.len_utf8(),
                    TokenClass::Punctuation,
                ));
                pos += c.len_utf8();
            } else {
                pos += c.len_utf8();
            }
        }
        Ok(WindowLex {
            tokens,
            clean_end: true,
        })
    }
}
