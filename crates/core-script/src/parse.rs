//! Hand-rolled lexerless parser for the plugin script language.
//!
//! Grammar (whitespace and `//` comments insignificant between items):
//!
//! ```text
//! script    := decl*
//! decl      := "fn" IDENT "(" params? ")" "{" stmt* "}"
//! params    := IDENT ("," IDENT)*
//! stmt      := CALLEE "(" STRING? ")" ";"?
//! CALLEE    := IDENT ("." IDENT)*
//! STRING    := '"' (escape | char)* '"'    escapes: \" \\ \n \t
//! ```
//!
//! Statements are terminated by `;`, a newline, or the closing brace.
//! Lowering maps each callee onto the fixed capability table; anything else
//! is an unsupported statement.

use std::collections::BTreeMap;

use crate::{Action, Program, ScriptError};

/// Callee table. Kept sorted for readability; lookup is linear (the table
/// is tiny).
const CALLEES: &[(&str, fn(String) -> Action)] = &[
    ("ctx.insertText", Action::InsertText),
    ("ctx.log", Action::Log),
    ("ctx.showMessage", Action::ShowMessage),
    ("register_command", Action::RegisterCommand),
    ("register_theme", Action::RegisterTheme),
];

pub fn parse(source: &str) -> Result<Program, ScriptError> {
    let mut parser = Parser {
        chars: source.chars().collect(),
        pos: 0,
        line: 1,
    };
    let mut functions: BTreeMap<String, Vec<Action>> = BTreeMap::new();
    loop {
        parser.skip_trivia();
        if parser.at_end() {
            break;
        }
        let (name, params, actions) = parser.function()?;
        if name == "setup" && !params.is_empty() {
            // A setup with parameters is not the required entry point.
            return Err(ScriptError::SetupMissing);
        }
        if functions.insert(name.clone(), actions).is_some() {
            return Err(ScriptError::InvalidSyntax {
                line: parser.line,
                detail: format!("duplicate function {name:?}"),
            });
        }
    }
    if !functions.contains_key("setup") {
        return Err(ScriptError::SetupMissing);
    }
    Ok(Program::new(functions))
}

struct Parser {
    chars: Vec<char>,
    pos: usize,
    line: usize,
}

impl Parser {
    fn at_end(&self) -> bool {
        self.pos >= self.chars.len()
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += 1;
        if c == '\n' {
            self.line += 1;
        }
        Some(c)
    }

    fn err(&self, detail: impl Into<String>) -> ScriptError {
        ScriptError::InvalidSyntax {
            line: self.line,
            detail: detail.into(),
        }
    }

    /// Skip whitespace (including newlines) and line comments.
    fn skip_trivia(&mut self) {
        loop {
            while self.peek().is_some_and(char::is_whitespace) {
                self.bump();
            }
            if self.peek() == Some('/') && self.chars.get(self.pos + 1) == Some(&'/') {
                while let Some(c) = self.peek() {
                    if c == '\n' {
                        break;
                    }
                    self.bump();
                }
                continue;
            }
            break;
        }
    }

    /// Skip spaces and tabs only; newlines are statement terminators.
    fn skip_inline_space(&mut self) {
        while matches!(self.peek(), Some(' ') | Some('\t') | Some('\r')) {
            self.bump();
        }
    }

    fn ident(&mut self) -> Result<String, ScriptError> {
        let mut out = String::new();
        match self.peek() {
            Some(c) if c == '_' || c.is_ascii_alphabetic() => {}
            other => return Err(self.err(format!("expected identifier, found {other:?}"))),
        }
        while let Some(c) = self.peek() {
            if c == '_' || c.is_ascii_alphanumeric() {
                out.push(c);
                self.bump();
            } else {
                break;
            }
        }
        Ok(out)
    }

    fn expect(&mut self, want: char) -> Result<(), ScriptError> {
        match self.bump() {
            Some(c) if c == want => Ok(()),
            other => Err(self.err(format!("expected {want:?}, found {other:?}"))),
        }
    }

    fn function(&mut self) -> Result<(String, Vec<String>, Vec<Action>), ScriptError> {
        let kw = self.ident()?;
        if kw != "fn" {
            return Err(self.err(format!("expected \"fn\", found {kw:?}")));
        }
        self.skip_trivia();
        let name = self.ident()?;
        self.skip_trivia();
        self.expect('(')?;
        let params = self.params()?;
        self.skip_trivia();
        self.expect('{')?;
        let actions = self.body()?;
        Ok((name, params, actions))
    }

    fn params(&mut self) -> Result<Vec<String>, ScriptError> {
        let mut params = Vec::new();
        self.skip_trivia();
        if self.peek() == Some(')') {
            self.bump();
            return Ok(params);
        }
        loop {
            self.skip_trivia();
            params.push(self.ident()?);
            self.skip_trivia();
            match self.bump() {
                Some(',') => continue,
                Some(')') => return Ok(params),
                other => return Err(self.err(format!("expected ',' or ')', found {other:?}"))),
            }
        }
    }

    fn body(&mut self) -> Result<Vec<Action>, ScriptError> {
        let mut actions = Vec::new();
        loop {
            self.skip_trivia();
            match self.peek() {
                Some('}') => {
                    self.bump();
                    return Ok(actions);
                }
                Some(_) => actions.push(self.statement()?),
                None => return Err(self.err("unterminated function body")),
            }
        }
    }

    fn statement(&mut self) -> Result<Action, ScriptError> {
        let stmt_line = self.line;
        let mut callee = self.ident()?;
        while self.peek() == Some('.') {
            self.bump();
            callee.push('.');
            callee.push_str(&self.ident()?);
        }
        self.skip_inline_space();
        self.expect('(')?;
        self.skip_trivia();
        let arg = if self.peek() == Some('"') {
            self.string_literal()?
        } else {
            String::new()
        };
        self.skip_trivia();
        self.expect(')')?;
        self.skip_inline_space();
        // Optional `;`; otherwise a newline, `}`, or EOF terminates.
        match self.peek() {
            Some(';') => {
                self.bump();
            }
            Some('\n') | Some('}') | None => {}
            Some(other) => {
                return Err(self.err(format!("expected statement terminator, found {other:?}")));
            }
        }
        let ctor = CALLEES
            .iter()
            .find(|(name, _)| *name == callee)
            .map(|(_, ctor)| *ctor)
            .ok_or(ScriptError::UnsupportedStatement {
                line: stmt_line,
                callee: callee.clone(),
            })?;
        Ok(ctor(arg))
    }

    fn string_literal(&mut self) -> Result<String, ScriptError> {
        self.expect('"')?;
        let mut out = String::new();
        loop {
            match self.bump() {
                Some('"') => return Ok(out),
                Some('\\') => match self.bump() {
                    Some('"') => out.push('"'),
                    Some('\\') => out.push('\\'),
                    Some('n') => out.push('\n'),
                    Some('t') => out.push('\t'),
                    other => return Err(self.err(format!("invalid escape {other:?}"))),
                },
                Some('\n') | None => return Err(self.err("unterminated string literal")),
                Some(c) => out.push(c),
            }
        }
    }
}
