//! Sandboxed host for the plugin scripting language.
//!
//! The language is deliberately linear: top-level `fn name(args) { ... }`
//! declarations whose bodies are comments and dotted-identifier call
//! statements carrying one string literal. No loops, no branches, no
//! recursion, no user expressions. Termination is therefore structural: a
//! program is a finite list of actions per function, and execution is a
//! bounded iteration over that list. Anything richer belongs in a separate
//! interpreter with explicit step budgets, not here.
//!
//! `compile` lowers source to a `Program` (named action lists; `setup` is
//! the mandatory entry point). `execute` walks `setup` consulting the
//! sandbox budget between actions; editor events dispatch through
//! `execute_function` to `on_*` handlers when a script declares them.

use std::collections::BTreeMap;

use thiserror::Error;

pub mod host;
pub mod parse;
pub mod sandbox;

pub use host::{Clock, ManualClock, ScriptHost, SystemClock};
pub use sandbox::{HostStats, Sandbox, SandboxConfig};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ScriptError {
    /// The script declares no `setup()` with an empty parameter list.
    #[error("script has no setup() entry point")]
    SetupMissing,
    #[error("syntax error at line {line}: {detail}")]
    InvalidSyntax { line: usize, detail: String },
    /// Call to a callee outside the recognized capability table.
    #[error("unsupported statement at line {line}: unknown callee {callee:?}")]
    UnsupportedStatement { line: usize, callee: String },
    #[error("no function named {name:?} in program")]
    UnknownFunction { name: String },
    #[error("execution exceeded wall-time budget of {budget_ms} ms")]
    ExecutionTimeout { budget_ms: u64 },
    #[error("memory limit exceeded: {used} of {limit} bytes")]
    MemoryLimitExceeded { used: usize, limit: usize },
    #[error("sandbox violation: {detail}")]
    SandboxViolation { detail: String },
    #[error("unauthorized file access: {path}")]
    UnauthorizedFileAccess { path: String },
    #[error("unauthorized network access: {host}")]
    UnauthorizedNetworkAccess { host: String },
    /// Capability failed for a reason outside sandbox policy (the bridge
    /// reports the underlying cause in the message).
    #[error("capability failure: {detail}")]
    CapabilityFailed { detail: String },
}

/// One dispatchable operation lowered from a call statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    ShowMessage(String),
    Log(String),
    InsertText(String),
    RegisterTheme(String),
    RegisterCommand(String),
}

impl Action {
    /// Payload bytes retained by this action.
    pub fn payload_len(&self) -> usize {
        match self {
            Action::ShowMessage(s)
            | Action::Log(s)
            | Action::InsertText(s)
            | Action::RegisterTheme(s)
            | Action::RegisterCommand(s) => s.len(),
        }
    }
}

/// Compiled script: named action lists. `setup` is guaranteed present.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Program {
    functions: BTreeMap<String, Vec<Action>>,
}

impl Program {
    pub(crate) fn new(functions: BTreeMap<String, Vec<Action>>) -> Self {
        Self { functions }
    }

    pub fn setup(&self) -> &[Action] {
        self.functions
            .get("setup")
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn function(&self, name: &str) -> Option<&[Action]> {
        self.functions.get(name).map(Vec::as_slice)
    }

    pub fn function_names(&self) -> impl Iterator<Item = &str> {
        self.functions.keys().map(String::as_str)
    }

    /// Total payload bytes across all actions; the unit the sandbox charges
    /// for a loaded program.
    pub fn payload_len(&self) -> usize {
        self.functions
            .values()
            .flatten()
            .map(Action::payload_len)
            .sum()
    }
}

/// Capability sink the host dispatches actions into. The editor's bridge is
/// the production implementation; tests use recorders. The sandbox handle
/// carries the permission state capabilities must consult before touching
/// the filesystem or network.
pub trait Capabilities {
    fn apply(&mut self, sandbox: &mut Sandbox, action: &Action) -> Result<(), ScriptError>;
}
