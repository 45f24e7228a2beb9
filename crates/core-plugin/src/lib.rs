//! Plugin orchestration: manifest discovery, dependency-ordered loading,
//! per-instance lifecycle, and editor event dispatch.
//!
//! The manager owns every plugin instance. Scripts run inside a per-plugin
//! `ScriptHost` sized from the manifest's permission block; native plugins
//! are dlopened through `core-native`. A failure in one plugin is recorded
//! on that instance and never aborts its peers.

use thiserror::Error;

pub mod manager;
pub mod manifest;

pub use manager::{DiscoveryReport, PluginInstance, PluginManager, ThemeHooks};
pub use manifest::{Permissions, PluginKind, PluginManifest};

use core_native::NativeError;
use core_script::ScriptError;

#[derive(Debug, Error)]
pub enum PluginError {
    #[error("manifest at {path}: {detail}")]
    InvalidManifest { path: String, detail: String },
    #[error("plugin id {id:?} must be lowercase-dashed ([a-z0-9-])")]
    InvalidId { id: String },
    #[error("plugin {id}: version {version:?} is not valid semver: {detail}")]
    InvalidVersion {
        id: String,
        version: String,
        detail: String,
    },
    #[error("plugin {id}: entry point {entry:?} not found")]
    EntryPointMissing { id: String, entry: String },
    #[error("dependency cycle: {}", members.join(" -> "))]
    DependencyCycle { members: Vec<String> },
    #[error("plugin {plugin}: dependency {missing:?} is not installed")]
    UnsatisfiedDependency { plugin: String, missing: String },
    #[error("no plugin named {id:?}")]
    UnknownPlugin { id: String },
    #[error("plugin {id}: operation {op:?} invalid in state {state:?}")]
    InvalidState {
        id: String,
        state: PluginState,
        op: &'static str,
    },
    #[error("plugin {id}: {source}")]
    Script { id: String, source: ScriptError },
    #[error("plugin {id}: {source}")]
    Native { id: String, source: NativeError },
    #[error("plugin {id}: {detail}")]
    Io { id: String, detail: String },
}

/// Per-instance lifecycle. Only `Ready` instances receive events.
///
/// ```text
/// discovered -> loading -> ready -> unloaded
///                  |          |
///                  +-> failed <+
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PluginState {
    Discovered,
    Loading,
    Ready,
    Failed,
    Unloaded,
}

/// Editor events plugins can subscribe to. Scripts subscribe by declaring a
/// function with the matching `on_*` name; native modules by exporting
/// `plugin_on_event`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EditorEvent {
    BufferOpened,
    BufferSaved,
    BufferClosed,
    CursorMoved,
    ModeChanged,
}

impl EditorEvent {
    pub const ALL: [EditorEvent; 5] = [
        EditorEvent::BufferOpened,
        EditorEvent::BufferSaved,
        EditorEvent::BufferClosed,
        EditorEvent::CursorMoved,
        EditorEvent::ModeChanged,
    ];

    /// Stable wire name, also used for the native callback argument.
    pub fn name(&self) -> &'static str {
        match self {
            EditorEvent::BufferOpened => "buffer_opened",
            EditorEvent::BufferSaved => "buffer_saved",
            EditorEvent::BufferClosed => "buffer_closed",
            EditorEvent::CursorMoved => "cursor_moved",
            EditorEvent::ModeChanged => "mode_changed",
        }
    }

    /// Script function a plugin declares to subscribe.
    pub fn handler(&self) -> &'static str {
        match self {
            EditorEvent::BufferOpened => "on_buffer_opened",
            EditorEvent::BufferSaved => "on_buffer_saved",
            EditorEvent::BufferClosed => "on_buffer_closed",
            EditorEvent::CursorMoved => "on_cursor_moved",
            EditorEvent::ModeChanged => "on_mode_changed",
        }
    }
}
