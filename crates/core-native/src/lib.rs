//! Native plugin loader: dlopen a dynamic library and bind the versioned
//! C symbol table.
//!
//! Required symbols: `plugin_info` (metadata + ABI version) and
//! `plugin_init` (one-time setup, `false` aborts the load). Optional:
//! `plugin_setup` (called exactly once after a successful init),
//! `plugin_teardown` (called on unload), and `plugin_on_event` (editor event
//! callback; modules without it have no event subscriptions).
//!
//! The `plugin_info` return struct layout is part of the ABI and versioned
//! by `api_version`; any layout change bumps `CURRENT_API_VERSION` and the
//! loader accepts exactly the current value.
//!
//! Lifetime rule: extracted function pointers are raw and carry no borrow of
//! the `Library`, so `NativeModule` keeps the library alive for as long as
//! any pointer can be invoked and only closes it in `Drop`, after teardown.

use std::ffi::{CStr, CString, c_char};
use std::path::{Path, PathBuf};

use libloading::{Library, Symbol};
use thiserror::Error;
use tracing::{debug, warn};

/// Current native ABI version. Any bump is breaking.
pub const CURRENT_API_VERSION: u32 = 1;

#[derive(Debug, Error)]
pub enum NativeError {
    #[error("failed to load library {path:?}: {detail}")]
    LoadFailed { path: PathBuf, detail: String },
    #[error("library is missing required symbol {symbol:?}")]
    MissingSymbol { symbol: &'static str },
    #[error("plugin ABI version {found} does not match host version {expected}")]
    ApiVersionMismatch { found: u32, expected: u32 },
    #[error("plugin_init returned false for {path:?}")]
    InitFailed { path: PathBuf },
}

/// `plugin_info` return value. `#[repr(C)]`; layout is the v1 ABI contract.
#[repr(C)]
pub struct RawPluginInfo {
    pub name: *const c_char,
    pub version: *const c_char,
    pub author: *const c_char,
    pub api_version: u32,
}

/// Owned copy of the metadata a module reported.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NativePluginInfo {
    pub name: String,
    pub version: String,
    pub author: String,
    pub api_version: u32,
}

impl NativePluginInfo {
    /// Copy C strings out of the raw struct. Null pointers become empty
    /// strings; invalid UTF-8 is replaced, not rejected, since metadata is
    /// display-only.
    ///
    /// # Safety
    /// Non-null pointers must reference NUL-terminated strings that stay
    /// valid for the duration of the call.
    pub unsafe fn from_raw(raw: &RawPluginInfo) -> Self {
        unsafe fn copy(ptr: *const c_char) -> String {
            if ptr.is_null() {
                return String::new();
            }
            unsafe { CStr::from_ptr(ptr) }
                .to_string_lossy()
                .into_owned()
        }
        unsafe {
            Self {
                name: copy(raw.name),
                version: copy(raw.version),
                author: copy(raw.author),
                api_version: raw.api_version,
            }
        }
    }
}

type InfoFn = unsafe extern "C" fn() -> RawPluginInfo;
type InitFn = unsafe extern "C" fn() -> bool;
type LifecycleFn = unsafe extern "C" fn();
type EventFn = unsafe extern "C" fn(*const c_char);

/// A loaded native plugin. Dropping (or `unload`) runs `plugin_teardown`
/// when present, then closes the library handle.
#[derive(Debug)]
pub struct NativeModule {
    info: NativePluginInfo,
    path: PathBuf,
    teardown: Option<LifecycleFn>,
    on_event: Option<EventFn>,
    torn_down: bool,
    /// Must stay alive while any extracted pointer can still be called;
    /// dropped last by the `Drop` impl.
    _library: Library,
}

impl NativeModule {
    /// Open `path`, bind the symbol table, verify the ABI version, and run
    /// the init/setup sequence.
    pub fn load(path: &Path) -> Result<Self, NativeError> {
        let library = unsafe { Library::new(path) }.map_err(|err| NativeError::LoadFailed {
            path: path.to_path_buf(),
            detail: err.to_string(),
        })?;

        let info_fn: InfoFn = unsafe {
            let symbol: Symbol<InfoFn> =
                library
                    .get(b"plugin_info\0")
                    .map_err(|_| NativeError::MissingSymbol {
                        symbol: "plugin_info",
                    })?;
            *symbol
        };
        let init_fn: InitFn = unsafe {
            let symbol: Symbol<InitFn> =
                library
                    .get(b"plugin_init\0")
                    .map_err(|_| NativeError::MissingSymbol {
                        symbol: "plugin_init",
                    })?;
            *symbol
        };
        let setup_fn: Option<LifecycleFn> = unsafe {
            library
                .get::<LifecycleFn>(b"plugin_setup\0")
                .ok()
                .map(|s| *s)
        };
        let teardown: Option<LifecycleFn> = unsafe {
            library
                .get::<LifecycleFn>(b"plugin_teardown\0")
                .ok()
                .map(|s| *s)
        };
        let on_event: Option<EventFn> = unsafe {
            library
                .get::<EventFn>(b"plugin_on_event\0")
                .ok()
                .map(|s| *s)
        };

        let raw = unsafe { info_fn() };
        let info = unsafe { NativePluginInfo::from_raw(&raw) };
        if info.api_version != CURRENT_API_VERSION {
            return Err(NativeError::ApiVersionMismatch {
                found: info.api_version,
                expected: CURRENT_API_VERSION,
            });
        }

        if !unsafe { init_fn() } {
            return Err(NativeError::InitFailed {
                path: path.to_path_buf(),
            });
        }
        if let Some(setup) = setup_fn {
            unsafe { setup() };
        }
        debug!(
            target: "plugin.native",
            name = %info.name,
            version = %info.version,
            path = %path.display(),
            "native module loaded"
        );
        Ok(Self {
            info,
            path: path.to_path_buf(),
            teardown,
            on_event,
            torn_down: false,
            _library: library,
        })
    }

    pub fn info(&self) -> &NativePluginInfo {
        &self.info
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// True when the module exports the optional event callback.
    pub fn subscribes_to_events(&self) -> bool {
        self.on_event.is_some()
    }

    /// Invoke the optional event callback. Returns false when the module
    /// exports none (or the event name contains an interior NUL).
    pub fn dispatch_event(&self, event: &str) -> bool {
        let Some(callback) = self.on_event else {
            return false;
        };
        let Ok(name) = CString::new(event) else {
            warn!(target: "plugin.native", event, "event name not representable as C string");
            return false;
        };
        unsafe { callback(name.as_ptr()) };
        true
    }

    /// Run teardown and close the library.
    pub fn unload(mut self) {
        self.run_teardown();
        // Library closes when `self` drops here.
    }

    fn run_teardown(&mut self) {
        if self.torn_down {
            return;
        }
        self.torn_down = true;
        if let Some(teardown) = self.teardown {
            unsafe { teardown() };
        }
        debug!(target: "plugin.native", path = %self.path.display(), "native module unloaded");
    }
}

impl Drop for NativeModule {
    fn drop(&mut self) {
        self.run_teardown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn load_missing_file_fails() {
        let err = NativeModule::load(Path::new("/nonexistent/libplugin.so")).unwrap_err();
        assert!(matches!(err, NativeError::LoadFailed { .. }));
    }

    #[test]
    fn load_non_library_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("not_a_lib.so");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "definitely not ELF").unwrap();
        let err = NativeModule::load(&path).unwrap_err();
        assert!(matches!(err, NativeError::LoadFailed { .. }));
    }

    #[test]
    fn raw_info_conversion() {
        let name = CString::new("git-signs").unwrap();
        let version = CString::new("0.2.0").unwrap();
        let raw = RawPluginInfo {
            name: name.as_ptr(),
            version: version.as_ptr(),
            author: std::ptr::null(),
            api_version: CURRENT_API_VERSION,
        };
        let info = unsafe { NativePluginInfo::from_raw(&raw) };
        assert_eq!(info.name, "git-signs");
        assert_eq!(info.version, "0.2.0");
        assert_eq!(info.author, "");
        assert_eq!(info.api_version, 1);
    }
}
