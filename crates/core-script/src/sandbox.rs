//! Sandbox policy and accounting shared by the host and capability layer.
//!
//! The sandbox is consulted before every capability side effect. Denials
//! (disabled category, pattern mismatch) and exhausted budgets count as
//! violations; a denied call never consumes operation budget.
//!
//! File patterns support trailing-`*` prefix globs only. Blocked patterns
//! are consulted first; if the allow list is non-empty a path must also
//! match one of its entries.

use tracing::warn;

use crate::ScriptError;

pub const DEFAULT_MAX_WALL_TIME_MS: u64 = 5_000;
pub const DEFAULT_MAX_MEMORY_BYTES: usize = 50 * 1024 * 1024;
pub const DEFAULT_MAX_FILE_OPERATIONS: u32 = 100;
pub const DEFAULT_MAX_NETWORK_REQUESTS: u32 = 50;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SandboxConfig {
    pub max_wall_time_ms: u64,
    pub max_memory_bytes: usize,
    pub max_file_operations: u32,
    pub max_network_requests: u32,
    pub enable_filesystem_access: bool,
    pub enable_network_access: bool,
    pub enable_system_calls: bool,
    pub allowed_file_patterns: Vec<String>,
    pub blocked_file_patterns: Vec<String>,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            max_wall_time_ms: DEFAULT_MAX_WALL_TIME_MS,
            max_memory_bytes: DEFAULT_MAX_MEMORY_BYTES,
            max_file_operations: DEFAULT_MAX_FILE_OPERATIONS,
            max_network_requests: DEFAULT_MAX_NETWORK_REQUESTS,
            enable_filesystem_access: false,
            enable_network_access: false,
            enable_system_calls: false,
            allowed_file_patterns: Vec::new(),
            blocked_file_patterns: Vec::new(),
        }
    }
}

impl SandboxConfig {
    /// Reject patterns using glob syntax beyond the supported trailing `*`.
    pub fn validate(&self) -> Result<(), String> {
        for pattern in self
            .allowed_file_patterns
            .iter()
            .chain(&self.blocked_file_patterns)
        {
            validate_pattern(pattern)?;
        }
        Ok(())
    }
}

pub fn validate_pattern(pattern: &str) -> Result<(), String> {
    if pattern.is_empty() {
        return Err("empty file pattern".to_string());
    }
    if pattern.contains('?') || pattern.contains('[') {
        return Err(format!(
            "pattern {pattern:?} uses unsupported glob syntax (only trailing '*')"
        ));
    }
    if let Some(star) = pattern.find('*') {
        if star != pattern.len() - 1 {
            return Err(format!("pattern {pattern:?}: '*' is only valid as a suffix"));
        }
    }
    Ok(())
}

/// Trailing-`*` prefix glob; otherwise exact match.
pub fn pattern_matches(pattern: &str, path: &str) -> bool {
    match pattern.strip_suffix('*') {
        Some(prefix) => path.starts_with(prefix),
        None => path == pattern,
    }
}

/// Counters readable via `stats()`; reset as a unit.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct HostStats {
    pub execution_count: u64,
    pub total_wall_ms: u64,
    pub peak_memory_bytes: usize,
    pub file_ops: u64,
    pub network_ops: u64,
    pub violations: u64,
    /// Epoch milliseconds of the most recent execution start.
    pub last_start_ms: Option<u64>,
}

/// Permission state plus live accounting for one script host.
#[derive(Debug)]
pub struct Sandbox {
    config: SandboxConfig,
    stats: HostStats,
    mem_used: usize,
    /// High-water mark of the accounting call in flight; committed into
    /// stats only when the surrounding operation succeeds.
    call_high_water: usize,
}

impl Sandbox {
    pub fn new(config: SandboxConfig) -> Self {
        Self {
            config,
            stats: HostStats::default(),
            mem_used: 0,
            call_high_water: 0,
        }
    }

    pub fn config(&self) -> &SandboxConfig {
        &self.config
    }

    pub fn stats(&self) -> HostStats {
        self.stats
    }

    pub fn reset_stats(&mut self) {
        self.stats = HostStats::default();
    }

    pub fn note_violation(&mut self) {
        self.stats.violations += 1;
    }

    /// Gate a filesystem touch. Order: category enabled, blocked patterns,
    /// allow list, operation budget. Only a granted call consumes budget.
    pub fn validate_file_access(&mut self, path: &str) -> Result<(), ScriptError> {
        if !self.config.enable_filesystem_access {
            self.deny_file(path, "filesystem access disabled")?;
        }
        if self
            .config
            .blocked_file_patterns
            .iter()
            .any(|p| pattern_matches(p, path))
        {
            self.deny_file(path, "blocked pattern")?;
        }
        if !self.config.allowed_file_patterns.is_empty()
            && !self
                .config
                .allowed_file_patterns
                .iter()
                .any(|p| pattern_matches(p, path))
        {
            self.deny_file(path, "no allowed pattern matches")?;
        }
        if self.stats.file_ops >= u64::from(self.config.max_file_operations) {
            self.stats.violations += 1;
            return Err(ScriptError::SandboxViolation {
                detail: format!(
                    "file operation budget of {} exhausted",
                    self.config.max_file_operations
                ),
            });
        }
        self.stats.file_ops += 1;
        Ok(())
    }

    fn deny_file(&mut self, path: &str, reason: &str) -> Result<(), ScriptError> {
        self.stats.violations += 1;
        warn!(target: "script.host", path, reason, "file access denied");
        Err(ScriptError::UnauthorizedFileAccess {
            path: path.to_string(),
        })
    }

    /// Gate a network touch; same shape as file access without patterns.
    pub fn validate_network_access(&mut self, host: &str) -> Result<(), ScriptError> {
        if !self.config.enable_network_access {
            self.stats.violations += 1;
            warn!(target: "script.host", host, "network access denied");
            return Err(ScriptError::UnauthorizedNetworkAccess {
                host: host.to_string(),
            });
        }
        if self.stats.network_ops >= u64::from(self.config.max_network_requests) {
            self.stats.violations += 1;
            return Err(ScriptError::SandboxViolation {
                detail: format!(
                    "network request budget of {} exhausted",
                    self.config.max_network_requests
                ),
            });
        }
        self.stats.network_ops += 1;
        Ok(())
    }

    pub fn check_system_call(&mut self, what: &str) -> Result<(), ScriptError> {
        if !self.config.enable_system_calls {
            self.stats.violations += 1;
            return Err(ScriptError::SandboxViolation {
                detail: format!("system call {what:?} not permitted"),
            });
        }
        Ok(())
    }

    /// Account `bytes` of live allocation; fails when the cap is exceeded.
    pub fn charge_memory(&mut self, bytes: usize) -> Result<(), ScriptError> {
        let used = self.mem_used.saturating_add(bytes);
        if used > self.config.max_memory_bytes {
            self.stats.violations += 1;
            return Err(ScriptError::MemoryLimitExceeded {
                used,
                limit: self.config.max_memory_bytes,
            });
        }
        self.mem_used = used;
        self.call_high_water = self.call_high_water.max(used);
        Ok(())
    }

    pub fn release_memory(&mut self, bytes: usize) {
        self.mem_used = self.mem_used.saturating_sub(bytes);
    }

    /// Fold the in-flight high-water mark into stats.
    pub fn commit_peak(&mut self) {
        self.stats.peak_memory_bytes = self.stats.peak_memory_bytes.max(self.call_high_water);
        self.call_high_water = 0;
    }

    /// Drop the in-flight high-water mark without recording it.
    pub fn discard_peak(&mut self) {
        self.call_high_water = 0;
    }

    pub(crate) fn begin_execution(&mut self, epoch_ms: u64) {
        self.stats.execution_count += 1;
        self.stats.last_start_ms = Some(epoch_ms);
    }

    pub(crate) fn finish_execution(&mut self, elapsed_ms: u64) {
        self.stats.total_wall_ms += elapsed_ms;
        self.commit_peak();
    }
}
