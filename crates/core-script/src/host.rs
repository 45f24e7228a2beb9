//! Script host: compile + execute under sandbox accounting.
//!
//! Wall time is measured against an injectable clock so timeout behavior is
//! testable without sleeping. The deadline is consulted before every action
//! and once more after the last one, so a slow trailing capability is still
//! reported as a timeout.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use tracing::{debug, trace};

use crate::parse::parse;
use crate::sandbox::{HostStats, Sandbox, SandboxConfig};
use crate::{Action, Capabilities, Program, ScriptError};

pub trait Clock: Send {
    fn now(&self) -> Instant;
    fn epoch_ms(&self) -> u64;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn epoch_ms(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0)
    }
}

/// Test clock advanced by hand. Clones share state, so a test can keep a
/// handle while the host owns another.
#[derive(Clone)]
pub struct ManualClock {
    base: Instant,
    state: Arc<Mutex<(Duration, u64)>>,
}

impl ManualClock {
    pub fn new(epoch_ms: u64) -> Self {
        Self {
            base: Instant::now(),
            state: Arc::new(Mutex::new((Duration::ZERO, epoch_ms))),
        }
    }

    pub fn advance_ms(&self, ms: u64) {
        let mut state = self.state.lock().expect("clock state");
        state.0 += Duration::from_millis(ms);
        state.1 += ms;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.base + self.state.lock().expect("clock state").0
    }

    fn epoch_ms(&self) -> u64 {
        self.state.lock().expect("clock state").1
    }
}

pub struct ScriptHost {
    sandbox: Sandbox,
    clock: Box<dyn Clock>,
}

impl ScriptHost {
    pub fn new(config: SandboxConfig) -> Self {
        Self::with_clock(config, Box::new(SystemClock))
    }

    pub fn with_clock(config: SandboxConfig, clock: Box<dyn Clock>) -> Self {
        Self {
            sandbox: Sandbox::new(config),
            clock,
        }
    }

    pub fn config(&self) -> &SandboxConfig {
        self.sandbox.config()
    }

    /// Direct sandbox access for capability gating outside `execute` (the
    /// bridge validates file/network touches through this).
    pub fn sandbox(&mut self) -> &mut Sandbox {
        &mut self.sandbox
    }

    pub fn stats(&self) -> HostStats {
        self.sandbox.stats()
    }

    pub fn reset_stats(&mut self) {
        self.sandbox.reset_stats();
    }

    /// Parse `source` and lower it to a program. Parse and lowering
    /// allocations are charged against the memory budget for the duration
    /// of the call; a failed compile leaves statistics untouched.
    pub fn compile(&mut self, source: &str) -> Result<Program, ScriptError> {
        // Scratch estimate: the char buffer the parser builds plus the
        // decoded payloads, both bounded by twice the source length.
        let scratch = source.len().saturating_mul(2).max(1);
        self.sandbox.charge_memory(scratch)?;
        let outcome = match parse(source) {
            Ok(program) => match self.sandbox.charge_memory(program.payload_len()) {
                Ok(()) => {
                    self.sandbox.release_memory(program.payload_len());
                    Ok(program)
                }
                Err(err) => Err(err),
            },
            Err(err) => Err(err),
        };
        self.sandbox.release_memory(scratch);
        match &outcome {
            Ok(program) => {
                self.sandbox.commit_peak();
                debug!(
                    target: "script.host",
                    functions = program.function_names().count(),
                    actions = program.setup().len(),
                    "compile_ok"
                );
            }
            Err(err) => {
                self.sandbox.discard_peak();
                debug!(target: "script.host", error = %err, "compile_failed");
            }
        }
        outcome
    }

    /// Run the `setup` entry point.
    pub fn execute(
        &mut self,
        program: &Program,
        caps: &mut dyn Capabilities,
    ) -> Result<(), ScriptError> {
        self.run(program.setup(), caps)
    }

    /// Run a named function (editor event handlers).
    pub fn execute_function(
        &mut self,
        program: &Program,
        name: &str,
        caps: &mut dyn Capabilities,
    ) -> Result<(), ScriptError> {
        let actions = program
            .function(name)
            .ok_or_else(|| ScriptError::UnknownFunction {
                name: name.to_string(),
            })?;
        self.run(actions, caps)
    }

    fn run(
        &mut self,
        actions: &[Action],
        caps: &mut dyn Capabilities,
    ) -> Result<(), ScriptError> {
        let budget_ms = self.sandbox.config().max_wall_time_ms;
        let start = self.clock.now();
        self.sandbox.begin_execution(self.clock.epoch_ms());
        let payload: usize = actions.iter().map(Action::payload_len).sum();

        let mut outcome = self.sandbox.charge_memory(payload);
        let charged = outcome.is_ok();
        if outcome.is_ok() {
            outcome = self.dispatch_all(actions, caps, start, budget_ms);
        }
        if charged {
            self.sandbox.release_memory(payload);
        }
        let elapsed_ms = ms_between(start, self.clock.now());
        self.sandbox.finish_execution(elapsed_ms);
        trace!(
            target: "script.host",
            actions = actions.len(),
            elapsed_ms,
            ok = outcome.is_ok(),
            "execute_done"
        );
        outcome
    }

    fn dispatch_all(
        &mut self,
        actions: &[Action],
        caps: &mut dyn Capabilities,
        start: Instant,
        budget_ms: u64,
    ) -> Result<(), ScriptError> {
        for action in actions {
            self.check_deadline(start, budget_ms)?;
            caps.apply(&mut self.sandbox, action)?;
        }
        self.check_deadline(start, budget_ms)
    }

    fn check_deadline(&mut self, start: Instant, budget_ms: u64) -> Result<(), ScriptError> {
        let elapsed = ms_between(start, self.clock.now());
        if elapsed > budget_ms {
            self.sandbox.note_violation();
            return Err(ScriptError::ExecutionTimeout { budget_ms });
        }
        Ok(())
    }
}

fn ms_between(start: Instant, end: Instant) -> u64 {
    end.saturating_duration_since(start).as_millis() as u64
}
