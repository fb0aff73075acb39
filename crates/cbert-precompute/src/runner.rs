//! Execution of a single invocation.

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tracing::debug;

use crate::error::{PrecomputeError, Result};
use crate::mode::ReadmissionMode;
use crate::spec::{InvocationSpec, IssuedCommand};

/// How an invocation ended.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum InvocationOutcome {
    /// Exited with status 0.
    Succeeded,

    /// Exited non-zero. `exit_code` is `None` when killed by a signal.
    Failed { exit_code: Option<i32> },

    /// The process could not be started or waited on.
    SpawnError { message: String },

    /// Killed after exceeding the timeout.
    TimedOut { after_secs: u64 },
}

/// Result of one invocation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct InvocationResult {
    pub mode: ReadmissionMode,
    pub output_dir: PathBuf,
    pub outcome: InvocationOutcome,
    pub duration_ms: u64,

    /// Present only when stdio was captured.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stdout: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stderr: Option<String>,
}

impl InvocationResult {
    pub fn new(spec: &InvocationSpec, outcome: InvocationOutcome, duration_ms: u64) -> Self {
        Self {
            mode: spec.mode,
            output_dir: spec.output_dir.clone(),
            outcome,
            duration_ms,
            stdout: None,
            stderr: None,
        }
    }

    pub fn succeeded(&self) -> bool {
        matches!(self.outcome, InvocationOutcome::Succeeded)
    }

    pub fn exit_code(&self) -> Option<i32> {
        match self.outcome {
            InvocationOutcome::Succeeded => Some(0),
            InvocationOutcome::Failed { exit_code } => exit_code,
            _ => None,
        }
    }
}

/// Something that can carry out an invocation.
#[async_trait]
pub trait Invoker: Send + Sync {
    /// Run `spec` to completion. External failures are reported in the
    /// returned outcome; `Err` is reserved for problems with the spec itself.
    async fn invoke(&self, spec: &InvocationSpec) -> Result<InvocationResult>;

    fn name(&self) -> &str;
}

/// Runs the precomputation program as a child process.
#[derive(Debug, Clone, Default)]
pub struct ProcessInvoker {
    /// Pipe stdout/stderr into the result instead of inheriting them.
    pub capture: bool,

    /// Kill the child after this long. `None` waits forever.
    pub timeout: Option<Duration>,

    pub working_dir: Option<PathBuf>,
}

impl ProcessInvoker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capture(mut self, capture: bool) -> Self {
        self.capture = capture;
        self
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    fn build_command(&self, spec: &InvocationSpec) -> Result<Command> {
        let argv = spec.command_line();
        let (exe, args) = argv.split_first().ok_or(PrecomputeError::EmptyLauncher)?;

        let mut cmd = Command::new(exe);
        cmd.args(args).envs(spec.env()).kill_on_drop(true);

        if let Some(dir) = &self.working_dir {
            cmd.current_dir(dir);
        }

        if self.capture {
            cmd.stdout(Stdio::piped()).stderr(Stdio::piped());
        } else {
            cmd.stdout(Stdio::inherit()).stderr(Stdio::inherit());
        }

        Ok(cmd)
    }
}

#[async_trait]
impl Invoker for ProcessInvoker {
    async fn invoke(&self, spec: &InvocationSpec) -> Result<InvocationResult> {
        spec.launcher.validate()?;
        let mut cmd = self.build_command(spec)?;
        let start = Instant::now();

        debug!(mode = %spec.mode, argv = ?spec.command_line(), "Spawning precomputation");

        let child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                let outcome = InvocationOutcome::SpawnError {
                    message: format!("failed to start {}: {}", spec.launcher.program.display(), e),
                };
                return Ok(InvocationResult::new(spec, outcome, elapsed_ms(start)));
            }
        };

        // Dropping the wait future on timeout drops the child, which kills it.
        let waited = match self.timeout {
            Some(limit) => match tokio::time::timeout(limit, child.wait_with_output()).await {
                Ok(waited) => waited,
                Err(_) => {
                    let outcome = InvocationOutcome::TimedOut {
                        after_secs: limit.as_secs(),
                    };
                    return Ok(InvocationResult::new(spec, outcome, elapsed_ms(start)));
                }
            },
            None => child.wait_with_output().await,
        };

        let duration_ms = elapsed_ms(start);
        let output = match waited {
            Ok(output) => output,
            Err(e) => {
                let outcome = InvocationOutcome::SpawnError {
                    message: format!("failed to wait for child: {}", e),
                };
                return Ok(InvocationResult::new(spec, outcome, duration_ms));
            }
        };

        let outcome = if output.status.success() {
            InvocationOutcome::Succeeded
        } else {
            InvocationOutcome::Failed {
                exit_code: output.status.code(),
            }
        };

        let mut result = InvocationResult::new(spec, outcome, duration_ms);
        if self.capture {
            result.stdout = Some(String::from_utf8_lossy(&output.stdout).to_string());
            result.stderr = Some(String::from_utf8_lossy(&output.stderr).to_string());
        }
        Ok(result)
    }

    fn name(&self) -> &str {
        "process"
    }
}

fn elapsed_ms(start: Instant) -> u64 {
    start.elapsed().as_millis() as u64
}

/// Records issued commands without running anything.
///
/// Every mode succeeds unless an outcome was scripted for it. Used for dry
/// runs.
#[derive(Debug, Default)]
pub struct RecordingInvoker {
    issued: Mutex<Vec<IssuedCommand>>,
    scripted: HashMap<ReadmissionMode, InvocationOutcome>,
}

impl RecordingInvoker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return `outcome` whenever `mode` is invoked.
    pub fn with_outcome(mut self, mode: ReadmissionMode, outcome: InvocationOutcome) -> Self {
        self.scripted.insert(mode, outcome);
        self
    }

    pub fn issued(&self) -> Vec<IssuedCommand> {
        self.issued
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }
}

#[async_trait]
impl Invoker for RecordingInvoker {
    async fn invoke(&self, spec: &InvocationSpec) -> Result<InvocationResult> {
        self.issued
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push(spec.issued());

        let outcome = self
            .scripted
            .get(&spec.mode)
            .cloned()
            .unwrap_or(InvocationOutcome::Succeeded);
        Ok(InvocationResult::new(spec, outcome, 0))
    }

    fn name(&self) -> &str {
        "recording"
    }
}
