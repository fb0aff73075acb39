//! Batch report and pass/fail verdict.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::batch::FailurePolicy;
use crate::error::Result;
use crate::mode::ReadmissionMode;
use crate::runner::{InvocationOutcome, InvocationResult};

/// One planned invocation and what became of it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BatchEntry {
    pub mode: ReadmissionMode,
    pub output_dir: PathBuf,

    /// `None` when the invocation was skipped after an earlier failure.
    pub result: Option<InvocationResult>,
}

impl BatchEntry {
    pub fn ran(result: InvocationResult) -> Self {
        Self {
            mode: result.mode,
            output_dir: result.output_dir.clone(),
            result: Some(result),
        }
    }

    pub fn skipped(mode: ReadmissionMode, output_dir: PathBuf) -> Self {
        Self {
            mode,
            output_dir,
            result: None,
        }
    }

    pub fn passed(&self) -> bool {
        self.result.as_ref().is_some_and(InvocationResult::succeeded)
    }

    pub fn failed(&self) -> bool {
        self.result.as_ref().is_some_and(|r| !r.succeeded())
    }

    pub fn is_skipped(&self) -> bool {
        self.result.is_none()
    }

    /// Short status word for terminal output.
    pub fn status_label(&self) -> String {
        match self.result.as_ref().map(|r| &r.outcome) {
            None => "skipped".to_string(),
            Some(InvocationOutcome::Succeeded) => "ok".to_string(),
            Some(InvocationOutcome::Failed {
                exit_code: Some(code),
            }) => format!("exit {}", code),
            Some(InvocationOutcome::Failed { exit_code: None }) => "killed".to_string(),
            Some(InvocationOutcome::SpawnError { .. }) => "spawn error".to_string(),
            Some(InvocationOutcome::TimedOut { after_secs }) => {
                format!("timed out after {}s", after_secs)
            }
        }
    }
}

/// Everything that happened during one batch run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BatchReport {
    pub batch_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,

    /// Digest of the plan that was executed.
    pub digest: String,

    pub failure_policy: FailurePolicy,
    pub invoker: String,
    pub entries: Vec<BatchEntry>,
}

impl BatchReport {
    pub fn passed_count(&self) -> usize {
        self.entries.iter().filter(|e| e.passed()).count()
    }

    pub fn failed_count(&self) -> usize {
        self.entries.iter().filter(|e| e.failed()).count()
    }

    pub fn skipped_count(&self) -> usize {
        self.entries.iter().filter(|e| e.is_skipped()).count()
    }

    pub fn duration_ms(&self) -> u64 {
        (self.finished_at - self.started_at)
            .num_milliseconds()
            .max(0) as u64
    }

    /// A batch passes only if every planned invocation ran and succeeded.
    pub fn verdict(&self) -> BatchVerdict {
        let mut failures = Vec::new();

        for entry in &self.entries {
            match &entry.result {
                None => failures.push(format!("{}: skipped after earlier failure", entry.mode)),
                Some(r) => match &r.outcome {
                    InvocationOutcome::Succeeded => {}
                    InvocationOutcome::Failed {
                        exit_code: Some(code),
                    } => failures.push(format!("{}: exited with code {}", entry.mode, code)),
                    InvocationOutcome::Failed { exit_code: None } => {
                        failures.push(format!("{}: terminated by signal", entry.mode))
                    }
                    InvocationOutcome::SpawnError { message } => {
                        failures.push(format!("{}: {}", entry.mode, message))
                    }
                    InvocationOutcome::TimedOut { after_secs } => failures.push(format!(
                        "{}: timed out after {}s",
                        entry.mode, after_secs
                    )),
                },
            }
        }

        let passed = failures.is_empty();
        let message = if passed {
            format!("All {} invocations succeeded", self.entries.len())
        } else {
            format!(
                "{} of {} invocations did not succeed",
                failures.len(),
                self.entries.len()
            )
        };

        BatchVerdict {
            passed,
            failures,
            message,
        }
    }

    /// Write the report as pretty JSON.
    pub fn write_json(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }
}

/// Pass/fail summary of a batch.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BatchVerdict {
    pub passed: bool,

    /// One line per invocation that did not succeed (empty if passed).
    pub failures: Vec<String>,

    pub message: String,
}
