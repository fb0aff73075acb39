//! Sequential execution of a batch plan.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::device::DeviceLocks;
use crate::error::Result;
use crate::plan::{BatchPlan, OutputDirPolicy};
use crate::report::{BatchEntry, BatchReport};
use crate::runner::Invoker;

/// What to do once an invocation does not succeed.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Attempt every remaining invocation regardless.
    #[default]
    ContinueOnFailure,

    /// Skip every remaining invocation.
    AbortOnFirstFailure,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunOptions {
    pub failure_policy: FailurePolicy,
    pub output_dirs: OutputDirPolicy,
}

/// Runs every spec of a plan, one after another.
pub struct BatchRunner;

impl BatchRunner {
    /// Run a plan holding the process-wide device locks.
    pub async fn run(
        plan: &BatchPlan,
        invoker: &dyn Invoker,
        options: RunOptions,
    ) -> Result<BatchReport> {
        Self::run_with_locks(DeviceLocks::global(), plan, invoker, options).await
    }

    /// Run a plan. Each invocation holds its device reservation for as long
    /// as it runs.
    pub async fn run_with_locks(
        locks: &DeviceLocks,
        plan: &BatchPlan,
        invoker: &dyn Invoker,
        options: RunOptions,
    ) -> Result<BatchReport> {
        plan.validate(options.output_dirs)?;

        let batch_id = Uuid::new_v4();
        let digest = plan.digest();
        let started_at = Utc::now();

        info!(
            batch_id = %batch_id,
            digest = %&digest[..12],
            invocations = plan.len(),
            invoker = invoker.name(),
            "Starting precomputation batch"
        );

        let mut entries = Vec::with_capacity(plan.len());
        let mut aborted = false;

        for spec in plan.specs() {
            if aborted {
                info!(mode = %spec.mode, "Skipping after earlier failure");
                entries.push(BatchEntry::skipped(spec.mode, spec.output_dir.clone()));
                continue;
            }

            let guard = locks.acquire(&spec.devices).await?;
            info!(
                mode = %spec.mode,
                devices = %spec.devices.visible_devices(),
                data_dir = %spec.data_dir.display(),
                output_dir = %spec.output_dir.display(),
                "Invoking precomputation"
            );
            let result = invoker.invoke(&spec).await?;
            drop(guard);

            if result.succeeded() {
                info!(mode = %spec.mode, duration_ms = result.duration_ms, "Invocation succeeded");
            } else {
                warn!(
                    mode = %spec.mode,
                    outcome = ?result.outcome,
                    duration_ms = result.duration_ms,
                    "Invocation did not succeed"
                );
                if options.failure_policy == FailurePolicy::AbortOnFirstFailure {
                    aborted = true;
                }
            }

            entries.push(BatchEntry::ran(result));
        }

        let report = BatchReport {
            batch_id,
            started_at,
            finished_at: Utc::now(),
            digest,
            failure_policy: options.failure_policy,
            invoker: invoker.name().to_string(),
            entries,
        };

        info!(
            batch_id = %batch_id,
            passed = report.passed_count(),
            failed = report.failed_count(),
            skipped = report.skipped_count(),
            "Precomputation batch finished"
        );

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PrecomputeError;
    use crate::mode::ReadmissionMode;
    use crate::runner::{InvocationOutcome, RecordingInvoker};

    #[tokio::test]
    async fn test_runs_all_in_order() {
        let invoker = RecordingInvoker::new();
        let plan = BatchPlan::default();
        let report = BatchRunner::run_with_locks(
            &DeviceLocks::new(),
            &plan,
            &invoker,
            RunOptions::default(),
        )
        .await
        .expect("batch failed");

        assert_eq!(report.passed_count(), 4);
        assert_eq!(invoker.issued(), plan.commands());
        assert_eq!(report.digest, plan.digest());
        assert_eq!(report.invoker, "recording");
    }

    #[tokio::test]
    async fn test_continue_on_failure_attempts_everything() {
        let invoker = RecordingInvoker::new().with_outcome(
            ReadmissionMode::Discharge,
            InvocationOutcome::Failed { exit_code: Some(1) },
        );
        let report = BatchRunner::run_with_locks(
            &DeviceLocks::new(),
            &BatchPlan::default(),
            &invoker,
            RunOptions::default(),
        )
        .await
        .expect("batch failed");

        assert_eq!(invoker.issued().len(), 4);
        assert_eq!(report.failed_count(), 1);
        assert_eq!(report.passed_count(), 3);
        assert_eq!(report.skipped_count(), 0);
        assert!(!report.verdict().passed);
    }

    #[tokio::test]
    async fn test_abort_on_first_failure_skips_rest() {
        let invoker = RecordingInvoker::new().with_outcome(
            ReadmissionMode::Early,
            InvocationOutcome::TimedOut { after_secs: 1 },
        );
        let options = RunOptions {
            failure_policy: FailurePolicy::AbortOnFirstFailure,
            ..RunOptions::default()
        };
        let report =
            BatchRunner::run_with_locks(&DeviceLocks::new(), &BatchPlan::default(), &invoker, options)
                .await
                .expect("batch failed");

        assert_eq!(invoker.issued().len(), 2);
        assert_eq!(report.passed_count(), 1);
        assert_eq!(report.failed_count(), 1);
        assert_eq!(report.skipped_count(), 2);
        assert_eq!(report.failure_policy, FailurePolicy::AbortOnFirstFailure);
        let skipped: Vec<_> = report
            .entries
            .iter()
            .filter(|e| e.is_skipped())
            .map(|e| e.mode)
            .collect();
        assert_eq!(
            skipped,
            vec![
                ReadmissionMode::DischargeSubjectsplit,
                ReadmissionMode::EarlySubjectsplit
            ]
        );
    }

    #[tokio::test]
    async fn test_reject_policy_runs_nothing() {
        let invoker = RecordingInvoker::new();
        let options = RunOptions {
            output_dirs: OutputDirPolicy::Reject,
            ..RunOptions::default()
        };
        let err =
            BatchRunner::run_with_locks(&DeviceLocks::new(), &BatchPlan::default(), &invoker, options)
                .await
                .unwrap_err();

        assert!(matches!(err, PrecomputeError::OutputDirCollision { .. }));
        assert!(invoker.issued().is_empty());
    }

    #[tokio::test]
    async fn test_rerun_issues_same_commands() {
        let plan = BatchPlan::default();
        let first = RecordingInvoker::new();
        let second = RecordingInvoker::new();

        let a = BatchRunner::run(&plan, &first, RunOptions::default()).await.unwrap();
        let b = BatchRunner::run(&plan, &second, RunOptions::default()).await.unwrap();

        assert_eq!(first.issued(), second.issued());
        assert_eq!(a.digest, b.digest);
        assert_ne!(a.batch_id, b.batch_id);
    }
}
