//! cbert-precompute - batch driver for ClinicalBERT embedding precomputation
//!
//! Runs the external `cbert_precomputation.py` program once per readmission
//! dataset variant:
//! - Shared settings (model, sequence length, device) come from one base config
//! - Each variant only overrides its data and output directories
//! - Every invocation yields a result; a failure policy decides whether the
//!   batch keeps going

pub mod batch;
pub mod config;
pub mod device;
pub mod error;
pub mod mode;
pub mod plan;
pub mod report;
pub mod runner;
pub mod shell;
pub mod spec;
pub mod telemetry;

pub use batch::{BatchRunner, FailurePolicy, RunOptions};
pub use config::{load_plan, plan_from_toml_str, CONFIG_ENV};
pub use device::{DeviceGuard, DeviceLocks, DeviceReservation, VISIBLE_DEVICES_ENV};
pub use error::{PrecomputeError, Result};
pub use mode::ReadmissionMode;
pub use plan::{BatchPlan, InputOverlap, OutputDirCollision, OutputDirPolicy};
pub use report::{BatchEntry, BatchReport, BatchVerdict};
pub use runner::{InvocationOutcome, InvocationResult, Invoker, ProcessInvoker, RecordingInvoker};
pub use shell::{render_command, render_shell_script, shell_quote};
pub use spec::{BaseConfig, InvocationSpec, IssuedCommand, Launcher, ModeOverride, TASK_NAME};
pub use telemetry::init_tracing;
