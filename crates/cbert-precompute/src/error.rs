//! Error types for batch planning and execution.

use std::path::PathBuf;

use thiserror::Error;

use crate::mode::ReadmissionMode;

#[derive(Error, Debug)]
pub enum PrecomputeError {
    #[error("invalid config file: {0}")]
    Config(#[from] toml::de::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("unknown readmission mode: {0}")]
    UnknownMode(String),

    #[error("readmission mode listed more than once: {0}")]
    DuplicateMode(ReadmissionMode),

    #[error("output directory {output_dir:?} is shared by modes {modes:?}")]
    OutputDirCollision {
        output_dir: PathBuf,
        modes: Vec<ReadmissionMode>,
    },

    #[error("output directory {output_dir:?} of mode {writer} overlaps data directory {data_dir:?} of mode {reader}")]
    OutputFeedsInput {
        output_dir: PathBuf,
        writer: ReadmissionMode,
        data_dir: PathBuf,
        reader: ReadmissionMode,
    },

    #[error("unsupported task name {0:?}; only \"readmission\" is precomputed")]
    UnsupportedTask(String),

    #[error("device reservation must name at least one device")]
    EmptyDeviceReservation,

    #[error("batch plan has no invocations")]
    EmptyPlan,

    #[error("launcher program must not be empty")]
    EmptyLauncher,
}

/// Result type for batch operations
pub type Result<T> = std::result::Result<T, PrecomputeError>;
