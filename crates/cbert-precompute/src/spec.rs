//! Invocation specifications.
//!
//! Values shared by every invocation live in a single [`BaseConfig`]; each
//! dataset variant only contributes a [`ModeOverride`]. Merging the two
//! yields the [`InvocationSpec`] that is handed to an invoker.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::device::{DeviceReservation, VISIBLE_DEVICES_ENV};
use crate::error::{PrecomputeError, Result};
use crate::mode::ReadmissionMode;

/// Downstream prediction task understood by the precomputation program.
pub const TASK_NAME: &str = "readmission";

/// Token length every note chunk is truncated or padded to.
pub const DEFAULT_MAX_SEQ_LENGTH: u32 = 512;

/// Pretrained ClinicalBERT checkpoint directory.
pub const DEFAULT_BERT_MODEL: &str = "./model/pretraining";

pub const DEFAULT_INTERPRETER: &str = "python";
pub const DEFAULT_PROGRAM: &str = "cbert_precomputation.py";

pub const FLAG_TASK_NAME: &str = "--task_name";
pub const FLAG_READMISSION_MODE: &str = "--readmission_mode";
pub const FLAG_DATA_DIR: &str = "--data_dir";
pub const FLAG_BERT_MODEL: &str = "--bert_model";
pub const FLAG_MAX_SEQ_LENGTH: &str = "--max_seq_length";
pub const FLAG_OUTPUT_DIR: &str = "--output_dir";

/// How the precomputation program is started.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Launcher {
    /// Interpreter placed in front of the program (`python`), if any.
    pub interpreter: Option<String>,

    /// Program path or name.
    pub program: PathBuf,
}

impl Launcher {
    /// Run `program` directly, without an interpreter.
    pub fn direct(program: impl Into<PathBuf>) -> Self {
        Self {
            interpreter: None,
            program: program.into(),
        }
    }

    pub fn interpreted(interpreter: impl Into<String>, program: impl Into<PathBuf>) -> Self {
        Self {
            interpreter: Some(interpreter.into()),
            program: program.into(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        let blank_interpreter = matches!(&self.interpreter, Some(i) if i.trim().is_empty());
        if blank_interpreter || self.program.as_os_str().is_empty() {
            return Err(PrecomputeError::EmptyLauncher);
        }
        Ok(())
    }

    /// Leading argv tokens, before any flags.
    pub fn argv(&self) -> Vec<String> {
        let mut argv = Vec::with_capacity(2);
        if let Some(interpreter) = &self.interpreter {
            argv.push(interpreter.clone());
        }
        argv.push(self.program.to_string_lossy().into_owned());
        argv
    }
}

impl Default for Launcher {
    fn default() -> Self {
        Self::interpreted(DEFAULT_INTERPRETER, DEFAULT_PROGRAM)
    }
}

/// Configuration shared by every invocation of a batch.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BaseConfig {
    pub launcher: Launcher,
    pub task_name: String,
    pub bert_model: PathBuf,
    pub max_seq_length: u32,
    pub devices: DeviceReservation,
}

impl Default for BaseConfig {
    fn default() -> Self {
        Self {
            launcher: Launcher::default(),
            task_name: TASK_NAME.to_string(),
            bert_model: PathBuf::from(DEFAULT_BERT_MODEL),
            max_seq_length: DEFAULT_MAX_SEQ_LENGTH,
            devices: DeviceReservation::default(),
        }
    }
}

/// Per-variant fields.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ModeOverride {
    pub mode: ReadmissionMode,
    pub data_dir: PathBuf,
    pub output_dir: PathBuf,
}

impl ModeOverride {
    pub fn new(mode: ReadmissionMode, data_dir: PathBuf, output_dir: PathBuf) -> Self {
        Self {
            mode,
            data_dir,
            output_dir,
        }
    }

    /// Override with the mode's default data and output directories.
    pub fn default_for(mode: ReadmissionMode) -> Self {
        Self::new(mode, mode.default_data_dir(), mode.default_output_dir())
    }

    /// The four variants in batch order.
    pub fn defaults() -> Vec<ModeOverride> {
        ReadmissionMode::ALL
            .into_iter()
            .map(ModeOverride::default_for)
            .collect()
    }
}

/// A fully resolved invocation of the precomputation program.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct InvocationSpec {
    pub launcher: Launcher,
    pub task_name: String,
    pub mode: ReadmissionMode,
    pub data_dir: PathBuf,
    pub bert_model: PathBuf,
    pub max_seq_length: u32,
    pub output_dir: PathBuf,
    pub devices: DeviceReservation,
}

impl InvocationSpec {
    pub fn merge(base: &BaseConfig, over: &ModeOverride) -> Self {
        Self {
            launcher: base.launcher.clone(),
            task_name: base.task_name.clone(),
            mode: over.mode,
            data_dir: over.data_dir.clone(),
            bert_model: base.bert_model.clone(),
            max_seq_length: base.max_seq_length,
            output_dir: over.output_dir.clone(),
            devices: base.devices.clone(),
        }
    }

    /// The six flag/value pairs, in the order the program documents them.
    pub fn args(&self) -> Vec<String> {
        vec![
            FLAG_TASK_NAME.to_string(),
            self.task_name.clone(),
            FLAG_READMISSION_MODE.to_string(),
            self.mode.name().to_string(),
            FLAG_DATA_DIR.to_string(),
            self.data_dir.to_string_lossy().into_owned(),
            FLAG_BERT_MODEL.to_string(),
            self.bert_model.to_string_lossy().into_owned(),
            FLAG_MAX_SEQ_LENGTH.to_string(),
            self.max_seq_length.to_string(),
            FLAG_OUTPUT_DIR.to_string(),
            self.output_dir.to_string_lossy().into_owned(),
        ]
    }

    /// Launcher tokens followed by [`args`](Self::args).
    pub fn command_line(&self) -> Vec<String> {
        let mut argv = self.launcher.argv();
        argv.extend(self.args());
        argv
    }

    /// Variables added on top of the inherited environment.
    pub fn env(&self) -> BTreeMap<String, String> {
        let mut env = BTreeMap::new();
        env.insert(
            VISIBLE_DEVICES_ENV.to_string(),
            self.devices.visible_devices(),
        );
        env
    }

    pub fn issued(&self) -> IssuedCommand {
        IssuedCommand {
            mode: self.mode,
            argv: self.command_line(),
            env: self.env(),
        }
    }
}

/// A command as it is handed to the operating system.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IssuedCommand {
    pub mode: ReadmissionMode,
    pub argv: Vec<String>,
    pub env: BTreeMap<String, String>,
}
