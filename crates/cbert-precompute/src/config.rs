//! TOML batch configuration.
//!
//! Every field is optional. Missing `[base]` fields fall back to the
//! built-in defaults, and a file without `[[modes]]` runs the four default
//! dataset variants.

use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::debug;

use crate::device::DeviceReservation;
use crate::error::Result;
use crate::mode::ReadmissionMode;
use crate::plan::BatchPlan;
use crate::spec::{BaseConfig, Launcher, ModeOverride};

/// Environment variable naming a config file.
pub const CONFIG_ENV: &str = "CBERT_PRECOMPUTE_CONFIG";

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct BatchConfigFile {
    base: Option<BaseSection>,
    modes: Option<Vec<ModeSection>>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct BaseSection {
    /// Empty string means "run the program directly".
    interpreter: Option<String>,
    program: Option<PathBuf>,
    bert_model: Option<PathBuf>,
    max_seq_length: Option<u32>,
    devices: Option<Vec<u32>>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ModeSection {
    mode: ReadmissionMode,
    data_dir: Option<PathBuf>,
    output_dir: Option<PathBuf>,
}

/// Parse a config document into a plan.
pub fn plan_from_toml_str(raw: &str) -> Result<BatchPlan> {
    let file: BatchConfigFile = toml::from_str(raw)?;
    plan_from_file(file)
}

/// Load a plan from `path`, or the defaults when `path` is `None`.
pub fn load_plan(path: Option<&Path>) -> Result<BatchPlan> {
    match path {
        Some(path) => {
            debug!(path = %path.display(), "Loading batch config");
            let raw = std::fs::read_to_string(path)?;
            plan_from_toml_str(&raw)
        }
        None => Ok(BatchPlan::default()),
    }
}

fn plan_from_file(file: BatchConfigFile) -> Result<BatchPlan> {
    let base = base_from_section(file.base.unwrap_or_default())?;

    let overrides = match file.modes {
        Some(modes) => modes
            .into_iter()
            .map(|m| {
                ModeOverride::new(
                    m.mode,
                    m.data_dir.unwrap_or_else(|| m.mode.default_data_dir()),
                    m.output_dir.unwrap_or_else(|| m.mode.default_output_dir()),
                )
            })
            .collect(),
        None => ModeOverride::defaults(),
    };

    BatchPlan::new(base, overrides)
}

fn base_from_section(section: BaseSection) -> Result<BaseConfig> {
    let defaults = BaseConfig::default();

    let program = section.program.unwrap_or(defaults.launcher.program);
    let launcher = match section.interpreter {
        Some(i) if i.is_empty() => Launcher::direct(program),
        Some(i) => Launcher::interpreted(i, program),
        None => match defaults.launcher.interpreter {
            Some(i) => Launcher::interpreted(i, program),
            None => Launcher::direct(program),
        },
    };

    let devices = match section.devices {
        Some(list) => DeviceReservation::new(list)?,
        None => defaults.devices,
    };

    Ok(BaseConfig {
        launcher,
        task_name: defaults.task_name,
        bert_model: section.bert_model.unwrap_or(defaults.bert_model),
        max_seq_length: section.max_seq_length.unwrap_or(defaults.max_seq_length),
        devices,
    })
}
