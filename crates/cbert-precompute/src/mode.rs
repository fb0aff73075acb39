//! Readmission dataset variants.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::PrecomputeError;

/// Dataset variant passed to the precomputation program as `--readmission_mode`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum ReadmissionMode {
    /// Discharge summaries, split by admission.
    Discharge,

    /// Notes from the first days of the stay, split by admission.
    Early,

    /// Discharge summaries, split by patient.
    DischargeSubjectsplit,

    /// Early notes, split by patient.
    EarlySubjectsplit,
}

impl ReadmissionMode {
    /// All modes in the order the batch issues them.
    pub const ALL: [ReadmissionMode; 4] = [
        ReadmissionMode::Discharge,
        ReadmissionMode::Early,
        ReadmissionMode::DischargeSubjectsplit,
        ReadmissionMode::EarlySubjectsplit,
    ];

    /// Value passed on the command line.
    pub fn name(&self) -> &'static str {
        match self {
            ReadmissionMode::Discharge => "discharge",
            ReadmissionMode::Early => "early",
            ReadmissionMode::DischargeSubjectsplit => "discharge_subjectsplit",
            ReadmissionMode::EarlySubjectsplit => "early_subjectsplit",
        }
    }

    /// Whether the dataset is partitioned by patient rather than by admission.
    pub fn is_subject_split(&self) -> bool {
        matches!(
            self,
            ReadmissionMode::DischargeSubjectsplit | ReadmissionMode::EarlySubjectsplit
        )
    }

    /// Default input directory, as laid out by the MIMIC preprocessing step.
    pub fn default_data_dir(&self) -> PathBuf {
        let leaf = match self {
            ReadmissionMode::Discharge => "discharge",
            ReadmissionMode::Early => "3days",
            ReadmissionMode::DischargeSubjectsplit => "discharge_subjectsplit",
            ReadmissionMode::EarlySubjectsplit => "3days_subjectsplit",
        };
        PathBuf::from("./data/extended").join(leaf)
    }

    /// Default output directory.
    ///
    /// Subject-split variants write into the same directory as their
    /// admission-split counterpart.
    pub fn default_output_dir(&self) -> PathBuf {
        match self {
            ReadmissionMode::Discharge | ReadmissionMode::DischargeSubjectsplit => {
                PathBuf::from("./result_discharge")
            }
            ReadmissionMode::Early | ReadmissionMode::EarlySubjectsplit => {
                PathBuf::from("./result_early")
            }
        }
    }
}

impl fmt::Display for ReadmissionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ReadmissionMode {
    type Err = PrecomputeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_lowercase();
        ReadmissionMode::ALL
            .into_iter()
            .find(|m| m.name() == wanted)
            .ok_or_else(|| PrecomputeError::UnknownMode(s.to_string()))
    }
}
