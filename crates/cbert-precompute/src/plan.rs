//! Batch plan: one shared base plus ordered per-mode overrides.

use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::warn;

use crate::error::{PrecomputeError, Result};
use crate::mode::ReadmissionMode;
use crate::spec::{BaseConfig, InvocationSpec, IssuedCommand, ModeOverride, TASK_NAME};

/// What to do when several modes write into the same output directory.
///
/// It is not known whether the sharing in the default table is intended
/// (callers adding sub-paths downstream) or an overwrite bug, so the
/// default only warns.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum OutputDirPolicy {
    /// Accept silently.
    Allow,

    /// Log one warning per shared directory and proceed.
    #[default]
    Warn,

    /// Refuse the plan.
    Reject,
}

/// An output directory claimed by more than one mode.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OutputDirCollision {
    pub output_dir: PathBuf,
    pub modes: Vec<ReadmissionMode>,
}

impl From<OutputDirCollision> for PrecomputeError {
    fn from(c: OutputDirCollision) -> Self {
        PrecomputeError::OutputDirCollision {
            output_dir: c.output_dir,
            modes: c.modes,
        }
    }
}

/// One mode's output directory overlapping another mode's input data.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct InputOverlap {
    pub output_dir: PathBuf,
    pub writer: ReadmissionMode,
    pub data_dir: PathBuf,
    pub reader: ReadmissionMode,
}

impl From<InputOverlap> for PrecomputeError {
    fn from(o: InputOverlap) -> Self {
        PrecomputeError::OutputFeedsInput {
            output_dir: o.output_dir,
            writer: o.writer,
            data_dir: o.data_dir,
            reader: o.reader,
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct BatchPlan {
    base: BaseConfig,
    overrides: Vec<ModeOverride>,
}

impl BatchPlan {
    /// Build a plan, rejecting empty or duplicated mode lists, invalid
    /// shared settings, and outputs that land in another mode's input.
    pub fn new(base: BaseConfig, overrides: Vec<ModeOverride>) -> Result<Self> {
        if overrides.is_empty() {
            return Err(PrecomputeError::EmptyPlan);
        }
        for (i, o) in overrides.iter().enumerate() {
            if overrides[..i].iter().any(|prev| prev.mode == o.mode) {
                return Err(PrecomputeError::DuplicateMode(o.mode));
            }
        }
        if base.task_name != TASK_NAME {
            return Err(PrecomputeError::UnsupportedTask(base.task_name));
        }
        base.launcher.validate()?;
        base.devices.validate()?;
        if let Some(overlap) = input_overlaps(&overrides).into_iter().next() {
            return Err(overlap.into());
        }

        Ok(Self { base, overrides })
    }

    pub fn base(&self) -> &BaseConfig {
        &self.base
    }

    pub fn overrides(&self) -> &[ModeOverride] {
        &self.overrides
    }

    pub fn len(&self) -> usize {
        self.overrides.len()
    }

    pub fn is_empty(&self) -> bool {
        self.overrides.is_empty()
    }

    /// Keep only the given modes, in plan order.
    pub fn select(&self, modes: &[ReadmissionMode]) -> Result<Self> {
        let overrides = self
            .overrides
            .iter()
            .filter(|o| modes.contains(&o.mode))
            .cloned()
            .collect();
        Self::new(self.base.clone(), overrides)
    }

    /// Merged specs in execution order.
    pub fn specs(&self) -> Vec<InvocationSpec> {
        self.overrides
            .iter()
            .map(|o| InvocationSpec::merge(&self.base, o))
            .collect()
    }

    /// Commands this plan issues, in execution order.
    pub fn commands(&self) -> Vec<IssuedCommand> {
        self.specs().iter().map(InvocationSpec::issued).collect()
    }

    /// SHA-256 over the ordered issued commands.
    pub fn digest(&self) -> String {
        compute_commands_digest(&self.commands())
    }

    /// Output directories shared by more than one mode.
    pub fn collisions(&self) -> Vec<OutputDirCollision> {
        let mut by_dir: BTreeMap<&PathBuf, Vec<ReadmissionMode>> = BTreeMap::new();
        for o in &self.overrides {
            by_dir.entry(&o.output_dir).or_default().push(o.mode);
        }
        by_dir
            .into_iter()
            .filter(|(_, modes)| modes.len() > 1)
            .map(|(dir, modes)| OutputDirCollision {
                output_dir: dir.clone(),
                modes,
            })
            .collect()
    }

    /// Apply the output directory policy. Returns the collisions found.
    pub fn validate(&self, policy: OutputDirPolicy) -> Result<Vec<OutputDirCollision>> {
        let collisions = self.collisions();
        match policy {
            OutputDirPolicy::Allow => {}
            OutputDirPolicy::Warn => {
                for c in &collisions {
                    warn!(
                        output_dir = %c.output_dir.display(),
                        modes = ?c.modes,
                        "Output directory shared by several modes; later runs may overwrite earlier ones"
                    );
                }
            }
            OutputDirPolicy::Reject => {
                if let Some(first) = collisions.first() {
                    return Err(first.clone().into());
                }
            }
        }
        Ok(collisions)
    }
}

impl Default for BatchPlan {
    fn default() -> Self {
        Self {
            base: BaseConfig::default(),
            overrides: ModeOverride::defaults(),
        }
    }
}

/// Pairs where a writer's output directory equals, contains or sits inside
/// a different mode's data directory. Paths are compared lexically.
fn input_overlaps(overrides: &[ModeOverride]) -> Vec<InputOverlap> {
    let mut found = Vec::new();
    for writer in overrides {
        let out = lexical(&writer.output_dir);
        for reader in overrides.iter().filter(|r| r.mode != writer.mode) {
            let data = lexical(&reader.data_dir);
            if data.starts_with(&out) || out.starts_with(&data) {
                found.push(InputOverlap {
                    output_dir: writer.output_dir.clone(),
                    writer: writer.mode,
                    data_dir: reader.data_dir.clone(),
                    reader: reader.mode,
                });
            }
        }
    }
    found
}

/// Drop `.` components so `./data` and `data` compare equal.
fn lexical(path: &Path) -> PathBuf {
    path.components()
        .filter(|c| !matches!(c, Component::CurDir))
        .collect()
}

/// Digest is sensitive to command order, argv and environment.
fn compute_commands_digest(commands: &[IssuedCommand]) -> String {
    let mut hasher = Sha256::new();
    for command in commands {
        for (key, value) in &command.env {
            hasher.update(key.as_bytes());
            hasher.update(b"=");
            hasher.update(value.as_bytes());
            hasher.update(b"\n");
        }
        for token in &command.argv {
            hasher.update(token.as_bytes());
            hasher.update(b"\0");
        }
        hasher.update(b"\x1e");
    }
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{DeviceReservation, VISIBLE_DEVICES_ENV};
    use crate::spec::TASK_NAME;

    #[test]
    fn test_default_plan_has_four_modes_in_order() {
        let plan = BatchPlan::default();
        let modes: Vec<_> = plan.specs().iter().map(|s| s.mode).collect();
        assert_eq!(modes, ReadmissionMode::ALL.to_vec());
    }

    #[test]
    fn test_task_name_is_readmission_everywhere() {
        assert!(BatchPlan::default()
            .specs()
            .iter()
            .all(|s| s.task_name == TASK_NAME));
    }

    #[test]
    fn test_shared_fields_identical() {
        let specs = BatchPlan::default().specs();
        let first = &specs[0];
        for s in &specs[1..] {
            assert_eq!(s.bert_model, first.bert_model);
            assert_eq!(s.max_seq_length, first.max_seq_length);
            assert_eq!(s.devices, first.devices);
        }
        assert_eq!(first.max_seq_length, 512);
    }

    #[test]
    fn test_default_plan_shares_output_dirs() {
        let plan = BatchPlan::default();
        let specs = plan.specs();
        let dir = |m: ReadmissionMode| {
            specs
                .iter()
                .find(|s| s.mode == m)
                .map(|s| s.output_dir.clone())
                .unwrap()
        };
        assert_eq!(
            dir(ReadmissionMode::Discharge),
            dir(ReadmissionMode::DischargeSubjectsplit)
        );
        assert_eq!(
            dir(ReadmissionMode::Early),
            dir(ReadmissionMode::EarlySubjectsplit)
        );

        let collisions = plan.collisions();
        assert_eq!(collisions.len(), 2);
        assert!(collisions.iter().all(|c| c.modes.len() == 2));
    }

    #[test]
    fn test_every_command_pins_device_zero() {
        for cmd in BatchPlan::default().commands() {
            assert_eq!(cmd.env.get(VISIBLE_DEVICES_ENV).map(String::as_str), Some("0"));
        }
    }

    #[test]
    fn test_commands_are_idempotent() {
        let plan = BatchPlan::default();
        assert_eq!(plan.commands(), plan.commands());
        assert_eq!(plan.digest(), plan.digest());
        assert_eq!(plan.digest(), BatchPlan::default().digest());
    }

    #[test]
    fn test_digest_order_sensitive() {
        let mut reversed = ModeOverride::defaults();
        reversed.reverse();
        let plan = BatchPlan::new(BaseConfig::default(), reversed).unwrap();
        assert_ne!(plan.digest(), BatchPlan::default().digest());
    }

    #[test]
    fn test_digest_changes_with_device() {
        let base = BaseConfig {
            devices: DeviceReservation::single(1),
            ..BaseConfig::default()
        };
        let plan = BatchPlan::new(base, ModeOverride::defaults()).unwrap();
        assert_ne!(plan.digest(), BatchPlan::default().digest());
    }

    #[test]
    fn test_policy_allow_and_warn_pass() {
        let plan = BatchPlan::default();
        assert_eq!(plan.validate(OutputDirPolicy::Allow).unwrap().len(), 2);
        assert_eq!(plan.validate(OutputDirPolicy::Warn).unwrap().len(), 2);
    }

    #[test]
    fn test_policy_reject_fails_on_shared_dir() {
        let err = BatchPlan::default()
            .validate(OutputDirPolicy::Reject)
            .unwrap_err();
        match err {
            PrecomputeError::OutputDirCollision { output_dir, modes } => {
                assert_eq!(output_dir, PathBuf::from("./result_discharge"));
                assert_eq!(
                    modes,
                    vec![
                        ReadmissionMode::Discharge,
                        ReadmissionMode::DischargeSubjectsplit
                    ]
                );
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_policy_reject_passes_with_distinct_dirs() {
        let overrides = ReadmissionMode::ALL
            .into_iter()
            .map(|m| {
                ModeOverride::new(
                    m,
                    m.default_data_dir(),
                    PathBuf::from(format!("./result_{}", m.name())),
                )
            })
            .collect();
        let plan = BatchPlan::new(BaseConfig::default(), overrides).unwrap();
        assert!(plan.validate(OutputDirPolicy::Reject).unwrap().is_empty());
    }

    #[test]
    fn test_duplicate_mode_rejected() {
        let overrides = vec![
            ModeOverride::default_for(ReadmissionMode::Early),
            ModeOverride::default_for(ReadmissionMode::Early),
        ];
        let err = BatchPlan::new(BaseConfig::default(), overrides).unwrap_err();
        assert!(matches!(err, PrecomputeError::DuplicateMode(ReadmissionMode::Early)));
    }

    #[test]
    fn test_empty_plan_rejected() {
        let err = BatchPlan::new(BaseConfig::default(), vec![]).unwrap_err();
        assert!(matches!(err, PrecomputeError::EmptyPlan));
    }

    #[test]
    fn test_select_keeps_plan_order() {
        let plan = BatchPlan::default()
            .select(&[ReadmissionMode::EarlySubjectsplit, ReadmissionMode::Discharge])
            .unwrap();
        let modes: Vec<_> = plan.overrides().iter().map(|o| o.mode).collect();
        assert_eq!(
            modes,
            vec![ReadmissionMode::Discharge, ReadmissionMode::EarlySubjectsplit]
        );
        assert!(plan.collisions().is_empty());
    }

    #[test]
    fn test_output_dir_equal_to_other_data_dir_rejected() {
        let overrides = vec![
            ModeOverride::new(
                ReadmissionMode::Discharge,
                ReadmissionMode::Discharge.default_data_dir(),
                PathBuf::from("./data/extended/3days"),
            ),
            ModeOverride::default_for(ReadmissionMode::Early),
        ];
        let err = BatchPlan::new(BaseConfig::default(), overrides).unwrap_err();
        match err {
            PrecomputeError::OutputFeedsInput {
                output_dir,
                writer,
                data_dir,
                reader,
            } => {
                assert_eq!(output_dir, PathBuf::from("./data/extended/3days"));
                assert_eq!(writer, ReadmissionMode::Discharge);
                assert_eq!(data_dir, ReadmissionMode::Early.default_data_dir());
                assert_eq!(reader, ReadmissionMode::Early);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_output_dir_containing_other_data_dir_rejected() {
        // `data/extended` holds the early dataset; the `./` prefix differs.
        let overrides = vec![
            ModeOverride::new(
                ReadmissionMode::DischargeSubjectsplit,
                ReadmissionMode::DischargeSubjectsplit.default_data_dir(),
                PathBuf::from("data/extended"),
            ),
            ModeOverride::default_for(ReadmissionMode::Early),
        ];
        let err = BatchPlan::new(BaseConfig::default(), overrides).unwrap_err();
        assert!(matches!(
            err,
            PrecomputeError::OutputFeedsInput {
                writer: ReadmissionMode::DischargeSubjectsplit,
                reader: ReadmissionMode::Early,
                ..
            }
        ));
    }

    #[test]
    fn test_output_dir_inside_other_data_dir_rejected() {
        let overrides = vec![
            ModeOverride::default_for(ReadmissionMode::Discharge),
            ModeOverride::new(
                ReadmissionMode::Early,
                ReadmissionMode::Early.default_data_dir(),
                PathBuf::from("./data/extended/discharge/embeddings"),
            ),
        ];
        let err = BatchPlan::new(BaseConfig::default(), overrides).unwrap_err();
        assert!(matches!(
            err,
            PrecomputeError::OutputFeedsInput {
                writer: ReadmissionMode::Early,
                reader: ReadmissionMode::Discharge,
                ..
            }
        ));
    }

    #[test]
    fn test_sibling_prefix_is_not_overlap() {
        // `./result_discharge` and `./result_discharge_sub` share a string
        // prefix but not a path component.
        let overrides = vec![
            ModeOverride::new(
                ReadmissionMode::Discharge,
                PathBuf::from("./result_discharge_sub"),
                PathBuf::from("./out/discharge"),
            ),
            ModeOverride::new(
                ReadmissionMode::Early,
                ReadmissionMode::Early.default_data_dir(),
                PathBuf::from("./result_discharge"),
            ),
        ];
        assert!(BatchPlan::new(BaseConfig::default(), overrides).is_ok());
    }

    #[test]
    fn test_default_plan_has_no_input_overlap() {
        assert!(input_overlaps(BatchPlan::default().overrides()).is_empty());
    }

    #[test]
    fn test_non_readmission_task_rejected() {
        let base = BaseConfig {
            task_name: "mortality".to_string(),
            ..BaseConfig::default()
        };
        let err = BatchPlan::new(base, ModeOverride::defaults()).unwrap_err();
        assert!(matches!(err, PrecomputeError::UnsupportedTask(t) if t == "mortality"));
    }

    #[test]
    fn test_select_nothing_is_empty_plan() {
        let err = BatchPlan::default().select(&[]).unwrap_err();
        assert!(matches!(err, PrecomputeError::EmptyPlan));
    }
}
