//! Declarative stage definitions
//!
//! A stage file is an ordered list of stages. Each stage names the screens
//! it may be waiting for (its paths, in priority order) and the input actions
//! to perform once one of them shows up.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Error, Result};

/// Next-stage value that ends the run
pub const TERMINAL_SENTINEL: &str = "None";

/// Settle delay for `command` actions that do not give one
const DEFAULT_COMMAND_SETTLE_S: f64 = 0.1;

/// Where a matched path leads
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Option<String>", into = "Option<String>")]
pub enum NextStage {
    /// Continue with the stage of this name
    Continue(String),
    /// Stop the run successfully
    Terminate,
}

impl From<Option<String>> for NextStage {
    fn from(value: Option<String>) -> Self {
        match value {
            Some(name) if name != TERMINAL_SENTINEL && !name.is_empty() => {
                NextStage::Continue(name)
            }
            _ => NextStage::Terminate,
        }
    }
}

impl From<NextStage> for Option<String> {
    fn from(value: NextStage) -> Self {
        match value {
            NextStage::Continue(name) => Some(name),
            NextStage::Terminate => None,
        }
    }
}

impl Default for NextStage {
    fn default() -> Self {
        Self::Terminate
    }
}

impl std::fmt::Display for NextStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NextStage::Continue(name) => write!(f, "{}", name),
            NextStage::Terminate => write!(f, "{}", TERMINAL_SENTINEL),
        }
    }
}

/// Reference screen check of a path
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Check {
    /// Reference image
    pub file: PathBuf,

    /// Upper bound (exclusive) for the mean square error
    pub mse_leq: f64,

    /// Lower bound (exclusive) for the structural similarity
    pub ssim_geq: f64,
}

/// One candidate screen state of a stage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subpath {
    pub check: Check,

    #[serde(default)]
    pub next_stage: NextStage,
}

impl Subpath {
    pub fn new(
        file: impl Into<PathBuf>,
        mse_leq: f64,
        ssim_geq: f64,
        next_stage: NextStage,
    ) -> Self {
        Self {
            check: Check {
                file: file.into(),
                mse_leq,
                ssim_geq,
            },
            next_stage,
        }
    }

    pub fn check_file(&self) -> &Path {
        &self.check.file
    }

    /// Both thresholds are strict and both must hold
    pub fn accepts(&self, mse: f64, ssim: f64) -> bool {
        mse < self.check.mse_leq && ssim > self.check.ssim_geq
    }
}

/// Mouse buttons understood by QEMU's input layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MouseButton {
    Left,
    Middle,
    Right,
    WheelUp,
    WheelDown,
    Side,
    Extra,
}

impl std::fmt::Display for MouseButton {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            MouseButton::Left => "left",
            MouseButton::Middle => "middle",
            MouseButton::Right => "right",
            MouseButton::WheelUp => "wheel-up",
            MouseButton::WheelDown => "wheel-down",
            MouseButton::Side => "side",
            MouseButton::Extra => "extra",
        };
        write!(f, "{}", name)
    }
}

fn default_command_settle() -> f64 {
    DEFAULT_COMMAND_SETTLE_S
}

/// A single input action of a stage
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    /// Move the pointer by a fraction of the screen size
    MouseMove {
        x_rel: f64,
        y_rel: f64,
        duration_s: f64,
    },

    /// Press and release a mouse button
    MouseClick {
        value: MouseButton,
        duration_s: f64,
    },

    /// Press and release a key, given as a QEMU qcode
    KeyboardKey { value: String, duration_s: f64 },

    /// Type text one character at a time
    KeyboardText { value: String, duration_s: f64 },

    /// Type a command string
    Command { value: String, duration_s: f64 },
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct MouseMoveArgs {
    x_rel: f64,
    y_rel: f64,
    duration_s: f64,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct MouseClickArgs {
    value: MouseButton,
    duration_s: f64,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct KeyArgs {
    value: String,
    duration_s: f64,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct CommandArgs {
    value: String,
    #[serde(default = "default_command_settle")]
    duration_s: f64,
}

fn args<T: serde::de::DeserializeOwned>(value: &serde_yaml::Value) -> std::result::Result<T, String> {
    serde_yaml::from_value(value.clone()).map_err(|e| e.to_string())
}

impl Action {
    /// Parse a raw descriptor. A descriptor is a mapping with exactly one
    /// key naming the action kind.
    pub fn from_descriptor(stage: &str, descriptor: &serde_yaml::Value) -> Result<Self> {
        let invalid = |reason: String| Error::InvalidAction {
            stage: stage.to_string(),
            descriptor: serde_yaml::to_string(descriptor).unwrap_or_default(),
            reason,
        };

        let (kind, value) = match descriptor.as_mapping() {
            Some(mapping) if mapping.len() == 1 => match mapping.iter().next() {
                Some((serde_yaml::Value::String(kind), value)) => (kind.as_str(), value),
                _ => return Err(invalid("action kind must be a string".to_string())),
            },
            _ => {
                return Err(invalid(
                    "expected a mapping with exactly one action kind".to_string(),
                ))
            }
        };

        let action = match kind {
            "mouse_move" => {
                let a: MouseMoveArgs = args(value).map_err(&invalid)?;
                Action::MouseMove {
                    x_rel: a.x_rel,
                    y_rel: a.y_rel,
                    duration_s: a.duration_s,
                }
            }
            "mouse_click" => {
                let a: MouseClickArgs = args(value).map_err(&invalid)?;
                Action::MouseClick {
                    value: a.value,
                    duration_s: a.duration_s,
                }
            }
            "keyboard_key" => {
                let a: KeyArgs = args(value).map_err(&invalid)?;
                Action::KeyboardKey {
                    value: a.value,
                    duration_s: a.duration_s,
                }
            }
            "keyboard_text" => {
                let a: KeyArgs = args(value).map_err(&invalid)?;
                Action::KeyboardText {
                    value: a.value,
                    duration_s: a.duration_s,
                }
            }
            "command" => {
                let a: CommandArgs = args(value).map_err(&invalid)?;
                Action::Command {
                    value: a.value,
                    duration_s: a.duration_s,
                }
            }
            other => return Err(invalid(format!("unknown action '{}'", other))),
        };

        action.check().map_err(invalid)?;
        Ok(action)
    }

    /// Durations must convert to a [`Duration`], pointer offsets must be
    /// finite
    fn check(&self) -> std::result::Result<(), String> {
        let settle = self.settle_secs();
        if seconds(settle).is_none() {
            return Err(format!(
                "duration_s must be a non-negative number of seconds, got {}",
                settle
            ));
        }
        if let Action::MouseMove { x_rel, y_rel, .. } = self {
            if !x_rel.is_finite() || !y_rel.is_finite() {
                return Err("x_rel and y_rel must be finite".to_string());
            }
        }
        Ok(())
    }

    /// Short name for logs
    pub fn kind(&self) -> &'static str {
        match self {
            Action::MouseMove { .. } => "mouse_move",
            Action::MouseClick { .. } => "mouse_click",
            Action::KeyboardKey { .. } => "keyboard_key",
            Action::KeyboardText { .. } => "keyboard_text",
            Action::Command { .. } => "command",
        }
    }

    fn settle_secs(&self) -> f64 {
        match self {
            Action::MouseMove { duration_s, .. }
            | Action::MouseClick { duration_s, .. }
            | Action::KeyboardKey { duration_s, .. }
            | Action::KeyboardText { duration_s, .. }
            | Action::Command { duration_s, .. } => *duration_s,
        }
    }

    /// Pause after each underlying input event. Validated on load, see
    /// [`StageSet::new`].
    pub fn settle(&self) -> Duration {
        seconds(self.settle_secs()).unwrap_or_default()
    }
}

/// `value` seconds as a [`Duration`], `None` when negative, NaN or too large
fn seconds(value: f64) -> Option<Duration> {
    Duration::try_from_secs_f64(value).ok()
}

/// A named point in the test script
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Stage {
    pub name: String,
    pub timeout_s: f64,
    pub actions: Vec<Action>,
    pub paths: Vec<Subpath>,
}

impl Stage {
    pub fn timeout(&self) -> Duration {
        seconds(self.timeout_s).unwrap_or_default()
    }
}

#[derive(Debug, Deserialize)]
struct RawStageFile {
    stages: Vec<RawStage>,
}

#[derive(Debug, Deserialize)]
struct RawStage {
    name: String,
    timeout_s: f64,
    #[serde(default)]
    actions: Vec<serde_yaml::Value>,
    paths: Vec<Subpath>,
}

/// The ordered stage collection of a run. The first stage is the entry point.
#[derive(Debug, Clone)]
pub struct StageSet {
    stages: Vec<Stage>,
}

impl StageSet {
    /// Build a stage set, checking the invariants that do not depend on
    /// transitions.
    pub fn new(stages: Vec<Stage>) -> Result<Self> {
        if stages.is_empty() {
            return Err(Error::InvalidConfig("no stages defined".to_string()));
        }

        let mut names = HashSet::new();
        for stage in &stages {
            if !names.insert(stage.name.as_str()) {
                return Err(Error::InvalidConfig(format!(
                    "duplicate stage name '{}'",
                    stage.name
                )));
            }
            if seconds(stage.timeout_s).is_none() {
                return Err(Error::InvalidConfig(format!(
                    "stage '{}' has invalid timeout_s {}",
                    stage.name, stage.timeout_s
                )));
            }
            for action in &stage.actions {
                action.check().map_err(|reason| Error::InvalidAction {
                    stage: stage.name.clone(),
                    descriptor: serde_yaml::to_string(action).unwrap_or_default(),
                    reason,
                })?;
            }
            if stage.paths.is_empty() {
                return Err(Error::InvalidConfig(format!(
                    "stage '{}' has no paths",
                    stage.name
                )));
            }
        }

        Ok(Self { stages })
    }

    /// Parse a stage set from YAML. Relative reference paths are resolved
    /// against `base_dir`.
    pub fn from_yaml(yaml: &str, base_dir: &Path) -> Result<Self> {
        let raw: RawStageFile = serde_yaml::from_str(yaml)?;

        let mut stages = Vec::with_capacity(raw.stages.len());
        for raw_stage in raw.stages {
            let actions = raw_stage
                .actions
                .iter()
                .map(|descriptor| Action::from_descriptor(&raw_stage.name, descriptor))
                .collect::<Result<Vec<_>>>()?;

            let paths = raw_stage
                .paths
                .into_iter()
                .map(|mut path| {
                    if path.check.file.is_relative() {
                        path.check.file = base_dir.join(&path.check.file);
                    }
                    path
                })
                .collect();

            stages.push(Stage {
                name: raw_stage.name,
                timeout_s: raw_stage.timeout_s,
                actions,
                paths,
            });
        }

        Self::new(stages)
    }

    /// Parse a stage set from a YAML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let base_dir = path.parent().unwrap_or_else(|| Path::new("."));
        Self::from_yaml(&content, base_dir)
    }

    /// Entry stage of the run
    pub fn entry(&self) -> &Stage {
        &self.stages[0]
    }

    pub fn get(&self, name: &str) -> Option<&Stage> {
        self.stages.iter().find(|s| s.name == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Stage> {
        self.stages.iter()
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// (stage, next stage) pairs whose target does not exist. Only used for
    /// linting; runs fail on these when the transition is taken.
    pub fn unresolved_transitions(&self) -> Vec<(String, String)> {
        let mut missing = Vec::new();
        for stage in &self.stages {
            for path in &stage.paths {
                if let NextStage::Continue(next) = &path.next_stage {
                    if self.get(next).is_none() {
                        missing.push((stage.name.clone(), next.clone()));
                    }
                }
            }
        }
        missing
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
stages:
  - name: login
    timeout_s: 120
    actions:
      - keyboard_text:
          value: root
          duration_s: 0.1
      - keyboard_key:
          value: ret
          duration_s: 0.5
      - mouse_move:
          x_rel: 0.5
          y_rel: 0.25
          duration_s: 0.2
      - mouse_click:
          value: wheel-up
          duration_s: 0.2
      - command:
          value: reboot
    paths:
      - check:
          file: refs/login.png
          mse_leq: 0.5
          ssim_geq: 0.95
        next_stage: desktop
      - check:
          file: /abs/error.png
          mse_leq: 1.0
          ssim_geq: 0.9
        next_stage: None
  - name: desktop
    timeout_s: 30
    paths:
      - check:
          file: refs/desktop.png
          mse_leq: 0.5
          ssim_geq: 0.95
"#;

    #[test]
    fn test_parse_stage_file() {
        let set = StageSet::from_yaml(SAMPLE, Path::new("/suite")).unwrap();
        assert_eq!(set.len(), 2);

        let login = set.entry();
        assert_eq!(login.name, "login");
        assert_eq!(login.actions.len(), 5);
        assert_eq!(
            login.actions[3],
            Action::MouseClick {
                value: MouseButton::WheelUp,
                duration_s: 0.2
            }
        );
        assert_eq!(
            login.actions[4],
            Action::Command {
                value: "reboot".to_string(),
                duration_s: DEFAULT_COMMAND_SETTLE_S
            }
        );

        assert_eq!(login.paths[0].check_file(), Path::new("/suite/refs/login.png"));
        assert_eq!(login.paths[1].check_file(), Path::new("/abs/error.png"));
        assert_eq!(
            login.paths[0].next_stage,
            NextStage::Continue("desktop".to_string())
        );
        assert_eq!(login.paths[1].next_stage, NextStage::Terminate);

        // omitted next_stage terminates
        assert_eq!(set.get("desktop").unwrap().paths[0].next_stage, NextStage::Terminate);
        assert!(set.unresolved_transitions().is_empty());
    }

    #[test]
    fn test_unknown_action_reports_descriptor() {
        let yaml = r#"
stages:
  - name: boot
    timeout_s: 10
    actions:
      - teleport:
          value: mars
    paths:
      - check: { file: a.png, mse_leq: 1.0, ssim_geq: 0.5 }
"#;
        let err = StageSet::from_yaml(yaml, Path::new(".")).unwrap_err();
        match err {
            Error::InvalidAction { stage, descriptor, .. } => {
                assert_eq!(stage, "boot");
                assert!(descriptor.contains("teleport"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_descriptor_with_two_variants_is_rejected() {
        let descriptor: serde_yaml::Value = serde_yaml::from_str(
            "{ keyboard_key: { value: a, duration_s: 0.1 }, command: { value: b } }",
        )
        .unwrap();
        assert!(Action::from_descriptor("s", &descriptor).is_err());
    }

    #[test]
    fn test_negative_duration_is_rejected() {
        let descriptor: serde_yaml::Value =
            serde_yaml::from_str("keyboard_key: { value: a, duration_s: -1 }").unwrap();
        let err = Action::from_descriptor("s", &descriptor).unwrap_err();
        assert!(matches!(err, Error::InvalidAction { .. }));
    }

    #[test]
    fn test_duplicate_and_empty_sets_are_rejected() {
        let stage = Stage {
            name: "a".to_string(),
            timeout_s: 1.0,
            actions: vec![],
            paths: vec![Subpath::new("a.png", 1.0, 0.5, NextStage::Terminate)],
        };
        assert!(StageSet::new(vec![]).is_err());
        assert!(StageSet::new(vec![stage.clone(), stage.clone()]).is_err());
        assert!(StageSet::new(vec![stage]).is_ok());
    }

    #[test]
    fn test_in_memory_stage_durations_are_checked() {
        let stage = |timeout_s: f64, duration_s: f64| Stage {
            name: "a".to_string(),
            timeout_s,
            actions: vec![Action::KeyboardKey {
                value: "ret".to_string(),
                duration_s,
            }],
            paths: vec![Subpath::new("a.png", 1.0, 0.5, NextStage::Terminate)],
        };

        let err = StageSet::new(vec![stage(1.0, -1.0)]).unwrap_err();
        assert!(matches!(err, Error::InvalidAction { ref stage, .. } if stage == "a"));
        assert!(StageSet::new(vec![stage(1.0, f64::NAN)]).is_err());
        assert!(StageSet::new(vec![stage(f64::INFINITY, 0.1)]).is_err());
        assert!(StageSet::new(vec![stage(-2.0, 0.1)]).is_err());

        let set = StageSet::new(vec![stage(2.5, 0.25)]).unwrap();
        assert_eq!(set.entry().timeout(), Duration::from_millis(2500));
        assert_eq!(set.entry().actions[0].settle(), Duration::from_millis(250));
    }

    #[test]
    fn test_durations_too_large_for_duration_are_rejected() {
        let huge_timeout = r#"
stages:
  - name: boot
    timeout_s: 1.0e+20
    paths:
      - check: { file: a.png, mse_leq: 1.0, ssim_geq: 0.5 }
"#;
        let err = StageSet::from_yaml(huge_timeout, Path::new(".")).unwrap_err();
        assert!(matches!(err, Error::InvalidConfig(_)));

        let huge_settle = r#"
stages:
  - name: boot
    timeout_s: 10
    actions:
      - keyboard_key: { value: ret, duration_s: 1.0e+300 }
    paths:
      - check: { file: a.png, mse_leq: 1.0, ssim_geq: 0.5 }
"#;
        let err = StageSet::from_yaml(huge_settle, Path::new(".")).unwrap_err();
        assert!(matches!(err, Error::InvalidAction { .. }));
    }

    #[test]
    fn test_unresolved_transitions() {
        let set = StageSet::new(vec![Stage {
            name: "a".to_string(),
            timeout_s: 1.0,
            actions: vec![],
            paths: vec![Subpath::new(
                "a.png",
                1.0,
                0.5,
                NextStage::Continue("ghost".to_string()),
            )],
        }])
        .unwrap();
        assert_eq!(
            set.unresolved_transitions(),
            vec![("a".to_string(), "ghost".to_string())]
        );
    }

    #[test]
    fn test_accepts_is_strict_on_both_bounds() {
        let path = Subpath::new("a.png", 1.0, 0.9, NextStage::Terminate);
        assert!(path.accepts(0.5, 0.95));
        assert!(!path.accepts(1.0, 0.95));
        assert!(!path.accepts(0.5, 0.9));
        assert!(!path.accepts(2.0, 0.1));
    }

    #[test]
    fn test_from_file_resolves_relative_to_file() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("stages.yml");
        std::fs::write(&file, SAMPLE).unwrap();
        let set = StageSet::from_file(&file).unwrap();
        assert_eq!(
            set.entry().paths[0].check_file(),
            dir.path().join("refs/login.png")
        );
    }
}
