//! ostester stage runner
//!
//! Drives a VM through a scripted sequence of screens:
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │  StageRunner::run(stages)                                    │
//! │    loop                                                      │
//! │      VisualSync::await_stage(stage)   capture, score, match  │
//! │        └── visual::compare(capture, reference) -> Score      │
//! │      ActionDispatcher::perform_actions(stage)                │
//! │        └── Machine::{send_mouse_move, send_keyboard_key, ..} │
//! │      next_stage: Continue(name) -> lookup | Terminate -> stop │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! Fatal outcomes come back as [`RunError`]; [`RunError::exit_code`] gives
//! the process status for each of them.

pub mod dispatch;
pub mod error;
pub mod keymap;
pub mod machine;
pub mod qmp_machine;
pub mod runner;
pub mod sync;
pub mod telemetry;
pub mod visual;

pub use error::{exit_code, RunError, RunResult};
pub use machine::Machine;
pub use qmp_machine::QmpMachine;
pub use runner::{RunReport, RunnerConfig, StageRecord, StageRunner};
pub use telemetry::{DiffDumpSink, NoopSink, TelemetrySink};
