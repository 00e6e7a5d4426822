//! Stage action execution

use ostester_common::{Action, Stage};
use tracing::{debug, warn};

use crate::machine::Machine;

/// Performs a stage's actions against a machine, in order. Delivery is best
/// effort: a failed action is logged and the next one runs.
pub struct ActionDispatcher<'a, M: ?Sized> {
    machine: &'a M,
}

impl<'a, M: Machine + ?Sized> ActionDispatcher<'a, M> {
    pub fn new(machine: &'a M) -> Self {
        Self { machine }
    }

    /// Run every action of `stage`. Returns how many failed to deliver.
    pub async fn perform_actions(&self, stage: &Stage) -> usize {
        let mut failed = 0;
        for (index, action) in stage.actions.iter().enumerate() {
            debug!("Stage '{}' action {}: {:?}", stage.name, index, action);
            if let Err(e) = self.perform(action).await {
                warn!(
                    "Stage '{}' action {} ({}) failed: {}",
                    stage.name,
                    index,
                    action.kind(),
                    e
                );
                failed += 1;
            }
        }
        failed
    }

    async fn perform(&self, action: &Action) -> ostester_common::Result<()> {
        let settle = action.settle();
        match action {
            Action::MouseMove { x_rel, y_rel, .. } => {
                self.machine.send_mouse_move(*x_rel, *y_rel, settle).await
            }
            Action::MouseClick { value, .. } => self.machine.send_mouse_click(*value, settle).await,
            Action::KeyboardKey { value, .. } => self.machine.send_keyboard_key(value, settle).await,
            Action::KeyboardText { value, .. } => {
                self.machine.send_keyboard_text(value, settle).await
            }
            Action::Command { value, .. } => self.machine.send_command(value, settle).await,
        }
    }
}
