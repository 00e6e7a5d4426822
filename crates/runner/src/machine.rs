//! Machine capability interface
//!
//! Everything the runner does to a VM goes through [`Machine`]. The QMP
//! backend lives in [`crate::qmp_machine`]; tests drive the runner with
//! scripted doubles.

use async_trait::async_trait;
use ostester_common::{Error, MouseButton, Result};
use std::path::Path;
use std::time::Duration;

#[async_trait]
pub trait Machine: Send + Sync {
    /// Write the current display to `target` as an image file
    async fn take_screenshot(&self, target: &Path) -> Result<()>;

    /// Move the pointer by a fraction of the current screen size, then
    /// wait `settle`
    async fn send_mouse_move(&self, x_rel: f64, y_rel: f64, settle: Duration) -> Result<()>;

    /// Press and release a mouse button, waiting `settle` after each
    async fn send_mouse_click(&self, button: MouseButton, settle: Duration) -> Result<()>;

    /// Press and release a key given as a QEMU qcode
    async fn send_keyboard_key(&self, key: &str, settle: Duration) -> Result<()>;

    /// Press and release each character of `text` in order
    async fn send_keyboard_text(&self, text: &str, settle: Duration) -> Result<()>;

    /// Deliver a command string. Commands are typed literally.
    async fn send_command(&self, command: &str, settle: Duration) -> Result<()> {
        self.send_keyboard_text(command, settle).await
    }

    /// Current display resolution, read from a throwaway screenshot
    async fn screen_size(&self) -> Result<(u32, u32)> {
        let scratch = tempfile::Builder::new()
            .prefix("ostester-screen-")
            .suffix(".png")
            .tempfile()?;
        self.take_screenshot(scratch.path()).await?;
        image::image_dimensions(scratch.path()).map_err(|e| {
            Error::Capture(format!(
                "cannot read screenshot {}: {}",
                scratch.path().display(),
                e
            ))
        })
    }
}
