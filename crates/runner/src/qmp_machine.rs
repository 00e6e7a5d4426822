//! [`Machine`] backed by a QEMU monitor socket

use async_trait::async_trait;
use ostester_common::qmp::{wait_for_qmp, InputAxis, InputEvent, QmpClient, VmStatus};
use ostester_common::{Error, MouseButton, Result};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, warn};

use crate::keymap::chord_for;
use crate::machine::Machine;

/// Drives a QEMU VM through QMP
pub struct QmpMachine {
    client: QmpClient,
}

impl QmpMachine {
    pub fn new(client: QmpClient) -> Self {
        Self { client }
    }

    /// Connect to the monitor socket, retrying until `timeout_secs`
    pub async fn connect(socket_path: &Path, timeout_secs: u64) -> Result<Self> {
        let client = wait_for_qmp(socket_path, timeout_secs).await?;
        Ok(Self::new(client))
    }

    pub async fn status(&self) -> Result<VmStatus> {
        self.client.query_status().await
    }

    pub async fn close(&self) {
        self.client.close().await;
    }

    /// Send one batch of events. Failures are logged and collected so the
    /// rest of the action still goes out.
    async fn deliver(&self, events: &[InputEvent], failures: &mut Vec<String>) {
        if let Err(e) = self.client.input_send_event(events).await {
            warn!("input-send-event failed: {}", e);
            failures.push(e.to_string());
        }
    }

    /// Key down, settle, key up, settle. Shift wraps the key when asked. The
    /// release goes out even when the press failed.
    async fn press(&self, qcode: &str, shift: bool, settle: Duration, failures: &mut Vec<String>) {
        let mut down = Vec::with_capacity(2);
        let mut up = Vec::with_capacity(2);
        if shift {
            down.push(InputEvent::qcode("shift", true));
        }
        down.push(InputEvent::qcode(qcode, true));
        up.push(InputEvent::qcode(qcode, false));
        if shift {
            up.push(InputEvent::qcode("shift", false));
        }

        self.deliver(&down, failures).await;
        tokio::time::sleep(settle).await;
        self.deliver(&up, failures).await;
        tokio::time::sleep(settle).await;
    }
}

/// Turn collected delivery failures into the action's result
fn delivered(action: &str, failures: Vec<String>) -> Result<()> {
    if failures.is_empty() {
        return Ok(());
    }
    Err(Error::Qmp(format!(
        "{} input event batch(es) for {} failed: {}",
        failures.len(),
        action,
        failures.join("; ")
    )))
}

#[async_trait]
impl Machine for QmpMachine {
    async fn take_screenshot(&self, target: &Path) -> Result<()> {
        self.client.screendump(target).await?;
        debug!("Screenshot saved under '{}'", target.display());
        Ok(())
    }

    async fn send_mouse_move(&self, x_rel: f64, y_rel: f64, settle: Duration) -> Result<()> {
        let (width, height) = self.screen_size().await?;
        let dx = (width as f64 * x_rel) as i64;
        let dy = (height as f64 * y_rel) as i64;
        debug!("Mouse move by ({}, {}) on a {}x{} screen", dx, dy, width, height);

        // Park the pointer in the top left corner so the move is absolute
        // with respect to the screen.
        let events = [
            InputEvent::Abs { axis: InputAxis::X, value: 0 },
            InputEvent::Abs { axis: InputAxis::Y, value: 0 },
            InputEvent::Rel { axis: InputAxis::X, value: dx },
            InputEvent::Rel { axis: InputAxis::Y, value: dy },
        ];
        self.client.input_send_event(&events).await?;
        tokio::time::sleep(settle).await;
        Ok(())
    }

    async fn send_mouse_click(&self, button: MouseButton, settle: Duration) -> Result<()> {
        let name = button.to_string();
        let mut failures = Vec::new();
        self.deliver(&[InputEvent::button(name.as_str(), true)], &mut failures)
            .await;
        tokio::time::sleep(settle).await;
        self.deliver(&[InputEvent::button(name.as_str(), false)], &mut failures)
            .await;
        tokio::time::sleep(settle).await;
        delivered(&format!("{} click", name), failures)
    }

    async fn send_keyboard_key(&self, key: &str, settle: Duration) -> Result<()> {
        let mut failures = Vec::new();
        self.press(key, false, settle, &mut failures).await;
        delivered(&format!("key '{}'", key), failures)
    }

    async fn send_keyboard_text(&self, text: &str, settle: Duration) -> Result<()> {
        let mut failures = Vec::new();
        for c in text.chars() {
            match chord_for(c) {
                Some(chord) => {
                    self.press(chord.qcode, chord.shift, settle, &mut failures)
                        .await
                }
                None => warn!("No key for character {:?}, skipping", c),
            }
        }
        delivered(&format!("text {:?}", text), failures)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
    use tokio::net::UnixListener;

    /// Minimal QMP peer: acknowledges every command, answers screendump
    /// with a 200x100 PNG and returns everything it received. The command
    /// at index `reject` (counting `qmp_capabilities` as 0) gets an error.
    fn fake_qemu(
        listener: UnixListener,
        reject: Option<usize>,
    ) -> tokio::task::JoinHandle<Vec<Value>> {
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut reader = BufReader::new(stream);
            reader
                .get_mut()
                .write_all(b"{\"QMP\": {\"version\": {\"qemu\": {\"micro\": 0, \"minor\": 2, \"major\": 8}}, \"capabilities\": []}}\n")
                .await
                .unwrap();

            let mut received = Vec::new();
            loop {
                let mut line = String::new();
                if reader.read_line(&mut line).await.unwrap() == 0 {
                    break;
                }
                let cmd: Value = serde_json::from_str(&line).unwrap();
                if cmd["execute"] == "screendump" {
                    let path = cmd["arguments"]["filename"].as_str().unwrap().to_string();
                    image::RgbImage::new(200, 100).save(&path).unwrap();
                }
                let reply: &[u8] = if reject == Some(received.len()) {
                    b"{\"error\": {\"class\": \"GenericError\", \"desc\": \"Invalid parameter\"}}\n"
                } else {
                    b"{\"return\": {}}\n"
                };
                received.push(cmd);
                reader.get_mut().write_all(reply).await.unwrap();
            }
            received
        })
    }

    fn events(cmd: &Value) -> &Vec<Value> {
        assert_eq!(cmd["execute"], "input-send-event");
        cmd["arguments"]["events"].as_array().unwrap()
    }

    #[tokio::test]
    async fn test_actions_become_input_events() {
        let dir = tempfile::tempdir().unwrap();
        let socket = dir.path().join("qmp.sock");
        let server = fake_qemu(UnixListener::bind(&socket).unwrap(), None);

        let machine = QmpMachine::connect(&socket, 5).await.unwrap();
        machine
            .send_mouse_move(0.5, 0.25, Duration::ZERO)
            .await
            .unwrap();
        machine
            .send_mouse_click(MouseButton::Left, Duration::ZERO)
            .await
            .unwrap();
        machine.send_keyboard_text("A!", Duration::ZERO).await.unwrap();
        machine.send_command("é", Duration::ZERO).await.unwrap();
        machine.close().await;

        let received = server.await.unwrap();
        assert_eq!(received[0]["execute"], "qmp_capabilities");
        assert_eq!(received[1]["execute"], "screendump");
        assert_eq!(received[1]["arguments"]["format"], "png");

        let moves = events(&received[2]);
        assert_eq!(moves[2], json!({"type": "rel", "data": {"axis": "x", "value": 100}}));
        assert_eq!(moves[3], json!({"type": "rel", "data": {"axis": "y", "value": 25}}));

        assert_eq!(events(&received[3])[0]["data"], json!({"down": true, "button": "left"}));
        assert_eq!(events(&received[4])[0]["data"], json!({"down": false, "button": "left"}));

        // 'A' is shift+a, '!' is shift+1
        let a_down = events(&received[5]);
        assert_eq!(a_down[0]["data"]["key"]["data"], "shift");
        assert_eq!(a_down[1]["data"]["key"]["data"], "a");
        let a_up = events(&received[6]);
        assert_eq!(a_up[0]["data"]["down"], false);
        assert_eq!(a_up[1]["data"]["key"]["data"], "shift");
        assert_eq!(events(&received[7])[1]["data"]["key"]["data"], "1");

        // the unmappable command character sends nothing
        assert_eq!(received.len(), 9);
    }

    #[tokio::test]
    async fn test_failed_release_does_not_stop_typing() {
        let dir = tempfile::tempdir().unwrap();
        let socket = dir.path().join("qmp.sock");
        // index 2 is the release of shift+a
        let server = fake_qemu(UnixListener::bind(&socket).unwrap(), Some(2));

        let machine = QmpMachine::connect(&socket, 5).await.unwrap();
        let err = machine
            .send_keyboard_text("Ab", Duration::ZERO)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Invalid parameter"), "{}", err);

        // later actions still go through
        machine.send_keyboard_key("ret", Duration::ZERO).await.unwrap();
        machine.close().await;

        let received = server.await.unwrap();
        assert_eq!(received.len(), 7);
        assert_eq!(events(&received[1])[1]["data"]["key"]["data"], "a");
        assert_eq!(events(&received[2])[1]["data"]["key"]["data"], "shift");
        let b_down = events(&received[3]);
        assert_eq!(b_down.len(), 1);
        assert_eq!(b_down[0]["data"], json!({"down": true, "key": {"type": "qcode", "data": "b"}}));
        assert_eq!(events(&received[4])[0]["data"]["down"], false);
        assert_eq!(events(&received[5])[0]["data"]["key"]["data"], "ret");
    }
}
