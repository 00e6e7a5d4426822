//! QMP (QEMU Machine Protocol) client implementation
//!
//! Provides async communication with QEMU via Unix socket: status queries,
//! display capture and input injection.

use crate::{Error, Result};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::path::Path;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;
use tokio::sync::Mutex;
use tracing::{debug, trace};

/// QMP client for QEMU communication
pub struct QmpClient {
    socket_path: String,
    stream: Mutex<Option<BufReader<UnixStream>>>,
}

impl QmpClient {
    /// Create a new QMP client (does not connect)
    pub fn new(socket_path: impl Into<String>) -> Self {
        Self {
            socket_path: socket_path.into(),
            stream: Mutex::new(None),
        }
    }

    /// Connect to the QMP socket
    pub async fn connect(&self) -> Result<()> {
        let stream = UnixStream::connect(&self.socket_path).await.map_err(|e| {
            Error::Qmp(format!("Failed to connect to {}: {}", self.socket_path, e))
        })?;

        let mut reader = BufReader::new(stream);

        // Read greeting
        let mut line = String::new();
        reader.read_line(&mut line).await?;
        trace!("QMP greeting: {}", line.trim());

        let greeting: QmpMessage = serde_json::from_str(&line)
            .map_err(|e| Error::Qmp(format!("Invalid greeting: {}", e)))?;

        let version = match greeting.qmp {
            Some(greeting) => greeting.version.qemu,
            None => return Err(Error::Qmp("Invalid QMP greeting".to_string())),
        };

        // Send capabilities negotiation
        let negotiate = QmpCommand {
            execute: "qmp_capabilities".to_string(),
            arguments: None::<()>,
        };

        let writer = reader.get_mut();
        let cmd = serde_json::to_string(&negotiate)?;
        writer.write_all(cmd.as_bytes()).await?;
        writer.write_all(b"\n").await?;
        writer.flush().await?;

        // Read response
        line.clear();
        reader.read_line(&mut line).await?;
        trace!("QMP capabilities response: {}", line.trim());

        let response: QmpResponse<serde_json::Value> = serde_json::from_str(&line)
            .map_err(|e| Error::Qmp(format!("Invalid response: {}", e)))?;

        if response.error.is_some() {
            return Err(Error::Qmp(format!(
                "Capabilities negotiation failed: {:?}",
                response.error
            )));
        }

        *self.stream.lock().await = Some(reader);
        debug!(
            "Connected to QMP socket: {} (QEMU {}.{}.{})",
            self.socket_path, version.major, version.minor, version.micro
        );

        Ok(())
    }

    /// Execute a QMP command
    pub async fn execute<A: Serialize, R: DeserializeOwned>(
        &self,
        command: &str,
        arguments: Option<A>,
    ) -> Result<R> {
        let mut guard = self.stream.lock().await;
        let reader = guard.as_mut().ok_or_else(|| Error::Qmp("Not connected".to_string()))?;

        let cmd = QmpCommand {
            execute: command.to_string(),
            arguments,
        };

        let writer = reader.get_mut();
        let cmd_str = serde_json::to_string(&cmd)?;
        trace!("QMP command: {}", cmd_str);

        writer.write_all(cmd_str.as_bytes()).await?;
        writer.write_all(b"\n").await?;
        writer.flush().await?;

        // Read response (skip events)
        loop {
            let mut line = String::new();
            reader.read_line(&mut line).await?;
            trace!("QMP response: {}", line.trim());

            // Skip event messages
            if line.contains("\"event\"") {
                continue;
            }

            let response: QmpResponse<R> = serde_json::from_str(&line)
                .map_err(|e| Error::Qmp(format!("Invalid response: {}", e)))?;

            if let Some(error) = response.error {
                return Err(Error::Qmp(format!(
                    "{}: {}",
                    error.class,
                    error.desc
                )));
            }

            return response.result.ok_or_else(|| Error::Qmp("No return value".to_string()));
        }
    }

    /// Execute a command with no return value
    pub async fn execute_void<A: Serialize>(&self, command: &str, arguments: Option<A>) -> Result<()> {
        let _: serde_json::Value = self.execute(command, arguments).await?;
        Ok(())
    }

    /// Query VM status
    pub async fn query_status(&self) -> Result<VmStatus> {
        self.execute("query-status", None::<()>).await
    }

    /// Write the current display to `path` as PNG. The file is written by
    /// the QEMU process, so the path must be reachable from its side.
    pub async fn screendump(&self, path: &Path) -> Result<()> {
        #[derive(Serialize)]
        struct Args {
            filename: String,
            format: &'static str,
        }

        self.execute_void(
            "screendump",
            Some(Args {
                filename: path.to_string_lossy().to_string(),
                format: "png",
            }),
        )
        .await
    }

    /// Inject a batch of input events
    pub async fn input_send_event(&self, events: &[InputEvent]) -> Result<()> {
        #[derive(Serialize)]
        struct Args<'a> {
            events: &'a [InputEvent],
        }

        self.execute_void("input-send-event", Some(Args { events })).await
    }

    /// Close the connection
    pub async fn close(&self) {
        let mut guard = self.stream.lock().await;
        *guard = None;
    }
}

// QMP protocol types
#[derive(Debug, Serialize)]
struct QmpCommand<A> {
    execute: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    arguments: Option<A>,
}

#[derive(Debug, Deserialize)]
struct QmpMessage {
    #[serde(rename = "QMP")]
    qmp: Option<QmpGreeting>,
}

#[derive(Debug, Deserialize)]
struct QmpGreeting {
    version: QmpVersionInfo,
}

#[derive(Debug, Deserialize)]
struct QmpVersionInfo {
    qemu: QemuVersionNumbers,
}

#[derive(Debug, Deserialize)]
struct QemuVersionNumbers {
    micro: u32,
    minor: u32,
    major: u32,
}

#[derive(Debug, Deserialize)]
struct QmpResponse<T> {
    #[serde(rename = "return")]
    result: Option<T>,
    error: Option<QmpError>,
}

#[derive(Debug, Deserialize)]
struct QmpError {
    class: String,
    desc: String,
}

/// VM status from query-status
#[derive(Debug, Clone, Deserialize)]
pub struct VmStatus {
    pub running: bool,
    #[serde(default)]
    pub singlestep: bool,
    pub status: String,
}

/// Input event accepted by `input-send-event`
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "lowercase")]
pub enum InputEvent {
    Key { down: bool, key: KeyValue },
    Btn { down: bool, button: String },
    Abs { axis: InputAxis, value: i64 },
    Rel { axis: InputAxis, value: i64 },
}

impl InputEvent {
    pub fn qcode(name: &str, down: bool) -> Self {
        InputEvent::Key {
            down,
            key: KeyValue::Qcode(name.to_string()),
        }
    }

    pub fn button(name: impl Into<String>, down: bool) -> Self {
        InputEvent::Btn {
            down,
            button: name.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "lowercase")]
pub enum KeyValue {
    Qcode(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum InputAxis {
    X,
    Y,
}

/// Helper to check if QMP socket is available
pub async fn wait_for_qmp(socket_path: &Path, timeout_secs: u64) -> Result<QmpClient> {
    let start = std::time::Instant::now();
    let timeout = std::time::Duration::from_secs(timeout_secs);

    loop {
        if start.elapsed() > timeout {
            return Err(Error::Timeout {
                seconds: timeout_secs,
            });
        }

        if socket_path.exists() {
            let client = QmpClient::new(socket_path.to_string_lossy().to_string());
            match client.connect().await {
                Ok(_) => return Ok(client),
                Err(e) => {
                    trace!("QMP not ready: {}", e);
                }
            }
        }

        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    }
}
