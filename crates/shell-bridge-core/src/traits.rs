//! Core traits for the terminal and external collaborators.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Terminal error.
#[derive(Debug, Error)]
pub enum TerminalError {
    #[error("Failed to write to terminal: {0}")]
    Write(#[from] std::io::Error),
    #[error("Resize failed: {0}")]
    ResizeFailed(String),
    #[error("Terminal is closed")]
    Closed,
}

/// Result of a non-blocking output poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputPoll {
    /// Bytes produced by the shell, in order.
    Data(Vec<u8>),
    /// Nothing buffered right now.
    Empty,
    /// The output stream has ended and never produces again.
    Closed,
}

/// The bridge's view of an attached interactive shell.
///
/// Input and output directions are independent: writes come from the
/// receive loop, polls from the output pump. `resize` may be called while
/// a read is in flight.
pub trait Terminal: Send + Sync {
    /// Write bytes verbatim to the shell's input.
    ///
    /// # Errors
    /// Returns error if the input stream is closed or the write fails.
    fn write_input(&self, data: &[u8]) -> Result<(), TerminalError>;

    /// Change the terminal geometry.
    ///
    /// # Errors
    /// Returns `TerminalError::ResizeFailed` if the geometry is rejected.
    fn resize(&self, cols: u16, rows: u16) -> Result<(), TerminalError>;

    /// Current geometry as `(cols, rows)`.
    fn size(&self) -> (u16, u16);

    /// Take the next buffered output chunk without blocking.
    fn poll_output(&self) -> OutputPoll;

    /// Whether the shell process is still running.
    fn is_alive(&self) -> bool;

    /// Stop the shell and release its handles. Idempotent.
    fn terminate(&self);
}

/// Collaborator error.
#[derive(Debug, Error)]
pub enum CollaboratorError {
    #[error("Not supported on this platform")]
    Unsupported,
    #[error("Collaborator failed: {0}")]
    Failed(String),
}

/// Point-in-time host utilization.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    #[serde(rename = "cpu")]
    pub cpu_percent: f64,
    #[serde(rename = "ram")]
    pub ram_percent: f64,
    #[serde(rename = "disk")]
    pub disk_percent: f64,
    #[serde(rename = "netUp")]
    pub upload_kbps: f64,
    #[serde(rename = "netDown")]
    pub download_kbps: f64,
}

/// Source of host telemetry.
///
/// Sampled inline on the heartbeat timer, so one call should return quickly.
pub trait TelemetryProducer: Send + Sync {
    fn sample(&self) -> MetricsSnapshot;
}

/// Source of encoded still images of the screen.
pub trait ScreenshotProducer: Send + Sync {
    /// Capture the screen as an encoded image.
    ///
    /// # Errors
    /// Returns error if capture is unsupported or fails.
    fn capture(&self) -> Result<Vec<u8>, CollaboratorError>;
}

/// Source of the device identity announced to the controller.
pub trait IdentityProvider: Send + Sync {
    fn device_id(&self) -> String;
    fn device_name(&self) -> String;
    fn os_description(&self) -> String;
}
