//! Interactive shell attached to a pseudo-terminal.
//!
//! The terminal is created once and outlives every reconnect cycle. Output is
//! drained by a dedicated reader thread into a bounded queue so consumers can
//! poll it without blocking; the queue also buffers output while no channel
//! is connected.

use std::{
    io::{Read, Write},
    path::{Path, PathBuf},
    sync::{
        Mutex, MutexGuard, PoisonError,
        atomic::{AtomicBool, Ordering},
    },
    thread,
};

use portable_pty::{Child, CommandBuilder, MasterPty, PtySize, native_pty_system};
use shell_bridge_core::{OutputPoll, Terminal, TerminalError};
use thiserror::Error;
use tokio::sync::mpsc;

use crate::shell::{ShellKind, interactive_shell};

/// Chunks buffered between the reader thread and the pump.
const OUTPUT_QUEUE_CHUNKS: usize = 256;

/// PTY error.
#[derive(Debug, Error)]
pub enum PtyError {
    #[error("Failed to open PTY: {0}")]
    Open(String),
    #[error("Spawn failed: {0}")]
    SpawnFailed(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Options for starting a terminal.
#[derive(Debug, Clone)]
pub struct TerminalOptions {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub cols: u16,
    pub rows: u16,
    pub working_dir: Option<PathBuf>,
    /// Largest chunk handed to `poll_output`.
    pub chunk_bytes: usize,
}

impl TerminalOptions {
    /// Options for the platform's interactive shell.
    #[must_use]
    pub fn interactive(cols: u16, rows: u16) -> Self {
        Self::for_shell(&interactive_shell(), cols, rows)
    }

    /// Options for a specific shell. Login-capable shells start as login shells.
    #[must_use]
    pub fn for_shell(program: &Path, cols: u16, rows: u16) -> Self {
        let args = ShellKind::of(program)
            .login_args()
            .iter()
            .map(ToString::to_string)
            .collect();
        Self {
            program: program.to_path_buf(),
            args,
            cols,
            rows,
            working_dir: dirs::home_dir(),
            chunk_bytes: 8192,
        }
    }

    #[must_use]
    pub const fn chunk_bytes(mut self, chunk_bytes: usize) -> Self {
        self.chunk_bytes = chunk_bytes;
        self
    }
}

struct Geometry {
    master: Box<dyn MasterPty + Send>,
    size: PtySize,
}

/// An interactive shell running inside a PTY.
///
/// Exclusively owns the child process, the PTY master and both stream
/// endpoints. Dropping the terminal terminates the shell.
pub struct PseudoTerminal {
    geometry: Mutex<Option<Geometry>>,
    writer: Mutex<Option<Box<dyn Write + Send>>>,
    child: Mutex<Box<dyn Child + Send + Sync>>,
    output: Mutex<mpsc::Receiver<Vec<u8>>>,
    terminated: AtomicBool,
}

impl PseudoTerminal {
    /// Start the platform's interactive shell.
    ///
    /// # Errors
    /// Returns `PtyError` if the PTY cannot be opened or the shell cannot be spawned.
    pub fn start(cols: u16, rows: u16) -> Result<Self, PtyError> {
        Self::start_with(TerminalOptions::interactive(cols, rows))
    }

    /// Start a shell with explicit options.
    ///
    /// # Errors
    /// Returns `PtyError` if the PTY cannot be opened or the shell cannot be spawned.
    pub fn start_with(options: TerminalOptions) -> Result<Self, PtyError> {
        let size = pty_size(options.cols, options.rows);
        let pair = native_pty_system()
            .openpty(size)
            .map_err(|e| PtyError::Open(e.to_string()))?;

        let mut cmd = CommandBuilder::new(&options.program);
        cmd.args(&options.args);
        if let Some(dir) = &options.working_dir {
            cmd.cwd(dir);
        }
        cmd.env("TERM", "xterm-256color");

        let child = pair
            .slave
            .spawn_command(cmd)
            .map_err(|e| PtyError::SpawnFailed(e.to_string()))?;
        // Keeping the slave open would hide EOF after the child exits.
        drop(pair.slave);

        let reader = pair
            .master
            .try_clone_reader()
            .map_err(|e| PtyError::Open(e.to_string()))?;
        let writer = pair
            .master
            .take_writer()
            .map_err(|e| PtyError::Open(e.to_string()))?;

        let (tx, rx) = mpsc::channel(OUTPUT_QUEUE_CHUNKS);
        let chunk_bytes = options.chunk_bytes.max(1);
        thread::Builder::new()
            .name("pty-reader".to_string())
            .spawn(move || read_output(reader, &tx, chunk_bytes))?;

        tracing::info!(
            program = %options.program.display(),
            pid = ?child.process_id(),
            cols = options.cols,
            rows = options.rows,
            "Shell started"
        );

        Ok(Self {
            geometry: Mutex::new(Some(Geometry {
                master: pair.master,
                size,
            })),
            writer: Mutex::new(Some(writer)),
            child: Mutex::new(child),
            output: Mutex::new(rx),
            terminated: AtomicBool::new(false),
        })
    }
}

fn read_output(mut reader: Box<dyn Read + Send>, tx: &mpsc::Sender<Vec<u8>>, chunk_bytes: usize) {
    let mut buffer = vec![0u8; chunk_bytes];
    loop {
        match reader.read(&mut buffer) {
            Ok(0) => break,
            Ok(n) => {
                if tx.blocking_send(buffer[..n].to_vec()).is_err() {
                    break;
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => {}
            Err(e) => {
                // EIO is how Linux reports a hung-up PTY.
                tracing::debug!("PTY read ended: {e}");
                break;
            }
        }
    }
    tracing::debug!("PTY reader stopped");
}

const fn pty_size(cols: u16, rows: u16) -> PtySize {
    PtySize {
        rows,
        cols,
        pixel_width: 0,
        pixel_height: 0,
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Terminal for PseudoTerminal {
    fn write_input(&self, data: &[u8]) -> Result<(), TerminalError> {
        let mut guard = lock(&self.writer);
        let writer = guard.as_mut().ok_or(TerminalError::Closed)?;
        writer.write_all(data)?;
        writer.flush()?;
        Ok(())
    }

    fn resize(&self, cols: u16, rows: u16) -> Result<(), TerminalError> {
        if cols == 0 || rows == 0 {
            return Err(TerminalError::ResizeFailed(
                "PTY resize requires non-zero rows and columns".to_string(),
            ));
        }
        let mut guard = lock(&self.geometry);
        let geometry = guard.as_mut().ok_or(TerminalError::Closed)?;
        let size = pty_size(cols, rows);
        if geometry.size == size {
            return Ok(());
        }
        geometry
            .master
            .resize(size)
            .map_err(|e| TerminalError::ResizeFailed(e.to_string()))?;
        geometry.size = size;
        tracing::debug!(cols, rows, "Terminal resized");
        Ok(())
    }

    fn size(&self) -> (u16, u16) {
        lock(&self.geometry)
            .as_ref()
            .map_or((0, 0), |g| (g.size.cols, g.size.rows))
    }

    fn poll_output(&self) -> OutputPoll {
        match lock(&self.output).try_recv() {
            Ok(chunk) => OutputPoll::Data(chunk),
            Err(mpsc::error::TryRecvError::Empty) => OutputPoll::Empty,
            Err(mpsc::error::TryRecvError::Disconnected) => OutputPoll::Closed,
        }
    }

    fn is_alive(&self) -> bool {
        if self.terminated.load(Ordering::Acquire) {
            return false;
        }
        match lock(&self.child).try_wait() {
            Ok(None) => true,
            Ok(Some(status)) => {
                tracing::info!(code = status.exit_code(), "Shell exited");
                false
            }
            Err(e) => {
                tracing::warn!("Failed to query shell status: {e}");
                false
            }
        }
    }

    fn terminate(&self) {
        if self.terminated.swap(true, Ordering::AcqRel) {
            return;
        }
        {
            let mut child = lock(&self.child);
            if matches!(child.try_wait(), Ok(None)) {
                if let Err(e) = child.kill() {
                    tracing::warn!("Failed to kill shell: {e}");
                }
                let _ = child.wait();
            }
        }
        lock(&self.writer).take();
        lock(&self.geometry).take();
        lock(&self.output).close();
        tracing::info!("Terminal closed");
    }
}

impl Drop for PseudoTerminal {
    fn drop(&mut self) {
        self.terminate();
    }
}
