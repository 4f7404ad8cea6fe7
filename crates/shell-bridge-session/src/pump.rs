//! Forwards shell output to the controller.

use std::{sync::Arc, time::Duration};

use shell_bridge_core::{OutputPoll, Terminal};
use shell_bridge_transport::Message;
use tokio::{task::JoinHandle, time::Instant};
use tokio_util::sync::CancellationToken;

use crate::link::ChannelLink;

/// How long output is still drained after the shell is seen dead, waiting
/// for the terminal to report end of stream.
const EXIT_DRAIN_GRACE: Duration = Duration::from_secs(1);

/// Why the pump stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PumpExit {
    /// The shell process exited. The session cannot continue.
    ShellExited,
    /// The link went down.
    ChannelLost,
    Shutdown,
}

/// What a stopped pump hands back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PumpReport {
    pub exit: PumpExit,
    /// Start of a character whose remaining bytes have not been read yet.
    /// Feed it to the next cycle's pump with [`OutputPump::with_carry`].
    pub carry: Vec<u8>,
}

/// Polls the terminal and sends each chunk as an `output` message, one cycle long.
pub struct OutputPump {
    terminal: Arc<dyn Terminal>,
    link: ChannelLink,
    poll_interval: Duration,
    /// Trailing bytes of a character split across reads.
    pending: Vec<u8>,
}

impl OutputPump {
    #[must_use]
    pub fn new(terminal: Arc<dyn Terminal>, link: ChannelLink, poll_interval: Duration) -> Self {
        Self {
            terminal,
            link,
            poll_interval,
            pending: Vec::new(),
        }
    }

    /// Resume from the bytes a previous cycle's pump left over.
    #[must_use]
    pub fn with_carry(mut self, carry: Vec<u8>) -> Self {
        self.pending = carry;
        self
    }

    pub fn spawn(self, shutdown: CancellationToken) -> JoinHandle<PumpReport> {
        tokio::spawn(self.run(shutdown))
    }

    pub async fn run(mut self, shutdown: CancellationToken) -> PumpReport {
        let mut drain_until: Option<Instant> = None;
        let exit = loop {
            if shutdown.is_cancelled() {
                break PumpExit::Shutdown;
            }
            if self.link.is_closed() {
                break PumpExit::ChannelLost;
            }

            match self.terminal.poll_output() {
                OutputPoll::Data(bytes) => {
                    if !self.forward(&bytes).await {
                        break PumpExit::ChannelLost;
                    }
                }
                OutputPoll::Closed => break self.shell_exited().await,
                OutputPoll::Empty => {
                    // The reader may still hold the shell's last bytes.
                    if drain_until.is_none() && !self.terminal.is_alive() {
                        drain_until = Some(Instant::now() + EXIT_DRAIN_GRACE);
                    }
                    if drain_until.is_some_and(|deadline| Instant::now() >= deadline) {
                        tracing::debug!("Terminal output still open after shell exit");
                        break self.shell_exited().await;
                    }
                    tokio::select! {
                        biased;
                        () = shutdown.cancelled() => break PumpExit::Shutdown,
                        () = self.link.closed() => break PumpExit::ChannelLost,
                        () = tokio::time::sleep(self.poll_interval) => {}
                    }
                }
            }
        };

        if !self.pending.is_empty() {
            tracing::debug!(bytes = self.pending.len(), "Carrying partial character");
        }
        tracing::debug!(?exit, "Output pump stopped");
        PumpReport {
            exit,
            carry: self.pending,
        }
    }

    /// Send everything up to the last complete character. Returns false once
    /// the link is down.
    async fn forward(&mut self, bytes: &[u8]) -> bool {
        self.pending.extend_from_slice(bytes);
        let cut = complete_prefix_len(&self.pending);
        if cut == 0 {
            return true;
        }
        let tail = self.pending.split_off(cut);
        let chunk = std::mem::replace(&mut self.pending, tail);
        self.link.send(&Message::output(&chunk)).await.is_ok()
    }

    async fn shell_exited(&mut self) -> PumpExit {
        tracing::info!("Shell exited");
        if !self.pending.is_empty() {
            let rest = std::mem::take(&mut self.pending);
            let _ = self.link.send(&Message::output(&rest)).await;
        }
        self.link.close().await;
        PumpExit::ShellExited
    }
}

/// Length of `buf` without a trailing, not yet complete UTF-8 sequence.
///
/// Only the last three bytes are inspected; anything else that is invalid is
/// left for lossy replacement.
fn complete_prefix_len(buf: &[u8]) -> usize {
    let len = buf.len();
    for back in 1..=len.min(3) {
        let byte = buf[len - back];
        if byte & 0xC0 == 0x80 {
            continue;
        }
        let width = match byte {
            0xF0..=0xF7 => 4,
            0xE0..=0xEF => 3,
            0xC0..=0xDF => 2,
            _ => 1,
        };
        return if width > back { len - back } else { len };
    }
    len
}
