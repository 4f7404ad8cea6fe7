//! Inbound message dispatch.

use std::sync::Arc;

use shell_bridge_core::{CollaboratorError, ScreenshotProducer, Terminal};
use shell_bridge_transport::{ChannelError, FrameSource, Message};
use tokio_util::sync::CancellationToken;

use crate::link::ChannelLink;

/// Line terminator appended to `command` payloads.
const LINE_TERMINATOR: &str = "\r\n";

/// Action name that requests a screen capture.
const SCREENSHOT_ACTION: &str = "screenshot";

/// Why a receive loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleEnd {
    /// The peer closed the channel.
    ChannelClosed,
    /// The transport failed while receiving.
    ReceiveFailed,
    /// The link went down from the sending side or the output pump.
    LinkDropped,
    Shutdown,
}

/// Decodes inbound frames and applies them to the terminal.
///
/// Frames are handled strictly in arrival order by the receive loop.
pub struct ProtocolRouter {
    terminal: Arc<dyn Terminal>,
    screenshots: Arc<dyn ScreenshotProducer>,
    link: ChannelLink,
}

impl ProtocolRouter {
    #[must_use]
    pub fn new(
        terminal: Arc<dyn Terminal>,
        screenshots: Arc<dyn ScreenshotProducer>,
        link: ChannelLink,
    ) -> Self {
        Self {
            terminal,
            screenshots,
            link,
        }
    }

    /// Receive and dispatch frames until the channel dies or shutdown fires.
    pub async fn run(&self, source: &mut dyn FrameSource, shutdown: &CancellationToken) -> CycleEnd {
        loop {
            let frame = tokio::select! {
                biased;
                () = shutdown.cancelled() => return CycleEnd::Shutdown,
                () = self.link.closed() => return CycleEnd::LinkDropped,
                frame = source.next_text() => frame,
            };

            match frame {
                // A reply stuck on an unresponsive peer must not hold off shutdown.
                Ok(text) => tokio::select! {
                    biased;
                    () = shutdown.cancelled() => return CycleEnd::Shutdown,
                    () = self.handle_frame(&text) => {}
                },
                Err(ChannelError::Closed) => {
                    tracing::info!("Controller closed the channel");
                    return CycleEnd::ChannelClosed;
                }
                Err(e) => {
                    tracing::warn!("Channel receive failed: {e}");
                    return CycleEnd::ReceiveFailed;
                }
            }
        }
    }

    /// Decode one frame and dispatch it. Undecodable frames are dropped.
    pub async fn handle_frame(&self, text: &str) {
        match Message::decode(text) {
            Ok(msg) => self.dispatch(msg).await,
            Err(e) => tracing::debug!(bytes = text.len(), "Dropping frame: {e}"),
        }
    }

    pub async fn dispatch(&self, msg: Message) {
        match msg {
            Message::Input { data } => self.write(data.as_bytes()),
            Message::Command { command } => {
                let mut line = command;
                line.push_str(LINE_TERMINATOR);
                self.write(line.as_bytes());
            }
            Message::Resize { cols, rows } => {
                if let Err(e) = self.terminal.resize(cols, rows) {
                    tracing::warn!(cols, rows, "{e}");
                }
            }
            Message::Action { action } if action == SCREENSHOT_ACTION => self.send_screenshot().await,
            Message::Action { action } => tracing::debug!(%action, "Ignoring unknown action"),
            Message::Pong => tracing::debug!("Pong received"),
            other => tracing::debug!(kind = other.kind(), "Ignoring device-bound message"),
        }
    }

    fn write(&self, data: &[u8]) {
        if let Err(e) = self.terminal.write_input(data) {
            tracing::warn!(bytes = data.len(), "{e}");
        }
    }

    async fn send_screenshot(&self) {
        let producer = Arc::clone(&self.screenshots);
        let image = match tokio::task::spawn_blocking(move || producer.capture()).await {
            Ok(Ok(image)) => image,
            Ok(Err(CollaboratorError::Unsupported)) => {
                tracing::info!("Screenshot requested but capture is unsupported");
                return;
            }
            Ok(Err(e)) => {
                tracing::warn!("{e}");
                return;
            }
            Err(e) => {
                tracing::error!("Screenshot task failed: {e}");
                return;
            }
        };

        tracing::debug!(bytes = image.len(), "Sending screenshot");
        // A failed send tears the link down; the loop sees it next iteration.
        let _ = self.link.send(&Message::screenshot(&image)).await;
    }
}
