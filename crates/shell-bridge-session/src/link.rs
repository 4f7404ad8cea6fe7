//! Shared sending side of one channel.
//!
//! The sink handle and its `connected` flag live under one async mutex.
//! Every send, close and connected-check takes that guard, so no task can
//! observe a sink that another task is tearing down, and two sends never
//! interleave on the wire. Closing cancels the link token before locking;
//! a send blocked on the peer watches that token and releases the guard.

use std::{sync::Arc, time::Duration};

use shell_bridge_transport::{ChannelError, FrameSink, Message};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

/// Upper bound for the close handshake on a dying connection.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

struct LinkState {
    sink: Option<Box<dyn FrameSink>>,
    connected: bool,
}

/// Guarded handle to the current channel's sink, valid for one reconnect cycle.
#[derive(Clone)]
pub struct ChannelLink {
    state: Arc<Mutex<LinkState>>,
    /// Cancelled together with `connected` flipping to false.
    closed: CancellationToken,
}

impl ChannelLink {
    /// Wrap a freshly connected sink.
    #[must_use]
    pub fn new(sink: Box<dyn FrameSink>) -> Self {
        Self {
            state: Arc::new(Mutex::new(LinkState {
                sink: Some(sink),
                connected: true,
            })),
            closed: CancellationToken::new(),
        }
    }

    /// Send one whole message.
    ///
    /// A transport failure tears the link down before returning. A write
    /// still pending when the link is closed is abandoned.
    ///
    /// # Errors
    /// Returns `ChannelError::Closed` if the link is already down or closes
    /// mid-send, or the transport's error if this send killed it.
    pub async fn send(&self, msg: &Message) -> Result<(), ChannelError> {
        let text = msg
            .encode()
            .map_err(|e| ChannelError::SendFailed(e.to_string()))?;

        let mut state = tokio::select! {
            biased;
            () = self.closed.cancelled() => return Err(ChannelError::Closed),
            state = self.state.lock() => state,
        };
        if !state.connected || self.closed.is_cancelled() {
            return Err(ChannelError::Closed);
        }
        let sink = state.sink.as_mut().ok_or(ChannelError::Closed)?;
        let result = tokio::select! {
            biased;
            () = self.closed.cancelled() => Err(ChannelError::Closed),
            result = sink.send_text(text) => result,
        };
        match result {
            Ok(()) => Ok(()),
            Err(ChannelError::Closed) if self.closed.is_cancelled() => {
                tracing::debug!(kind = msg.kind(), "Send abandoned, link closed");
                Err(ChannelError::Closed)
            }
            Err(e) => {
                tracing::warn!(kind = msg.kind(), "Channel send failed: {e}");
                state.sink = None;
                state.connected = false;
                self.closed.cancel();
                Err(e)
            }
        }
    }

    /// Whether the link is still usable.
    pub async fn is_connected(&self) -> bool {
        self.state.lock().await.connected
    }

    /// Non-blocking hint that the link has gone down.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// Resolves once the link has gone down.
    pub async fn closed(&self) {
        self.closed.cancelled().await;
    }

    /// Tear the link down and close the underlying connection. Idempotent.
    ///
    /// The token is cancelled before taking the guard, so an in-flight send
    /// stuck on a stalled peer gives the guard up first.
    pub async fn close(&self) {
        self.closed.cancel();
        let sink = {
            let mut state = self.state.lock().await;
            state.connected = false;
            state.sink.take()
        };
        if let Some(mut sink) = sink {
            if tokio::time::timeout(CLOSE_TIMEOUT, sink.close()).await.is_err() {
                tracing::debug!("Close handshake timed out");
            }
        }
    }
}
