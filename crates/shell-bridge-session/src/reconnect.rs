//! Reconnect state machine.
//!
//! ```text
//! Idle ──► Connecting ──ok──► Connected ──(channel lost)──► Connecting
//!              │  ▲
//!            fail│  │delay elapsed, budget left
//!              ▼  │
//!           BackingOff ──budget exhausted──► GivingUp
//! ```
//!
//! Shutdown moves any state to `GivingUp`. `GivingUp` is terminal.

use std::{fmt, time::Duration};

use shell_bridge_core::BridgeConfig;
use shell_bridge_transport::{Connection, Connector};
use tokio_util::sync::CancellationToken;

/// Largest exponent applied to the base delay.
const MAX_BACKOFF_EXPONENT: u32 = 6;

/// Delay policy between connect attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub exponential: bool,
    /// Consecutive failures tolerated before giving up (0 = unlimited).
    pub max_attempts: u32,
}

impl ReconnectPolicy {
    #[must_use]
    pub const fn from_config(config: &BridgeConfig) -> Self {
        Self {
            base_delay: config.reconnect_delay(),
            max_delay: config.backoff_max(),
            exponential: config.use_exponential_backoff,
            max_attempts: config.max_reconnect_attempts,
        }
    }

    /// Delay after `failures` earlier consecutive failures.
    ///
    /// `base` without backoff, else `min(base * 2^min(failures, 6), max)`.
    #[must_use]
    pub fn delay_for(&self, failures: u32) -> Duration {
        if !self.exponential {
            return self.base_delay;
        }
        let factor = 1u32 << failures.min(MAX_BACKOFF_EXPONENT);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    /// Whether `attempts` consecutive failures use up the budget.
    #[must_use]
    pub const fn is_exhausted(&self, attempts: u32) -> bool {
        self.max_attempts > 0 && attempts >= self.max_attempts
    }
}

/// Reconnect controller state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectState {
    Idle,
    Connecting,
    Connected,
    BackingOff,
    GivingUp,
}

impl fmt::Display for ReconnectState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::BackingOff => "backing-off",
            Self::GivingUp => "giving-up",
        };
        f.write_str(name)
    }
}

/// Result of [`ReconnectController::establish`].
pub enum ConnectOutcome {
    Connected(Connection),
    /// Attempt budget exhausted.
    GaveUp,
    /// Shutdown was requested.
    Shutdown,
}

impl fmt::Debug for ConnectOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connected(_) => f.write_str("Connected"),
            Self::GaveUp => f.write_str("GaveUp"),
            Self::Shutdown => f.write_str("Shutdown"),
        }
    }
}

/// Drives connect attempts with backoff until one succeeds or it gives up.
#[derive(Debug)]
pub struct ReconnectController {
    policy: ReconnectPolicy,
    state: ReconnectState,
    /// Consecutive attempts since the last successful connect.
    attempts: u32,
}

impl ReconnectController {
    #[must_use]
    pub const fn new(policy: ReconnectPolicy) -> Self {
        Self {
            policy,
            state: ReconnectState::Idle,
            attempts: 0,
        }
    }

    #[must_use]
    pub const fn state(&self) -> ReconnectState {
        self.state
    }

    #[must_use]
    pub const fn attempts(&self) -> u32 {
        self.attempts
    }

    #[must_use]
    pub const fn policy(&self) -> &ReconnectPolicy {
        &self.policy
    }

    fn transition(&mut self, next: ReconnectState) {
        tracing::debug!(from = %self.state, to = %next, attempts = self.attempts, "Reconnect state");
        self.state = next;
    }

    /// Run the state machine until a channel is connected, the budget is
    /// exhausted, or `shutdown` fires.
    ///
    /// Called again after a connected channel is lost. Once it has returned
    /// `GaveUp` or `Shutdown` it never attempts again.
    pub async fn establish(
        &mut self,
        connector: &dyn Connector,
        shutdown: &CancellationToken,
    ) -> ConnectOutcome {
        loop {
            if shutdown.is_cancelled() {
                self.transition(ReconnectState::GivingUp);
                return ConnectOutcome::Shutdown;
            }

            match self.state {
                ReconnectState::GivingUp => return ConnectOutcome::GaveUp,
                ReconnectState::Idle | ReconnectState::Connected => {
                    self.transition(ReconnectState::Connecting);
                }
                ReconnectState::Connecting => {
                    self.attempts = self.attempts.saturating_add(1);
                    tracing::info!(
                        attempt = self.attempts,
                        max_attempts = self.policy.max_attempts,
                        "Connecting to controller"
                    );

                    let result = tokio::select! {
                        biased;
                        () = shutdown.cancelled() => continue,
                        result = connector.connect() => result,
                    };

                    match result {
                        Ok(connection) => {
                            tracing::info!(attempt = self.attempts, "Connected to controller");
                            self.attempts = 0;
                            self.transition(ReconnectState::Connected);
                            return ConnectOutcome::Connected(connection);
                        }
                        Err(e) => {
                            tracing::warn!(stage = %e.stage, attempt = self.attempts, "{e}");
                            self.transition(ReconnectState::BackingOff);
                        }
                    }
                }
                ReconnectState::BackingOff => {
                    let delay = self.policy.delay_for(self.attempts.saturating_sub(1));
                    tracing::info!(
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        attempt = self.attempts,
                        "Waiting before reconnecting"
                    );

                    tokio::select! {
                        biased;
                        () = shutdown.cancelled() => continue,
                        () = tokio::time::sleep(delay) => {}
                    }

                    if self.policy.is_exhausted(self.attempts) {
                        tracing::warn!(
                            attempts = self.attempts,
                            "Reconnect attempts exhausted, giving up"
                        );
                        self.transition(ReconnectState::GivingUp);
                        return ConnectOutcome::GaveUp;
                    }
                    self.transition(ReconnectState::Connecting);
                }
            }
        }
    }
}
