//! Keep-alive pings and telemetry on a fixed tick.

use std::{sync::Arc, time::Duration};

use shell_bridge_core::{BridgeConfig, TelemetryProducer};
use shell_bridge_transport::Message;
use tokio::{
    task::JoinHandle,
    time::{Instant, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;

use crate::link::ChannelLink;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeartbeatConfig {
    /// How often the task wakes to check its two intervals.
    pub tick: Duration,
    pub keep_alive: Duration,
    pub metrics: Duration,
}

impl HeartbeatConfig {
    #[must_use]
    pub const fn from_config(config: &BridgeConfig) -> Self {
        Self {
            tick: config.heartbeat_tick(),
            keep_alive: config.keep_alive_interval(),
            metrics: config.metrics_interval(),
        }
    }
}

/// Per-cycle task sending `ping` and `metrics` messages.
///
/// Metrics go out on the first tick and then every `metrics` interval. A ping
/// goes out once `keep_alive` has passed since the previous one (or since the
/// cycle began). Exits when the link goes down or shutdown fires.
pub struct HeartbeatTask {
    link: ChannelLink,
    telemetry: Arc<dyn TelemetryProducer>,
    config: HeartbeatConfig,
    /// Process start, for the ping's uptime.
    started_at: Instant,
}

impl HeartbeatTask {
    #[must_use]
    pub fn new(
        link: ChannelLink,
        telemetry: Arc<dyn TelemetryProducer>,
        config: HeartbeatConfig,
        started_at: Instant,
    ) -> Self {
        Self {
            link,
            telemetry,
            config,
            started_at,
        }
    }

    pub fn spawn(self, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(self.run(shutdown))
    }

    pub async fn run(self, shutdown: CancellationToken) {
        let mut ticker = tokio::time::interval(self.config.tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut last_ping = Instant::now();
        let mut last_metrics: Option<Instant> = None;

        loop {
            tokio::select! {
                biased;
                () = shutdown.cancelled() => break,
                () = self.link.closed() => break,
                _ = ticker.tick() => {}
            }
            let now = Instant::now();

            if last_metrics.is_none_or(|at| now - at >= self.config.metrics) {
                last_metrics = Some(now);
                let sample = self.telemetry.sample();
                if self.link.send(&Message::metrics(sample)).await.is_err() {
                    break;
                }
            }

            if now - last_ping >= self.config.keep_alive {
                last_ping = now;
                let uptime = u64::try_from(self.started_at.elapsed().as_millis()).unwrap_or(u64::MAX);
                if self.link.send(&Message::Ping { uptime }).await.is_err() {
                    break;
                }
            }
        }
        tracing::debug!("Heartbeat stopped");
    }
}
