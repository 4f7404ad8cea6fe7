//! Process-lifetime orchestration of the bridge.

use std::{fmt, sync::Arc, time::Duration};

use shell_bridge_core::{BridgeConfig, ScreenshotProducer, TelemetryProducer, Terminal};
use shell_bridge_transport::{Connection, Connector};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::{
    heartbeat::{HeartbeatConfig, HeartbeatTask},
    link::ChannelLink,
    pump::{OutputPump, PumpExit, PumpReport},
    reconnect::{ConnectOutcome, ReconnectController, ReconnectPolicy},
    router::{CycleEnd, ProtocolRouter},
};

/// External producers available to a session.
#[derive(Clone)]
pub struct Collaborators {
    pub telemetry: Arc<dyn TelemetryProducer>,
    pub screenshots: Arc<dyn ScreenshotProducer>,
}

/// How a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionExit {
    Shutdown,
    /// The reconnect budget ran out.
    GaveUp,
    ShellExited,
}

impl fmt::Display for SessionExit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match self {
            Self::Shutdown => "shutdown requested",
            Self::GaveUp => "reconnect attempts exhausted",
            Self::ShellExited => "shell exited",
        };
        f.write_str(reason)
    }
}

/// Owns the terminal for the process lifetime and runs one reconnect cycle
/// per connected channel.
///
/// Each cycle gets a fresh link, output pump, heartbeat and receive loop. The
/// cycle ends when the channel dies; both tasks are joined before the next
/// connect attempt. A character split across the cycle boundary is carried
/// into the next cycle's pump.
pub struct SessionSupervisor {
    terminal: Arc<dyn Terminal>,
    connector: Arc<dyn Connector>,
    collaborators: Collaborators,
    controller: ReconnectController,
    heartbeat: HeartbeatConfig,
    poll_interval: Duration,
    shutdown: CancellationToken,
    started_at: Instant,
    /// Output bytes left over by the previous cycle's pump.
    carry: Vec<u8>,
}

impl SessionSupervisor {
    #[must_use]
    pub fn new(
        config: &BridgeConfig,
        terminal: Arc<dyn Terminal>,
        connector: Arc<dyn Connector>,
        collaborators: Collaborators,
    ) -> Self {
        Self {
            terminal,
            connector,
            collaborators,
            controller: ReconnectController::new(ReconnectPolicy::from_config(config)),
            heartbeat: HeartbeatConfig::from_config(config),
            poll_interval: config.poll_interval(),
            shutdown: CancellationToken::new(),
            started_at: Instant::now(),
            carry: Vec::new(),
        }
    }

    /// Token that stops the session when cancelled.
    #[must_use]
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Run until shutdown, the shell exits, or reconnecting gives up. The
    /// terminal is terminated before returning.
    pub async fn run(mut self) -> SessionExit {
        let exit = loop {
            if !self.terminal.is_alive() {
                break SessionExit::ShellExited;
            }

            let connector = Arc::clone(&self.connector);
            match self.controller.establish(connector.as_ref(), &self.shutdown).await {
                ConnectOutcome::Connected(connection) => {
                    if let Some(exit) = self.run_cycle(connection).await {
                        break exit;
                    }
                }
                ConnectOutcome::GaveUp => break SessionExit::GaveUp,
                ConnectOutcome::Shutdown => break SessionExit::Shutdown,
            }
        };

        tracing::info!(reason = %exit, "Session ending");
        self.terminal.terminate();
        exit
    }

    /// One connected cycle. Returns the session exit if the session cannot
    /// continue, `None` to reconnect.
    async fn run_cycle(&mut self, connection: Connection) -> Option<SessionExit> {
        let Connection { sink, mut source } = connection;
        let link = ChannelLink::new(sink);
        let cycle = self.shutdown.child_token();

        let pump = OutputPump::new(Arc::clone(&self.terminal), link.clone(), self.poll_interval)
            .with_carry(std::mem::take(&mut self.carry))
            .spawn(cycle.clone());
        let heartbeat = HeartbeatTask::new(
            link.clone(),
            Arc::clone(&self.collaborators.telemetry),
            self.heartbeat,
            self.started_at,
        )
        .spawn(cycle.clone());

        let router = ProtocolRouter::new(
            Arc::clone(&self.terminal),
            Arc::clone(&self.collaborators.screenshots),
            link.clone(),
        );
        let end = router.run(source.as_mut(), &self.shutdown).await;

        link.close().await;
        cycle.cancel();

        let PumpReport {
            exit: pump_exit,
            carry,
        } = pump.await.unwrap_or_else(|e| {
            tracing::error!("Output pump task failed: {e}");
            PumpReport {
                exit: PumpExit::ChannelLost,
                carry: Vec::new(),
            }
        });
        self.carry = carry;
        if let Err(e) = heartbeat.await {
            tracing::error!("Heartbeat task failed: {e}");
        }
        drop(source);

        tracing::info!(?end, pump = ?pump_exit, "Cycle ended");
        match (end, pump_exit) {
            (_, PumpExit::ShellExited) => Some(SessionExit::ShellExited),
            (CycleEnd::Shutdown, _) => Some(SessionExit::Shutdown),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use shell_bridge_core::MetricsSnapshot;
    use shell_bridge_transport::{ChannelError, Message};
    use tokio::sync::mpsc::UnboundedSender;

    use super::*;
    use crate::testing::{
        FakeTerminal, FixedTelemetry, RecordingSink, ScriptedConnector, ScriptedSource,
        StalledSink, StaticScreenshot,
    };

    fn config() -> BridgeConfig {
        BridgeConfig {
            reconnect_delay_ms: 100,
            backoff_max_ms: 1000,
            max_reconnect_attempts: 3,
            poll_interval_ms: 10,
            ..BridgeConfig::default()
        }
    }

    fn collaborators() -> Collaborators {
        Collaborators {
            telemetry: FixedTelemetry::new(MetricsSnapshot::default()),
            screenshots: Arc::new(StaticScreenshot(None)),
        }
    }

    fn connection() -> (RecordingSink, UnboundedSender<Result<String, ChannelError>>, Connection) {
        let sink = RecordingSink::new();
        let (tx, source) = ScriptedSource::new();
        (sink.clone(), tx, Connection::new(sink, source))
    }

    /// Wait on the paused clock until `condition` holds.
    async fn eventually(mut condition: impl FnMut() -> bool) {
        for _ in 0..1000 {
            if condition() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached");
    }

    fn outputs(sink: &RecordingSink) -> String {
        sink.messages()
            .into_iter()
            .filter_map(|m| match m {
                Message::Output { output } => Some(output),
                _ => None,
            })
            .collect()
    }

    #[tokio::test(start_paused = true)]
    async fn test_cycle_then_reconnect_then_shutdown() {
        let terminal = FakeTerminal::new();
        let connector = ScriptedConnector::new();
        let (sink1, tx1, conn1) = connection();
        let (sink2, _tx2, conn2) = connection();
        connector.succeed(conn1);
        connector.succeed(conn2);

        let supervisor =
            SessionSupervisor::new(&config(), terminal.clone(), connector.clone(), collaborators());
        let shutdown = supervisor.shutdown_token();
        let session = tokio::spawn(supervisor.run());

        tx1.send(Ok(r#"{"type":"command","command":"echo hi"}"#.to_string()))
            .unwrap();
        eventually(|| terminal.input() == b"echo hi\r\n").await;

        terminal.push_output(b"hi\r\n");
        eventually(|| outputs(&sink1) == "hi\r\n").await;
        assert!(
            sink1.messages().iter().any(|m| matches!(m, Message::Metrics { .. })),
            "heartbeat runs during the cycle"
        );

        drop(tx1);
        eventually(|| connector.attempts().len() == 2).await;
        assert!(sink1.is_closed());

        terminal.push_output(b"again");
        eventually(|| outputs(&sink2) == "again").await;

        shutdown.cancel();
        assert_eq!(session.await.unwrap(), SessionExit::Shutdown);
        assert!(sink2.is_closed());
        assert!(terminal.was_terminated());
    }

    #[tokio::test(start_paused = true)]
    async fn test_gives_up_after_attempt_budget() {
        let terminal = FakeTerminal::new();
        let connector = ScriptedConnector::new();

        let supervisor =
            SessionSupervisor::new(&config(), terminal.clone(), connector.clone(), collaborators());
        let exit = supervisor.run().await;

        assert_eq!(exit, SessionExit::GaveUp);
        assert_eq!(connector.attempts().len(), 3);
        assert!(terminal.was_terminated());
    }

    #[tokio::test(start_paused = true)]
    async fn test_shell_exit_ends_session_without_reconnecting() {
        let terminal = FakeTerminal::new();
        let connector = ScriptedConnector::new();
        let (sink, _tx, conn) = connection();
        connector.succeed(conn);
        let (_sink2, _tx2, spare) = connection();
        connector.succeed(spare);

        let supervisor =
            SessionSupervisor::new(&config(), terminal.clone(), connector.clone(), collaborators());
        let session = tokio::spawn(supervisor.run());

        terminal.push_output(b"logout\r\n");
        eventually(|| outputs(&sink) == "logout\r\n").await;
        terminal.exit();

        assert_eq!(session.await.unwrap(), SessionExit::ShellExited);
        assert_eq!(connector.attempts().len(), 1);
        assert!(sink.is_closed());
        assert!(terminal.was_terminated());
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_during_backoff() {
        let terminal = FakeTerminal::new();
        let connector = ScriptedConnector::new();
        let config = BridgeConfig {
            reconnect_delay_ms: 60_000,
            max_reconnect_attempts: 0,
            ..BridgeConfig::default()
        };

        let supervisor =
            SessionSupervisor::new(&config, terminal.clone(), connector.clone(), collaborators());
        let shutdown = supervisor.shutdown_token();
        let session = tokio::spawn(supervisor.run());

        eventually(|| connector.attempts().len() == 1).await;
        shutdown.cancel();

        assert_eq!(session.await.unwrap(), SessionExit::Shutdown);
        assert_eq!(connector.attempts().len(), 1);
        assert!(terminal.was_terminated());
    }

    #[tokio::test(start_paused = true)]
    async fn test_split_character_spans_reconnect() {
        let terminal = FakeTerminal::new();
        let connector = ScriptedConnector::new();
        let (sink1, tx1, conn1) = connection();
        let (sink2, _tx2, conn2) = connection();
        connector.succeed(conn1);
        connector.succeed(conn2);

        let supervisor =
            SessionSupervisor::new(&config(), terminal.clone(), connector.clone(), collaborators());
        let shutdown = supervisor.shutdown_token();
        let session = tokio::spawn(supervisor.run());

        let text = "ok €".as_bytes();
        terminal.push_output(&text[..4]);
        eventually(|| outputs(&sink1) == "ok ").await;
        drop(tx1);
        eventually(|| connector.attempts().len() == 2).await;

        terminal.push_output(&text[4..]);
        eventually(|| outputs(&sink2) == "€").await;

        shutdown.cancel();
        assert_eq!(session.await.unwrap(), SessionExit::Shutdown);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_completes_with_stalled_peer() {
        let terminal = FakeTerminal::new();
        let connector = ScriptedConnector::new();
        let stalled = StalledSink::new();
        let (tx, source) = ScriptedSource::new();
        connector.succeed(Connection::new(stalled.clone(), source));

        let collaborators = Collaborators {
            screenshots: Arc::new(StaticScreenshot(Some(vec![0xff, 0xd8]))),
            ..collaborators()
        };

        let supervisor =
            SessionSupervisor::new(&config(), terminal.clone(), connector.clone(), collaborators);
        let shutdown = supervisor.shutdown_token();
        let session = tokio::spawn(supervisor.run());

        tx.send(Ok(r#"{"type":"action","action":"screenshot"}"#.to_string()))
            .unwrap();
        terminal.push_output(b"never acknowledged");
        eventually(|| stalled.writes_started() > 0).await;
        tokio::time::sleep(Duration::from_millis(100)).await;
        shutdown.cancel();

        let exit = tokio::time::timeout(Duration::from_secs(60), session)
            .await
            .expect("session stops despite the stalled peer");
        assert_eq!(exit.unwrap(), SessionExit::Shutdown);
        assert!(stalled.close_started());
        assert!(terminal.was_terminated());
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_failure_starts_new_cycle() {
        let terminal = FakeTerminal::new();
        let connector = ScriptedConnector::new();
        let broken = RecordingSink::failing_after(0);
        let (_tx1, source1) = ScriptedSource::new();
        connector.succeed(Connection::new(broken, source1));
        let (sink2, _tx2, conn2) = connection();
        connector.succeed(conn2);

        let supervisor =
            SessionSupervisor::new(&config(), terminal.clone(), connector.clone(), collaborators());
        let shutdown = supervisor.shutdown_token();
        let session = tokio::spawn(supervisor.run());

        terminal.push_output(b"lost");
        eventually(|| connector.attempts().len() == 2).await;
        terminal.push_output(b"kept");
        eventually(|| outputs(&sink2).contains("kept")).await;

        shutdown.cancel();
        assert_eq!(session.await.unwrap(), SessionExit::Shutdown);
    }
}
