//! Shell bridge agent.
//!
//! Attaches an interactive shell to a pseudo-terminal and keeps it reachable
//! from a remote controller over a reconnecting WebSocket.
//!
//! Configuration comes from `$SHELL_BRIDGE_CONFIG` or `./shell-bridge.toml`;
//! log verbosity from `RUST_LOG` (default `info`).

mod collaborators;

use std::{process::ExitCode, sync::Arc};

use anyhow::Context as _;
use shell_bridge_core::{BridgeConfig, DeviceContext};
use shell_bridge_pty::{PseudoTerminal, TerminalOptions, interactive_shell};
use shell_bridge_session::{Collaborators, SessionSupervisor};
use shell_bridge_transport::WsConnector;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::collaborators::{HostIdentity, SysinfoTelemetry, UnsupportedScreenshot};

const EXIT_PTY_FAILED: u8 = 1;
const EXIT_BAD_CONFIG: u8 = 2;

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let config = match BridgeConfig::load() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("{e}");
            return ExitCode::from(EXIT_BAD_CONFIG);
        }
    };

    let identity = HostIdentity::detect();
    let device = DeviceContext::from_provider(&identity, config.app_version.clone())
        .with_user_id(config.user_id.clone());
    tracing::info!(
        device_id = %device.device_id,
        device_name = %device.device_name,
        os = %device.os_description,
        "Device identity"
    );

    let terminal = match start_terminal(&config) {
        Ok(terminal) => Arc::new(terminal),
        Err(e) => {
            tracing::error!("{e:#}");
            return ExitCode::from(EXIT_PTY_FAILED);
        }
    };

    let connector = WsConnector::new(
        config.scheme(),
        config.server_host.clone(),
        config.server_port,
        device,
    );
    tracing::info!(url = %connector.url(), "Controller endpoint");

    let collaborators = Collaborators {
        telemetry: Arc::new(SysinfoTelemetry::new()),
        screenshots: Arc::new(UnsupportedScreenshot),
    };
    let supervisor = SessionSupervisor::new(&config, terminal, Arc::new(connector), collaborators);
    tokio::spawn(cancel_on_signal(supervisor.shutdown_token()));

    let exit = supervisor.run().await;
    tracing::info!(reason = %exit, "Shell bridge stopped");
    ExitCode::SUCCESS
}

fn start_terminal(config: &BridgeConfig) -> anyhow::Result<PseudoTerminal> {
    let program = config.shell.clone().unwrap_or_else(interactive_shell);
    let options =
        TerminalOptions::for_shell(&program, config.terminal_columns, config.terminal_rows)
            .chunk_bytes(config.output_chunk_bytes);

    PseudoTerminal::start_with(options)
        .with_context(|| format!("Failed to start shell {}", program.display()))
}

async fn cancel_on_signal(shutdown: CancellationToken) {
    #[cfg(unix)]
    let result = {
        use tokio::signal::unix::{SignalKind, signal};

        match signal(SignalKind::terminate()) {
            Ok(mut terminate) => tokio::select! {
                result = tokio::signal::ctrl_c() => result,
                _ = terminate.recv() => Ok(()),
            },
            Err(e) => {
                tracing::warn!("Cannot listen for SIGTERM: {e}");
                tokio::signal::ctrl_c().await
            }
        }
    };
    #[cfg(not(unix))]
    let result = tokio::signal::ctrl_c().await;

    if let Err(e) = result {
        tracing::warn!("Cannot listen for Ctrl-C: {e}");
        return;
    }
    tracing::info!("Shutdown requested");
    shutdown.cancel();
}
