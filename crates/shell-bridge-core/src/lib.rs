//! Core abstractions for the shell bridge.
//!
//! This crate provides the pieces every other crate agrees on:
//! - `BridgeConfig` - Connection, backoff and terminal settings
//! - `DeviceContext` - Device identity carried into every handshake
//! - `Terminal` - The bridge's view of the attached shell
//! - Collaborator traits for telemetry, screenshots and identity

pub mod config;
pub mod context;
pub mod traits;

pub use config::{BridgeConfig, ConfigError};
pub use context::DeviceContext;
pub use traits::{
    CollaboratorError, IdentityProvider, MetricsSnapshot, OutputPoll, ScreenshotProducer,
    TelemetryProducer, Terminal, TerminalError,
};
