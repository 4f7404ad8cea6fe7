//! Session supervision for the shell bridge.
//!
//! Provides:
//! - `ChannelLink` - The guarded, shared sending side of one channel
//! - `ReconnectController` - Backoff-governed connect state machine
//! - `ProtocolRouter` - Inbound message dispatch
//! - `OutputPump` / `HeartbeatTask` - Per-cycle background tasks
//! - `SessionSupervisor` - Composes the above for the process lifetime

pub mod heartbeat;
pub mod link;
pub mod pump;
pub mod reconnect;
pub mod router;
pub mod supervisor;

#[cfg(test)]
pub(crate) mod testing;

pub use heartbeat::{HeartbeatConfig, HeartbeatTask};
pub use link::ChannelLink;
pub use pump::{OutputPump, PumpExit, PumpReport};
pub use reconnect::{ConnectOutcome, ReconnectController, ReconnectPolicy, ReconnectState};
pub use router::{CycleEnd, ProtocolRouter};
pub use supervisor::{Collaborators, SessionExit, SessionSupervisor};
