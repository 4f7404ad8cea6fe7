//! Transport layer between the device and the controller.
//!
//! Provides:
//! - Wire protocol (JSON text frames, base64 for images)
//! - `DuplexChannel` - WebSocket connection with a staged handshake
//! - `Connector` - The seam the reconnect loop dials through

pub mod channel;
pub mod protocol;

pub use channel::{
    ChannelError, ConnectError, ConnectStage, Connection, Connector, DuplexChannel, FrameSink,
    FrameSource, WsConnector,
};
pub use protocol::{DecodeError, Message};
