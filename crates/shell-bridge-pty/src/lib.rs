//! Pseudo-terminal ownership for the shell bridge.
//!
//! Provides:
//! - `PseudoTerminal` - An interactive shell attached to a PTY
//! - Shell detection utilities for Unix and Windows

pub mod shell;
pub mod terminal;

pub use shell::{ShellKind, interactive_shell};
pub use terminal::{PseudoTerminal, PtyError, TerminalOptions};
