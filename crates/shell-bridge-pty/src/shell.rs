//! Interactive shell detection.

use std::{
    ffi::OsStr,
    path::{Path, PathBuf},
};

/// Fallback when `$SHELL` is unset or unusable.
const DEFAULT_UNIX_SHELL: &str = "/bin/sh";

/// Family of a shell binary, judged by its file name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShellKind {
    Bash,
    Zsh,
    Fish,
    Sh,
    PowerShell,
    Cmd,
    Other,
}

impl ShellKind {
    #[must_use]
    pub fn of(program: &Path) -> Self {
        let name = program
            .file_stem()
            .and_then(OsStr::to_str)
            .map(str::to_ascii_lowercase);
        match name.as_deref() {
            Some("bash") => Self::Bash,
            Some("zsh") => Self::Zsh,
            Some("fish") => Self::Fish,
            Some("sh" | "dash" | "ash") => Self::Sh,
            Some("powershell" | "pwsh") => Self::PowerShell,
            Some("cmd") => Self::Cmd,
            _ => Self::Other,
        }
    }

    /// Arguments that start this shell as an interactive login shell.
    #[must_use]
    pub const fn login_args(self) -> &'static [&'static str] {
        match self {
            Self::Bash | Self::Zsh | Self::Fish => &["-l"],
            Self::PowerShell => &["-NoLogo"],
            Self::Sh | Self::Cmd | Self::Other => &[],
        }
    }
}

/// The shell to attach when none is configured.
///
/// PowerShell if it is on `PATH` on Windows, else `cmd.exe`. Elsewhere the
/// user's `$SHELL` when it names an existing absolute path, else `/bin/sh`.
#[must_use]
pub fn interactive_shell() -> PathBuf {
    if cfg!(windows) {
        return which::which("powershell.exe").unwrap_or_else(|_| PathBuf::from("cmd.exe"));
    }
    std::env::var_os("SHELL")
        .map(PathBuf::from)
        .filter(|path| path.is_absolute() && path.is_file())
        .unwrap_or_else(|| PathBuf::from(DEFAULT_UNIX_SHELL))
}
