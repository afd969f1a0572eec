//! Terminal raw-mode discipline: every byte preserved end-to-end between the
//! keyboard and the remote, with guaranteed restoration on every exit path.

use crossterm::terminal::{disable_raw_mode, enable_raw_mode, size};
use tracing::debug;

use crate::error::{Error, ErrorKind};

/// Default window size reported when the terminal can't be queried (e.g.
/// stdout has been redirected to a file).
const FALLBACK_SIZE: (u16, u16) = (80, 24);

/// RAII guard that restores the terminal's prior mode on drop. Holding one is
/// the session loop's only evidence that raw mode is active.
pub struct TerminalGuard {
    _private: (),
}

impl TerminalGuard {
    /// Snapshot the terminal and enable raw mode: no input breaks, no CR/LF
    /// translation, no echo, no canonicalisation, no signal generation --
    /// every byte the operator types reaches the session loop unmodified.
    pub fn enter() -> Result<Self, Error> {
        enable_raw_mode().map_err(|e| ErrorKind::Terminal(format!("enabling raw mode: {e}")))?;
        debug!("raw mode enabled");
        Ok(Self { _private: () })
    }
}

impl Drop for TerminalGuard {
    fn drop(&mut self) {
        if let Err(e) = disable_raw_mode() {
            // Nothing left to restore to if this fails; log and move on.
            tracing::error!(err = %e, "failed to disable raw mode on exit");
        }
    }
}

/// Best-effort restore outside of the guard's own `Drop`, for the panic hook
/// which runs after the guard it would otherwise rely on may be unreachable.
pub fn restore() -> std::io::Result<()> {
    disable_raw_mode()
}

/// Current terminal size, falling back to the Telnet default when it can't be
/// determined (e.g. output isn't a TTY).
#[must_use]
pub fn current_size() -> (u16, u16) {
    size().unwrap_or(FALLBACK_SIZE)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fallback_size_matches_telnet_default() {
        assert_eq!(FALLBACK_SIZE, (80, 24));
    }
}
