use std::io;
use std::panic;

use tracing::error;

use crate::terminal;

/// Install a panic hook that restores terminal state before the default panic
/// message prints, so a panic mid-session never leaves the terminal raw (no
/// local echo, no line editing) for the user's shell after the process dies.
pub fn install_handler() {
    let default_hook = panic::take_hook();
    panic::set_hook(Box::new(move |panic_info| {
        if let Err(err) = restore_terminal() {
            error!(err=?err, "error restoring terminal during panic unwind");
        }
        error!("panic: {panic_info}");
        default_hook(panic_info);
    }));
}

pub fn restore_terminal() -> io::Result<()> {
    terminal::restore()
}
