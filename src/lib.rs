pub mod cli;
pub mod config;
pub mod console;
pub mod detect;
pub mod error;
pub mod logging;
pub mod panic;
pub mod session;
pub mod telnet;
pub mod terminal;
pub mod transfer;

pub type Result<T, E = error::Error> = core::result::Result<T, E>;
