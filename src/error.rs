use std::io;

use thiserror::Error;
use tracing_error::SpanTrace;

/// The crate's top level error type.
///
/// Wraps an [`ErrorKind`] together with a captured [`SpanTrace`] so that a fatal
/// error printed at the top of `main` carries enough context to debug without
/// re-running with elevated log verbosity.
#[derive(Debug, Error)]
#[error("error: {kind}\n{span}")]
pub struct Error {
    pub(crate) kind: Box<ErrorKind>,
    pub(crate) span: SpanTrace,
}

impl Error {
    #[must_use]
    pub fn kind(&self) -> &ErrorKind {
        &self.kind
    }

    /// Whether this error should terminate the session outright.
    ///
    /// Per the propagation rule, only transport and terminal errors are fatal;
    /// everything else is recoverable by the caller (a transfer abort, a skipped
    /// malformed sequence, etc).
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(
            &*self.kind,
            ErrorKind::Transport(_) | ErrorKind::Terminal(_)
        )
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Self::from(ErrorKind::Io(err))
    }
}

impl From<ErrorKind> for Error {
    fn from(kind: ErrorKind) -> Self {
        Self {
            kind: kind.into(),
            span: SpanTrace::capture(),
        }
    }
}

/// Specific error conditions that can arise while running a session.
///
/// Variants are grouped along the same lines as the error handling design:
/// protocol-local (recoverable, logged and skipped), transfer (aborts only the
/// in-progress transfer), transport (fatal to the session), and terminal
/// (fatal).
#[derive(Debug, Error)]
pub enum ErrorKind {
    #[error("unexpected I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("invalid CLI argument: {0}")]
    Cli(String),

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("transfer error: {0}")]
    Transfer(#[from] TransferError),

    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("terminal error: {0}")]
    Terminal(String),

    #[error("internal error: {0}")]
    Internal(String),
}

/// A protocol-local error: malformed Telnet framing. Always recoverable -- the
/// caller logs it and keeps parsing.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("unknown IAC command byte {0:#04x}")]
    UnknownCommand(u8),

    #[error("subnegotiation buffer overflowed (option {0})")]
    SubnegotiationOverflow(u8),

    #[error("unexpected subnegotiation contents for option {0}")]
    UnexpectedSubnegotiation(u8),
}

/// An error that aborts only the in-progress file transfer; the session survives.
#[derive(Debug, Error)]
pub enum TransferError {
    #[error("no transfer is currently armed")]
    NotArmed,

    #[error("a transfer is already in progress")]
    AlreadyActive,

    #[error("kermit packet timeout exceeded ({0} consecutive timeouts)")]
    PacketTimeout(u32),

    #[error("too many consecutive NAKs ({0})")]
    TooManyNaks(u32),

    #[error("transfer exceeded its global timeout of {0:?}")]
    GlobalTimeout(std::time::Duration),

    #[error("remote sent an explicit error packet: {0}")]
    RemoteError(String),

    #[error("failed to spawn transfer helper {0:?}: {1}")]
    Spawn(std::path::PathBuf, io::Error),

    #[error("no helper binary configured for {0}")]
    NoHelperConfigured(&'static str),

    #[error("transfer helper exited with status {0}")]
    HelperFailed(std::process::ExitStatus),

    #[error("transfer cancelled by user")]
    Cancelled,

    #[error("i/o error during transfer: {0}")]
    Io(#[from] io::Error),

    #[error("the embedded kermit engine is not available in this build")]
    EngineUnavailable,
}

/// A transport-level error. Always fatal to the session.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("connection closed by peer")]
    Closed,

    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
}

/// An error loading or validating the configuration file.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0}")]
    General(#[from] config::ConfigError),

    #[error("invalid line {line}: {content:?}")]
    InvalidLine { line: usize, content: String },

    #[error("creating directory {0:?}: {1}")]
    CreateDir(std::path::PathBuf, io::Error),
}
