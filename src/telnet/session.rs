use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;

use crate::telnet::command::option as opt;
use crate::telnet::option::Table;

/// Size of the window `(width, height)` the client offers via NAWS by default.
pub const DEFAULT_SIZE: (u16, u16) = (80, 24);

/// Default terminal speed string, `"rx,tx"`.
pub const DEFAULT_SPEED: &str = "38400,38400";

/// Default terminal types offered (and cycled through) via TTYPE.
pub const DEFAULT_TERMINAL_TYPES: &[&str] = &["XTERM", "VT100", "ANSI"];

/// Byte-at-a-time parser states for the IAC command stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseState {
    Data,
    Iac,
    Will,
    Wont,
    Do,
    Dont,
    Sb,
    SbIac,
    SeenCr,
}

/// Bound on the accumulated subnegotiation payload. Exceeding it discards the
/// whole subnegotiation rather than growing without limit.
pub const SB_BUFFER_CAP: usize = 4096;

/// The Telnet protocol state exclusively owned by the session: the transport,
/// the parser state, and per-option negotiation state.
pub struct TelnetSession {
    pub(crate) tcp: TcpStream,
    pub(crate) parse_state: ParseState,
    pub(crate) sb_buffer: Vec<u8>,
    pub(crate) sb_overflowed: bool,
    pub(crate) option_state: Table,

    pub(crate) linemode: bool,
    pub(crate) linemode_edit: bool,
    pub(crate) linemode_trapsig: bool,

    pub(crate) terminal_types: Vec<&'static str>,
    pub(crate) terminal_type_index: usize,

    pub term_width: u16,
    pub term_height: u16,
    pub(crate) terminal_speed: String,
}

impl TelnetSession {
    #[must_use]
    pub fn new(tcp: TcpStream) -> Self {
        Self {
            tcp,
            parse_state: ParseState::Data,
            sb_buffer: Vec::new(),
            sb_overflowed: false,
            option_state: Table::default(),
            linemode: true,
            linemode_edit: false,
            linemode_trapsig: false,
            terminal_types: DEFAULT_TERMINAL_TYPES.to_vec(),
            terminal_type_index: 0,
            term_width: DEFAULT_SIZE.0,
            term_height: DEFAULT_SIZE.1,
            terminal_speed: DEFAULT_SPEED.to_string(),
        }
    }

    #[must_use]
    pub fn binary_mode(&self) -> bool {
        self.option_state.entry(opt::BINARY).local_enabled()
            && self.option_state.entry(opt::BINARY).remote_enabled()
    }

    #[must_use]
    pub fn echo_remote(&self) -> bool {
        self.option_state.entry(opt::ECHO).remote_enabled()
    }

    #[must_use]
    pub fn naws_accepted(&self) -> bool {
        self.option_state.entry(opt::NAWS).local_enabled()
    }

    #[must_use]
    pub fn linemode(&self) -> bool {
        self.linemode
    }

    pub fn close(&mut self) {
        // TcpStream's drop handles the socket; shutdown() is attempted best
        // effort elsewhere where an async context is available.
    }

    pub async fn shutdown(&mut self) -> std::io::Result<()> {
        self.tcp.shutdown().await
    }

    /// Read raw bytes directly off the transport, bypassing the IAC parser.
    /// The session loop decodes the result with [`Self::feed`] itself; the
    /// Kermit adapter instead does its own BINARY-mode unescaping on it.
    pub async fn read_into(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        use tokio::io::AsyncReadExt;
        self.tcp.read(buf).await
    }

    /// A best-effort, non-blocking check for socket readability.
    pub async fn peek_readable(&mut self) -> bool {
        tokio::time::timeout(std::time::Duration::from_millis(0), self.tcp.readable())
            .await
            .is_ok()
    }

    pub(crate) fn next_terminal_type(&mut self) -> &'static str {
        let name = self.terminal_types[self.terminal_type_index];
        self.terminal_type_index = (self.terminal_type_index + 1) % self.terminal_types.len();
        name
    }

    pub(crate) fn environ_pairs(&self) -> Vec<(&'static str, String)> {
        const MAX_VALUE_LEN: usize = 256;
        let mut pairs = Vec::new();
        if let Ok(user) = std::env::var("USER") {
            pairs.push(("USER", truncate(user, MAX_VALUE_LEN)));
        }
        if let Ok(display) = std::env::var("DISPLAY") {
            pairs.push(("DISPLAY", truncate(display, MAX_VALUE_LEN)));
        }
        pairs
    }
}

fn truncate(mut s: String, max: usize) -> String {
    if s.len() > max {
        s.truncate(max);
    }
    s
}
