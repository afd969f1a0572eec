//! Adapts the Telnet byte stream to the callback surface a Kermit packet
//! engine expects. The packet-level protocol itself (SOH/LEN/SEQ/TYPE framing,
//! retry/NAK bookkeeping) is an external black box; this module only provides
//! the I/O the engine is driven through.

use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::time::timeout;
use tracing::warn;

use crate::error::{Error, ErrorKind, TransferError};
use crate::telnet::command;
use crate::telnet::session::TelnetSession;
use crate::transfer::state::PendingBuffer;

/// Default per-packet read timeout, used when the engine doesn't override it.
pub const DEFAULT_PACKET_TIMEOUT: Duration = Duration::from_secs(15);
pub const DEFAULT_MAX_NAKS: u32 = 10;
pub const DEFAULT_MAX_TIMEOUTS: u32 = 5;

/// Carries a "saw 0xFF" bit across calls so a trailing escape byte at the end
/// of one read is resolved correctly by the next.
#[derive(Default, Clone, Copy)]
pub struct UnescapeState {
    pending_ff: bool,
}

/// Double every `0xFF` in `data` (BINARY-mode escaping).
#[must_use]
pub fn escape(data: &[u8]) -> Vec<u8> {
    crate::telnet::escape_iac(data)
}

/// Undo BINARY-mode escaping: `FF FF -> FF`. Returns the unescaped bytes; an
/// unresolved trailing `FF` is carried in `state` for the next call.
#[must_use]
pub fn unescape(data: &[u8], state: &mut UnescapeState) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len());
    let mut iter = data.iter().copied().peekable();

    if state.pending_ff {
        state.pending_ff = false;
        match iter.peek() {
            Some(&command::IAC) => {
                out.push(command::IAC);
                iter.next();
            }
            _ => out.push(command::IAC),
        }
    }

    while let Some(byte) = iter.next() {
        if byte == command::IAC {
            match iter.peek() {
                Some(&command::IAC) => {
                    out.push(command::IAC);
                    iter.next();
                }
                Some(_) => {
                    // An `IAC <cmd>` inside binary mode: resolved by the caller
                    // via `read_packet`'s negotiation-skip/fatal logic, not here.
                    out.push(byte);
                }
                None => state.pending_ff = true,
            }
        } else {
            out.push(byte);
        }
    }
    out
}

/// Outcome of an embedded Kermit transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferOutcome {
    Success,
    SuccessWithWarning,
    Failure,
}

/// The callback surface an embedded Kermit packet engine is driven through.
///
/// Generic rather than `dyn`-dispatched: the packet state machine itself is
/// out of scope here, so there is no built-in implementation to box, and the
/// async methods below aren't object-safe without an adapter crate this
/// client has no other use for.
pub trait KermitEngine {
    /// Send `path` to the peer using the adapter's I/O callbacks.
    async fn send(&mut self, io: &mut KermitIo<'_>, path: &Path) -> Result<TransferOutcome, Error>;

    /// Receive a file from the peer using the adapter's I/O callbacks,
    /// writing it under `dest_dir`.
    async fn receive(
        &mut self,
        io: &mut KermitIo<'_>,
        dest_dir: &Path,
    ) -> Result<TransferOutcome, Error>;
}

/// Adapts the Telnet transport and a [`PendingBuffer`] handoff slot to the
/// packet I/O calls a [`KermitEngine`] makes.
pub struct KermitIo<'a> {
    session: &'a mut TelnetSession,
    pending: &'a mut PendingBuffer,
    unescape_state: UnescapeState,
    packet_timeout: Duration,
    consecutive_naks: u32,
    consecutive_timeouts: u32,
    max_naks: u32,
    max_timeouts: u32,
    open_file: Option<File>,
    read_buf: Vec<u8>,
    read_pos: usize,
    keep_partial: bool,
    sending: bool,
}

impl<'a> KermitIo<'a> {
    #[must_use]
    pub fn new(session: &'a mut TelnetSession, pending: &'a mut PendingBuffer, sending: bool) -> Self {
        Self {
            session,
            pending,
            unescape_state: UnescapeState::default(),
            packet_timeout: DEFAULT_PACKET_TIMEOUT,
            consecutive_naks: 0,
            consecutive_timeouts: 0,
            max_naks: DEFAULT_MAX_NAKS,
            max_timeouts: DEFAULT_MAX_TIMEOUTS,
            open_file: None,
            read_buf: Vec::new(),
            read_pos: 0,
            keep_partial: false,
            sending,
        }
    }

    /// Return one packet's worth of decoded bytes: `Ok(Some(_))` on data,
    /// `Ok(None)` on timeout (caller should NAK/retry), `Err` fatal.
    pub async fn read_packet(&mut self, max: usize) -> Result<Option<Vec<u8>>, Error> {
        let mut bytes = if !self.pending.is_empty() {
            let mut candidate = self.pending.take();
            strip_leading_soh(&mut candidate);
            if !header_in_printable_range(&candidate) {
                warn!("dropping pending buffer: LEN/SEQ/TYPE header out of printable range");
                return Ok(None);
            }
            candidate
        } else {
            match timeout(self.packet_timeout, self.read_raw_packet(max)).await {
                Ok(Ok(mut bytes)) => {
                    self.consecutive_timeouts = 0;
                    strip_leading_soh(&mut bytes);
                    bytes
                }
                Ok(Err(e)) => return Err(e),
                Err(_) => {
                    self.consecutive_timeouts += 1;
                    if self.consecutive_timeouts >= self.max_timeouts {
                        return Err(ErrorKind::Transfer(TransferError::PacketTimeout(
                            self.consecutive_timeouts,
                        ))
                        .into());
                    }
                    return Ok(None);
                }
            }
        };

        strip_trailing_eom(&mut bytes);
        Ok(Some(bytes))
    }

    async fn read_raw_packet(&mut self, max: usize) -> Result<Vec<u8>, Error> {
        let mut raw = vec![0u8; max.max(256)];
        let n = self
            .session
            .read_into(&mut raw)
            .await
            .map_err(ErrorKind::from)?;
        if n == 0 {
            return Err(ErrorKind::Transport(crate::error::TransportError::Closed).into());
        }
        raw.truncate(n);

        if peer_left_binary_mode(&raw) {
            return Err(ErrorKind::Transfer(TransferError::RemoteError(
                "peer left BINARY mode mid-packet".into(),
            ))
            .into());
        }

        Ok(unescape(&raw, &mut self.unescape_state))
    }

    /// BINARY-escape `buf` and write it, retrying transient errors.
    pub async fn write_packet(&mut self, buf: &[u8]) -> Result<(), Error> {
        let escaped = escape(buf);
        self.session.send_raw(&escaped).await
    }

    /// Nonblocking peek for sliding-window support.
    pub async fn input_available(&mut self) -> bool {
        self.session.peek_readable().await
    }

    pub fn note_nak(&mut self) -> Result<(), Error> {
        self.consecutive_naks += 1;
        if self.consecutive_naks >= self.max_naks {
            return Err(ErrorKind::Transfer(TransferError::TooManyNaks(self.consecutive_naks)).into());
        }
        Ok(())
    }

    pub fn note_ack(&mut self) {
        self.consecutive_naks = 0;
    }

    /// Open `path` for reading (send side) or create it under `dir` for
    /// writing (receive side).
    pub async fn open(&mut self, path: &Path, writing: bool) -> Result<(), Error> {
        let file = if writing {
            File::create(path).await.map_err(ErrorKind::from)?
        } else {
            File::open(path).await.map_err(ErrorKind::from)?
        };
        self.open_file = Some(file);
        self.read_buf.clear();
        self.read_pos = 0;
        Ok(())
    }

    /// Read the next byte of the open file, refilling the internal buffer
    /// from the start whenever it's exhausted. Returns `None` at EOF.
    pub async fn read_byte(&mut self) -> Result<Option<u8>, Error> {
        if self.read_pos >= self.read_buf.len() {
            self.read_buf.resize(READ_CHUNK, 0);
            self.read_pos = 0;
            let file = self.open_file.as_mut().ok_or(ErrorKind::Internal(
                "read_byte called with no open file".into(),
            ))?;
            let n = file.read(&mut self.read_buf).await.map_err(ErrorKind::from)?;
            self.read_buf.truncate(n);
            if n == 0 {
                return Ok(None);
            }
        }
        let byte = self.read_buf[self.read_pos];
        self.read_pos += 1;
        Ok(Some(byte))
    }

    pub async fn write_bytes(&mut self, data: &[u8]) -> Result<(), Error> {
        let file = self.open_file.as_mut().ok_or(ErrorKind::Internal(
            "write_bytes called with no open file".into(),
        ))?;
        file.write_all(data).await.map_err(ErrorKind::from)?;
        Ok(())
    }

    /// Close the open file, honouring the partial-file deletion policy: only
    /// a receive-side partial (`Data`-packet close, keep-partial disabled)
    /// deletes the file. `EOF`/`Break` closes, and anything on the send
    /// side, never delete.
    pub async fn close(&mut self, path: &Path, close_kind: CloseKind) -> Result<(), Error> {
        self.open_file = None;
        let should_delete = !self.sending
            && close_kind == CloseKind::Data
            && !self.keep_partial;
        if should_delete {
            let _ = tokio::fs::remove_file(path).await;
        }
        Ok(())
    }

    pub fn set_keep_partial(&mut self, keep: bool) {
        self.keep_partial = keep;
    }
}

const SOH: u8 = 0x01;
const READ_CHUNK: usize = 4096;

/// Printable-ASCII range Kermit's LEN/SEQ/TYPE header bytes are encoded in.
const KERMIT_PRINTABLE: std::ops::RangeInclusive<u8> = 0x20..=0x7E;

fn strip_leading_soh(bytes: &mut Vec<u8>) {
    if bytes.first() == Some(&SOH) {
        bytes.remove(0);
    }
}

/// Strip a single trailing `CR` or `LF` end-of-message byte, if present.
fn strip_trailing_eom(bytes: &mut Vec<u8>) {
    if matches!(bytes.last(), Some(&command::CR) | Some(&command::LF)) {
        bytes.pop();
    }
}

/// Whether the first three bytes (LEN, SEQ, TYPE) are in Kermit's printable
/// header range. Too short to hold a header counts as invalid.
fn header_in_printable_range(bytes: &[u8]) -> bool {
    bytes.len() >= 3 && bytes[..3].iter().all(|b| KERMIT_PRINTABLE.contains(b))
}

/// How the engine terminated a file, for [`KermitIo::close`]'s deletion policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseKind {
    /// Normal end of file.
    Eof,
    /// Transfer broken off (interrupt packet or similar).
    Break,
    /// Stopped mid-`Data` packet: a genuine partial file.
    Data,
}

/// Whether `raw` (pre-unescape) contains an `IAC <cmd>` that isn't one of the
/// expected BINARY-option negotiation replies, signalling the peer left
/// BINARY mode mid-packet.
fn peer_left_binary_mode(raw: &[u8]) -> bool {
    let mut i = 0;
    while i < raw.len() {
        if raw[i] == command::IAC {
            match raw.get(i + 1) {
                Some(&command::IAC) => i += 2,
                Some(&cmd) if is_binary_negotiation(cmd) => i += 3,
                Some(_) => return true,
                None => return false,
            }
        } else {
            i += 1;
        }
    }
    false
}

fn is_binary_negotiation(cmd: u8) -> bool {
    matches!(
        cmd,
        command::WILL | command::WONT | command::DO | command::DONT
    )
}

/// Resolve the destination path for a received file under `dir`.
#[must_use]
pub fn dest_path(dir: &Path, filename: &str) -> PathBuf {
    dir.join(filename)
}

/// Stands in for the packet-level engine: the state machine that drives
/// SOH/LEN/SEQ/TYPE framing, retries, and checksum selection is out of scope
/// here (a documented external black box). This implementation fails
/// immediately so wiring a real engine in later is a drop-in replacement of
/// one type parameter, not a restructuring.
#[derive(Default)]
pub struct UnimplementedKermitEngine;

impl KermitEngine for UnimplementedKermitEngine {
    async fn send(&mut self, _io: &mut KermitIo<'_>, _path: &Path) -> Result<TransferOutcome, Error> {
        Err(ErrorKind::Transfer(TransferError::EngineUnavailable).into())
    }

    async fn receive(
        &mut self,
        _io: &mut KermitIo<'_>,
        _dest_dir: &Path,
    ) -> Result<TransferOutcome, Error> {
        Err(ErrorKind::Transfer(TransferError::EngineUnavailable).into())
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use tokio::net::{TcpListener, TcpStream};

    use super::*;

    async fn loopback() -> (TelnetSession, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).await.unwrap();
        let (server, _) = listener.accept().await.unwrap();
        (TelnetSession::new(client), server)
    }

    #[tokio::test]
    async fn read_packet_from_pending_strips_soh_and_trailing_eom() {
        let (mut session, _peer) = loopback().await;
        let mut pending = PendingBuffer::default();
        pending.extend(&[SOH, b'0', b'1', b'D', b'h', b'i', command::CR]);
        let mut io = KermitIo::new(&mut session, &mut pending, false);

        let packet = io.read_packet(256).await.unwrap().unwrap();
        assert_eq!(packet, vec![b'0', b'1', b'D', b'h', b'i']);
    }

    #[tokio::test]
    async fn read_packet_drops_pending_buffer_with_bad_header() {
        let (mut session, _peer) = loopback().await;
        let mut pending = PendingBuffer::default();
        // LEN byte 0x00 is outside the printable Kermit range (0x20..=0x7E).
        pending.extend(&[SOH, 0x00, b'1', b'D', b'x']);
        let mut io = KermitIo::new(&mut session, &mut pending, false);

        let packet = io.read_packet(256).await.unwrap();
        assert!(packet.is_none());
        assert!(pending.is_empty());
    }

    #[tokio::test]
    async fn read_packet_from_socket_strips_soh_and_trailing_eom() {
        let (mut session, mut peer) = loopback().await;
        peer.write_all(&[SOH, b'0', b'1', b'D', b'h', b'i', command::LF])
            .await
            .unwrap();
        let mut pending = PendingBuffer::default();
        let mut io = KermitIo::new(&mut session, &mut pending, false);

        let packet = io.read_packet(256).await.unwrap().unwrap();
        assert_eq!(packet, vec![b'0', b'1', b'D', b'h', b'i']);
    }

    #[tokio::test]
    async fn write_packet_escapes_0xff_onto_the_wire() {
        let (mut session, mut peer) = loopback().await;
        let mut pending = PendingBuffer::default();
        let mut io = KermitIo::new(&mut session, &mut pending, true);

        io.write_packet(&[1, 0xFF, 2]).await.unwrap();

        let mut buf = [0u8; 16];
        let n = peer.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], &[1, 0xFF, 0xFF, 2]);
    }

    #[tokio::test]
    async fn note_nak_errors_after_max_consecutive_naks() {
        let (mut session, _peer) = loopback().await;
        let mut pending = PendingBuffer::default();
        let mut io = KermitIo::new(&mut session, &mut pending, false);
        io.max_naks = 3;

        io.note_nak().unwrap();
        io.note_nak().unwrap();
        let err = io.note_nak().unwrap_err();
        assert!(matches!(
            err.kind(),
            ErrorKind::Transfer(TransferError::TooManyNaks(3))
        ));

        io.note_ack();
        io.note_nak().unwrap();
    }

    #[tokio::test]
    async fn close_deletes_receive_side_partial_when_keep_partial_is_false() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("partial.bin");
        let (mut session, _peer) = loopback().await;
        let mut pending = PendingBuffer::default();
        let mut io = KermitIo::new(&mut session, &mut pending, false);

        io.open(&path, true).await.unwrap();
        io.write_bytes(b"half a file").await.unwrap();
        io.close(&path, CloseKind::Data).await.unwrap();

        assert!(!path.exists());
    }

    #[tokio::test]
    async fn close_keeps_file_on_eof_or_break() {
        let dir = tempfile::tempdir().unwrap();
        let (mut session, _peer) = loopback().await;
        let mut pending = PendingBuffer::default();
        let mut io = KermitIo::new(&mut session, &mut pending, false);

        for (name, kind) in [("eof.bin", CloseKind::Eof), ("break.bin", CloseKind::Break)] {
            let path = dir.path().join(name);
            io.open(&path, true).await.unwrap();
            io.write_bytes(b"complete enough").await.unwrap();
            io.close(&path, kind).await.unwrap();
            assert!(path.exists());
        }
    }

    #[tokio::test]
    async fn close_never_deletes_on_the_send_side() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("source.bin");
        tokio::fs::write(&path, b"source data").await.unwrap();

        let (mut session, _peer) = loopback().await;
        let mut pending = PendingBuffer::default();
        let mut io = KermitIo::new(&mut session, &mut pending, true);

        io.open(&path, false).await.unwrap();
        io.close(&path, CloseKind::Data).await.unwrap();

        assert!(path.exists());
    }

    #[tokio::test]
    async fn close_respects_keep_partial_flag() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("kept.bin");
        let (mut session, _peer) = loopback().await;
        let mut pending = PendingBuffer::default();
        let mut io = KermitIo::new(&mut session, &mut pending, false);
        io.set_keep_partial(true);

        io.open(&path, true).await.unwrap();
        io.write_bytes(b"partial").await.unwrap();
        io.close(&path, CloseKind::Data).await.unwrap();

        assert!(path.exists());
    }

    #[test]
    fn escape_then_unescape_roundtrips() {
        let data = [1u8, 0xFF, 2, 0xFF, 0xFF, 3];
        let escaped = escape(&data);
        let mut state = UnescapeState::default();
        let unescaped = unescape(&escaped, &mut state);
        assert_eq!(unescaped, data);
        assert!(!state.pending_ff);
    }

    #[test]
    fn unescape_resumes_trailing_ff_across_calls() {
        let mut state = UnescapeState::default();
        let first = unescape(&[1, 2, command::IAC], &mut state);
        assert_eq!(first, vec![1, 2]);
        assert!(state.pending_ff);

        let second = unescape(&[command::IAC, 3], &mut state);
        assert_eq!(second, vec![command::IAC, 3]);
        assert!(!state.pending_ff);
    }

    #[test]
    fn detects_peer_leaving_binary_mode() {
        let raw = [0x01, 0x02, command::IAC, command::WONT, 0, 0x03, 0x04];
        assert!(!peer_left_binary_mode(&raw[..4])); // WONT BINARY is expected
        let raw_bad = [0x01, command::IAC, 0xF1]; // IAC NOP mid binary stream
        assert!(peer_left_binary_mode(&raw_bad));
    }
}
