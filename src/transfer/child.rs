//! Runs a child-process modem helper (XMODEM/YMODEM/ZMODEM) as one side of
//! the transfer relay, multiplexing its pipes against the Telnet socket.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, Command};
use tokio::time::sleep;
use tracing::{info, warn};

use crate::error::{Error, ErrorKind, TransferError};
use crate::telnet::command;
use crate::telnet::session::TelnetSession;
use crate::transfer::kermit::escape;
use crate::transfer::state::PendingBuffer;

/// Grace period between SIGTERM and SIGKILL when tearing down a helper.
const KILL_GRACE: Duration = Duration::from_secs(2);
/// How long the drain phase keeps flushing helper output after the peer
/// leaves BINARY mode.
const DRAIN_GRACE: Duration = Duration::from_secs(3);
/// Poll interval for the cancellation flag and timeouts.
const TICK: Duration = Duration::from_millis(200);

const READ_CHUNK: usize = 4096;

pub async fn spawn(program: &Path, args: &[String]) -> Result<Child, Error> {
    Command::new(program)
        .args(args)
        .stdin(std::process::Stdio::piped())
        .stdout(std::process::Stdio::piped())
        .stderr(std::process::Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| ErrorKind::Transfer(TransferError::Spawn(program.to_path_buf(), e)).into())
}

/// Relay bytes between the Telnet socket and an already-spawned helper until
/// the helper exits, the transfer is cancelled, or the global timeout fires.
pub async fn relay(
    session: &mut TelnetSession,
    pending: &mut PendingBuffer,
    mut child: Child,
    cancel: &AtomicBool,
    global_timeout: Duration,
) -> Result<std::process::ExitStatus, Error> {
    let mut stdin = child.stdin.take();
    let mut stdout = child.stdout.take();
    let mut stderr = child.stderr.take();

    let deadline = Instant::now() + global_timeout;
    let mut drain_deadline: Option<Instant> = None;

    // Flush anything handed off by the binary-mode negotiation step first.
    if !pending.is_empty() {
        let leftover = pending.take();
        if let Some(stdin) = stdin.as_mut() {
            stdin.write_all(&leftover).await.map_err(ErrorKind::from)?;
        }
    }

    let mut sock_buf = vec![0u8; READ_CHUNK];
    let mut out_buf = vec![0u8; READ_CHUNK];
    let mut err_buf = vec![0u8; READ_CHUNK];

    loop {
        if let Ok(Some(status)) = child.try_wait() {
            return Ok(status);
        }

        if cancel.load(Ordering::Relaxed) {
            terminate(&mut child).await;
            return Err(ErrorKind::Transfer(TransferError::Cancelled).into());
        }
        if Instant::now() >= deadline {
            terminate(&mut child).await;
            return Err(ErrorKind::Transfer(TransferError::GlobalTimeout(global_timeout)).into());
        }
        if let Some(dl) = drain_deadline {
            if Instant::now() >= dl {
                let status = child.wait().await.map_err(ErrorKind::from)?;
                return Ok(status);
            }
        }

        let draining = drain_deadline.is_some();

        tokio::select! {
            biased;

            () = sleep(TICK) => {}

            result = read_socket(session, &mut sock_buf), if !draining => {
                let raw = result?;
                if raw.is_empty() {
                    return Err(ErrorKind::Transport(crate::error::TransportError::Closed).into());
                }
                let (binary_chunk, left_binary) = feed_tracking_binary(session, &raw, pending).await?;

                if let Some(stdin) = stdin.as_mut() {
                    if !binary_chunk.is_empty() {
                        stdin.write_all(&binary_chunk).await.map_err(ErrorKind::from)?;
                    }
                }

                if left_binary {
                    info!("peer left BINARY mode mid-transfer, entering drain phase");
                    drain_deadline = Some(Instant::now() + DRAIN_GRACE);
                }
            }

            result = read_optional(&mut stdout, &mut out_buf) => {
                if let Some(n) = result? {
                    if n == 0 {
                        stdout = None;
                    } else {
                        session.send_raw(&escape(&out_buf[..n])).await?;
                    }
                }
            }

            result = read_optional(&mut stderr, &mut err_buf) => {
                if let Some(n) = result? {
                    if n == 0 {
                        stderr = None;
                    } else {
                        session.send_raw(&escape(&err_buf[..n])).await?;
                    }
                }
            }
        }
    }
}

async fn read_socket(session: &mut TelnetSession, buf: &mut [u8]) -> Result<Vec<u8>, Error> {
    let n = session.read_into(buf).await.map_err(ErrorKind::from)?;
    Ok(buf[..n].to_vec())
}

/// Decode `raw` one byte at a time, splitting the output at the exact point
/// BINARY mode drops mid-buffer: bytes decoded while still binary are
/// returned for the helper's stdin, anything decoded after the peer has
/// already left BINARY (ordinary text trailing a `WONT BINARY` in the same
/// read) is stashed in `pending` instead, never delivered into the binary
/// stream. Returns whether BINARY was left during this call.
async fn feed_tracking_binary(
    session: &mut TelnetSession,
    raw: &[u8],
    pending: &mut PendingBuffer,
) -> Result<(Vec<u8>, bool), Error> {
    let start_binary = session.binary_mode();
    let mut binary_chunk = Vec::with_capacity(raw.len());

    for &byte in raw {
        let in_binary = session.binary_mode();
        let decoded = session.feed(std::slice::from_ref(&byte)).await?;
        if decoded.is_empty() {
            continue;
        }
        if in_binary {
            binary_chunk.extend_from_slice(&decoded);
        } else {
            pending.extend(&decoded);
        }
    }

    let left_binary = start_binary && !session.binary_mode();
    Ok((binary_chunk, left_binary))
}

async fn read_optional<R: tokio::io::AsyncRead + Unpin>(
    reader: &mut Option<R>,
    buf: &mut [u8],
) -> Result<Option<usize>, Error> {
    match reader {
        Some(r) => {
            let n = r.read(buf).await.map_err(ErrorKind::from)?;
            Ok(Some(n))
        }
        None => std::future::pending::<Result<Option<usize>, Error>>().await,
    }
}

/// Reap the child, distinguishing a clean exit, a non-zero exit, and a
/// forced termination.
pub async fn terminate(child: &mut Child) {
    if let Some(pid) = child.id() {
        send_signal(pid, libc::SIGTERM);
    }
    if tokio::time::timeout(KILL_GRACE, child.wait()).await.is_err() {
        warn!("helper didn't exit after SIGTERM, sending SIGKILL");
        if let Some(pid) = child.id() {
            send_signal(pid, libc::SIGKILL);
        }
        let _ = child.wait().await;
    }
}

fn send_signal(pid: u32, signal: i32) {
    // Safety: `pid` comes from `Child::id`, a live process we own.
    unsafe {
        libc::kill(i32::try_from(pid).unwrap_or(i32::MAX), signal);
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use tokio::net::{TcpListener, TcpStream};

    use super::*;
    use crate::telnet::command::option as opt;

    async fn loopback_in_binary_mode() -> TelnetSession {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).await.unwrap();
        let (_server, _) = listener.accept().await.unwrap();
        let mut session = TelnetSession::new(client);
        session.option_state.entry_mut(opt::BINARY).set_local_enabled(true);
        session.option_state.entry_mut(opt::BINARY).set_remote_enabled(true);
        session
    }

    #[tokio::test]
    async fn spawn_rejects_missing_binary() {
        let err = spawn(Path::new("/nonexistent/otelnet-helper"), &[]).await;
        assert!(err.is_err());
    }

    /// A read spanning `<binary bytes> IAC WONT BINARY <text bytes>` must
    /// never let the trailing text reach the helper's binary stdin.
    #[tokio::test]
    async fn feed_tracking_binary_splits_at_the_mode_transition() {
        let mut session = loopback_in_binary_mode().await;
        let mut pending = PendingBuffer::default();

        let mut raw = vec![0x41, 0x42];
        raw.extend_from_slice(&[command::IAC, command::WONT, opt::BINARY]);
        raw.extend_from_slice(b"hi");

        let (binary_chunk, left_binary) =
            feed_tracking_binary(&mut session, &raw, &mut pending).await.unwrap();

        assert_eq!(binary_chunk, vec![0x41, 0x42]);
        assert!(left_binary);
        assert!(!session.binary_mode());
        assert_eq!(pending.take(), b"hi".to_vec());
    }

    #[tokio::test]
    async fn feed_tracking_binary_reports_no_transition_while_still_binary() {
        let mut session = loopback_in_binary_mode().await;
        let mut pending = PendingBuffer::default();

        let (binary_chunk, left_binary) =
            feed_tracking_binary(&mut session, &[0x01, 0x02], &mut pending).await.unwrap();

        assert_eq!(binary_chunk, vec![0x01, 0x02]);
        assert!(!left_binary);
        assert!(pending.is_empty());
    }
}
