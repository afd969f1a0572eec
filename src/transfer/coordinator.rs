//! Arms and drives a single file transfer, dispatching to either the
//! embedded Kermit engine or a child-process modem helper while the
//! surrounding Telnet session is put on hold.

use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;
use std::time::Duration;

use tokio::time::timeout;
use tracing::{info, warn};

use crate::config::Config;
use crate::detect::DetectorBank;
use crate::error::{Error, ErrorKind, TransferError};
use crate::telnet::session::TelnetSession;
use crate::transfer::child;
use crate::transfer::kermit::{KermitEngine, KermitIo, TransferOutcome};
use crate::transfer::state::{PendingBuffer, Protocol, TransferState};

/// Default ceiling on a whole transfer, regardless of progress.
pub const DEFAULT_GLOBAL_TIMEOUT: Duration = Duration::from_secs(300);
/// How long the peer has to confirm BINARY before the arm attempt gives up.
const BINARY_CONFIRM_TIMEOUT: Duration = Duration::from_secs(10);

/// Run `path` through the embedded Kermit engine as a send.
pub async fn run_kermit_send<E: KermitEngine>(
    session: &mut TelnetSession,
    detectors: &mut DetectorBank,
    state: &mut TransferState,
    engine: &mut E,
    path: &Path,
) -> Result<TransferOutcome, Error> {
    if state.active() {
        return Err(ErrorKind::Transfer(TransferError::AlreadyActive).into());
    }
    let snapshot = session.snapshot_options();
    state.arm(Protocol::KermitSend, snapshot, None);
    detectors.disable();

    let mut pending = PendingBuffer::default();
    let outcome = match arm_binary_mode(session, &mut pending).await {
        Ok(()) => {
            let mut io = KermitIo::new(session, &mut pending, true);
            engine.send(&mut io, path).await
        }
        Err(e) => Err(e),
    };

    finish_transfer(session, detectors, state, snapshot, outcome).await
}

/// Receive a file through the embedded Kermit engine into `dest_dir`.
pub async fn run_kermit_receive<E: KermitEngine>(
    session: &mut TelnetSession,
    detectors: &mut DetectorBank,
    state: &mut TransferState,
    engine: &mut E,
    dest_dir: &Path,
) -> Result<TransferOutcome, Error> {
    if state.active() {
        return Err(ErrorKind::Transfer(TransferError::AlreadyActive).into());
    }
    let snapshot = session.snapshot_options();
    state.arm(Protocol::KermitReceive, snapshot, None);
    detectors.disable();

    let mut pending = PendingBuffer::default();
    let outcome = match arm_binary_mode(session, &mut pending).await {
        Ok(()) => {
            let mut io = KermitIo::new(session, &mut pending, false);
            engine.receive(&mut io, dest_dir).await
        }
        Err(e) => Err(e),
    };

    finish_transfer(session, detectors, state, snapshot, outcome).await
}

/// Undo whatever the transfer's BINARY arming changed, re-enable the
/// auto-detectors, and clear the transfer bookkeeping -- regardless of
/// whether the transfer itself succeeded, so a failed transfer never leaves
/// the session wedged in BINARY mode.
async fn finish_transfer<T>(
    session: &mut TelnetSession,
    detectors: &mut DetectorBank,
    state: &mut TransferState,
    snapshot: crate::telnet::option::Snapshot,
    outcome: Result<T, Error>,
) -> Result<T, Error> {
    let restore_result = session.restore_state(snapshot).await;
    detectors.enable();
    state.disarm();
    let outcome = outcome?;
    restore_result?;
    Ok(outcome)
}

/// Run a child-process modem helper (XMODEM/YMODEM/ZMODEM) for `protocol`.
pub async fn run_helper(
    session: &mut TelnetSession,
    detectors: &mut DetectorBank,
    state: &mut TransferState,
    config: &Config,
    protocol: Protocol,
    args: &[String],
) -> Result<std::process::ExitStatus, Error> {
    if state.active() {
        return Err(ErrorKind::Transfer(TransferError::AlreadyActive).into());
    }

    let binary = helper_binary(config, protocol)?;

    let snapshot = session.snapshot_options();
    state.arm(protocol, snapshot, None);
    detectors.disable();

    let mut pending = PendingBuffer::default();
    let armed = arm_binary_mode(session, &mut pending).await;

    let result = match armed {
        Ok(()) => run_helper_inner(session, &mut pending, &binary, args).await,
        Err(e) => Err(e),
    };

    finish_transfer(session, detectors, state, snapshot, result).await
}

async fn run_helper_inner(
    session: &mut TelnetSession,
    pending: &mut PendingBuffer,
    binary: &Path,
    args: &[String],
) -> Result<std::process::ExitStatus, Error> {
    let spawned = child::spawn(binary, args).await?;
    let cancel = AtomicBool::new(false);
    child::relay(session, pending, spawned, &cancel, DEFAULT_GLOBAL_TIMEOUT).await
}

/// Resolve the preconfigured helper binary for `protocol`, per the
/// `send_zmodem`/`receive_zmodem` config keys. XMODEM and YMODEM share the
/// same two helpers as ZMODEM: the helper itself is told which framing to
/// speak via `args`.
fn helper_binary(config: &Config, protocol: Protocol) -> Result<PathBuf, Error> {
    let configured = if protocol.is_send() {
        config.send_zmodem.as_ref()
    } else {
        config.receive_zmodem.as_ref()
    };
    configured.cloned().ok_or_else(|| {
        let which = if protocol.is_send() { "send_zmodem" } else { "receive_zmodem" };
        ErrorKind::Transfer(TransferError::NoHelperConfigured(which)).into()
    })
}

/// Offer BINARY in both directions and wait up to [`BINARY_CONFIRM_TIMEOUT`]
/// for the peer to agree, stashing any ordinary data bytes the negotiation
/// exchange turns up along the way into `pending` rather than dropping them.
async fn arm_binary_mode(
    session: &mut TelnetSession,
    pending: &mut PendingBuffer,
) -> Result<(), Error> {
    session.request_binary_mode().await?;

    let deadline = tokio::time::Instant::now() + BINARY_CONFIRM_TIMEOUT;
    let mut buf = vec![0u8; 1024];
    while !session.binary_mode() {
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        if remaining.is_zero() {
            warn!("peer did not confirm BINARY mode in time, aborting transfer arm");
            return Err(ErrorKind::Transfer(TransferError::RemoteError(
                "peer declined BINARY mode".into(),
            ))
            .into());
        }
        let n = match timeout(remaining, session.read_into(&mut buf)).await {
            Ok(Ok(0)) => return Err(ErrorKind::Transport(crate::error::TransportError::Closed).into()),
            Ok(Ok(n)) => n,
            Ok(Err(e)) => return Err(ErrorKind::from(e).into()),
            Err(_) => continue,
        };
        let decoded = session.feed(&buf[..n]).await?;
        if !decoded.is_empty() {
            pending.extend(&decoded);
        }
    }
    info!("peer confirmed BINARY mode, transfer armed");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transfer::state::Protocol as P;

    #[test]
    fn helper_binary_reports_missing_config() {
        let config = Config::default();
        let err = helper_binary(&config, P::ZmodemSend).unwrap_err();
        assert!(matches!(
            err.kind(),
            ErrorKind::Transfer(TransferError::NoHelperConfigured("send_zmodem"))
        ));
    }

    #[test]
    fn helper_binary_resolves_configured_path() {
        let mut config = Config::default();
        config.receive_zmodem = Some(PathBuf::from("/usr/bin/rz"));
        let resolved = helper_binary(&config, P::ZmodemReceive).unwrap();
        assert_eq!(resolved, PathBuf::from("/usr/bin/rz"));
    }
}
