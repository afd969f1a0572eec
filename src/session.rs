//! The top-level session event loop: multiplexes stdin, the TCP socket, and
//! window-change/cancellation signals, dispatching to the console-command
//! interpreter or the transfer coordinator as needed.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use tokio::io::{AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::signal::unix::{signal, SignalKind};
use tracing::{info, warn};

use crate::config::Config;
use crate::console::{self, Command};
use crate::detect::{self, DetectorBank};
use crate::error::{Error, ErrorKind};
use crate::telnet::command;
use crate::telnet::session::TelnetSession;
use crate::terminal::{self, TerminalGuard};
use crate::transfer::{self, Protocol as TransferProtocol, TransferState, UnimplementedKermitEngine};

/// The classic Telnet client escape character, `Ctrl-]`.
const TRIGGER_BYTE: u8 = 0x1D;

pub struct Session {
    telnet: TelnetSession,
    detectors: DetectorBank,
    transfer: TransferState,
    config: Config,
    console_mode: bool,
    console_line: String,
    cancel: Arc<AtomicBool>,
}

impl Session {
    #[must_use]
    pub fn new(telnet: TelnetSession, config: Config, cancel: Arc<AtomicBool>) -> Self {
        Self {
            telnet,
            detectors: DetectorBank::default(),
            transfer: TransferState::default(),
            config,
            console_mode: false,
            console_line: String::new(),
            cancel,
        }
    }

    /// Drive the session until the peer disconnects, the operator quits, or
    /// a signal requests shutdown.
    pub async fn run(mut self) -> Result<(), Error> {
        let _guard = TerminalGuard::enter()?;
        self.telnet.send_opening_offers().await?;

        let mut winch = signal(SignalKind::window_change())
            .map_err(|e| ErrorKind::Terminal(format!("installing SIGWINCH handler: {e}")))?;
        let mut sigint = signal(SignalKind::interrupt())
            .map_err(|e| ErrorKind::Terminal(format!("installing SIGINT handler: {e}")))?;
        let mut sigterm = signal(SignalKind::terminate())
            .map_err(|e| ErrorKind::Terminal(format!("installing SIGTERM handler: {e}")))?;

        let mut stdin = tokio::io::stdin();
        let mut stdout = tokio::io::stdout();

        let mut last_size = terminal::current_size();
        self.telnet.resize(last_size.0, last_size.1).await?;

        let mut stdin_buf = [0u8; 1024];
        let mut tcp_buf = [0u8; 4096];

        loop {
            if self.cancel.load(Ordering::Relaxed) {
                info!("shutdown requested, exiting session loop");
                break;
            }

            tokio::select! {
                biased;

                _ = winch.recv() => {
                    let size = terminal::current_size();
                    if size != last_size {
                        last_size = size;
                        self.telnet.resize(size.0, size.1).await?;
                    }
                }

                _ = sigint.recv() => {
                    self.cancel.store(true, Ordering::Relaxed);
                }

                _ = sigterm.recv() => {
                    self.cancel.store(true, Ordering::Relaxed);
                }

                result = stdin.read(&mut stdin_buf) => {
                    let n = result.map_err(ErrorKind::from)?;
                    if n == 0 {
                        info!("stdin closed, exiting session loop");
                        break;
                    }
                    self.handle_stdin(&stdin_buf[..n], &mut stdout).await?;
                }

                result = self.telnet.read_into(&mut tcp_buf) => {
                    let n = result.map_err(ErrorKind::from)?;
                    if n == 0 {
                        info!("peer closed the connection");
                        break;
                    }
                    self.handle_tcp(&tcp_buf[..n], &mut stdout).await?;
                }
            }
        }

        drop(self.telnet.shutdown().await);
        Ok(())
    }

    async fn handle_stdin(
        &mut self,
        bytes: &[u8],
        stdout: &mut (impl AsyncWrite + Unpin),
    ) -> Result<(), Error> {
        if self.console_mode {
            self.handle_console_input(bytes, stdout).await
        } else {
            self.handle_client_input(bytes, stdout).await
        }
    }

    async fn handle_client_input(
        &mut self,
        bytes: &[u8],
        stdout: &mut (impl AsyncWrite + Unpin),
    ) -> Result<(), Error> {
        if let Some(pos) = bytes.iter().position(|&b| b == TRIGGER_BYTE) {
            if pos > 0 {
                self.send_and_echo(&bytes[..pos], stdout).await?;
            }
            self.enter_console_mode(stdout).await?;
            return Ok(());
        }
        self.send_and_echo(bytes, stdout).await
    }

    async fn send_and_echo(
        &mut self,
        bytes: &[u8],
        stdout: &mut (impl AsyncWrite + Unpin),
    ) -> Result<(), Error> {
        self.telnet.send_data(bytes).await?;
        if !self.telnet.echo_remote() {
            local_echo(stdout, bytes).await?;
        }
        Ok(())
    }

    async fn enter_console_mode(&mut self, stdout: &mut (impl AsyncWrite + Unpin)) -> Result<(), Error> {
        self.console_mode = true;
        self.console_line.clear();
        stdout.write_all(b"\r\notelnet> ").await.map_err(ErrorKind::from)?;
        stdout.flush().await.map_err(ErrorKind::from)?;
        Ok(())
    }

    async fn handle_console_input(
        &mut self,
        bytes: &[u8],
        stdout: &mut (impl AsyncWrite + Unpin),
    ) -> Result<(), Error> {
        for &b in bytes {
            match b {
                command::CR | command::LF => {
                    stdout.write_all(b"\r\n").await.map_err(ErrorKind::from)?;
                    let line = std::mem::take(&mut self.console_line);
                    self.dispatch_console_line(&line, stdout).await?;
                    if self.console_mode {
                        stdout.write_all(b"otelnet> ").await.map_err(ErrorKind::from)?;
                    }
                }
                0x08 | 0x7F => {
                    if self.console_line.pop().is_some() {
                        stdout.write_all(b"\x08 \x08").await.map_err(ErrorKind::from)?;
                    }
                }
                other if (0x20..0x7F).contains(&other) => {
                    self.console_line.push(other as char);
                    stdout.write_all(&[other]).await.map_err(ErrorKind::from)?;
                }
                _ => {}
            }
        }
        stdout.flush().await.map_err(ErrorKind::from)?;
        Ok(())
    }

    async fn dispatch_console_line(
        &mut self,
        line: &str,
        stdout: &mut (impl AsyncWrite + Unpin),
    ) -> Result<(), Error> {
        match console::parse(line) {
            Command::Noop => self.console_mode = false,
            Command::Quit => {
                self.cancel.store(true, Ordering::Relaxed);
                self.console_mode = false;
            }
            Command::KermitSend(path) => {
                self.console_mode = false;
                self.run_kermit_send(&path).await;
            }
            Command::KermitReceive => {
                self.console_mode = false;
                self.run_kermit_receive().await;
            }
            Command::ZmodemSend(files) => {
                self.console_mode = false;
                self.run_helper(TransferProtocol::ZmodemSend, &files).await;
            }
            Command::ZmodemReceive => {
                self.console_mode = false;
                self.run_helper(TransferProtocol::ZmodemReceive, &[]).await;
            }
            Command::XmodemSend(path) => {
                self.console_mode = false;
                self.run_helper(TransferProtocol::XmodemSend, &[path]).await;
            }
            Command::XmodemReceive(path) => {
                self.console_mode = false;
                self.run_helper(TransferProtocol::XmodemReceive, &[path]).await;
            }
            Command::YmodemSend(files) => {
                self.console_mode = false;
                self.run_helper(TransferProtocol::YmodemSend, &files).await;
            }
            Command::YmodemReceive => {
                self.console_mode = false;
                self.run_helper(TransferProtocol::YmodemReceive, &[]).await;
            }
            Command::MissingArgument { command } => {
                let msg = format!("{command}: missing required argument\r\n");
                stdout.write_all(msg.as_bytes()).await.map_err(ErrorKind::from)?;
            }
            Command::Unknown(verb) => {
                let msg = format!("{verb}: unrecognised command\r\n");
                stdout.write_all(msg.as_bytes()).await.map_err(ErrorKind::from)?;
            }
        }
        Ok(())
    }

    async fn run_kermit_send(&mut self, path: &Path) {
        let mut engine = UnimplementedKermitEngine;
        let result = transfer::run_kermit_send(
            &mut self.telnet,
            &mut self.detectors,
            &mut self.transfer,
            &mut engine,
            path,
        )
        .await;
        report_transfer_outcome("skermit", result);
    }

    async fn run_kermit_receive(&mut self) {
        let dest_dir = PathBuf::from(".");
        let mut engine = UnimplementedKermitEngine;
        let result = transfer::run_kermit_receive(
            &mut self.telnet,
            &mut self.detectors,
            &mut self.transfer,
            &mut engine,
            &dest_dir,
        )
        .await;
        report_transfer_outcome("rkermit", result);
    }

    async fn run_helper(&mut self, protocol: TransferProtocol, files: &[PathBuf]) {
        let args = helper_args(protocol, files);
        let result = transfer::run_helper(
            &mut self.telnet,
            &mut self.detectors,
            &mut self.transfer,
            &self.config,
            protocol,
            &args,
        )
        .await;
        match result {
            Ok(status) if status.success() => info!("transfer helper exited successfully"),
            Ok(status) => warn!(%status, "transfer helper exited with a non-zero status"),
            Err(e) => warn!(err = %e, "transfer failed"),
        }
    }

    async fn handle_tcp(
        &mut self,
        raw: &[u8],
        stdout: &mut (impl AsyncWrite + Unpin),
    ) -> Result<(), Error> {
        let decoded = self.telnet.feed(raw).await?;
        if decoded.is_empty() {
            return Ok(());
        }
        if let Some((protocol, direction)) = self.detectors.feed(&decoded) {
            self.auto_arm(protocol, direction).await;
            return Ok(());
        }
        write_remote_output(stdout, &decoded, self.telnet.linemode()).await
    }

    async fn auto_arm(&mut self, protocol: detect::Protocol, direction: detect::Direction) {
        if direction == detect::Direction::Send {
            warn!(
                ?protocol,
                "detected a sender handshake but no file is queued; use the console sz/sx/sy command"
            );
            return;
        }
        let transfer_protocol = match protocol {
            detect::Protocol::Zmodem => TransferProtocol::ZmodemReceive,
            detect::Protocol::Xmodem => TransferProtocol::XmodemReceive,
            detect::Protocol::Ymodem => TransferProtocol::YmodemReceive,
        };
        let files = match transfer_protocol {
            TransferProtocol::XmodemReceive => vec![default_receive_name("xmodem")],
            _ => Vec::new(),
        };
        info!(?protocol, "auto-arming transfer from detected handshake");
        self.run_helper(transfer_protocol, &files).await;
    }
}

/// Echo keyboard bytes locally when the remote isn't doing it for us:
/// printable bytes pass through, `CR` becomes `CRLF`, backspace/DEL erase a
/// column.
async fn local_echo(stdout: &mut (impl AsyncWrite + Unpin), bytes: &[u8]) -> Result<(), Error> {
    let mut out = Vec::with_capacity(bytes.len());
    for &b in bytes {
        match b {
            command::CR => out.extend_from_slice(b"\r\n"),
            0x08 | 0x7F => out.extend_from_slice(b"\x08 \x08"),
            other => out.push(other),
        }
    }
    stdout.write_all(&out).await.map_err(ErrorKind::from)?;
    stdout.flush().await.map_err(Error::from)
}

/// Write decoded server bytes to the local terminal, translating line
/// endings in line mode and passing through unchanged in character mode.
async fn write_remote_output(
    stdout: &mut (impl AsyncWrite + Unpin),
    bytes: &[u8],
    linemode: bool,
) -> Result<(), Error> {
    if !linemode {
        stdout.write_all(bytes).await.map_err(ErrorKind::from)?;
    } else {
        let mut out = Vec::with_capacity(bytes.len());
        for &b in bytes {
            match b {
                command::LF | command::CR => out.extend_from_slice(b"\r\n"),
                other => out.push(other),
            }
        }
        stdout.write_all(&out).await.map_err(ErrorKind::from)?;
    }
    stdout.flush().await.map_err(Error::from)
}

/// Build the argument list a child helper needs to pick both its framing and
/// its file list, since one pair of configured binaries (`send_zmodem`,
/// `receive_zmodem`) serves all three modem protocols.
fn helper_args(protocol: TransferProtocol, files: &[PathBuf]) -> Vec<String> {
    let framing = match protocol {
        TransferProtocol::ZmodemSend | TransferProtocol::ZmodemReceive => "zmodem",
        TransferProtocol::XmodemSend | TransferProtocol::XmodemReceive => "xmodem",
        TransferProtocol::YmodemSend | TransferProtocol::YmodemReceive => "ymodem",
        TransferProtocol::KermitSend | TransferProtocol::KermitReceive | TransferProtocol::None => {
            unreachable!("helper_args is never called for the embedded kermit protocol")
        }
    };
    let mut args = vec!["--protocol".to_string(), framing.to_string()];
    args.extend(files.iter().map(|p| p.display().to_string()));
    args
}

/// A default destination filename for a protocol variant (XMODEM) that
/// carries no filename of its own on the wire.
fn default_receive_name(protocol: &str) -> PathBuf {
    let epoch = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    PathBuf::from(format!("{protocol}-{epoch}.bin"))
}

fn report_transfer_outcome(command: &str, result: Result<transfer::TransferOutcome, Error>) {
    match result {
        Ok(transfer::TransferOutcome::Success) => info!(command, "transfer completed"),
        Ok(transfer::TransferOutcome::SuccessWithWarning) => {
            warn!(command, "transfer completed with a warning");
        }
        Ok(transfer::TransferOutcome::Failure) => warn!(command, "transfer failed"),
        Err(e) => warn!(command, err = %e, "transfer failed"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn helper_args_carries_framing_and_files() {
        let args = helper_args(
            TransferProtocol::ZmodemSend,
            &[PathBuf::from("a.bin"), PathBuf::from("b.bin")],
        );
        assert_eq!(args, vec!["--protocol", "zmodem", "a.bin", "b.bin"]);
    }

    #[test]
    fn default_receive_name_is_unique_per_protocol_label() {
        let name = default_receive_name("xmodem");
        assert!(name.to_string_lossy().starts_with("xmodem-"));
    }
}
