//! The byte-at-a-time IAC parser and RFC 855 negotiation sub-protocol.
//!
//! Split out from [`crate::telnet::session`] so the state machine reads as
//! its own unit, the way the option table and the parser are separate
//! concerns even though they both hang off [`TelnetSession`].

use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use crate::error::{Error, ProtocolError};
use crate::telnet::command::{self, option as opt, sub};
use crate::telnet::option::Snapshot;
use crate::telnet::session::{ParseState, TelnetSession, SB_BUFFER_CAP};

impl TelnetSession {
    /// Send the opening offers emitted immediately after connect.
    pub async fn send_opening_offers(&mut self) -> Result<(), Error> {
        self.send_negotiation(command::WILL, opt::BINARY).await?;
        self.send_negotiation(command::WILL, opt::SGA).await?;
        self.send_negotiation(command::DO, opt::SGA).await?;
        self.send_negotiation(command::DO, opt::ECHO).await?;
        self.send_negotiation(command::WILL, opt::TTYPE).await?;
        self.send_negotiation(command::WILL, opt::NAWS).await?;
        self.send_negotiation(command::WILL, opt::TSPEED).await?;
        self.send_negotiation(command::WILL, opt::ENVIRON).await?;
        self.send_negotiation(command::WILL, opt::LINEMODE).await?;
        Ok(())
    }

    /// Advance the parser over `input`, returning decoded data bytes. May
    /// write negotiation replies to the transport as a side effect.
    pub async fn feed(&mut self, input: &[u8]) -> Result<Vec<u8>, Error> {
        let mut decoded = Vec::with_capacity(input.len());
        for &byte in input {
            self.feed_byte(byte, &mut decoded).await?;
        }
        Ok(decoded)
    }

    async fn feed_byte(&mut self, byte: u8, decoded: &mut Vec<u8>) -> Result<(), Error> {
        match self.parse_state {
            ParseState::Data => match byte {
                command::IAC => self.parse_state = ParseState::Iac,
                command::CR if !self.binary_mode() => self.parse_state = ParseState::SeenCr,
                other => decoded.push(other),
            },
            ParseState::Iac => self.feed_iac(byte, decoded).await?,
            ParseState::Will => {
                self.handle_will(byte).await?;
                self.parse_state = ParseState::Data;
            }
            ParseState::Wont => {
                self.handle_wont(byte).await?;
                self.parse_state = ParseState::Data;
            }
            ParseState::Do => {
                self.handle_do(byte).await?;
                self.parse_state = ParseState::Data;
            }
            ParseState::Dont => {
                self.handle_dont(byte).await?;
                self.parse_state = ParseState::Data;
            }
            ParseState::Sb => match byte {
                command::IAC => self.parse_state = ParseState::SbIac,
                other => self.push_sb_byte(other),
            },
            ParseState::SbIac => match byte {
                command::SE => {
                    self.parse_state = ParseState::Data;
                    self.dispatch_subnegotiation().await?;
                }
                command::IAC => {
                    self.push_sb_byte(0xFF);
                    self.parse_state = ParseState::Sb;
                }
                other => {
                    // Tolerant: treat a stray non-SE, non-IAC byte here as data.
                    self.push_sb_byte(other);
                    self.parse_state = ParseState::Sb;
                }
            },
            ParseState::SeenCr => match byte {
                command::NUL => {
                    decoded.push(command::CR);
                    self.parse_state = ParseState::Data;
                }
                command::LF => {
                    decoded.push(command::CR);
                    decoded.push(command::LF);
                    self.parse_state = ParseState::Data;
                }
                command::IAC => {
                    decoded.push(command::CR);
                    self.parse_state = ParseState::Iac;
                }
                other => {
                    decoded.push(command::CR);
                    decoded.push(other);
                    self.parse_state = ParseState::Data;
                }
            },
        }
        Ok(())
    }

    async fn feed_iac(&mut self, byte: u8, decoded: &mut Vec<u8>) -> Result<(), Error> {
        match byte {
            command::IAC => {
                decoded.push(0xFF);
                self.parse_state = ParseState::Data;
            }
            command::WILL => self.parse_state = ParseState::Will,
            command::WONT => self.parse_state = ParseState::Wont,
            command::DO => self.parse_state = ParseState::Do,
            command::DONT => self.parse_state = ParseState::Dont,
            command::SB => {
                self.sb_buffer.clear();
                self.sb_overflowed = false;
                self.parse_state = ParseState::Sb;
            }
            command::GA | command::NOP => self.parse_state = ParseState::Data,
            command::AYT => {
                self.send_raw(b"\r\n[otelnet alive]\r\n").await?;
                self.parse_state = ParseState::Data;
            }
            command::IP | command::AO | command::BREAK | command::EC | command::EL
            | command::DM | command::EOR => {
                // Recorded by virtue of logging; no session-level action taken.
                debug!(cmd = byte, "received telnet control command");
                self.parse_state = ParseState::Data;
            }
            other => {
                warn!(
                    err = %ProtocolError::UnknownCommand(other),
                    "skipping unknown IAC command"
                );
                self.parse_state = ParseState::Data;
            }
        }
        Ok(())
    }

    fn push_sb_byte(&mut self, byte: u8) {
        if self.sb_buffer.len() < SB_BUFFER_CAP {
            self.sb_buffer.push(byte);
        } else {
            self.sb_overflowed = true;
        }
    }

    async fn dispatch_subnegotiation(&mut self) -> Result<(), Error> {
        if self.sb_overflowed {
            let opt = self.sb_buffer.first().copied().unwrap_or(0);
            warn!(err = %ProtocolError::SubnegotiationOverflow(opt), "dropping subnegotiation");
            self.sb_overflowed = false;
            self.sb_buffer.clear();
            return Ok(());
        }

        let Some(&option) = self.sb_buffer.first() else {
            return Ok(());
        };
        let payload = self.sb_buffer[1..].to_vec();

        match option {
            opt::TTYPE if payload.first() == Some(&sub::SEND) => {
                let name = self.next_terminal_type();
                let mut reply = vec![opt::TTYPE, sub::IS];
                reply.extend_from_slice(name.as_bytes());
                self.send_subnegotiation(&reply).await?;
            }
            opt::TSPEED if payload.first() == Some(&sub::SEND) => {
                let mut reply = vec![opt::TSPEED, sub::IS];
                reply.extend_from_slice(self.terminal_speed.clone().as_bytes());
                self.send_subnegotiation(&reply).await?;
            }
            opt::ENVIRON if payload.first() == Some(&sub::SEND) => {
                let mut reply = vec![opt::ENVIRON, sub::IS];
                for (name, value) in self.environ_pairs() {
                    reply.push(ENVIRON_VAR);
                    reply.extend_from_slice(name.as_bytes());
                    reply.push(ENVIRON_VALUE);
                    reply.extend_from_slice(value.as_bytes());
                }
                self.send_subnegotiation(&reply).await?;
            }
            opt::LINEMODE => self.handle_linemode_subnegotiation(&payload).await?,
            other => {
                warn!(
                    err = %ProtocolError::UnexpectedSubnegotiation(other),
                    "ignoring subnegotiation with unrecognised contents"
                );
            }
        }
        self.sb_buffer.clear();
        Ok(())
    }

    async fn handle_linemode_subnegotiation(&mut self, payload: &[u8]) -> Result<(), Error> {
        match payload.first() {
            Some(&sub::LINEMODE_MODE) => {
                if let Some(&bits) = payload.get(1) {
                    self.linemode_edit = bits & sub::LINEMODE_MODE_EDIT != 0;
                    self.linemode_trapsig = bits & sub::LINEMODE_MODE_TRAPSIG != 0;
                    self.recompute_linemode();
                    if bits & sub::LINEMODE_MODE_ACK != 0 {
                        let reply = vec![opt::LINEMODE, sub::LINEMODE_MODE, bits];
                        self.send_subnegotiation(&reply).await?;
                    }
                }
            }
            Some(&sub::LINEMODE_FORWARDMASK | &sub::LINEMODE_SLC) => {
                // Accepted and ignored.
            }
            _ => {}
        }
        Ok(())
    }

    async fn handle_will(&mut self, option: u8) -> Result<(), Error> {
        let entry = *self.option_state.entry(option);
        let acceptable = entry.remote_support();
        let enabled = entry.remote_enabled();
        if acceptable {
            if !enabled {
                self.option_state.entry_mut(option).set_remote_enabled(true);
                self.send_negotiation(command::DO, option).await?;
            }
        } else if !entry.remote_declined() {
            self.option_state.entry_mut(option).set_remote_declined();
            self.send_negotiation(command::DONT, option).await?;
        }
        self.recompute_linemode();
        Ok(())
    }

    async fn handle_wont(&mut self, option: u8) -> Result<(), Error> {
        if self.option_state.entry(option).remote_enabled() {
            self.option_state
                .entry_mut(option)
                .set_remote_enabled(false);
            self.send_negotiation(command::DONT, option).await?;
        }
        self.recompute_linemode();
        Ok(())
    }

    async fn handle_do(&mut self, option: u8) -> Result<(), Error> {
        let entry = *self.option_state.entry(option);
        let supported = entry.local_support();
        let enabled = entry.local_enabled();
        if supported {
            if !enabled {
                self.option_state.entry_mut(option).set_local_enabled(true);
                self.send_negotiation(command::WILL, option).await?;
                if option == opt::NAWS {
                    self.send_naws().await?;
                }
            }
        } else if !entry.local_declined() {
            self.option_state.entry_mut(option).set_local_declined();
            self.send_negotiation(command::WONT, option).await?;
        }
        self.recompute_linemode();
        Ok(())
    }

    async fn handle_dont(&mut self, option: u8) -> Result<(), Error> {
        if self.option_state.entry(option).local_enabled() {
            self.option_state.entry_mut(option).set_local_enabled(false);
            self.send_negotiation(command::WONT, option).await?;
        }
        self.recompute_linemode();
        Ok(())
    }

    fn recompute_linemode(&mut self) {
        let character_mode = self.echo_remote() && self.option_state.entry(opt::SGA).remote_enabled();
        let linemode_active = self.option_state.entry(opt::LINEMODE).local_enabled();
        let linemode_no_edit = linemode_active && !self.linemode_edit;
        self.linemode = !(character_mode || linemode_no_edit);
    }

    /// Emit a NAWS subnegotiation with the current window size, if accepted.
    pub async fn send_naws(&mut self) -> Result<(), Error> {
        if !self.naws_accepted() {
            return Ok(());
        }
        let mut payload = vec![opt::NAWS];
        payload.extend_from_slice(&self.term_width.to_be_bytes());
        payload.extend_from_slice(&self.term_height.to_be_bytes());
        self.send_subnegotiation(&payload).await
    }

    /// Update the locally tracked window size, emitting NAWS if it changed
    /// and the option is in effect.
    pub async fn resize(&mut self, width: u16, height: u16) -> Result<(), Error> {
        if width == self.term_width && height == self.term_height {
            return Ok(());
        }
        self.term_width = width;
        self.term_height = height;
        self.send_naws().await
    }

    async fn send_negotiation(&mut self, cmd: u8, option: u8) -> Result<(), Error> {
        self.send_raw(&[command::IAC, cmd, option]).await
    }

    async fn send_subnegotiation(&mut self, raw_payload: &[u8]) -> Result<(), Error> {
        let mut buf = vec![command::IAC, command::SB];
        buf.extend(escape_iac(raw_payload));
        buf.push(command::IAC);
        buf.push(command::SE);
        self.send_raw(&buf).await
    }

    /// Write bytes directly to the transport, bypassing escaping (callers
    /// already framed IAC-level content correctly).
    pub(crate) async fn send_raw(&mut self, bytes: &[u8]) -> Result<(), Error> {
        self.tcp
            .write_all(bytes)
            .await
            .map_err(crate::error::ErrorKind::from)?;
        Ok(())
    }

    /// Escape `plain` and write it as ordinary data (used for outbound
    /// keyboard input in non-transfer operation).
    pub async fn send_data(&mut self, plain: &[u8]) -> Result<(), Error> {
        let escaped = escape_iac(plain);
        self.send_raw(&escaped).await
    }

    /// Snapshot the seven negotiation flags a transfer needs to restore
    /// afterward.
    #[must_use]
    pub fn snapshot_options(&self) -> Snapshot {
        self.option_state.snapshot()
    }

    /// Offer BINARY in both directions, ahead of an embedded Kermit or
    /// child-helper transfer. A no-op for a direction already enabled.
    pub async fn request_binary_mode(&mut self) -> Result<(), Error> {
        if !self.option_state.entry(opt::BINARY).local_enabled() {
            self.send_negotiation(command::WILL, opt::BINARY).await?;
        }
        if !self.option_state.entry(opt::BINARY).remote_enabled() {
            self.send_negotiation(command::DO, opt::BINARY).await?;
        }
        Ok(())
    }

    /// Re-negotiate back to `snapshot`, emitting only the transitions needed
    /// to undo whatever the transfer changed.
    pub async fn restore_state(&mut self, snapshot: Snapshot) -> Result<(), Error> {
        let current = self.snapshot_options();

        if current.binary_local != snapshot.binary_local {
            let cmd = if snapshot.binary_local { command::WILL } else { command::WONT };
            self.send_negotiation(cmd, opt::BINARY).await?;
        }
        if current.binary_remote != snapshot.binary_remote {
            let cmd = if snapshot.binary_remote { command::DO } else { command::DONT };
            self.send_negotiation(cmd, opt::BINARY).await?;
        }
        if current.echo_local != snapshot.echo_local {
            let cmd = if snapshot.echo_local { command::WILL } else { command::WONT };
            self.send_negotiation(cmd, opt::ECHO).await?;
        }
        if current.echo_remote != snapshot.echo_remote {
            let cmd = if snapshot.echo_remote { command::DO } else { command::DONT };
            self.send_negotiation(cmd, opt::ECHO).await?;
        }
        if current.sga_local != snapshot.sga_local {
            let cmd = if snapshot.sga_local { command::WILL } else { command::WONT };
            self.send_negotiation(cmd, opt::SGA).await?;
        }
        if current.sga_remote != snapshot.sga_remote {
            let cmd = if snapshot.sga_remote { command::DO } else { command::DONT };
            self.send_negotiation(cmd, opt::SGA).await?;
        }
        if current.linemode_active != snapshot.linemode_active {
            let cmd = if snapshot.linemode_active { command::WILL } else { command::WONT };
            self.send_negotiation(cmd, opt::LINEMODE).await?;
        }

        self.option_state.entry_mut(opt::BINARY).set_local_enabled(snapshot.binary_local);
        self.option_state.entry_mut(opt::BINARY).set_remote_enabled(snapshot.binary_remote);
        self.option_state.entry_mut(opt::ECHO).set_local_enabled(snapshot.echo_local);
        self.option_state.entry_mut(opt::ECHO).set_remote_enabled(snapshot.echo_remote);
        self.option_state.entry_mut(opt::SGA).set_local_enabled(snapshot.sga_local);
        self.option_state.entry_mut(opt::SGA).set_remote_enabled(snapshot.sga_remote);
        self.option_state.entry_mut(opt::LINEMODE).set_local_enabled(snapshot.linemode_active);
        self.recompute_linemode();
        Ok(())
    }
}

const ENVIRON_VAR: u8 = 0;
const ENVIRON_VALUE: u8 = 1;

/// Double every `0xFF` byte so the result is safe to place on the wire
/// outside of a negotiation command.
#[must_use]
pub fn escape_iac(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len());
    for &byte in data {
        out.push(byte);
        if byte == command::IAC {
            out.push(command::IAC);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn escape_iac_doubles_0xff() {
        assert_eq!(escape_iac(&[1, 255, 2]), vec![1, 255, 255, 2]);
    }

    #[test]
    fn escape_iac_expansion_bound() {
        let data = [0u8, 255, 255, 3, 255];
        let escaped = escape_iac(&data);
        let count = data.iter().filter(|&&b| b == 0xFF).count();
        assert_eq!(escaped.len(), data.len() + count);
    }
}
