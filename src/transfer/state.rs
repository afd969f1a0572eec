use std::time::Instant;

use crate::telnet::option::Snapshot;

/// The protocol (and direction) currently armed, if any.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    None,
    KermitSend,
    KermitReceive,
    ZmodemSend,
    ZmodemReceive,
    XmodemSend,
    XmodemReceive,
    YmodemSend,
    YmodemReceive,
}

impl Protocol {
    #[must_use]
    pub fn is_embedded_kermit(self) -> bool {
        matches!(self, Protocol::KermitSend | Protocol::KermitReceive)
    }

    #[must_use]
    pub fn is_send(self) -> bool {
        matches!(
            self,
            Protocol::KermitSend
                | Protocol::ZmodemSend
                | Protocol::XmodemSend
                | Protocol::YmodemSend
        )
    }
}

/// Transfer bookkeeping, lent to the coordinator for the duration of a
/// single armed transfer. `active` and `protocol` always agree: active iff
/// `protocol != Protocol::None`.
pub struct TransferState {
    active: bool,
    protocol: Protocol,
    start_time: Instant,
    last_data_time: Instant,
    pub bytes_transferred: u64,
    pub total_bytes: Option<u64>,
    pub filename: Option<String>,
    saved_options: Option<Snapshot>,
}

impl Default for TransferState {
    fn default() -> Self {
        let now = Instant::now();
        Self {
            active: false,
            protocol: Protocol::None,
            start_time: now,
            last_data_time: now,
            bytes_transferred: 0,
            total_bytes: None,
            filename: None,
            saved_options: None,
        }
    }
}

impl TransferState {
    #[must_use]
    pub fn active(&self) -> bool {
        self.active
    }

    #[must_use]
    pub fn protocol(&self) -> Protocol {
        self.protocol
    }

    #[must_use]
    pub fn saved_options(&self) -> Option<Snapshot> {
        self.saved_options
    }

    #[must_use]
    pub fn elapsed(&self) -> std::time::Duration {
        self.start_time.elapsed()
    }

    #[must_use]
    pub fn idle(&self) -> std::time::Duration {
        self.last_data_time.elapsed()
    }

    pub fn note_data(&mut self) {
        self.last_data_time = Instant::now();
    }

    /// Arm the state machine for `protocol`, snapshotting the pre-transfer
    /// Telnet negotiation flags for later restoration.
    pub fn arm(&mut self, protocol: Protocol, saved_options: Snapshot, filename: Option<String>) {
        debug_assert!(protocol != Protocol::None);
        let now = Instant::now();
        self.active = true;
        self.protocol = protocol;
        self.start_time = now;
        self.last_data_time = now;
        self.bytes_transferred = 0;
        self.total_bytes = None;
        self.filename = filename;
        self.saved_options = Some(saved_options);
    }

    /// Clear all transfer state. Callers must have already restored the
    /// saved Telnet options and reaped any child before calling this.
    pub fn disarm(&mut self) {
        *self = Self::default();
    }
}

/// A small bounded handoff slot: bytes the Telnet engine decoded during
/// binary-mode negotiation but that the Kermit adapter hasn't yet consumed.
#[derive(Default)]
pub struct PendingBuffer(Vec<u8>);

impl PendingBuffer {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn extend(&mut self, bytes: &[u8]) {
        self.0.extend_from_slice(bytes);
    }

    /// Drain and return the buffered bytes, leaving it empty.
    pub fn take(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.0)
    }

    pub fn clear(&mut self) {
        self.0.clear();
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn arm_disarm_invariant() {
        let mut state = TransferState::default();
        assert!(!state.active());
        assert_eq!(state.protocol(), Protocol::None);

        state.arm(Protocol::ZmodemReceive, Snapshot::default(), Some("f.bin".into()));
        assert!(state.active());
        assert_eq!(state.protocol(), Protocol::ZmodemReceive);

        state.disarm();
        assert!(!state.active());
        assert_eq!(state.protocol(), Protocol::None);
    }

    #[test]
    fn pending_buffer_take_clears() {
        let mut buf = PendingBuffer::default();
        buf.extend(&[1, 2, 3]);
        assert!(!buf.is_empty());
        assert_eq!(buf.take(), vec![1, 2, 3]);
        assert!(buf.is_empty());
    }
}
