//! Pattern matchers that watch decoded server output for protocol-initiation
//! signatures and arm a transfer without operator action.

mod xmodem;
mod ymodem;
mod zmodem;

pub use xmodem::XmodemDetector;
pub use ymodem::YmodemDetector;
pub use zmodem::ZmodemDetector;

/// Which side of the transfer the detector's signature implies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// The peer is sending; we must receive.
    Receive,
    /// The peer is receiving; we must send.
    Send,
}

/// Which protocol a detector recognises.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    Zmodem,
    Xmodem,
    Ymodem,
}

/// A detector consumes decoded bytes one at a time and reports a direction
/// hint once its signature matches.
pub trait Detector: Send {
    fn protocol(&self) -> Protocol;
    fn feed(&mut self, byte: u8) -> Option<Direction>;
    fn reset(&mut self);
}

/// The set of detectors active during normal (non-transfer) operation.
pub struct DetectorBank {
    detectors: Vec<Box<dyn Detector>>,
    enabled: bool,
}

impl Default for DetectorBank {
    fn default() -> Self {
        Self {
            detectors: vec![
                Box::new(ZmodemDetector::default()),
                Box::new(XmodemDetector::default()),
                Box::new(YmodemDetector::default()),
            ],
            enabled: true,
        }
    }
}

impl DetectorBank {
    /// Feed a chunk of decoded bytes through every enabled detector,
    /// returning the first match (protocol, direction).
    pub fn feed(&mut self, bytes: &[u8]) -> Option<(Protocol, Direction)> {
        if !self.enabled {
            return None;
        }
        for &byte in bytes {
            for detector in &mut self.detectors {
                if let Some(direction) = detector.feed(byte) {
                    let protocol = detector.protocol();
                    detector.reset();
                    // A fired detector stays quiet until the coordinator
                    // re-enables the bank after the transfer completes.
                    self.enabled = false;
                    return Some((protocol, direction));
                }
            }
        }
        None
    }

    pub fn disable(&mut self) {
        self.enabled = false;
    }

    pub fn enable(&mut self) {
        self.enabled = true;
        for detector in &mut self.detectors {
            detector.reset();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_bank_never_matches() {
        let mut bank = DetectorBank::default();
        bank.disable();
        let frame = [0x2A, 0x2A, 0x18, 0x42, 0x30, 0x30];
        assert_eq!(bank.feed(&frame), None);
    }

    #[test]
    fn fires_exactly_once_per_enable_cycle() {
        let mut bank = DetectorBank::default();
        let frame = [0x2A, 0x2A, 0x18, 0x42, 0x30, 0x30];
        assert_eq!(
            bank.feed(&frame),
            Some((Protocol::Zmodem, Direction::Receive))
        );
        assert_eq!(bank.feed(&frame), None);

        bank.enable();
        assert_eq!(
            bank.feed(&frame),
            Some((Protocol::Zmodem, Direction::Receive))
        );
    }
}
