use crate::detect::{Detector, Direction, Protocol};

const FRAME_PATTERNS: &[&[u8]] = &[
    &[0x2A, 0x2A, 0x18, 0x42, 0x30, 0x30], // ZRQINIT
    &[0x2A, 0x2A, 0x18, 0x42, 0x30, 0x31], // ZRINIT
    &[0x2A, 0x2A, 0x18, 0x42, 0x30, 0x38], // ZFILE
];
const TEXT_PATTERNS: &[&[u8]] = &[b"rz\r", b"rz\r\n"];
const MAX_PATTERN_LEN: usize = 6;

/// Recognises ZMODEM frame headers and the legacy `rz` announcement.
#[derive(Default)]
pub struct ZmodemDetector {
    window: Vec<u8>,
}

impl Detector for ZmodemDetector {
    fn protocol(&self) -> Protocol {
        Protocol::Zmodem
    }

    fn feed(&mut self, byte: u8) -> Option<Direction> {
        self.window.push(byte);
        if self.window.len() > MAX_PATTERN_LEN {
            self.window.remove(0);
        }
        if FRAME_PATTERNS.iter().any(|p| self.window.ends_with(p))
            || TEXT_PATTERNS.iter().any(|p| self.window.ends_with(p))
        {
            return Some(Direction::Receive);
        }
        None
    }

    fn reset(&mut self) {
        self.window.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fires_on_zrqinit_frame() {
        let mut detector = ZmodemDetector::default();
        let frame = [0x2A, 0x2A, 0x18, 0x42, 0x30, 0x30];
        let mut fired = None;
        for &b in &frame {
            fired = detector.feed(b);
        }
        assert_eq!(fired, Some(Direction::Receive));
    }

    #[test]
    fn fires_within_larger_text_window() {
        let mut detector = ZmodemDetector::default();
        let mut bytes = b"some banner text ".to_vec();
        bytes.extend_from_slice(&[0x2A, 0x2A, 0x18, 0x42, 0x30, 0x30]);
        bytes.extend_from_slice(b" trailing");

        let mut fired = None;
        for &b in &bytes {
            if let Some(d) = detector.feed(b) {
                fired = Some(d);
            }
        }
        assert_eq!(fired, Some(Direction::Receive));
    }
}
