use std::time::{Duration, Instant};

use crate::detect::{Detector, Direction, Protocol};

const NAK: u8 = 0x15;
const TRIGGER_C: u8 = 0x43;
const TEXT_WINDOW: usize = 32;
const REPEAT_THRESHOLD: u32 = 3;
const REPEAT_WINDOW: Duration = Duration::from_secs(3);

/// Recognises XMODEM server banners and the repeated NAK/`C` handshake.
pub struct XmodemDetector {
    text_window: Vec<u8>,
    last_trigger: Option<u8>,
    repeat_count: u32,
    first_seen: Option<Instant>,
}

impl Default for XmodemDetector {
    fn default() -> Self {
        Self {
            text_window: Vec::new(),
            last_trigger: None,
            repeat_count: 0,
            first_seen: None,
        }
    }
}

impl Detector for XmodemDetector {
    fn protocol(&self) -> Protocol {
        Protocol::Xmodem
    }

    fn feed(&mut self, byte: u8) -> Option<Direction> {
        self.text_window.push(byte.to_ascii_lowercase());
        if self.text_window.len() > TEXT_WINDOW {
            self.text_window.remove(0);
        }
        if contains(&self.text_window, b"xmodem receive") || contains(&self.text_window, b"xmodem send")
        {
            self.reset();
            return Some(Direction::Receive);
        }

        if byte == NAK || byte == TRIGGER_C {
            let now = Instant::now();
            let expired = self
                .first_seen
                .is_some_and(|t| now.duration_since(t) > REPEAT_WINDOW);
            if self.last_trigger == Some(byte) && !expired {
                self.repeat_count += 1;
            } else {
                self.repeat_count = 1;
                self.first_seen = Some(now);
            }
            self.last_trigger = Some(byte);
            if self.repeat_count >= REPEAT_THRESHOLD {
                let direction = Direction::Send;
                self.reset_counters();
                return Some(direction);
            }
        } else if is_printable(byte) {
            self.reset_counters();
        }
        None
    }

    fn reset(&mut self) {
        self.text_window.clear();
        self.reset_counters();
    }
}

impl XmodemDetector {
    fn reset_counters(&mut self) {
        self.last_trigger = None;
        self.repeat_count = 0;
        self.first_seen = None;
    }
}

pub(crate) fn is_printable(byte: u8) -> bool {
    (0x20..0x7F).contains(&byte)
}

pub(crate) fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.windows(needle.len()).any(|w| w == needle)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fires_on_receive_banner_text() {
        let mut detector = XmodemDetector::default();
        let mut fired = None;
        for &b in b"please start XMODEM receive now" {
            if let Some(d) = detector.feed(b) {
                fired = Some(d);
            }
        }
        assert_eq!(fired, Some(Direction::Receive));
    }

    #[test]
    fn fires_on_repeated_nak() {
        let mut detector = XmodemDetector::default();
        let mut fired = None;
        for _ in 0..3 {
            fired = detector.feed(NAK);
        }
        assert_eq!(fired, Some(Direction::Send));
    }

    #[test]
    fn printable_byte_resets_repeat_counter() {
        let mut detector = XmodemDetector::default();
        detector.feed(NAK);
        detector.feed(NAK);
        detector.feed(b'x');
        let fired = detector.feed(NAK);
        assert_eq!(fired, None);
    }
}
