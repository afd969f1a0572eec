use std::time::{Duration, Instant};

use crate::detect::xmodem::{contains, is_printable};
use crate::detect::{Detector, Direction, Protocol};

const TRIGGER_C: u8 = 0x43;
const TEXT_WINDOW: usize = 32;
const REPEAT_THRESHOLD: u32 = 3;
const REPEAT_WINDOW: Duration = Duration::from_secs(3);

/// Recognises YMODEM server banners and the repeated `C` handshake. Unlike
/// XMODEM, only `C` triggers the sparse-character path, never `NAK`.
pub struct YmodemDetector {
    text_window: Vec<u8>,
    repeat_count: u32,
    first_seen: Option<Instant>,
}

impl Default for YmodemDetector {
    fn default() -> Self {
        Self {
            text_window: Vec::new(),
            repeat_count: 0,
            first_seen: None,
        }
    }
}

impl Detector for YmodemDetector {
    fn protocol(&self) -> Protocol {
        Protocol::Ymodem
    }

    fn feed(&mut self, byte: u8) -> Option<Direction> {
        self.text_window.push(byte.to_ascii_lowercase());
        if self.text_window.len() > TEXT_WINDOW {
            self.text_window.remove(0);
        }
        if contains(&self.text_window, b"ymodem receive") || contains(&self.text_window, b"ymodem send")
        {
            self.reset();
            return Some(Direction::Receive);
        }

        if byte == TRIGGER_C {
            let now = Instant::now();
            let expired = self
                .first_seen
                .is_some_and(|t| now.duration_since(t) > REPEAT_WINDOW);
            if expired {
                self.repeat_count = 1;
            } else {
                self.repeat_count += 1;
            }
            self.first_seen = Some(now);
            if self.repeat_count >= REPEAT_THRESHOLD {
                self.reset_counters();
                return Some(Direction::Send);
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

impl YmodemDetector {
    fn reset_counters(&mut self) {
        self.repeat_count = 0;
        self.first_seen = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fires_on_repeated_c_only() {
        let mut detector = YmodemDetector::default();
        let mut fired = None;
        for _ in 0..3 {
            fired = detector.feed(TRIGGER_C);
        }
        assert_eq!(fired, Some(Direction::Send));
    }

    #[test]
    fn nak_never_triggers() {
        let mut detector = YmodemDetector::default();
        let mut fired = None;
        for _ in 0..5 {
            fired = detector.feed(0x15);
        }
        assert_eq!(fired, None);
    }
}
