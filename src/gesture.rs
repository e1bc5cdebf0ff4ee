use std::collections::VecDeque;

use crate::config::{TAP_COUNT, TAP_WINDOW_MS};

/// Sliding-window multi-tap detector over monotonic millisecond timestamps
#[derive(Clone, Debug)]
pub struct TapDetector {
    taps: VecDeque<u64>,
    count: usize,
    window_ms: u64,
}

impl Default for TapDetector {
    fn default() -> Self {
        Self::new(TAP_COUNT, TAP_WINDOW_MS)
    }
}

impl TapDetector {
    pub fn new(count: usize, window_ms: u64) -> Self {
        Self {
            taps: VecDeque::with_capacity(count),
            count: count.max(1),
            window_ms,
        }
    }

    /// Record a tap; true when it completes `count` taps within the window.
    ///
    /// A completed gesture clears the history so a fourth tap starts over.
    pub fn register(&mut self, timestamp_ms: u64) -> bool {
        while let Some(&first) = self.taps.front() {
            if timestamp_ms.saturating_sub(first) > self.window_ms {
                self.taps.pop_front();
            } else {
                break;
            }
        }

        self.taps.push_back(timestamp_ms);
        if self.taps.len() >= self.count {
            self.taps.clear();
            return true;
        }
        false
    }

    pub fn reset(&mut self) {
        self.taps.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_triple_tap_within_window() {
        let mut taps = TapDetector::default();
        assert!(!taps.register(1_000));
        assert!(!taps.register(1_200));
        assert!(taps.register(1_700), "third tap inside 800ms fires");
    }

    #[test]
    fn test_slow_taps_do_not_fire() {
        let mut taps = TapDetector::default();
        assert!(!taps.register(0));
        assert!(!taps.register(500));
        assert!(!taps.register(1_000), "first tap expired");
        assert!(taps.register(1_100));
    }

    #[test]
    fn test_history_cleared_after_gesture() {
        let mut taps = TapDetector::default();
        taps.register(10);
        taps.register(20);
        assert!(taps.register(30));
        assert!(!taps.register(40), "fourth tap starts a new gesture");
    }
}
