use std::time::{Duration, Instant};

/// Adaptive frame pacing: sleep only for what is left of the frame budget
#[derive(Clone, Copy, Debug)]
pub struct FramePacer {
    interval: Duration,
    tick_started: Instant,
}

impl FramePacer {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            tick_started: Instant::now(),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Mark the start of a generation tick
    pub fn begin_tick(&mut self) {
        self.tick_started = Instant::now();
    }

    /// Time left in the budget after the tick's measured cost
    pub fn remaining(&self) -> Duration {
        self.delay_for(self.tick_started.elapsed())
    }

    /// `max(0, interval - cost)`
    pub fn delay_for(&self, cost: Duration) -> Duration {
        self.interval.saturating_sub(cost)
    }
}
