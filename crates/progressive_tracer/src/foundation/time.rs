//! Time management utilities

use std::time::Instant;

/// Measures the time between simulation ticks
#[derive(Debug)]
pub struct Timer {
    last_tick: Instant,
    delta_time: f32,
    total_time: f32,
    tick_count: u64,
}

impl Default for Timer {
    fn default() -> Self {
        Self::new()
    }
}

impl Timer {
    /// Create a new timer starting now
    pub fn new() -> Self {
        Self {
            last_tick: Instant::now(),
            delta_time: 0.0,
            total_time: 0.0,
            tick_count: 0,
        }
    }

    /// Advance by the wall-clock time since the previous tick and return it in seconds
    pub fn tick(&mut self) -> f32 {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_tick).as_secs_f32();
        self.last_tick = now;
        self.advance(elapsed)
    }

    /// Advance by an explicit number of seconds
    pub fn advance(&mut self, seconds: f32) -> f32 {
        self.delta_time = seconds.max(0.0);
        self.total_time += self.delta_time;
        self.tick_count += 1;
        self.delta_time
    }

    /// Restart timing from now without touching the totals
    pub fn rebase(&mut self) {
        self.last_tick = Instant::now();
    }

    /// Seconds covered by the last tick
    pub fn delta_time(&self) -> f32 {
        self.delta_time
    }

    /// Seconds accumulated over all ticks
    pub fn total_time(&self) -> f32 {
        self.total_time
    }

    /// Number of ticks taken
    pub fn tick_count(&self) -> u64 {
        self.tick_count
    }

    /// Average ticks per second since creation
    pub fn average_rate(&self) -> f32 {
        if self.total_time > 0.0 {
            self.tick_count as f32 / self.total_time
        } else {
            0.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_advance_accumulates() {
        let mut timer = Timer::new();
        timer.advance(0.25);
        timer.advance(0.5);
        assert_relative_eq!(timer.delta_time(), 0.5);
        assert_relative_eq!(timer.total_time(), 0.75);
        assert_eq!(timer.tick_count(), 2);
        assert_relative_eq!(timer.average_rate(), 2.0 / 0.75);
    }

    #[test]
    fn test_negative_advance_is_clamped() {
        let mut timer = Timer::new();
        assert_eq!(timer.advance(-1.0), 0.0);
        assert_eq!(timer.total_time(), 0.0);
    }
}
