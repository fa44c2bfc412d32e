use std::time::Duration;

/// Countdown used for grid expiry. Resetting restarts it with a new interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExpiryTimer {
    interval: Duration,
    remaining: Duration,
}

impl ExpiryTimer {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            remaining: interval,
        }
    }

    pub fn update(&mut self, diff: Duration) {
        self.remaining = self.remaining.saturating_sub(diff);
    }

    pub fn passed(&self) -> bool {
        self.remaining.is_zero()
    }

    pub fn reset(&mut self, interval: Duration) {
        self.interval = interval;
        self.remaining = interval;
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn remaining(&self) -> Duration {
        self.remaining
    }
}

/// Rolling window of tick durations for instrumentation.
#[derive(Debug, Clone)]
pub struct TickTimer {
    history: Vec<Duration>,
    capacity: usize,
    index: usize,
    filled: bool,
}

impl TickTimer {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            history: vec![Duration::ZERO; capacity],
            capacity,
            index: 0,
            filled: false,
        }
    }

    pub fn record(&mut self, dt: Duration) {
        self.history[self.index] = dt;
        self.index = (self.index + 1) % self.capacity;
        if self.index == 0 {
            self.filled = true;
        }
    }

    fn recorded(&self) -> &[Duration] {
        &self.history[..self.count()]
    }

    pub fn average(&self) -> Duration {
        let samples = self.recorded();
        if samples.is_empty() {
            return Duration::ZERO;
        }
        samples.iter().sum::<Duration>() / samples.len() as u32
    }

    pub fn max(&self) -> Duration {
        self.recorded().iter().copied().max().unwrap_or(Duration::ZERO)
    }

    pub fn min(&self) -> Duration {
        self.recorded().iter().copied().min().unwrap_or(Duration::ZERO)
    }

    pub fn count(&self) -> usize {
        if self.filled {
            self.capacity
        } else {
            self.index
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expiry_counts_down_and_resets() {
        let mut timer = ExpiryTimer::new(Duration::from_secs(10));
        timer.update(Duration::from_secs(4));
        assert!(!timer.passed());
        assert_eq!(timer.remaining(), Duration::from_secs(6));
        timer.update(Duration::from_secs(7));
        assert!(timer.passed());

        timer.reset(Duration::from_secs(1));
        assert!(!timer.passed());
        assert_eq!(timer.interval(), Duration::from_secs(1));
    }

    #[test]
    fn tick_timer_tracks_history() {
        let mut timer = TickTimer::new(3);
        timer.record(Duration::from_millis(10));
        timer.record(Duration::from_millis(20));
        timer.record(Duration::from_millis(30));

        assert_eq!(timer.count(), 3);
        assert_eq!(timer.average(), Duration::from_millis(20));
        assert_eq!(timer.max(), Duration::from_millis(30));
        assert_eq!(timer.min(), Duration::from_millis(10));
    }

    #[test]
    fn tick_timer_wraps_around() {
        let mut timer = TickTimer::new(2);
        timer.record(Duration::from_millis(10));
        timer.record(Duration::from_millis(20));
        timer.record(Duration::from_millis(30));

        assert_eq!(timer.count(), 2);
        assert_eq!(timer.average(), Duration::from_millis(25));
    }

    #[test]
    fn empty_tick_timer_reports_zero() {
        let timer = TickTimer::new(4);
        assert_eq!(timer.average(), Duration::ZERO);
        assert_eq!(timer.max(), Duration::ZERO);
    }
}
