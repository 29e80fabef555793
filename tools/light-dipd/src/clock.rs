use chrono::{DateTime, Local};
use lightdip_control::Clock;
use std::time::{Duration, Instant};

/// Milliseconds since process start.
#[derive(Clone, Copy, Debug)]
pub struct MonotonicClock {
    start: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    /// Sub-millisecond reading for sample timing.
    pub fn elapsed_ms_f64(&self) -> f64 {
        self.start.elapsed().as_secs_f64() * 1_000.0
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now_ms(&self) -> u64 {
        self.start.elapsed().as_millis() as u64
    }

    fn sleep_ms(&self, duration_ms: u64) {
        std::thread::sleep(Duration::from_millis(duration_ms));
    }
}

/// Wall-clock stamp for host-side output.
pub fn wall_iso(now: DateTime<Local>) -> String {
    now.to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn monotonic_and_sleeps() {
        let clock = MonotonicClock::new();
        let a = clock.now_ms();
        clock.sleep_ms(5);
        let b = clock.now_ms();
        assert!(b >= a + 5);
        assert!(clock.elapsed_ms_f64() >= 5.0);
    }
}
