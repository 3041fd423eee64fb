//! Interrupt-driven timeout watchdog (spec §4.2).
//!
//! Kept as a standalone, clock-agnostic type so its boundary behavior (spec
//! §8 "a stream that never produces a frame for 3 seconds post-open causes
//! exactly one timeout abort") is unit-testable without a real ffmpeg input
//! context. [`crate::session::MediaSession`] wires an instance of this into
//! ffmpeg-next's interrupt callback and calls [`Watchdog::touch`] from the
//! read loop and around `open_input`.

use std::time::Duration;

/// Polls elapsed time against a 1s/3s (configurable) check/abort pair (spec
/// §4.2, §5 "Timeouts").
#[derive(Debug)]
pub struct Watchdog {
    check_interval: Duration,
    abort_after: Duration,
    start_time: Duration,
    last_checked: Duration,
}

impl Watchdog {
    pub fn new(check_interval: Duration, abort_after: Duration, now: Duration) -> Self {
        Self {
            check_interval,
            abort_after,
            start_time: now,
            last_checked: now,
        }
    }

    /// Feeds the watchdog a fresh "progress" timestamp (spec: "any I/O
    /// operation that may block sits between an update of `start_time` and
    /// the next"). Called before/after `open_input` and at the top of every
    /// read-loop iteration.
    pub fn touch(&mut self, now: Duration) {
        self.start_time = now;
    }

    /// The interrupt callback body: returns `true` ("abort") if `now` is
    /// more than `abort_after` past the last `touch`, checked no more often
    /// than every `check_interval`.
    pub fn poll(&mut self, now: Duration) -> bool {
        if now.saturating_sub(self.last_checked) < self.check_interval {
            return false;
        }
        self.last_checked = now;
        now.saturating_sub(self.start_time) > self.abort_after
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    #[test]
    fn stays_quiet_under_threshold() {
        let mut wd = Watchdog::new(ms(1000), ms(3000), ms(0));
        assert!(!wd.poll(ms(1000)));
        assert!(!wd.poll(ms(2000)));
        assert!(!wd.poll(ms(3000)));
    }

    #[test]
    fn aborts_exactly_once_past_threshold() {
        let mut wd = Watchdog::new(ms(1000), ms(3000), ms(0));
        assert!(!wd.poll(ms(1000)));
        assert!(!wd.poll(ms(2000)));
        assert!(!wd.poll(ms(3000)));
        assert!(wd.poll(ms(4000)));
    }

    #[test]
    fn touch_resets_the_clock() {
        let mut wd = Watchdog::new(ms(1000), ms(3000), ms(0));
        assert!(!wd.poll(ms(2000)));
        wd.touch(ms(2000));
        assert!(!wd.poll(ms(3000)));
        assert!(!wd.poll(ms(4000)));
        assert!(!wd.poll(ms(5000)));
        assert!(wd.poll(ms(6000)));
    }

    #[test]
    fn does_not_check_more_often_than_the_interval() {
        let mut wd = Watchdog::new(ms(1000), ms(3000), ms(0));
        // Huge elapsed time, but the check interval hasn't passed since the
        // last poll at t=0, so this poll must not even look.
        assert!(!wd.poll(ms(500)));
    }
}
