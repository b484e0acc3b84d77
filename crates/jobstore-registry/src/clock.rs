//! Clock sources.
//!
//! The registry keeps run windows on a monotonic "elapsed" clock and only
//! converts to wall-clock time when writing the snapshot file.

use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;

/// Source of monotonic and wall-clock time.
pub trait Clock: Send + Sync {
    /// Time elapsed on a clock that never jumps.
    fn elapsed_now(&self) -> Duration;

    /// Calendar time.
    fn wall_now(&self) -> DateTime<Utc>;

    /// Read both clocks together.
    fn read(&self) -> ClockReading {
        ClockReading {
            elapsed: self.elapsed_now(),
            wall_ms: self.wall_now().timestamp_millis(),
        }
    }
}

/// A pair of clock values taken at the same moment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClockReading {
    pub elapsed: Duration,
    pub wall_ms: i64,
}

impl ClockReading {
    /// Wall-clock millis corresponding to an elapsed point.
    pub fn to_wall_ms(&self, elapsed_point: Duration) -> i64 {
        let delta = millis_i64(elapsed_point).saturating_sub(millis_i64(self.elapsed));
        self.wall_ms.saturating_add(delta)
    }

    /// Elapsed point corresponding to wall-clock millis; past times map to now.
    pub fn to_elapsed(&self, wall_ms: i64) -> Duration {
        let ahead = wall_ms.saturating_sub(self.wall_ms).max(0);
        self.elapsed.saturating_add(Duration::from_millis(ahead as u64))
    }
}

fn millis_i64(d: Duration) -> i64 {
    i64::try_from(d.as_millis()).unwrap_or(i64::MAX)
}

/// Process clock: elapsed time counts from construction.
#[derive(Debug, Clone)]
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn elapsed_now(&self) -> Duration {
        self.origin.elapsed()
    }

    fn wall_now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Hand-driven clock for tests.
#[derive(Debug)]
pub struct ManualClock {
    state: Mutex<(Duration, DateTime<Utc>)>,
}

impl ManualClock {
    pub fn new(elapsed: Duration, wall: DateTime<Utc>) -> Self {
        Self {
            state: Mutex::new((elapsed, wall)),
        }
    }

    /// Move both clocks forward.
    pub fn advance(&self, by: Duration) {
        let mut state = self.state.lock();
        state.0 += by;
        if let Ok(delta) = chrono::Duration::from_std(by) {
            state.1 += delta;
        }
    }

    /// Simulate a reboot: elapsed restarts at `elapsed`, wall time moves on by `wall_gap`.
    pub fn reboot(&self, elapsed: Duration, wall_gap: Duration) {
        let mut state = self.state.lock();
        state.0 = elapsed;
        if let Ok(delta) = chrono::Duration::from_std(wall_gap) {
            state.1 += delta;
        }
    }

    /// Jump the wall clock without touching elapsed time.
    pub fn set_wall(&self, wall: DateTime<Utc>) {
        self.state.lock().1 = wall;
    }
}

impl Clock for ManualClock {
    fn elapsed_now(&self) -> Duration {
        self.state.lock().0
    }

    fn wall_now(&self) -> DateTime<Utc> {
        self.state.lock().1
    }
}
