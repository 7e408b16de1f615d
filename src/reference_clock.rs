//! The Master's reference timescale: a user-adjustable, monotonic-backed
//! clock. `current()` is continuous across any adjustment — readers never
//! observe a torn snapshot because all three participating fields live
//! behind one lock.

use chrono::{Local, LocalResult, NaiveDateTime};
use std::sync::Mutex;
use std::time::Instant;

struct Inner {
    init_wall: f64,
    init_mono: Instant,
    step_offset: f64,
}

pub struct ReferenceTimescale {
    inner: Mutex<Inner>,
}

impl ReferenceTimescale {
    /// Anchor to the current system wall-clock time.
    pub fn new() -> Self {
        Self::with_wall_time(now_wall_seconds())
    }

    pub fn with_wall_time(wall_seconds: f64) -> Self {
        ReferenceTimescale {
            inner: Mutex::new(Inner {
                init_wall: wall_seconds,
                init_mono: Instant::now(),
                step_offset: 0.0,
            }),
        }
    }

    /// Current reference time, in seconds since the Unix epoch.
    pub fn current(&self) -> f64 {
        let inner = self.inner.lock().unwrap();
        let elapsed = inner.init_mono.elapsed().as_secs_f64();
        inner.init_wall + inner.step_offset + elapsed
    }

    /// Re-anchor to an absolute wall-clock instant. `init_mono` is re-read
    /// atomically under the same lock so `current()` stays continuous
    /// across the re-anchor.
    pub fn set_absolute(&self, wall_seconds: f64) {
        let mut inner = self.inner.lock().unwrap();
        inner.init_wall = wall_seconds;
        inner.step_offset = 0.0;
        inner.init_mono = Instant::now();
    }

    /// Parse `"YYYY-MM-DD HH:MM:SS"` and re-anchor to it. The string is
    /// interpreted in the host's local timezone, matching Python's
    /// `datetime.strptime(...).timestamp()` on a naive datetime (which the
    /// original's `set_reference_time` relies on). Returns `false` (refuses
    /// to run, per the error-handling design's "configuration error"
    /// category) on an unparseable string, or on a local time that doesn't
    /// exist (a spring-forward DST gap).
    pub fn set_absolute_str(&self, time_string: &str) -> bool {
        let Ok(dt) = NaiveDateTime::parse_from_str(time_string, "%Y-%m-%d %H:%M:%S") else {
            return false;
        };
        let local = match dt.and_local_timezone(Local) {
            LocalResult::Single(dt) => dt,
            LocalResult::Ambiguous(earliest, _latest) => earliest,
            LocalResult::None => return false,
        };
        self.set_absolute(local.timestamp() as f64);
        true
    }

    /// Add a signed delta to the accumulated step offset. Equivalent to
    /// `set_absolute` but simpler for a quick UI-driven bump. This is a
    /// step, not a slew, per the open question resolved in DESIGN.md: the
    /// Master is authoritative, so "quick bumps" change its time instantly.
    pub fn bump_relative(&self, delta_seconds: f64) {
        let mut inner = self.inner.lock().unwrap();
        inner.step_offset += delta_seconds;
    }
}

impl Default for ReferenceTimescale {
    fn default() -> Self {
        Self::new()
    }
}

fn now_wall_seconds() -> f64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_secs_f64()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::sleep;
    use std::time::Duration;

    #[test]
    fn current_advances_with_monotonic_time() {
        let ts = ReferenceTimescale::with_wall_time(1000.0);
        let a = ts.current();
        sleep(Duration::from_millis(20));
        let b = ts.current();
        assert!(b > a);
        assert!(b - a < 1.0);
    }

    #[test]
    fn bump_relative_shifts_current_time() {
        let ts = ReferenceTimescale::with_wall_time(1000.0);
        let before = ts.current();
        ts.bump_relative(50.0);
        let after = ts.current();
        assert!((after - before - 50.0).abs() < 0.05);
    }

    #[test]
    fn set_absolute_is_continuous_across_reanchor() {
        let ts = ReferenceTimescale::with_wall_time(1000.0);
        ts.set_absolute(5000.0);
        let t = ts.current();
        assert!((t - 5000.0).abs() < 0.05);
    }

    #[test]
    fn set_absolute_str_rejects_bad_format() {
        let ts = ReferenceTimescale::with_wall_time(1000.0);
        assert!(!ts.set_absolute_str("not a date"));
        // Unchanged on failure.
        assert!((ts.current() - 1000.0).abs() < 0.05);
    }

    #[test]
    fn set_absolute_str_accepts_documented_format() {
        let ts = ReferenceTimescale::with_wall_time(0.0);
        assert!(ts.set_absolute_str("2024-01-01 00:00:00"));

        // Pin the exact instant: the string is naive, so it must be read in
        // the host's local timezone, same as Python's
        // `datetime.strptime(...).timestamp()` on a naive datetime.
        let naive = chrono::NaiveDate::from_ymd_opt(2024, 1, 1)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap();
        let expected = match naive.and_local_timezone(Local) {
            LocalResult::Single(dt) => dt,
            LocalResult::Ambiguous(earliest, _latest) => earliest,
            LocalResult::None => panic!("2024-01-01 00:00:00 does not exist in local time"),
        }
        .timestamp() as f64;
        assert!((ts.current() - expected).abs() < 0.05);
    }

    #[test]
    fn negative_bump_can_decrease_time() {
        let ts = ReferenceTimescale::with_wall_time(1000.0);
        ts.bump_relative(-500.0);
        assert!((ts.current() - 500.0).abs() < 0.05);
    }
}
