//! The Slave's software clock: a virtual wall clock built on a monotonic
//! counter, steered by the sync controller without ever touching the real
//! system clock. Two steering modes, both driven from the same PID state:
//! a coarse step for large offsets, and continuous rate discipline
//! (proportional/integral/derivative) otherwise.
//!
//! All mutable state — the wall/monotonic anchors, the rate adjustment, and
//! the PID state — lives behind one lock so every reader sees a single
//! consistent snapshot; there is no way to observe a torn combination of
//! old rate and new step offset.

use chrono::{DateTime, Local};
use std::sync::Mutex;
use std::time::Instant;

use crate::config::PidConfig;

struct Inner {
    init_wall: f64,
    init_mono: Instant,
    step_offset: f64,
    rate_adjustment: f64,
    integral: f64,
    prev_error: f64,
    observed_offset: f64,
}

pub struct SoftwareClock {
    inner: Mutex<Inner>,
    pid: PidConfig,
}

impl SoftwareClock {
    pub fn new(pid: PidConfig) -> Self {
        Self::with_wall_time(now_wall_seconds(), pid)
    }

    pub fn with_wall_time(wall_seconds: f64, pid: PidConfig) -> Self {
        SoftwareClock {
            inner: Mutex::new(Inner {
                init_wall: wall_seconds,
                init_mono: Instant::now(),
                step_offset: 0.0,
                rate_adjustment: 0.0,
                integral: 0.0,
                prev_error: 0.0,
                observed_offset: 0.0,
            }),
            pid,
        }
    }

    /// Current virtual time, seconds since the Unix epoch.
    pub fn now(&self) -> f64 {
        let inner = self.inner.lock().unwrap();
        Self::now_locked(&inner)
    }

    fn now_locked(inner: &Inner) -> f64 {
        let elapsed = inner.init_mono.elapsed().as_secs_f64();
        inner.init_wall + inner.step_offset + elapsed * (1.0 + inner.rate_adjustment)
    }

    pub fn now_ms(&self) -> i64 {
        (self.now() * 1000.0) as i64
    }

    pub fn now_datetime(&self) -> DateTime<Local> {
        let secs = self.now();
        let nanos = ((secs.fract()) * 1e9).round() as u32;
        DateTime::from_timestamp(secs.trunc() as i64, nanos)
            .unwrap_or_else(|| DateTime::from_timestamp(0, 0).unwrap())
            .with_timezone(&Local)
    }

    pub fn time_string(&self, fmt: &str) -> String {
        self.now_datetime().format(fmt).to_string()
    }

    pub fn rate_adjustment(&self) -> f64 {
        self.inner.lock().unwrap().rate_adjustment
    }

    pub fn observed_offset(&self) -> f64 {
        self.inner.lock().unwrap().observed_offset
    }

    /// Shifts the virtual clock by `delta` seconds; callers pass `-offset`
    /// to correct for a measured offset. Zeroes all PID state; this is the
    /// only path that produces a discontinuity in `now()`.
    pub fn step(&self, delta_seconds: f64) {
        let mut inner = self.inner.lock().unwrap();
        inner.step_offset += delta_seconds;
        inner.rate_adjustment = 0.0;
        inner.integral = 0.0;
        inner.prev_error = 0.0;
        log::info!("software clock stepped by {delta_seconds:.6}s");
    }

    /// Run one PID cycle against a freshly filtered offset measurement.
    /// Positive `error` means the Slave is behind the Master and the rate
    /// should speed up.
    pub fn discipline(&self, error: f64) {
        let mut inner = self.inner.lock().unwrap();
        inner.observed_offset = error;

        // Sign-change reset prevents integral wind-up across a reversal.
        if inner.prev_error != 0.0 && inner.prev_error * error < 0.0 {
            log::info!(
                "pid sign change ({:.6} -> {:.6}), resetting integrator",
                inner.prev_error,
                error
            );
            inner.integral = 0.0;
        }

        let adjustment = if error.abs() > self.pid.coarse_pid_threshold_s {
            inner.integral = 0.0;
            let saturated = error.signum() * self.pid.max_rate_adjustment;
            log::info!("coarse pid: |error|={:.6}s, rate={:.6}", error.abs(), saturated);
            saturated
        } else {
            inner.integral = (inner.integral + error)
                .clamp(-self.pid.integral_bound, self.pid.integral_bound);
            let derivative = error - inner.prev_error;
            let u = self.pid.kp * error + self.pid.ki * inner.integral + self.pid.kd * derivative;
            let clamped = u.clamp(-self.pid.max_rate_adjustment, self.pid.max_rate_adjustment);
            log::debug!(
                "pid: error={:.9} P={:.9} I={:.9} D={:.9} rate={:.9}",
                error,
                self.pid.kp * error,
                self.pid.ki * inner.integral,
                self.pid.kd * derivative,
                clamped
            );
            clamped
        };

        inner.rate_adjustment = adjustment;
        inner.prev_error = error;
    }
}

fn now_wall_seconds() -> f64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_secs_f64()
}
