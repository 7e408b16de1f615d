//! Slave-side driver thread: turns periodic bursts into either a clock step
//! or a PID discipline call, and tracks the {STOPPED, SYNCING, SYNCHRONIZED,
//! ERROR} state machine that the monitor mirrors for observers.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::config::WireConfig;
use crate::software_clock::SoftwareClock;
use crate::status::SyncStatus;
use crate::sync_client::{ClientTransport, SyncClient};
use crate::sync_monitor::SyncMonitor;

/// Sleep slice used while waiting out `sync_interval_s`, so `stop()` is
/// responsive regardless of how long the configured interval is.
const SLEEP_SLICE: Duration = Duration::from_millis(500);

/// Consecutive burst failures before the controller reports ERROR.
const FAILURE_THRESHOLD: u32 = 3;

pub struct SyncController {
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl SyncController {
    /// Spawn the driver thread. `client` and `clock` are consumed by the
    /// thread; `monitor` is shared with whatever reads status externally.
    pub fn spawn<T: ClientTransport + Send + 'static>(
        mut client: SyncClient<T>,
        clock: Arc<SoftwareClock>,
        monitor: Arc<SyncMonitor>,
        wire: WireConfig,
        step_threshold_s: f64,
    ) -> Self {
        let running = Arc::new(AtomicBool::new(true));
        let thread_running = running.clone();

        let handle = thread::Builder::new()
            .name("sync-controller".into())
            .spawn(move || {
                run_loop(
                    &mut client,
                    &clock,
                    &monitor,
                    &wire,
                    step_threshold_s,
                    &thread_running,
                );
            })
            .expect("failed to spawn sync controller thread");

        SyncController {
            running,
            handle: Some(handle),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Signal the driver thread to stop and join it. Bounded by the sleep
    /// slice plus whatever burst round is currently in flight.
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for SyncController {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run_loop<T: ClientTransport>(
    client: &mut SyncClient<T>,
    clock: &SoftwareClock,
    monitor: &SyncMonitor,
    wire: &WireConfig,
    step_threshold_s: f64,
    running: &AtomicBool,
) {
    let mut status = SyncStatus::Stopped;
    let mut consecutive_failures: u32 = 0;

    while running.load(Ordering::SeqCst) {
        let old_status = status;
        status = SyncStatus::Syncing;
        monitor.set_sync_status(status);

        match client.burst(wire.rounds_per_sync, clock) {
            None => {
                consecutive_failures += 1;
                log::warn!("burst failed ({consecutive_failures} consecutive)");
                if consecutive_failures >= FAILURE_THRESHOLD {
                    status = SyncStatus::Error;
                    monitor.set_master_online(false);
                } else if old_status == SyncStatus::Synchronized {
                    status = SyncStatus::Synchronized;
                } else {
                    status = SyncStatus::Error;
                }
                monitor.set_sync_status(status);
            }
            Some(sample) => {
                consecutive_failures = 0;
                if sample.offset.abs() > step_threshold_s {
                    clock.step(-sample.offset);
                    log::info!("offset {:.3}s exceeds step threshold, stepped clock", sample.offset);
                } else {
                    clock.discipline(sample.offset);
                }
                monitor.record(clock.now_ms(), sample.offset, sample.delay);
                monitor.set_master_online(true);
                status = SyncStatus::Synchronized;
                monitor.set_sync_status(status);
                log::info!("sync ok: offset={:.9} delay={:.9}", sample.offset, sample.delay);
            }
        }

        sleep_in_slices(wire.sync_interval_s, running);
    }

    monitor.set_sync_status(SyncStatus::Stopped);
}

fn sleep_in_slices(total_seconds: f64, running: &AtomicBool) {
    let total = Duration::from_secs_f64(total_seconds.max(0.0));
    let mut slept = Duration::ZERO;
    while slept < total {
        if !running.load(Ordering::SeqCst) {
            return;
        }
        let remaining = total - slept;
        let slice = remaining.min(SLEEP_SLICE);
        thread::sleep(slice);
        slept += slice;
    }
}
