//! Passive aggregator of synchronization history: bounded offset/delay
//! rings, derived metrics, and observer notifications. Owns none of the
//! clock steering — it only ever sees copies of what the controller
//! measured.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use crate::config::MonitorConfig;
use crate::observer::SyncObserver;
use crate::status::SyncStatus;

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Metrics {
    pub accuracy_ms: f64,
    pub stability_ms: f64,
    pub precision_ms: f64,
    pub avg_delay_ms: f64,
    pub sync_success_rate: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StatusSnapshot {
    pub master_online: bool,
    pub sync_status: SyncStatus,
    pub last_offset: f64,
    pub metrics: Metrics,
}

struct Inner {
    master_online: bool,
    sync_status: SyncStatus,
    last_offset: f64,
    last_record_at: Option<Instant>,
    offset_history: VecDeque<(i64, f64)>,
    delay_history: VecDeque<(i64, f64)>,
    total_attempts: u64,
    successful: u64,
    metrics: Metrics,
}

pub struct SyncMonitor {
    inner: Mutex<Inner>,
    observers: Vec<Box<dyn SyncObserver>>,
    chart_max_points: usize,
    sync_threshold_s: f64,
    offline_timeout: Duration,
}

impl SyncMonitor {
    pub fn new(config: MonitorConfig, observers: Vec<Box<dyn SyncObserver>>) -> Self {
        SyncMonitor {
            inner: Mutex::new(Inner {
                master_online: false,
                sync_status: SyncStatus::Stopped,
                last_offset: 0.0,
                last_record_at: None,
                offset_history: VecDeque::with_capacity(config.chart_max_points),
                delay_history: VecDeque::with_capacity(config.chart_max_points),
                total_attempts: 0,
                successful: 0,
                metrics: Metrics::default(),
            }),
            observers,
            chart_max_points: config.chart_max_points,
            sync_threshold_s: config.sync_threshold_s,
            offline_timeout: Duration::from_secs_f64(config.offline_timeout_s),
        }
    }

    /// Append one measurement, recompute derived metrics. Does not itself
    /// touch `sync_status` or `master_online` — those transitions are
    /// driven explicitly by the controller via [`Self::set_sync_status`]
    /// and [`Self::set_master_online`].
    pub fn record(&self, slave_ms: i64, offset: f64, delay: f64) {
        let mut inner = self.inner.lock().unwrap();
        inner.last_offset = offset;
        inner.last_record_at = Some(Instant::now());

        push_bounded(&mut inner.offset_history, (slave_ms, offset), self.chart_max_points);
        push_bounded(&mut inner.delay_history, (slave_ms, delay), self.chart_max_points);

        inner.total_attempts += 1;
        if offset.abs() < self.sync_threshold_s {
            inner.successful += 1;
        }

        recompute_metrics(&mut inner);
    }

    pub fn set_master_online(&self, online: bool) {
        let changed = {
            let mut inner = self.inner.lock().unwrap();
            if inner.master_online == online {
                false
            } else {
                inner.master_online = online;
                true
            }
        };
        if changed {
            log::info!("master {}", if online { "online" } else { "offline" });
            for observer in &self.observers {
                observer.on_master_status_changed(online);
            }
        }
    }

    pub fn set_sync_status(&self, status: SyncStatus) {
        let changed = {
            let mut inner = self.inner.lock().unwrap();
            if inner.sync_status == status {
                false
            } else {
                inner.sync_status = status;
                true
            }
        };
        if changed {
            log::info!("sync status -> {status}");
            for observer in &self.observers {
                observer.on_sync_status_changed(status);
            }
        }
    }

    /// Lazily checks the offline timeout against wall time elapsed since
    /// the last successful record, flipping and notifying on expiry.
    pub fn is_master_online(&self) -> bool {
        let expired = {
            let inner = self.inner.lock().unwrap();
            inner.master_online
                && inner
                    .last_record_at
                    .map(|at| at.elapsed() > self.offline_timeout)
                    .unwrap_or(false)
        };
        if expired {
            self.set_master_online(false);
        }
        self.inner.lock().unwrap().master_online
    }

    pub fn status_snapshot(&self) -> StatusSnapshot {
        let inner = self.inner.lock().unwrap();
        StatusSnapshot {
            master_online: inner.master_online,
            sync_status: inner.sync_status,
            last_offset: inner.last_offset,
            metrics: inner.metrics,
        }
    }

    pub fn offset_history(&self) -> Vec<(i64, f64)> {
        self.inner.lock().unwrap().offset_history.iter().copied().collect()
    }

    pub fn delay_history(&self) -> Vec<(i64, f64)> {
        self.inner.lock().unwrap().delay_history.iter().copied().collect()
    }

    /// Zeros attempt/success counters and the derived-metric snapshot.
    /// Deliberately leaves the history rings untouched.
    pub fn reset_metrics(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.total_attempts = 0;
        inner.successful = 0;
        inner.metrics = Metrics::default();
    }
}

fn push_bounded<T>(ring: &mut VecDeque<T>, value: T, cap: usize) {
    if ring.len() >= cap {
        ring.pop_front();
    }
    ring.push_back(value);
}

fn recompute_metrics(inner: &mut MutexGuard<'_, Inner>) {
    if inner.offset_history.len() < 2 {
        return;
    }
    let offsets_ms: Vec<f64> = inner.offset_history.iter().map(|(_, o)| o * 1000.0).collect();

    inner.metrics.accuracy_ms = offsets_ms.last().copied().unwrap_or(0.0).abs();

    inner.metrics.stability_ms = if offsets_ms.len() >= 3 {
        population_stdev(&offsets_ms)
    } else {
        0.0
    };

    inner.metrics.precision_ms = offsets_ms.iter().fold(0.0_f64, |acc, v| acc.max(v.abs()));

    if !inner.delay_history.is_empty() {
        let delays_ms: Vec<f64> = inner.delay_history.iter().map(|(_, d)| d * 1000.0).collect();
        inner.metrics.avg_delay_ms = delays_ms.iter().sum::<f64>() / delays_ms.len() as f64;
    }

    if inner.total_attempts > 0 {
        inner.metrics.sync_success_rate =
            (inner.successful as f64 / inner.total_attempts as f64) * 100.0;
    }
}

fn population_stdev(values: &[f64]) -> f64 {
    let mean = values.iter().sum::<f64>() / values.len() as f64;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / values.len() as f64;
    variance.sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct CountingObserver {
        master_events: Arc<AtomicUsize>,
        status_events: Arc<AtomicUsize>,
    }
    impl SyncObserver for CountingObserver {
        fn on_master_status_changed(&self, _online: bool) {
            self.master_events.fetch_add(1, Ordering::SeqCst);
        }
        fn on_sync_status_changed(&self, _status: SyncStatus) {
            self.status_events.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn monitor() -> SyncMonitor {
        SyncMonitor::new(MonitorConfig::default(), Vec::new())
    }

    #[test]
    fn record_populates_history_and_metrics() {
        let m = monitor();
        m.record(1000, 0.01, 0.005);
        m.record(2000, -0.02, 0.006);
        let snap = m.status_snapshot();
        assert!((snap.metrics.accuracy_ms - 20.0).abs() < 1e-9);
        assert_eq!(m.offset_history().len(), 2);
    }

    #[test]
    fn ring_capacity_bounded() {
        let mut cfg = MonitorConfig::default();
        cfg.chart_max_points = 3;
        let m = SyncMonitor::new(cfg, Vec::new());
        for i in 0..10 {
            m.record(i, 0.001 * i as f64, 0.001);
        }
        assert_eq!(m.offset_history().len(), 3);
        // Oldest entries evicted first.
        assert_eq!(m.offset_history().first().unwrap().0, 7);
    }

    #[test]
    fn success_rate_counts_every_record_call() {
        let mut cfg = MonitorConfig::default();
        cfg.sync_threshold_s = 0.001;
        let m = SyncMonitor::new(cfg, Vec::new());
        m.record(0, 0.0005, 0.0); // in sync
        m.record(1, 0.5, 0.0); // not in sync
        let snap = m.status_snapshot();
        assert!((snap.metrics.sync_success_rate - 50.0).abs() < 1e-9);
    }

    #[test]
    fn master_online_notifies_only_on_change() {
        let master_events = Arc::new(AtomicUsize::new(0));
        let status_events = Arc::new(AtomicUsize::new(0));
        let observer = CountingObserver {
            master_events: master_events.clone(),
            status_events: status_events.clone(),
        };
        let m = SyncMonitor::new(MonitorConfig::default(), vec![Box::new(observer)]);
        m.set_master_online(true);
        m.set_master_online(true);
        m.set_master_online(false);
        assert_eq!(master_events.load(Ordering::SeqCst), 2);
        assert_eq!(status_events.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn sync_status_notifies_only_on_change() {
        let master_events = Arc::new(AtomicUsize::new(0));
        let status_events = Arc::new(AtomicUsize::new(0));
        let observer = CountingObserver {
            master_events: master_events.clone(),
            status_events: status_events.clone(),
        };
        let m = SyncMonitor::new(MonitorConfig::default(), vec![Box::new(observer)]);
        m.set_sync_status(SyncStatus::Syncing);
        m.set_sync_status(SyncStatus::Syncing);
        m.set_sync_status(SyncStatus::Synchronized);
        assert_eq!(status_events.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn s6_offline_timeout_flips_and_notifies() {
        let master_events = Arc::new(AtomicUsize::new(0));
        let status_events = Arc::new(AtomicUsize::new(0));
        let observer = CountingObserver {
            master_events: master_events.clone(),
            status_events: status_events.clone(),
        };
        let mut cfg = MonitorConfig::default();
        cfg.offline_timeout_s = 0.01;
        let m = SyncMonitor::new(cfg, vec![Box::new(observer)]);
        m.record(0, 0.0, 0.0);
        m.set_master_online(true);
        std::thread::sleep(Duration::from_millis(30));
        assert!(!m.is_master_online());
        assert_eq!(master_events.load(Ordering::SeqCst), 2); // true then false
        assert!(!m.is_master_online()); // stays false on subsequent polls
    }

    #[test]
    fn reset_metrics_clears_counters_not_rings() {
        let m = monitor();
        m.record(0, 0.01, 0.01);
        m.record(1, 0.02, 0.02);
        m.reset_metrics();
        let snap = m.status_snapshot();
        assert_eq!(snap.metrics, Metrics::default());
        assert_eq!(m.offset_history().len(), 2);
    }

    #[test]
    fn stability_requires_at_least_three_samples() {
        let m = monitor();
        m.record(0, 0.01, 0.0);
        m.record(1, 0.02, 0.0);
        assert_eq!(m.status_snapshot().metrics.stability_ms, 0.0);
        m.record(2, 0.03, 0.0);
        assert!(m.status_snapshot().metrics.stability_ms > 0.0);
    }
}
