//! The monitor's notification interface: a plain trait any presentation
//! layer can implement, invoked outside the monitor's own lock so a slow
//! or misbehaving observer cannot block sync.

use crate::status::SyncStatus;

pub trait SyncObserver: Send + Sync {
    fn on_master_status_changed(&self, online: bool);
    fn on_sync_status_changed(&self, status: SyncStatus);
}

/// Default observer that just logs transitions at `INFO`. Good enough to
/// run a binary with useful output and to serve as the example a
/// presentation layer would copy.
pub struct LoggingObserver;

impl SyncObserver for LoggingObserver {
    fn on_master_status_changed(&self, online: bool) {
        if online {
            log::info!("master online");
        } else {
            log::info!("master offline");
        }
    }

    fn on_sync_status_changed(&self, status: SyncStatus) {
        log::info!("sync status -> {status}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Arc;

    struct RecordingObserver {
        master_calls: Arc<AtomicUsize>,
        last_online: Arc<AtomicBool>,
    }

    impl SyncObserver for RecordingObserver {
        fn on_master_status_changed(&self, online: bool) {
            self.master_calls.fetch_add(1, Ordering::SeqCst);
            self.last_online.store(online, Ordering::SeqCst);
        }

        fn on_sync_status_changed(&self, _status: SyncStatus) {}
    }

    #[test]
    fn observer_receives_calls() {
        let calls = Arc::new(AtomicUsize::new(0));
        let last = Arc::new(AtomicBool::new(false));
        let obs = RecordingObserver {
            master_calls: calls.clone(),
            last_online: last.clone(),
        };
        obs.on_master_status_changed(true);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(last.load(Ordering::SeqCst));
    }
}
