//! End-to-end: a real Master reply engine and a real Slave sync controller
//! talking over loopback UDP, asserting the Slave actually converges.

use std::sync::Arc;
use std::time::{Duration, Instant};

use clocksync::config::{MonitorConfig, PidConfig, WireConfig};
use clocksync::reference_clock::ReferenceTimescale;
use clocksync::reply_engine::{ReplyEngine, UdpReplyTransport};
use clocksync::software_clock::SoftwareClock;
use clocksync::status::SyncStatus;
use clocksync::sync_client::{SyncClient, UdpClientTransport};
use clocksync::sync_controller::SyncController;
use clocksync::sync_monitor::SyncMonitor;

#[test]
fn slave_converges_against_real_master_over_udp() {
    let timescale = Arc::new(ReferenceTimescale::with_wall_time(1_700_000_000.0));
    let reply_transport = UdpReplyTransport::bind("127.0.0.1:0".parse().unwrap()).unwrap();
    let master_addr = reply_transport.local_addr().unwrap();
    let mut engine = ReplyEngine::spawn(reply_transport, timescale);

    let wire = WireConfig {
        sync_port: master_addr.port(),
        sync_interval_s: 0.05,
        rounds_per_sync: 3,
        sync_timeout_s: 0.5,
        max_sequence: 65535,
    };

    let client_transport =
        UdpClientTransport::bind(Duration::from_secs_f64(wire.sync_timeout_s)).unwrap();
    let client = SyncClient::new(client_transport, master_addr, wire.max_sequence);
    let clock = Arc::new(SoftwareClock::with_wall_time(1_700_000_000.0 - 3.0, PidConfig::default()));
    let monitor = Arc::new(SyncMonitor::new(MonitorConfig::default(), Vec::new()));

    let mut controller =
        SyncController::spawn(client, clock.clone(), monitor.clone(), wire, 10.0);

    let start = Instant::now();
    while monitor.status_snapshot().sync_status != SyncStatus::Synchronized
        && start.elapsed() < Duration::from_secs(5)
    {
        std::thread::sleep(Duration::from_millis(20));
    }

    assert_eq!(monitor.status_snapshot().sync_status, SyncStatus::Synchronized);
    assert!(monitor.status_snapshot().master_online);

    let offset = monitor.status_snapshot().last_offset;
    assert!(offset.abs() < 1.0, "first offset should already be well under a second: {offset}");

    controller.stop();
    engine.stop();
}

#[test]
fn master_stays_offline_state_until_first_contact() {
    let timescale = Arc::new(ReferenceTimescale::with_wall_time(1_700_000_000.0));
    let reply_transport = UdpReplyTransport::bind("127.0.0.1:0".parse().unwrap()).unwrap();
    let _master_addr = reply_transport.local_addr().unwrap();
    let mut engine = ReplyEngine::spawn(reply_transport, timescale);

    std::thread::sleep(Duration::from_millis(50));
    assert!(!engine.is_client_connected());
    engine.stop();
}
