//! Master-side reply engine: a single receive loop that answers requests
//! with t2/t3 bracketed as tightly as possible around the reference
//! timescale read.

use std::io;
use std::net::{SocketAddr, UdpSocket};

use socket2::{Domain, Protocol, Socket, Type};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::reference_clock::ReferenceTimescale;
use crate::wire::SyncDatagram;

/// The poll timeout used solely to let the receive loop check the stop
/// flag between blocking receives.
const POLL_TIMEOUT: Duration = Duration::from_millis(500);

/// "A client spoke within the last N seconds" window for connection
/// tracking, which is purely observational (no session state).
const CLIENT_ACTIVE_WINDOW: Duration = Duration::from_secs(10);

/// The transport a [`ReplyEngine`] talks through.
#[cfg_attr(test, mockall::automock)]
pub trait ReplyTransport: Send {
    /// Block up to `POLL_TIMEOUT` for a datagram. `Ok(None)` on timeout.
    fn recv_from(&mut self) -> io::Result<Option<(Vec<u8>, SocketAddr)>>;
    fn send_to(&mut self, buf: &[u8], to: SocketAddr) -> io::Result<()>;
}

pub struct UdpReplyTransport {
    socket: UdpSocket,
}

impl UdpReplyTransport {
    /// Binds with `SO_REUSEADDR` set so a restarted Master doesn't trip
    /// over a lingering socket in `TIME_WAIT`.
    pub fn bind(addr: SocketAddr) -> io::Result<Self> {
        let domain = if addr.is_ipv6() { Domain::IPV6 } else { Domain::IPV4 };
        let raw = Socket::new(domain, Type::DGRAM, Some(Protocol::UDP))?;
        raw.set_reuse_address(true)?;
        raw.bind(&addr.into())?;
        let socket: UdpSocket = raw.into();
        socket.set_read_timeout(Some(POLL_TIMEOUT))?;
        Ok(UdpReplyTransport { socket })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }
}

impl ReplyTransport for UdpReplyTransport {
    fn recv_from(&mut self) -> io::Result<Option<(Vec<u8>, SocketAddr)>> {
        let mut buf = [0u8; 1024];
        match self.socket.recv_from(&mut buf) {
            Ok((n, from)) => Ok(Some((buf[..n].to_vec(), from))),
            Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) => {
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    fn send_to(&mut self, buf: &[u8], to: SocketAddr) -> io::Result<()> {
        self.socket.send_to(buf, to).map(|_| ())
    }
}

struct ConnectionState {
    last_client_addr: Option<SocketAddr>,
    last_client_seen: Option<Instant>,
}

/// Runs the receive loop on a dedicated thread, started with [`Self::spawn`].
pub struct ReplyEngine {
    stop_flag: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
    conn: Arc<Mutex<ConnectionState>>,
}

impl ReplyEngine {
    /// Spawn the receive loop thread against an already-bound transport.
    pub fn spawn<T: ReplyTransport + 'static>(
        mut transport: T,
        timescale: Arc<ReferenceTimescale>,
    ) -> Self {
        let stop_flag = Arc::new(AtomicBool::new(false));
        let conn = Arc::new(Mutex::new(ConnectionState {
            last_client_addr: None,
            last_client_seen: None,
        }));

        let thread_stop = stop_flag.clone();
        let thread_conn = conn.clone();
        let handle = thread::Builder::new()
            .name("reply-engine".into())
            .spawn(move || {
                run_loop(&mut transport, &timescale, &thread_stop, &thread_conn);
            })
            .expect("failed to spawn reply engine thread");

        ReplyEngine {
            stop_flag,
            handle: Some(handle),
            conn,
        }
    }

    pub fn stop(&mut self) {
        self.stop_flag.store(true, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }

    pub fn last_client_addr(&self) -> Option<SocketAddr> {
        self.conn.lock().unwrap().last_client_addr
    }

    pub fn is_client_connected(&self) -> bool {
        let state = self.conn.lock().unwrap();
        match state.last_client_seen {
            Some(seen) => seen.elapsed() < CLIENT_ACTIVE_WINDOW,
            None => false,
        }
    }
}

impl Drop for ReplyEngine {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run_loop(
    transport: &mut dyn ReplyTransport,
    timescale: &ReferenceTimescale,
    stop_flag: &AtomicBool,
    conn: &Mutex<ConnectionState>,
) {
    log::info!("reply engine listening");
    while !stop_flag.load(Ordering::SeqCst) {
        match transport.recv_from() {
            Ok(Some((data, from))) => {
                // t2 captured immediately after the receive returns.
                let t2 = timescale.current();
                handle_datagram(transport, timescale, &data, from, t2);
                let mut state = conn.lock().unwrap();
                state.last_client_addr = Some(from);
                state.last_client_seen = Some(Instant::now());
            }
            Ok(None) => continue,
            Err(e) => {
                log::debug!("reply engine receive error: {e}");
            }
        }
    }
    log::info!("reply engine stopped");
}

fn handle_datagram(
    transport: &mut dyn ReplyTransport,
    timescale: &ReferenceTimescale,
    data: &[u8],
    from: SocketAddr,
    t2: f64,
) {
    let request = match SyncDatagram::decode_request(data) {
        Ok(r) => r,
        Err(e) => {
            log::debug!("dropping datagram from {from}: {e}");
            return;
        }
    };

    // t3 captured immediately before sending.
    let t3 = timescale.current();
    let reply = SyncDatagram::reply(request.sequence, request.t1, t2, t3);
    if let Err(e) = transport.send_to(&reply.encode(), from) {
        log::debug!("failed to send reply to {from}: {e}");
    }
}
