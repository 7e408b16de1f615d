//! Slave-side network client: emits request bursts against the Master,
//! collects replies, and reduces each burst to a single filtered
//! [`Sample`] via the minimum-delay heuristic.

use std::io;
use std::net::{SocketAddr, UdpSocket};
use std::time::Duration;

use rand::Rng;

use crate::wire::{offset_delay, DecodeError, SyncDatagram, WIRE_SIZE};

/// One complete four-timestamp exchange.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample {
    pub t1: f64,
    pub t2: f64,
    pub t3: f64,
    pub t4: f64,
    pub offset: f64,
    pub delay: f64,
    pub sequence: u16,
}

/// Why a single round failed. Distinguished per the error-handling design
/// so the burst filter and logging can tell transient network failure from
/// a protocol-level mismatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoundError {
    Timeout,
    Io,
    Decode(DecodeError),
    SequenceMismatch { expected: u16, got: u16 },
    WrongRole,
}

/// The transport a [`SyncClient`] talks through. A real UDP socket on one
/// side, a scriptable fake on the other, so the client's round/burst
/// logic is testable without binding real sockets.
#[cfg_attr(test, mockall::automock)]
pub trait ClientTransport {
    /// Send `buf` to `to`.
    fn send_to(&mut self, buf: &[u8], to: SocketAddr) -> io::Result<()>;

    /// Block up to the configured timeout for a reply. `Ok(None)` means
    /// timeout; `Ok(Some(bytes))` is a received datagram's payload.
    fn recv(&mut self) -> io::Result<Option<Vec<u8>>>;
}

/// Real UDP socket transport bound to an ephemeral port.
pub struct UdpClientTransport {
    socket: UdpSocket,
}

impl UdpClientTransport {
    pub fn bind(timeout: Duration) -> io::Result<Self> {
        let socket = UdpSocket::bind("0.0.0.0:0")?;
        socket.set_read_timeout(Some(timeout))?;
        Ok(UdpClientTransport { socket })
    }
}

impl ClientTransport for UdpClientTransport {
    fn send_to(&mut self, buf: &[u8], to: SocketAddr) -> io::Result<()> {
        self.socket.send_to(buf, to).map(|_| ())
    }

    fn recv(&mut self) -> io::Result<Option<Vec<u8>>> {
        let mut buf = [0u8; 1024];
        match self.socket.recv(&mut buf) {
            Ok(n) => Ok(Some(buf[..n].to_vec())),
            Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) => {
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }
}

/// Something that can hand back the Slave's virtual "now" for stamping t1
/// and t4. Kept as a trait so tests can drive the client with a fake clock
/// instead of wall-clock time.
pub trait ClockSource {
    fn now(&self) -> f64;
}

impl ClockSource for crate::software_clock::SoftwareClock {
    fn now(&self) -> f64 {
        crate::software_clock::SoftwareClock::now(self)
    }
}

pub struct SyncClient<T: ClientTransport> {
    transport: T,
    master_addr: SocketAddr,
    sequence: u16,
    max_sequence: u16,
}

impl<T: ClientTransport> SyncClient<T> {
    pub fn new(transport: T, master_addr: SocketAddr, max_sequence: u16) -> Self {
        let sequence = rand::rng().random_range(0..=max_sequence);
        SyncClient {
            transport,
            master_addr,
            sequence,
            max_sequence,
        }
    }

    fn next_sequence(&mut self) -> u16 {
        self.sequence = if self.sequence >= self.max_sequence {
            0
        } else {
            self.sequence + 1
        };
        self.sequence
    }

    /// One request/reply round. Captures t1/t4 from `clock`, not the OS
    /// clock.
    pub fn round(&mut self, clock: &dyn ClockSource) -> Result<Sample, RoundError> {
        let seq = self.next_sequence();
        let t1 = clock.now();
        let request = SyncDatagram::request(seq, t1);

        self.transport
            .send_to(&request.encode(), self.master_addr)
            .map_err(|_| RoundError::Io)?;

        let data = self
            .transport
            .recv()
            .map_err(|_| RoundError::Io)?
            .ok_or(RoundError::Timeout)?;
        let t4 = clock.now();

        if data.len() < WIRE_SIZE {
            return Err(RoundError::Decode(DecodeError::TooShort { got: data.len() }));
        }
        let reply = SyncDatagram::decode_reply(&data).map_err(|e| match e {
            DecodeError::WrongRole => RoundError::WrongRole,
            other => RoundError::Decode(other),
        })?;

        if reply.sequence != seq {
            return Err(RoundError::SequenceMismatch {
                expected: seq,
                got: reply.sequence,
            });
        }

        let (offset, delay) = offset_delay(reply.t1, reply.t2, reply.t3, t4);
        Ok(Sample {
            t1: reply.t1,
            t2: reply.t2,
            t3: reply.t3,
            t4,
            offset,
            delay,
            sequence: seq,
        })
    }

    /// A burst of `rounds` sequential rounds, filtered down to the sample
    /// with the smallest delay. `None` if every round in the burst failed.
    pub fn burst(&mut self, rounds: u32, clock: &dyn ClockSource) -> Option<Sample> {
        let mut best: Option<Sample> = None;
        for i in 0..rounds {
            match self.round(clock) {
                Ok(sample) => {
                    log::debug!(
                        "round {}/{rounds}: offset={:.9} delay={:.9}",
                        i + 1,
                        sample.offset,
                        sample.delay
                    );
                    best = match best {
                        None => Some(sample),
                        Some(current) if sample.delay < current.delay => Some(sample),
                        Some(current) => Some(current),
                    };
                }
                Err(e) => {
                    log::debug!("round {}/{rounds} failed: {e:?}", i + 1);
                }
            }
        }
        if best.is_none() {
            log::warn!("burst failed: all {rounds} rounds failed");
        }
        best
    }
}

struct FixedClock(f64);
impl ClockSource for FixedClock {
    fn now(&self) -> f64 {
        self.0
    }
}
