//! Wire-level request/reply datagram and timestamp arithmetic.
//!
//! A [`SyncDatagram`] is the only thing that crosses the network. It encodes
//! to exactly 27 bytes, big-endian:
//!
//! ```text
//! offset  size  field
//! 0       1     flags      (0x01 request | 0x02 reply)
//! 1       2     sequence   (u16, wraps at 65536)
//! 3       8     t1         (f64)
//! 11      8     t2         (f64)
//! 19      8     t3         (f64)
//! ```

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::fmt;
use std::io::Cursor;

/// Size in bytes of an encoded [`SyncDatagram`]. Anything shorter is dropped.
pub const WIRE_SIZE: usize = 27;

/// The two roles a datagram can play on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flags {
    Request,
    Reply,
}

impl Flags {
    const REQUEST_BYTE: u8 = 0x01;
    const REPLY_BYTE: u8 = 0x02;

    fn to_byte(self) -> u8 {
        match self {
            Flags::Request => Self::REQUEST_BYTE,
            Flags::Reply => Self::REPLY_BYTE,
        }
    }

    fn from_byte(b: u8) -> Option<Self> {
        match b {
            Self::REQUEST_BYTE => Some(Flags::Request),
            Self::REPLY_BYTE => Some(Flags::Reply),
            _ => None,
        }
    }
}

/// Why a datagram failed to decode. Distinguished (rather than collapsed
/// into a bare `None`) so callers can log the reason at `DEBUG` per the
/// error-handling policy for transient network errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeError {
    /// Fewer than [`WIRE_SIZE`] bytes.
    TooShort { got: usize },
    /// The flags byte isn't 0x01 or 0x02.
    UnknownFlags(u8),
    /// The flags byte decoded fine but doesn't match the role the caller
    /// expected (a reply parser handed a request, or vice versa).
    WrongRole,
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecodeError::TooShort { got } => {
                write!(f, "datagram too short: {got} bytes, need {WIRE_SIZE}")
            }
            DecodeError::UnknownFlags(b) => write!(f, "unknown flags byte: {b:#04x}"),
            DecodeError::WrongRole => write!(f, "datagram role does not match expected role"),
        }
    }
}

impl std::error::Error for DecodeError {}

/// A single request or reply datagram.
///
/// In a request, `t2` and `t3` are always `0.0`. In a reply, `t1` mirrors
/// the request's `t1` bit-for-bit.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SyncDatagram {
    pub flags: Flags,
    pub sequence: u16,
    pub t1: f64,
    pub t2: f64,
    pub t3: f64,
}

impl SyncDatagram {
    pub fn request(sequence: u16, t1: f64) -> Self {
        SyncDatagram {
            flags: Flags::Request,
            sequence,
            t1,
            t2: 0.0,
            t3: 0.0,
        }
    }

    pub fn reply(sequence: u16, t1: f64, t2: f64, t3: f64) -> Self {
        SyncDatagram {
            flags: Flags::Reply,
            sequence,
            t1,
            t2,
            t3,
        }
    }

    /// Encode to the fixed 27-byte wire layout.
    pub fn encode(&self) -> [u8; WIRE_SIZE] {
        let mut buf = [0u8; WIRE_SIZE];
        {
            let mut w = &mut buf[..];
            w.write_u8(self.flags.to_byte()).unwrap();
            w.write_u16::<BigEndian>(self.sequence).unwrap();
            w.write_f64::<BigEndian>(self.t1).unwrap();
            w.write_f64::<BigEndian>(self.t2).unwrap();
            w.write_f64::<BigEndian>(self.t3).unwrap();
        }
        buf
    }

    /// Decode without checking the role — used when either request or
    /// reply is acceptable (e.g. inspecting an unknown datagram).
    pub fn decode(data: &[u8]) -> Result<Self, DecodeError> {
        if data.len() < WIRE_SIZE {
            return Err(DecodeError::TooShort { got: data.len() });
        }
        let mut rdr = Cursor::new(&data[..WIRE_SIZE]);
        let flags_byte = rdr.read_u8().unwrap();
        let flags = Flags::from_byte(flags_byte).ok_or(DecodeError::UnknownFlags(flags_byte))?;
        let sequence = rdr.read_u16::<BigEndian>().unwrap();
        let t1 = rdr.read_f64::<BigEndian>().unwrap();
        let t2 = rdr.read_f64::<BigEndian>().unwrap();
        let t3 = rdr.read_f64::<BigEndian>().unwrap();
        Ok(SyncDatagram {
            flags,
            sequence,
            t1,
            t2,
            t3,
        })
    }

    /// Decode and require `flags == Request`.
    pub fn decode_request(data: &[u8]) -> Result<Self, DecodeError> {
        let dg = Self::decode(data)?;
        if dg.flags != Flags::Request {
            return Err(DecodeError::WrongRole);
        }
        Ok(dg)
    }

    /// Decode and require `flags == Reply`.
    pub fn decode_reply(data: &[u8]) -> Result<Self, DecodeError> {
        let dg = Self::decode(data)?;
        if dg.flags != Flags::Reply {
            return Err(DecodeError::WrongRole);
        }
        Ok(dg)
    }
}

impl fmt::Display for SyncDatagram {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:?}(seq={}, t1={:.6}, t2={:.6}, t3={:.6})",
            self.flags, self.sequence, self.t1, self.t2, self.t3
        )
    }
}

/// Compute (offset, delay) from the four timestamps of one round:
/// t1 send on Slave, t2 receive on Master, t3 send on Master, t4 receive
/// on Slave. Positive `offset` means the Slave clock is behind the Master.
/// `delay` is clamped to zero if the arithmetic would make it negative.
pub fn offset_delay(t1: f64, t2: f64, t3: f64, t4: f64) -> (f64, f64) {
    let offset = ((t2 - t1) + (t3 - t4)) / 2.0;
    let mut delay = ((t4 - t1) - (t3 - t2)) / 2.0;
    if delay < 0.0 {
        delay = 0.0;
    }
    (offset, delay)
}
