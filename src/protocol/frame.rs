//! Frame encoding for the lamp's command protocol.
//!
//! Outbound commands use a fixed framing:
//! ```text
//! ┌──────┬──────┬────────┬──────┬─────────┬──────────┬──────────┬──────┐
//! │ 0x3A │ 0x01 │ opcode │ 0x00 │ pay len │ payload  │ checksum │ 0x0A │
//! └──────┴──────┴────────┴──────┴─────────┴──────────┴──────────┴──────┘
//! ```
//! The checksum is the additive sum, modulo 256, of every byte from the
//! `0x01` header through the end of the payload. The start marker and the
//! terminator are excluded.

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{Error, Result};
use crate::protocol::command::Opcode;
use crate::types::{MAX_TIMER_DURATION_MINS, MIN_TIMER_DURATION_MINS};

/// Start marker for outbound command frames.
pub const FRAME_START: u8 = 0x3A;

/// Terminator for outbound command frames.
pub const FRAME_END: u8 = 0x0A;

/// Start marker for inbound notification frames.
pub const NOTIFY_START: u8 = 0x2A;

/// Fixed header byte following the start marker.
const FRAME_HEADER: u8 = 0x01;

/// Additive checksum over the header, opcode, reserved, length, and payload.
fn checksum(bytes: &[u8]) -> u8 {
    bytes.iter().fold(0u8, |sum, b| sum.wrapping_add(*b))
}

fn encode_command(opcode: Opcode, payload: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(7 + payload.len());
    buf.put_u8(FRAME_START);
    buf.put_u8(FRAME_HEADER);
    buf.put_u8(opcode.into());
    buf.put_u8(0x00);
    buf.put_u8(payload.len() as u8);
    buf.put_slice(payload);
    let sum = checksum(&buf[1..]);
    buf.put_u8(sum);
    buf.put_u8(FRAME_END);
    buf.freeze()
}

/// Encodes a power command with a 1-byte on/off payload.
#[must_use]
pub fn encode_power(on: bool) -> Bytes {
    encode_command(Opcode::Power, &[u8::from(on)])
}

/// Encodes a status query with an empty payload.
#[must_use]
pub fn encode_status_query() -> Bytes {
    encode_command(Opcode::StatusQuery, &[])
}

/// Encodes a set-timer command.
///
/// The device timer value is in seconds (`minutes * 60`), sent as a
/// big-endian 16-bit payload.
///
/// # Errors
///
/// Returns [`Error::InvalidTimerDuration`] if `minutes` is outside 1-60.
pub fn encode_set_timer(minutes: u16) -> Result<Bytes> {
    if !(MIN_TIMER_DURATION_MINS..=MAX_TIMER_DURATION_MINS).contains(&minutes) {
        return Err(Error::InvalidTimerDuration { minutes });
    }

    let seconds = minutes * 60;
    Ok(encode_command(Opcode::SetTimer, &seconds.to_be_bytes()))
}
