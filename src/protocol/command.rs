//! Command opcodes and the commands the lamp understands.

use bytes::Bytes;

use crate::error::Result;
use crate::protocol::frame;

/// Command opcodes carried in byte 2 of a frame.
///
/// Notification frames mirror the opcode of the command that triggered them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Opcode {
    /// Query power state and timer.
    StatusQuery = 0x10,
    /// Switch power on or off.
    Power = 0x20,
    /// Program the shutoff timer.
    SetTimer = 0x31,
}

impl Opcode {
    /// Attempts to parse an opcode from a byte.
    #[must_use]
    pub const fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x10 => Some(Self::StatusQuery),
            0x20 => Some(Self::Power),
            0x31 => Some(Self::SetTimer),
            _ => None,
        }
    }
}

impl From<Opcode> for u8 {
    fn from(opcode: Opcode) -> Self {
        opcode as Self
    }
}

/// A command to the lamp.
///
/// Produced by callers and consumed once by [`Command::encode`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Turn the lamp on.
    PowerOn,
    /// Turn the lamp off.
    PowerOff,
    /// Ask the device for its power state and timer.
    StatusQuery,
    /// Program the shutoff timer in minutes (1-60).
    SetTimer {
        /// Timer duration in minutes.
        minutes: u16,
    },
}

impl Command {
    /// Returns the opcode this command is sent under.
    #[must_use]
    pub const fn opcode(&self) -> Opcode {
        match self {
            Self::PowerOn | Self::PowerOff => Opcode::Power,
            Self::StatusQuery => Opcode::StatusQuery,
            Self::SetTimer { .. } => Opcode::SetTimer,
        }
    }

    /// Encodes the command into a wire frame.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::InvalidTimerDuration`] for a `SetTimer` with
    /// minutes outside 1-60. No I/O happens before validation.
    pub fn encode(&self) -> Result<Bytes> {
        match *self {
            Self::PowerOn => Ok(frame::encode_power(true)),
            Self::PowerOff => Ok(frame::encode_power(false)),
            Self::StatusQuery => Ok(frame::encode_status_query()),
            Self::SetTimer { minutes } => frame::encode_set_timer(minutes),
        }
    }
}
