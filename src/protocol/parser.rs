//! Notification decoding for the lamp protocol.
//!
//! The device replies asynchronously over the notify characteristic. Decoding
//! fails soft: anything malformed or unrecognized yields `None` and is
//! dropped, since the device emits frames this client does not understand.
//! Checksums on inbound frames are not verified; device responses are
//! trusted.

use crate::protocol::command::Opcode;
use crate::protocol::frame::NOTIFY_START;

/// Minimum length of a power or timer acknowledgment frame.
const MIN_ACK_LEN: usize = 6;

/// Minimum length of a status response frame.
const MIN_STATUS_LEN: usize = 10;

/// A decoded notification from the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Notification {
    /// Full status report.
    Status {
        /// Power flag (`0x01` = on; any other value is treated as not on).
        is_on: bool,
        /// Timer duration the device was programmed with, in seconds.
        /// Informational only.
        initial_secs: u16,
        /// Seconds left on the device's countdown.
        remaining_secs: u16,
    },
    /// Acknowledgment of a power command.
    PowerAck {
        /// Power flag echoed by the device.
        is_on: bool,
    },
    /// Acknowledgment of a set-timer command.
    TimerAck,
}

/// Decodes a notification frame.
///
/// Returns `None` for frames that are too short, carry the wrong start byte,
/// or use an opcode this client does not know. Never an error.
#[must_use]
pub fn decode_notification(data: &[u8]) -> Option<Notification> {
    if data.len() < 3 || data[0] != NOTIFY_START {
        return None;
    }

    match Opcode::from_byte(data[2])? {
        Opcode::StatusQuery => {
            if data.len() < MIN_STATUS_LEN {
                return None;
            }
            Some(Notification::Status {
                is_on: data[5] == 0x01,
                initial_secs: u16::from_be_bytes([data[6], data[7]]),
                remaining_secs: u16::from_be_bytes([data[8], data[9]]),
            })
        }
        Opcode::Power => {
            if data.len() < MIN_ACK_LEN {
                return None;
            }
            Some(Notification::PowerAck {
                is_on: data[5] == 0x01,
            })
        }
        Opcode::SetTimer => {
            if data.len() < MIN_ACK_LEN {
                return None;
            }
            Some(Notification::TimerAck)
        }
    }
}
