//! Protocol definitions for the lamp's wire format.
//!
//! This module contains the pure codec:
//! - Frame encoding with checksums
//! - Command opcodes
//! - Notification decoding

pub mod command;
pub mod frame;
pub mod parser;

pub use command::{Command, Opcode};
pub use frame::{
    FRAME_END, FRAME_START, NOTIFY_START, encode_power, encode_set_timer, encode_status_query,
};
pub use parser::{Notification, decode_notification};
