//! # blocklight
//!
//! A Rust client library for BlockBlueLight red light therapy lamps.
//!
//! This library drives a single-purpose BLE appliance exposing one write
//! characteristic and one notify characteristic: commands go out as small
//! checksummed frames, the lamp answers asynchronously with notifications,
//! and a client-side countdown mirrors the device's internal shutoff timer.
//!
//! ## Features
//!
//! - Async/await based API using Tokio
//! - Lazy connect/reconnect with idle disconnect
//! - Event-driven state observation
//! - Client-side countdown synchronized from device notifications
//!
//! ## Quick Start
//!
//! ```no_run
//! use blocklight::BlockLight;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), blocklight::Error> {
//!     // Connect to a lamp
//!     let client = BlockLight::ble("AA:BB:CC:DD:EE:FF");
//!     client.connect().await?;
//!
//!     // Run a 20 minute session
//!     client.set_timer_duration(20).await?;
//!     client.turn_on().await?;
//!
//!     let state = client.state().await;
//!     println!("on: {}, remaining: {}", state.is_on, state.format_remaining());
//!
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! The library is organized into several modules:
//!
//! - [`protocol`] - The pure wire codec (frames, opcodes, notifications)
//! - [`transport`] - Transport abstraction and the BLE implementation
//! - [`event`] - Async event system for observing the session
//! - [`types`] - Device state data structures
//! - [`client`] - High-level [`BlockLight`] client

pub mod client;
pub mod error;
pub mod event;
pub mod protocol;
pub mod transport;
pub mod types;

mod connection;
mod session;

// Re-exports for convenience
pub use client::BlockLight;
pub use error::{Error, Result};
pub use event::{Event, EventDispatcher, EventFilter, EventKind, Subscription};
pub use protocol::{Command, Notification, Opcode, decode_notification};
pub use transport::{BleConfig, BleTransport, Transport, discover};
pub use types::{
    DEFAULT_TIMER_DURATION_MINS, DeviceState, MAX_TIMER_DURATION_MINS, MIN_TIMER_DURATION_MINS,
};
