//! Transport layer for lamp communication.
//!
//! This module provides the abstraction over the BLE central capability.
//! [`BleTransport`] is the production implementation.

pub mod ble;

#[cfg(test)]
pub(crate) mod mock;

use std::future::Future;
use std::pin::Pin;

use bytes::Bytes;
use tokio::sync::mpsc;

use crate::error::Result;

/// Sent by a transport when the link drops from the device side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkDown;

/// Trait for transport implementations.
pub trait Transport: Send + Sync {
    /// Connects to the device and subscribes to its notifications.
    fn connect(&mut self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;

    /// Disconnects from the device.
    fn disconnect(&mut self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;

    /// Writes a command frame to the device.
    fn send(&mut self, data: Bytes) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;

    /// Returns true if connected.
    fn is_connected(&self) -> bool;

    /// Registers the channel notification frames are forwarded to.
    fn set_frame_sender(&mut self, tx: mpsc::Sender<Bytes>);

    /// Registers the channel link-loss events are reported on.
    fn set_link_sender(&mut self, tx: mpsc::Sender<LinkDown>);
}

pub use ble::{BleConfig, BleTransport, discover};
