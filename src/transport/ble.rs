//! BLE transport implementation.
//!
//! Talks to the lamp through the host's Bluetooth adapter via `btleplug`.
//! The lamp exposes a single service with one write and one notify
//! characteristic; commands are fire-and-forget writes and all replies
//! arrive as notifications.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use btleplug::api::{
    Central, CentralEvent, Characteristic, Manager as _, Peripheral as _, ScanFilter, WriteType,
};
use btleplug::platform::{Adapter, Manager, Peripheral};
use bytes::Bytes;
use futures::StreamExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use uuid::{Uuid, uuid};

use crate::error::{Error, Result};
use crate::transport::{LinkDown, Transport};

/// GATT service exposed by the lamp.
pub const SERVICE_UUID: Uuid = uuid!("0000fff0-0000-1000-8000-00805f9b34fb");

/// Command characteristic. fff2 carries writes and fff1 carries
/// notifications, reversed from the usual naming on this device.
pub const WRITE_CHAR_UUID: Uuid = uuid!("0000fff2-0000-1000-8000-00805f9b34fb");

/// Notification characteristic.
pub const NOTIFY_CHAR_UUID: Uuid = uuid!("0000fff1-0000-1000-8000-00805f9b34fb");

/// Name fragment advertised by supported lamps.
pub const DEVICE_NAME_PATTERN: &str = "BLOCK";

/// Default scan window when looking for the device.
pub const DEFAULT_SCAN_TIMEOUT: Duration = Duration::from_secs(10);

/// Default delay after connecting before the device answers queries.
pub const DEFAULT_READY_DELAY: Duration = Duration::from_secs(1);

/// Poll interval while scanning for the device.
const SCAN_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Configuration for the BLE transport.
#[derive(Debug, Clone)]
pub struct BleConfig {
    /// Device MAC address (e.g. "AA:BB:CC:DD:EE:FF").
    pub address: String,
    /// How long to scan for the device before giving up.
    pub scan_timeout: Duration,
    /// Delay after connection before sending commands.
    pub ready_delay: Duration,
}

impl BleConfig {
    /// Creates a new configuration with default settings.
    #[must_use]
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            scan_timeout: DEFAULT_SCAN_TIMEOUT,
            ready_delay: DEFAULT_READY_DELAY,
        }
    }

    /// Sets the scan timeout.
    #[must_use]
    pub const fn scan_timeout(mut self, timeout: Duration) -> Self {
        self.scan_timeout = timeout;
        self
    }

    /// Sets the post-connect ready delay.
    #[must_use]
    pub const fn ready_delay(mut self, delay: Duration) -> Self {
        self.ready_delay = delay;
        self
    }
}

/// BLE transport for lamp communication.
pub struct BleTransport {
    config: BleConfig,
    peripheral: Option<Peripheral>,
    write_char: Option<Characteristic>,
    connected: Arc<AtomicBool>,
    frame_tx: Option<mpsc::Sender<Bytes>>,
    link_tx: Option<mpsc::Sender<LinkDown>>,
    notify_task: Option<JoinHandle<()>>,
    watch_task: Option<JoinHandle<()>>,
}

impl BleTransport {
    /// Creates a new BLE transport with the given configuration.
    #[must_use]
    pub fn new(config: BleConfig) -> Self {
        Self {
            config,
            peripheral: None,
            write_char: None,
            connected: Arc::new(AtomicBool::new(false)),
            frame_tx: None,
            link_tx: None,
            notify_task: None,
            watch_task: None,
        }
    }

    /// Creates a new BLE transport for the given address with default settings.
    #[must_use]
    pub fn with_address(address: impl Into<String>) -> Self {
        Self::new(BleConfig::new(address))
    }

    fn abort_tasks(&mut self) {
        if let Some(task) = self.notify_task.take() {
            task.abort();
        }
        if let Some(task) = self.watch_task.take() {
            task.abort();
        }
    }
}

/// Scans until a peripheral with the configured address shows up.
async fn find_peripheral(adapter: &Adapter, config: &BleConfig) -> Result<Peripheral> {
    adapter.start_scan(ScanFilter::default()).await?;

    let deadline = tokio::time::Instant::now() + config.scan_timeout;
    let mut found = None;

    while found.is_none() {
        for peripheral in adapter.peripherals().await? {
            if peripheral
                .address()
                .to_string()
                .eq_ignore_ascii_case(&config.address)
            {
                found = Some(peripheral);
                break;
            }
        }

        if found.is_none() {
            if tokio::time::Instant::now() >= deadline {
                break;
            }
            tokio::time::sleep(SCAN_POLL_INTERVAL).await;
        }
    }

    let _ = adapter.stop_scan().await;

    found.ok_or_else(|| Error::DeviceNotFound {
        address: config.address.clone(),
    })
}

impl Transport for BleTransport {
    fn connect(&mut self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move {
            if self.is_connected() {
                return Ok(());
            }

            // Drop leftovers from a previous session
            self.abort_tasks();

            tracing::info!("connecting to {}", self.config.address);

            let manager = Manager::new().await?;
            let adapter = manager
                .adapters()
                .await?
                .into_iter()
                .next()
                .ok_or(Error::NoAdapter)?;

            let peripheral = find_peripheral(&adapter, &self.config).await?;
            peripheral.connect().await?;
            peripheral.discover_services().await?;

            let characteristics = peripheral.characteristics();
            let write_char = characteristics
                .iter()
                .find(|c| c.uuid == WRITE_CHAR_UUID)
                .cloned()
                .ok_or(Error::CharacteristicNotFound {
                    uuid: WRITE_CHAR_UUID,
                })?;
            let notify_char = characteristics
                .iter()
                .find(|c| c.uuid == NOTIFY_CHAR_UUID)
                .cloned()
                .ok_or(Error::CharacteristicNotFound {
                    uuid: NOTIFY_CHAR_UUID,
                })?;

            peripheral.subscribe(&notify_char).await?;

            // Forward notification frames to the session
            if let Some(frame_tx) = self.frame_tx.clone() {
                let mut notifications = peripheral.notifications().await?;
                self.notify_task = Some(tokio::spawn(async move {
                    while let Some(notification) = notifications.next().await {
                        if notification.uuid != NOTIFY_CHAR_UUID {
                            continue;
                        }
                        tracing::trace!("notification: {}", hex::encode(&notification.value));
                        if frame_tx.send(Bytes::from(notification.value)).await.is_err() {
                            tracing::debug!("frame receiver dropped");
                            return;
                        }
                    }
                }));
            }

            // Watch adapter events for our device dropping the link. This also
            // fires after an operator-initiated disconnect, which is how the
            // expected-disconnect flag upstream gets consumed.
            let device_id = peripheral.id();
            let connected = Arc::clone(&self.connected);
            let link_tx = self.link_tx.clone();
            let mut events = adapter.events().await?;
            self.watch_task = Some(tokio::spawn(async move {
                while let Some(event) = events.next().await {
                    if let CentralEvent::DeviceDisconnected(id) = event {
                        if id == device_id {
                            connected.store(false, Ordering::SeqCst);
                            if let Some(tx) = &link_tx {
                                let _ = tx.send(LinkDown).await;
                            }
                            return;
                        }
                    }
                }
            }));

            // The lamp needs a moment before it will answer queries
            tokio::time::sleep(self.config.ready_delay).await;

            self.peripheral = Some(peripheral);
            self.write_char = Some(write_char);
            self.connected.store(true, Ordering::SeqCst);

            tracing::info!("connected and notifications enabled");
            Ok(())
        })
    }

    fn disconnect(&mut self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move {
            if let Some(task) = self.notify_task.take() {
                task.abort();
            }
            self.write_char = None;
            self.connected.store(false, Ordering::SeqCst);

            // The watch task is left running so the disconnect event still
            // reaches the link channel; it ends itself afterwards.
            if let Some(peripheral) = self.peripheral.take() {
                tracing::info!("disconnecting from {}", self.config.address);
                peripheral.disconnect().await?;
            }
            Ok(())
        })
    }

    fn send(&mut self, data: Bytes) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move {
            let peripheral = self.peripheral.as_ref().ok_or(Error::NotConnected)?;
            let characteristic = self.write_char.as_ref().ok_or(Error::NotConnected)?;

            tracing::debug!("sending frame: {}", hex::encode(&data));

            // Fire and forget; correctness rides on the notification that
            // follows, not on the write acknowledgment
            peripheral
                .write(characteristic, &data, WriteType::WithoutResponse)
                .await?;
            Ok(())
        })
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn set_frame_sender(&mut self, tx: mpsc::Sender<Bytes>) {
        self.frame_tx = Some(tx);
    }

    fn set_link_sender(&mut self, tx: mpsc::Sender<LinkDown>) {
        self.link_tx = Some(tx);
    }
}

impl Drop for BleTransport {
    fn drop(&mut self) {
        self.abort_tasks();
    }
}

/// Scans for lamps advertising the supported name pattern.
///
/// Returns `(address, name)` pairs seen within the scan window.
///
/// # Errors
///
/// Returns an error if no Bluetooth adapter is available or scanning fails.
pub async fn discover(timeout: Duration) -> Result<Vec<(String, String)>> {
    let manager = Manager::new().await?;
    let adapter = manager
        .adapters()
        .await?
        .into_iter()
        .next()
        .ok_or(Error::NoAdapter)?;

    adapter.start_scan(ScanFilter::default()).await?;
    tokio::time::sleep(timeout).await;

    let mut devices = Vec::new();
    for peripheral in adapter.peripherals().await? {
        let Ok(Some(properties)) = peripheral.properties().await else {
            continue;
        };
        let Some(name) = properties.local_name else {
            continue;
        };
        if name.to_uppercase().contains(DEVICE_NAME_PATTERN) {
            devices.push((peripheral.address().to_string(), name));
        }
    }

    let _ = adapter.stop_scan().await;
    Ok(devices)
}
