//! High-level lamp client.
//!
//! This module provides [`BlockLight`], which combines the transport, the
//! connection manager, and the session state machine into the unified
//! interface callers drive: power control, status queries, timer
//! configuration, and state observation.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;

use crate::connection::ConnectionManager;
use crate::error::Result;
use crate::event::{Event, EventDispatcher, EventFilter, Subscription};
use crate::protocol::{Command, decode_notification};
use crate::session::Session;
use crate::transport::{BleConfig, BleTransport, Transport};
use crate::types::DeviceState;

/// Settle delay between programming the timer and switching power on.
const TIMER_SETTLE: Duration = Duration::from_millis(200);

/// Settle delay before optimistically reporting the new power state.
const POWER_SETTLE: Duration = Duration::from_millis(500);

/// Settle delay between the post-countdown status query and letting the
/// link go idle.
const POST_COUNTDOWN_SETTLE: Duration = Duration::from_secs(1);

/// Client for a single BlockBlueLight lamp.
///
/// One client serializes one device's session; control several lamps with
/// independent clients.
pub struct BlockLight<T> {
    connection: ConnectionManager<T>,
    session: Arc<Session>,
    dispatcher: EventDispatcher,
    process_task: Option<JoinHandle<()>>,
    link_task: Option<JoinHandle<()>>,
    expiry_task: Option<JoinHandle<()>>,
    pending_resync: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl BlockLight<BleTransport> {
    /// Creates a new client for a lamp at the given address.
    ///
    /// # Arguments
    ///
    /// * `address` - Device MAC address (e.g. "AA:BB:CC:DD:EE:FF")
    ///
    /// # Returns
    ///
    /// A new client (not yet connected).
    #[must_use]
    pub fn ble(address: impl Into<String>) -> Self {
        Self::with_ble_config(BleConfig::new(address))
    }

    /// Creates a new client with custom BLE configuration.
    #[must_use]
    pub fn with_ble_config(config: BleConfig) -> Self {
        Self::new(BleTransport::new(config))
    }
}

impl<T: Transport + 'static> BlockLight<T> {
    /// Creates a new client with the given transport.
    fn new(mut transport: T) -> Self {
        let dispatcher = EventDispatcher::new(64);
        let (frame_tx, mut frame_rx) = mpsc::channel(64);
        let (link_tx, link_rx) = mpsc::channel(8);
        let (expiry_tx, mut expiry_rx) = mpsc::channel(4);

        transport.set_frame_sender(frame_tx);
        transport.set_link_sender(link_tx);

        let session = Session::new(dispatcher.clone(), expiry_tx);
        let (connection, link_task) = ConnectionManager::new(
            Arc::new(Mutex::new(transport)),
            dispatcher.clone(),
            session.countdown_flag(),
            link_rx,
        );

        // Decode notifications and feed the session. This is the single
        // serialization point for all state mutation.
        let process_session = Arc::clone(&session);
        let process_dispatcher = dispatcher.clone();
        let process_task = tokio::spawn(async move {
            while let Some(frame) = frame_rx.recv().await {
                match decode_notification(&frame) {
                    Some(notification) => {
                        process_dispatcher.dispatch(Event::Notification(notification));
                        process_session.apply(notification).await;
                    }
                    None => {
                        tracing::trace!("ignoring frame: {}", hex::encode(&frame));
                    }
                }
            }
        });

        // When the countdown runs out, reconcile with the device and then
        // let the link go idle
        let pending_resync: Arc<Mutex<Option<JoinHandle<()>>>> = Arc::new(Mutex::new(None));
        let expiry_connection = connection.clone();
        let expiry_slot = Arc::clone(&pending_resync);
        let expiry_task = tokio::spawn(async move {
            while expiry_rx.recv().await.is_some() {
                let connection = expiry_connection.clone();
                let mut slot = expiry_slot.lock().await;
                if let Some(task) = slot.take() {
                    task.abort();
                }
                *slot = Some(tokio::spawn(async move {
                    tracing::info!("countdown complete, querying device status");
                    match Command::StatusQuery.encode() {
                        Ok(frame) => {
                            if let Err(e) = connection.write(frame).await {
                                tracing::warn!("status query after countdown failed: {e}");
                                return;
                            }
                        }
                        Err(e) => {
                            tracing::warn!("status query encode failed: {e}");
                            return;
                        }
                    }
                    tokio::time::sleep(POST_COUNTDOWN_SETTLE).await;
                    if let Err(e) = connection.disconnect().await {
                        tracing::warn!("disconnect after countdown failed: {e}");
                    }
                }));
            }
        });

        Self {
            connection,
            session,
            dispatcher,
            process_task: Some(process_task),
            link_task: Some(link_task),
            expiry_task: Some(expiry_task),
            pending_resync,
        }
    }

    /// Connects to the lamp and resynchronizes its state.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Connection`] if the transport cannot be
    /// opened. A failed state resynchronization does not fail the connect;
    /// the session stays usable with default state until the next
    /// successful query.
    pub async fn connect(&self) -> Result<()> {
        self.connection.connect().await
    }

    /// Disconnects from the lamp.
    ///
    /// Skipped while a countdown is running; the session must stay open to
    /// keep receiving countdown notifications. Idempotent otherwise.
    pub async fn disconnect(&self) -> Result<()> {
        self.connection.disconnect().await
    }

    /// Returns true if connected.
    pub async fn is_connected(&self) -> bool {
        self.connection.is_connected().await
    }

    /// Turns the lamp on.
    ///
    /// With a timer configured the device is programmed first (set timer,
    /// settle, power on), the power state is set optimistically, and a
    /// status query reconciles actual device state; the resulting
    /// notification starts the countdown.
    ///
    /// # Errors
    ///
    /// Returns an error if connecting or any write fails.
    pub async fn turn_on(&self) -> Result<()> {
        // The device owns timed shutoff from here; drop any pending
        // post-countdown action
        self.cancel_pending_resync().await;

        let minutes = self.session.timer_duration().await;
        if minutes > 0 {
            tracing::info!("turning on with {minutes} minute timer");
            self.connection
                .write(Command::SetTimer { minutes }.encode()?)
                .await?;
            tokio::time::sleep(TIMER_SETTLE).await;
            self.connection.write(Command::PowerOn.encode()?).await?;
        } else {
            tracing::info!("turning on");
            self.connection.write(Command::PowerOn.encode()?).await?;
        }

        // Give the lamp a moment to switch before claiming it is on
        tokio::time::sleep(POWER_SETTLE).await;
        self.session.set_power(true).await;

        if minutes > 0 {
            // The status reply carries the device's countdown and starts
            // the client-side mirror
            self.query_status().await?;
        }
        Ok(())
    }

    /// Turns the lamp off.
    ///
    /// # Errors
    ///
    /// Returns an error if connecting or the write fails.
    pub async fn turn_off(&self) -> Result<()> {
        self.cancel_pending_resync().await;

        tracing::info!("turning off");
        self.connection.write(Command::PowerOff.encode()?).await?;
        self.session.set_power(false).await;
        Ok(())
    }

    /// Queries the lamp's status.
    ///
    /// State changes come solely from the resulting notification.
    ///
    /// # Errors
    ///
    /// Returns an error if connecting or the write fails.
    pub async fn query_status(&self) -> Result<()> {
        self.connection.write(Command::StatusQuery.encode()?).await
    }

    /// Sets the timer duration used by the next [`turn_on`](Self::turn_on).
    ///
    /// Local configuration only; nothing is sent to the device.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::InvalidTimerDuration`] for minutes outside
    /// 1-60.
    pub async fn set_timer_duration(&self, minutes: u16) -> Result<()> {
        self.session.set_timer_duration(minutes).await
    }

    /// Snapshot of the believed device state.
    pub async fn state(&self) -> DeviceState {
        self.session.state().await
    }

    /// Subscribes to session events.
    #[must_use]
    pub fn subscribe(&self) -> Subscription {
        self.dispatcher.subscribe(None)
    }

    /// Subscribes to session events matching the filter.
    #[must_use]
    pub fn subscribe_filtered(&self, filter: EventFilter) -> Subscription {
        self.dispatcher.subscribe(Some(filter))
    }

    async fn cancel_pending_resync(&self) {
        let mut slot = self.pending_resync.lock().await;
        if let Some(task) = slot.take() {
            tracing::debug!("cancelling pending post-countdown resync");
            task.abort();
        }
    }
}

impl<T> Drop for BlockLight<T> {
    fn drop(&mut self) {
        // Abort background tasks
        if let Some(task) = self.process_task.take() {
            task.abort();
        }
        if let Some(task) = self.link_task.take() {
            task.abort();
        }
        if let Some(task) = self.expiry_task.take() {
            task.abort();
        }
        if let Ok(mut slot) = self.pending_resync.try_lock() {
            if let Some(task) = slot.take() {
                task.abort();
            }
        }
        self.session.abort_countdown();
        self.connection.shutdown();
    }
}
