//! Connection lifecycle management.
//!
//! Owns the transport handle: lazy connect/reconnect, the connect-time
//! status resynchronization, the idle-disconnect timer, and the
//! countdown-aware teardown policy. Unexpected link loss is never surfaced
//! to callers; the next operation reconnects transparently.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;

use crate::error::{Error, Result};
use crate::event::{Event, EventDispatcher, EventFilter, EventKind};
use crate::protocol::encode_status_query;
use crate::transport::{LinkDown, Transport};

/// Inactivity window before the link is dropped to free the device's
/// connection slot.
pub(crate) const IDLE_DISCONNECT_DELAY: Duration = Duration::from_secs(120);

/// Attempts made to resynchronize device state right after connecting.
const STATUS_SYNC_ATTEMPTS: u32 = 3;

/// Backoff between resynchronization attempts.
const STATUS_SYNC_BACKOFF: Duration = Duration::from_secs(1);

/// How long each resynchronization attempt waits for a status reply.
const STATUS_SYNC_REPLY_TIMEOUT: Duration = Duration::from_secs(2);

struct ConnectionInner<T> {
    transport: Arc<Mutex<T>>,
    dispatcher: EventDispatcher,
    countdown_active: Arc<AtomicBool>,
    expected_disconnect: AtomicBool,
    idle_disconnect: Mutex<Option<JoinHandle<()>>>,
}

/// Manages the transport session for one device.
pub(crate) struct ConnectionManager<T> {
    inner: Arc<ConnectionInner<T>>,
}

impl<T> Clone for ConnectionManager<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Transport + 'static> ConnectionManager<T> {
    /// Creates a manager and spawns the link watcher consuming `link_rx`.
    ///
    /// The returned task handle belongs to the caller; abort it on teardown.
    pub(crate) fn new(
        transport: Arc<Mutex<T>>,
        dispatcher: EventDispatcher,
        countdown_active: Arc<AtomicBool>,
        mut link_rx: mpsc::Receiver<LinkDown>,
    ) -> (Self, JoinHandle<()>) {
        let manager = Self {
            inner: Arc::new(ConnectionInner {
                transport,
                dispatcher,
                countdown_active,
                expected_disconnect: AtomicBool::new(false),
                idle_disconnect: Mutex::new(None),
            }),
        };

        let watcher = manager.clone();
        let link_task = tokio::spawn(async move {
            while link_rx.recv().await.is_some() {
                watcher.on_link_down();
            }
        });

        (manager, link_task)
    }

    fn on_link_down(&self) {
        if self.inner.expected_disconnect.swap(false, Ordering::SeqCst) {
            tracing::debug!("expected disconnect");
        } else {
            tracing::warn!("unexpected disconnect; reconnecting on the next command");
        }
        self.inner.dispatcher.dispatch(Event::Disconnected);
    }

    pub(crate) async fn is_connected(&self) -> bool {
        self.inner.transport.lock().await.is_connected()
    }

    fn countdown_active(&self) -> bool {
        self.inner.countdown_active.load(Ordering::SeqCst)
    }

    /// Opens the transport if needed and resynchronizes device state.
    ///
    /// A no-op when already connected. Resynchronization exhausting its
    /// retries degrades to stale/default state instead of failing the
    /// connect; the next successful query catches the session up.
    pub(crate) async fn connect(&self) -> Result<()> {
        {
            let mut transport = self.inner.transport.lock().await;
            if transport.is_connected() {
                return Ok(());
            }
            transport.connect().await.map_err(|e| match e {
                e @ Error::Connection { .. } => e,
                other => Error::Connection {
                    message: other.to_string(),
                },
            })?;
        }
        self.inner.dispatcher.dispatch(Event::Connected);

        tracing::info!("querying device status to sync state");
        self.sync_status().await;
        Ok(())
    }

    async fn sync_status(&self) {
        for attempt in 1..=STATUS_SYNC_ATTEMPTS {
            match self.query_status_once().await {
                Ok(()) => return,
                Err(e) if attempt < STATUS_SYNC_ATTEMPTS => {
                    tracing::warn!("status sync attempt {attempt} failed, retrying: {e}");
                    tokio::time::sleep(STATUS_SYNC_BACKOFF).await;
                }
                Err(e) => {
                    tracing::error!(
                        "failed to sync status after {STATUS_SYNC_ATTEMPTS} attempts: {e}"
                    );
                }
            }
        }
    }

    async fn query_status_once(&self) -> Result<()> {
        // Subscribe before writing so a fast reply cannot be missed
        let mut subscription = self
            .inner
            .dispatcher
            .subscribe(Some(EventFilter::kinds(vec![EventKind::Status])));

        self.send_frame(encode_status_query()).await?;

        let timeout_ms = STATUS_SYNC_REPLY_TIMEOUT.as_millis() as u64;
        tokio::select! {
            biased;
            event = subscription.recv() => match event {
                Some(_) => Ok(()),
                None => Err(Error::Timeout { timeout_ms }),
            },
            () = tokio::time::sleep(STATUS_SYNC_REPLY_TIMEOUT) => {
                Err(Error::Timeout { timeout_ms })
            }
        }
    }

    /// Writes a frame, reconnecting first if the link is down.
    pub(crate) async fn write(&self, frame: Bytes) -> Result<()> {
        if !self.is_connected().await {
            self.connect().await?;
        }
        self.send_frame(frame).await
    }

    /// Writes on the already-open session and re-arms the idle timer.
    async fn send_frame(&self, frame: Bytes) -> Result<()> {
        self.cancel_idle_disconnect().await;
        {
            let mut transport = self.inner.transport.lock().await;
            transport.send(frame).await.map_err(|e| match e {
                e @ (Error::Command { .. } | Error::NotConnected) => e,
                other => Error::Command {
                    message: other.to_string(),
                },
            })?;
        }
        self.arm_idle_disconnect().await;
        Ok(())
    }

    async fn cancel_idle_disconnect(&self) {
        let mut slot = self.inner.idle_disconnect.lock().await;
        if let Some(task) = slot.take() {
            task.abort();
        }
    }

    async fn arm_idle_disconnect(&self) {
        let mut slot = self.inner.idle_disconnect.lock().await;
        // Cancel-and-replace keeps at most one pending timer
        if let Some(task) = slot.take() {
            task.abort();
        }
        if self.countdown_active() {
            tracing::debug!("idle disconnect suppressed while countdown is active");
            return;
        }

        let manager = self.clone();
        *slot = Some(tokio::spawn(async move {
            tokio::time::sleep(IDLE_DISCONNECT_DELAY).await;
            // The countdown may have started during the wait
            if manager.countdown_active() {
                tracing::debug!("skipping idle disconnect - countdown is active");
                return;
            }
            tracing::debug!("idle timeout");
            if let Err(e) = manager.teardown().await {
                tracing::warn!("idle disconnect failed: {e}");
            }
        }));
    }

    /// Closes the session unless a countdown needs it to stay open.
    ///
    /// Idempotent; never errors because the link is already down.
    pub(crate) async fn disconnect(&self) -> Result<()> {
        if self.countdown_active() {
            tracing::debug!("skipping disconnect - countdown is active");
            return Ok(());
        }
        self.cancel_idle_disconnect().await;
        self.teardown().await
    }

    async fn teardown(&self) -> Result<()> {
        let mut transport = self.inner.transport.lock().await;
        if !transport.is_connected() {
            return Ok(());
        }

        self.inner.expected_disconnect.store(true, Ordering::SeqCst);
        transport.disconnect().await.map_err(|e| match e {
            e @ Error::Connection { .. } => e,
            other => Error::Connection {
                message: other.to_string(),
            },
        })?;
        // The link watcher dispatches Disconnected once the central reports
        // the drop
        Ok(())
    }

}

impl<T> ConnectionManager<T> {
    /// Best-effort cleanup for drop paths that cannot await.
    pub(crate) fn shutdown(&self) {
        if let Ok(mut slot) = self.inner.idle_disconnect.try_lock() {
            if let Some(task) = slot.take() {
                task.abort();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{Opcode, decode_notification, encode_power};
    use crate::transport::mock::{MockShared, MockTransport};

    /// Status: on, initial 900s, remaining 45s.
    const STATUS_ON: [u8; 10] = [0x2A, 0x00, 0x10, 0x00, 0x00, 0x01, 0x03, 0x84, 0x00, 0x2D];
    /// Status: off, no timer.
    const STATUS_OFF: [u8; 10] = [0x2A, 0x00, 0x10, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00];

    struct Fixture {
        manager: ConnectionManager<MockTransport>,
        shared: Arc<MockShared>,
        dispatcher: EventDispatcher,
        countdown_active: Arc<AtomicBool>,
        _link_task: JoinHandle<()>,
        _pump_task: JoinHandle<()>,
    }

    /// Manager wired to a mock transport, with a stand-in for the client's
    /// frame processing task pumping notifications into the dispatcher.
    fn fixture() -> Fixture {
        let (mut transport, shared) = MockTransport::new();
        let dispatcher = EventDispatcher::new(64);
        let (frame_tx, mut frame_rx) = mpsc::channel(64);
        let (link_tx, link_rx) = mpsc::channel(8);
        transport.set_frame_sender(frame_tx);
        transport.set_link_sender(link_tx);

        let pump_dispatcher = dispatcher.clone();
        let pump_task = tokio::spawn(async move {
            while let Some(frame) = frame_rx.recv().await {
                if let Some(notification) = decode_notification(&frame) {
                    pump_dispatcher.dispatch(Event::Notification(notification));
                }
            }
        });

        let countdown_active = Arc::new(AtomicBool::new(false));
        let (manager, link_task) = ConnectionManager::new(
            Arc::new(Mutex::new(transport)),
            dispatcher.clone(),
            Arc::clone(&countdown_active),
            link_rx,
        );

        Fixture {
            manager,
            shared,
            dispatcher,
            countdown_active,
            _link_task: link_task,
            _pump_task: pump_task,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_resyncs_state() {
        let f = fixture();
        *f.shared.status_reply.lock().unwrap() = Some(STATUS_ON.to_vec());

        f.manager.connect().await.unwrap();

        assert!(f.manager.is_connected().await);
        assert_eq!(f.shared.connects.load(Ordering::SeqCst), 1);
        assert_eq!(f.shared.written_opcodes(), vec![Opcode::StatusQuery]);

        // Connecting again is a no-op
        f.manager.connect().await.unwrap();
        assert_eq!(f.shared.connects.load(Ordering::SeqCst), 1);
        assert_eq!(f.shared.written_opcodes(), vec![Opcode::StatusQuery]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_retries_resync_but_still_succeeds() {
        // No canned reply: every resync attempt times out
        let f = fixture();

        f.manager.connect().await.unwrap();

        assert!(f.manager.is_connected().await);
        assert_eq!(
            f.shared.written_opcodes(),
            vec![Opcode::StatusQuery, Opcode::StatusQuery, Opcode::StatusQuery]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_failure_propagates() {
        let f = fixture();
        f.shared.fail_connect.store(true, Ordering::SeqCst);

        let err = f.manager.connect().await.unwrap_err();
        assert!(matches!(err, Error::Connection { .. }));
        assert!(!f.manager.is_connected().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_write_lazily_reconnects() {
        let f = fixture();
        *f.shared.status_reply.lock().unwrap() = Some(STATUS_OFF.to_vec());

        f.manager.write(encode_power(true)).await.unwrap();

        assert_eq!(f.shared.connects.load(Ordering::SeqCst), 1);
        assert_eq!(
            f.shared.written_opcodes(),
            vec![Opcode::StatusQuery, Opcode::Power]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_write_failure_is_command_error() {
        let f = fixture();
        *f.shared.status_reply.lock().unwrap() = Some(STATUS_OFF.to_vec());
        f.manager.connect().await.unwrap();

        f.shared.fail_send.store(true, Ordering::SeqCst);
        let err = f.manager.write(encode_power(true)).await.unwrap_err();
        assert!(matches!(err, Error::Command { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_skipped_while_countdown_active() {
        let f = fixture();
        *f.shared.status_reply.lock().unwrap() = Some(STATUS_ON.to_vec());
        f.manager.connect().await.unwrap();

        f.countdown_active.store(true, Ordering::SeqCst);
        f.manager.disconnect().await.unwrap();
        assert!(f.manager.is_connected().await);

        f.countdown_active.store(false, Ordering::SeqCst);
        f.manager.disconnect().await.unwrap();
        assert!(!f.manager.is_connected().await);

        // Safe to call twice in a row
        f.manager.disconnect().await.unwrap();
        assert!(!f.manager.is_connected().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unexpected_drop_reconnects_on_next_write() {
        let f = fixture();
        *f.shared.status_reply.lock().unwrap() = Some(STATUS_OFF.to_vec());
        let mut sub = f
            .dispatcher
            .subscribe(Some(EventFilter::kinds(vec![EventKind::Disconnected])));

        f.manager.connect().await.unwrap();
        f.shared.drop_link().await;

        let event = tokio::time::timeout(Duration::from_millis(100), sub.recv())
            .await
            .unwrap();
        assert_eq!(event, Some(Event::Disconnected));

        // No error surfaced; the next write transparently reconnects
        f.manager.write(encode_power(true)).await.unwrap();
        assert_eq!(f.shared.connects.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_disconnect_fires_after_inactivity() {
        let f = fixture();
        *f.shared.status_reply.lock().unwrap() = Some(STATUS_OFF.to_vec());
        f.manager.connect().await.unwrap();

        tokio::time::sleep(IDLE_DISCONNECT_DELAY + Duration::from_secs(1)).await;
        assert!(!f.manager.is_connected().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_disconnect_suppressed_during_countdown() {
        let f = fixture();
        *f.shared.status_reply.lock().unwrap() = Some(STATUS_OFF.to_vec());
        f.manager.connect().await.unwrap();

        f.countdown_active.store(true, Ordering::SeqCst);
        f.manager.write(encode_power(true)).await.unwrap();

        tokio::time::sleep(IDLE_DISCONNECT_DELAY + Duration::from_secs(1)).await;
        assert!(f.manager.is_connected().await);
    }
}
