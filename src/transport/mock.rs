//! In-memory transport used by connection and client tests.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use tokio::sync::mpsc;

use crate::error::{Error, Result};
use crate::protocol::Opcode;
use crate::transport::{LinkDown, Transport};

/// Shared handle for inspecting and driving a [`MockTransport`] from a test
/// after the transport itself has been moved into the client.
#[derive(Default)]
pub(crate) struct MockShared {
    /// Every frame written, in order.
    pub writes: Mutex<Vec<Bytes>>,
    /// Current link state.
    pub connected: AtomicBool,
    /// Number of successful connects.
    pub connects: AtomicUsize,
    /// Make the next connect attempts fail.
    pub fail_connect: AtomicBool,
    /// Make writes fail.
    pub fail_send: AtomicBool,
    /// Canned notification replayed whenever a status query is written.
    pub status_reply: Mutex<Option<Vec<u8>>>,
    frame_tx: Mutex<Option<mpsc::Sender<Bytes>>>,
    link_tx: Mutex<Option<mpsc::Sender<LinkDown>>>,
}

impl MockShared {
    /// Injects a notification as if the device pushed it.
    pub async fn notify(&self, data: &[u8]) {
        let tx = self
            .frame_tx
            .lock()
            .unwrap()
            .clone()
            .expect("frame sender registered");
        tx.send(Bytes::copy_from_slice(data)).await.unwrap();
    }

    /// Simulates the device dropping the link unexpectedly.
    pub async fn drop_link(&self) {
        self.connected.store(false, Ordering::SeqCst);
        let tx = self.link_tx.lock().unwrap().clone();
        if let Some(tx) = tx {
            let _ = tx.send(LinkDown).await;
        }
    }

    /// Opcodes of every frame written so far, in order.
    pub fn written_opcodes(&self) -> Vec<Opcode> {
        self.writes
            .lock()
            .unwrap()
            .iter()
            .filter_map(|frame| Opcode::from_byte(frame[2]))
            .collect()
    }
}

/// Transport double recording writes and replaying canned notifications.
pub(crate) struct MockTransport {
    shared: Arc<MockShared>,
}

impl MockTransport {
    pub fn new() -> (Self, Arc<MockShared>) {
        let shared = Arc::new(MockShared::default());
        (
            Self {
                shared: Arc::clone(&shared),
            },
            shared,
        )
    }
}

impl Transport for MockTransport {
    fn connect(&mut self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move {
            if self.shared.fail_connect.load(Ordering::SeqCst) {
                return Err(Error::DeviceNotFound {
                    address: "mock".into(),
                });
            }
            self.shared.connected.store(true, Ordering::SeqCst);
            self.shared.connects.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
    }

    fn disconnect(&mut self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move {
            if self.shared.connected.swap(false, Ordering::SeqCst) {
                // The real central reports every disconnect, including the
                // ones we asked for
                let tx = self.shared.link_tx.lock().unwrap().clone();
                if let Some(tx) = tx {
                    let _ = tx.send(LinkDown).await;
                }
            }
            Ok(())
        })
    }

    fn send(&mut self, data: Bytes) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move {
            if !self.shared.connected.load(Ordering::SeqCst) {
                return Err(Error::NotConnected);
            }
            if self.shared.fail_send.load(Ordering::SeqCst) {
                return Err(Error::Command {
                    message: "injected write failure".into(),
                });
            }

            let is_status_query = Opcode::from_byte(data[2]) == Some(Opcode::StatusQuery);
            self.shared.writes.lock().unwrap().push(data);

            if is_status_query {
                let reply = self.shared.status_reply.lock().unwrap().clone();
                if let Some(reply) = reply {
                    let tx = self.shared.frame_tx.lock().unwrap().clone();
                    if let Some(tx) = tx {
                        let _ = tx.send(Bytes::from(reply)).await;
                    }
                }
            }
            Ok(())
        })
    }

    fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::SeqCst)
    }

    fn set_frame_sender(&mut self, tx: mpsc::Sender<Bytes>) {
        *self.shared.frame_tx.lock().unwrap() = Some(tx);
    }

    fn set_link_sender(&mut self, tx: mpsc::Sender<LinkDown>) {
        *self.shared.link_tx.lock().unwrap() = Some(tx);
    }
}
