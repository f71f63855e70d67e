//! Device session state machine.
//!
//! Holds the believed lamp state, applies decoded notifications, and drives
//! the client-side countdown that mirrors the device's internal shutoff
//! timer. Status observations are the sole authority over the countdown:
//! it is started and stopped from the most recent remaining-seconds value,
//! never invented locally.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;

use crate::error::{Error, Result};
use crate::event::{Event, EventDispatcher};
use crate::protocol::Notification;
use crate::types::{DeviceState, MAX_TIMER_DURATION_MINS, MIN_TIMER_DURATION_MINS};

/// Interval between countdown updates.
pub(crate) const COUNTDOWN_INTERVAL: Duration = Duration::from_secs(1);

/// Serialized reducer over [`DeviceState`].
pub(crate) struct Session {
    state: Mutex<DeviceState>,
    countdown: Mutex<Option<JoinHandle<()>>>,
    countdown_active: Arc<AtomicBool>,
    dispatcher: EventDispatcher,
    expiry_tx: mpsc::Sender<()>,
}

impl Session {
    pub(crate) fn new(dispatcher: EventDispatcher, expiry_tx: mpsc::Sender<()>) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(DeviceState::default()),
            countdown: Mutex::new(None),
            countdown_active: Arc::new(AtomicBool::new(false)),
            dispatcher,
            expiry_tx,
        })
    }

    /// Snapshot of the believed device state.
    pub(crate) async fn state(&self) -> DeviceState {
        *self.state.lock().await
    }

    /// Flag shared with the connection manager so teardown decisions can see
    /// whether a countdown is running.
    pub(crate) fn countdown_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.countdown_active)
    }

    pub(crate) async fn timer_duration(&self) -> u16 {
        self.state.lock().await.timer_duration_mins
    }

    /// Applies a decoded notification.
    pub(crate) async fn apply(self: &Arc<Self>, notification: Notification) {
        match notification {
            Notification::Status {
                is_on,
                remaining_secs,
                ..
            } => {
                let changed = {
                    let mut state = self.state.lock().await;
                    if is_on == state.is_on && remaining_secs == state.timer_remaining_secs {
                        None
                    } else {
                        state.is_on = is_on;
                        state.timer_remaining_secs = remaining_secs;
                        Some(*state)
                    }
                };
                if let Some(state) = changed {
                    tracing::info!(
                        "device state updated: {}, {} seconds remaining",
                        if state.is_on { "on" } else { "off" },
                        state.timer_remaining_secs
                    );
                    self.dispatcher.dispatch(Event::StateChanged(state));
                }

                // The most recent status observation decides whether the
                // countdown runs, whatever it was doing before
                if remaining_secs > 0 && !self.countdown_active.load(Ordering::SeqCst) {
                    self.start_countdown().await;
                } else if remaining_secs == 0 && self.countdown_active.load(Ordering::SeqCst) {
                    self.stop_countdown().await;
                }
            }
            Notification::PowerAck { is_on } => {
                self.set_power(is_on).await;
            }
            Notification::TimerAck => {
                tracing::debug!("timer command acknowledged");
            }
        }
    }

    /// Power update, optimistic or acknowledged. Timer fields untouched.
    pub(crate) async fn set_power(&self, is_on: bool) {
        let changed = {
            let mut state = self.state.lock().await;
            if state.is_on == is_on {
                None
            } else {
                state.is_on = is_on;
                Some(*state)
            }
        };
        if let Some(state) = changed {
            tracing::debug!("power state updated: {}", if is_on { "on" } else { "off" });
            self.dispatcher.dispatch(Event::StateChanged(state));
        }
    }

    /// Local configuration mutation; talks to the device only on the next
    /// turn-on.
    pub(crate) async fn set_timer_duration(&self, minutes: u16) -> Result<()> {
        if !(MIN_TIMER_DURATION_MINS..=MAX_TIMER_DURATION_MINS).contains(&minutes) {
            return Err(Error::InvalidTimerDuration { minutes });
        }

        let changed = {
            let mut state = self.state.lock().await;
            if state.timer_duration_mins == minutes {
                None
            } else {
                state.timer_duration_mins = minutes;
                Some(*state)
            }
        };
        if let Some(state) = changed {
            tracing::debug!("timer duration set to {minutes} minutes");
            self.dispatcher.dispatch(Event::StateChanged(state));
        }
        Ok(())
    }

    async fn start_countdown(self: &Arc<Self>) {
        let mut slot = self.countdown.lock().await;
        // Cancel-and-replace keeps at most one countdown alive
        if let Some(task) = slot.take() {
            task.abort();
        }
        self.countdown_active.store(true, Ordering::SeqCst);
        tracing::debug!("starting countdown");

        let session = Arc::clone(self);
        *slot = Some(tokio::spawn(async move {
            loop {
                tokio::time::sleep(COUNTDOWN_INTERVAL).await;
                if session.tick().await == 0 {
                    break;
                }
            }
            session.countdown_active.store(false, Ordering::SeqCst);
            tracing::info!("countdown complete");
            let _ = session.expiry_tx.send(()).await;
        }));
    }

    async fn stop_countdown(&self) {
        let mut slot = self.countdown.lock().await;
        if let Some(task) = slot.take() {
            tracing::debug!("stopping countdown");
            task.abort();
        }
        self.countdown_active.store(false, Ordering::SeqCst);
    }

    /// One countdown step. Returns the remaining seconds after decrementing.
    async fn tick(&self) -> u16 {
        let state = {
            let mut state = self.state.lock().await;
            state.timer_remaining_secs = state.timer_remaining_secs.saturating_sub(1);
            *state
        };
        tracing::trace!("countdown: {} seconds remaining", state.timer_remaining_secs);
        self.dispatcher.dispatch(Event::StateChanged(state));
        state.timer_remaining_secs
    }

    /// Best-effort countdown abort for drop paths that cannot await.
    pub(crate) fn abort_countdown(&self) {
        if let Ok(mut slot) = self.countdown.try_lock() {
            if let Some(task) = slot.take() {
                task.abort();
            }
        }
        self.countdown_active.store(false, Ordering::SeqCst);
    }
}
