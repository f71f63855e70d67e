//! Event system for observing the lamp session.
//!
//! Decoded notifications, connection transitions, and state snapshots are
//! broadcast to subscribers. The UI/entity adapter layer consumes these to
//! render the lamp; internal components use filtered waits to synchronize
//! with device replies.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;

use crate::protocol::Notification;
use crate::types::DeviceState;

/// Event types that can be dispatched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// Connection established.
    Connected,
    /// Connection closed, expected or not.
    Disconnected,
    /// A decoded notification arrived from the device.
    Notification(Notification),
    /// The believed device state changed.
    StateChanged(DeviceState),
}

/// Discriminant used for filtering subscriptions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    /// Connection established.
    Connected,
    /// Connection closed.
    Disconnected,
    /// Status notification.
    Status,
    /// Power acknowledgment notification.
    PowerAck,
    /// Timer acknowledgment notification.
    TimerAck,
    /// Device state snapshot changed.
    StateChanged,
}

impl Event {
    /// Returns the kind of this event.
    #[must_use]
    pub const fn kind(&self) -> EventKind {
        match self {
            Self::Connected => EventKind::Connected,
            Self::Disconnected => EventKind::Disconnected,
            Self::Notification(Notification::Status { .. }) => EventKind::Status,
            Self::Notification(Notification::PowerAck { .. }) => EventKind::PowerAck,
            Self::Notification(Notification::TimerAck) => EventKind::TimerAck,
            Self::StateChanged(_) => EventKind::StateChanged,
        }
    }
}

/// Subscription filter for specific event kinds.
#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    /// Kinds to accept; `None` accepts everything.
    pub kinds: Option<Vec<EventKind>>,
}

impl EventFilter {
    /// Creates a filter accepting only the given kinds.
    #[must_use]
    pub const fn kinds(kinds: Vec<EventKind>) -> Self {
        Self { kinds: Some(kinds) }
    }

    /// Checks if an event matches this filter.
    #[must_use]
    pub fn matches(&self, event: &Event) -> bool {
        match &self.kinds {
            Some(kinds) => kinds.contains(&event.kind()),
            None => true,
        }
    }
}

/// A subscription to events.
pub struct Subscription {
    receiver: broadcast::Receiver<Event>,
    filter: Option<EventFilter>,
}

impl Subscription {
    /// Receives the next matching event.
    ///
    /// Lagged subscribers skip missed events rather than erroring. Returns
    /// `None` once the dispatcher is gone.
    pub async fn recv(&mut self) -> Option<Event> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => {
                    let matches = match &self.filter {
                        Some(filter) => filter.matches(&event),
                        None => true,
                    };
                    if matches {
                        return Some(event);
                    }
                }
                Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

struct EventDispatcherInner {
    sender: broadcast::Sender<Event>,
}

/// Dispatches events to subscribers.
#[derive(Clone)]
pub struct EventDispatcher {
    inner: Arc<EventDispatcherInner>,
}

impl EventDispatcher {
    /// Creates a new event dispatcher.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            inner: Arc::new(EventDispatcherInner { sender }),
        }
    }

    /// Dispatches an event to all subscribers.
    pub fn dispatch(&self, event: Event) {
        // No receivers is fine
        let _ = self.inner.sender.send(event);
    }

    /// Subscribes to events with an optional filter.
    #[must_use]
    pub fn subscribe(&self, filter: Option<EventFilter>) -> Subscription {
        Subscription {
            receiver: self.inner.sender.subscribe(),
            filter,
        }
    }

    /// Waits for an event matching the filter.
    ///
    /// Returns `None` if the timeout expires or the dispatcher is closed.
    /// Subscribe before triggering the event you wait for; events are only
    /// delivered to subscriptions that exist at dispatch time.
    pub async fn wait_for(&self, filter: EventFilter, timeout: Duration) -> Option<Event> {
        let mut subscription = self.subscribe(Some(filter));
        tokio::select! {
            biased;
            event = subscription.recv() => event,
            () = tokio::time::sleep(timeout) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_event_dispatch() {
        let dispatcher = EventDispatcher::new(16);
        let mut sub = dispatcher.subscribe(None);

        dispatcher.dispatch(Event::Connected);

        let event = tokio::time::timeout(Duration::from_millis(100), sub.recv())
            .await
            .unwrap();

        assert!(matches!(event, Some(Event::Connected)));
    }

    #[test]
    fn test_event_filter() {
        let filter = EventFilter::kinds(vec![EventKind::Status, EventKind::TimerAck]);

        assert!(filter.matches(&Event::Notification(Notification::Status {
            is_on: true,
            initial_secs: 900,
            remaining_secs: 45,
        })));
        assert!(filter.matches(&Event::Notification(Notification::TimerAck)));
        assert!(!filter.matches(&Event::Connected));
        assert!(!filter.matches(&Event::Notification(Notification::PowerAck {
            is_on: false
        })));
    }

    #[tokio::test]
    async fn test_filtered_subscription_skips_other_kinds() {
        let dispatcher = EventDispatcher::new(16);
        let mut sub = dispatcher.subscribe(Some(EventFilter::kinds(vec![EventKind::PowerAck])));

        dispatcher.dispatch(Event::Connected);
        dispatcher.dispatch(Event::Notification(Notification::PowerAck { is_on: true }));

        let event = tokio::time::timeout(Duration::from_millis(100), sub.recv())
            .await
            .unwrap();

        assert_eq!(
            event,
            Some(Event::Notification(Notification::PowerAck { is_on: true }))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_for_times_out() {
        let dispatcher = EventDispatcher::new(16);
        let event = dispatcher
            .wait_for(
                EventFilter::kinds(vec![EventKind::Status]),
                Duration::from_millis(50),
            )
            .await;
        assert!(event.is_none());
    }
}
