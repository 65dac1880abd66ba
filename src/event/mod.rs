//! Event system for async notification handling.
//!
//! The session publishes what happens on the link that no caller is waiting
//! for: unsolicited messages, alarms, checksum failures and link loss.
//! Subscribers receive events through a broadcast channel; a slow subscriber
//! skips what it lagged behind on rather than stalling the session.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;

use crate::message::Message;
use crate::protocol::CommandCode;
use crate::types::AlarmKind;

/// Event types that can be dispatched.
#[derive(Debug, Clone)]
pub enum Event {
    /// Connection established.
    Connected,
    /// Connection closed on request.
    Disconnected,
    /// Message pushed by the pump without a matching request.
    Unsolicited(Box<Message>),
    /// Alarm decoded from a notice or a status reply.
    Alarm(AlarmKind),
    /// Inbound frame failed verification; the receive buffer was discarded.
    ChecksumFailure,
    /// Transport reported the link as lost. The session has ended.
    LinkLost { reason: String },
}

impl Event {
    /// Returns the command code of the carried message, if any.
    #[must_use]
    pub fn command(&self) -> Option<CommandCode> {
        match self {
            Self::Unsolicited(message) => Some(message.command()),
            _ => None,
        }
    }
}

/// Subscription filter for specific event types.
#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    /// Only unsolicited messages with one of these command codes.
    pub commands: Option<Vec<CommandCode>>,
    /// Only alarms.
    pub alarms: bool,
}

impl EventFilter {
    /// Creates a filter for unsolicited messages with the given codes.
    #[must_use]
    pub const fn commands(codes: Vec<CommandCode>) -> Self {
        Self {
            commands: Some(codes),
            alarms: false,
        }
    }

    /// Creates a filter for alarm events.
    #[must_use]
    pub const fn alarms() -> Self {
        Self {
            commands: None,
            alarms: true,
        }
    }

    /// Checks if an event matches this filter.
    #[must_use]
    pub fn matches(&self, event: &Event) -> bool {
        if self.alarms && !matches!(event, Event::Alarm(_)) {
            return false;
        }
        match (&self.commands, event.command()) {
            (Some(codes), Some(code)) => codes.contains(&code),
            (Some(_), None) => false,
            (None, _) => true,
        }
    }
}

/// A subscription to events.
pub struct Subscription {
    receiver: broadcast::Receiver<Event>,
    filter: Option<EventFilter>,
}

impl Subscription {
    /// Receives the next event passing the subscription's filter.
    ///
    /// Returns `None` once the dispatcher is gone.
    pub async fn recv(&mut self) -> Option<Event> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => {
                    if self.filter.as_ref().is_none_or(|f| f.matches(&event)) {
                        return Some(event);
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "event subscriber lagged");
                }
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
        // No subscribers is fine.
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

    /// Waits for an event matching the filter with timeout.
    ///
    /// Returns `None` if the timeout expires or the dispatcher is gone.
    pub async fn wait_for(&self, filter: EventFilter, timeout: Duration) -> Option<Event> {
        let mut subscription = self.subscribe(Some(filter));
        tokio::time::timeout(timeout, subscription.recv())
            .await
            .ok()
            .flatten()
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
    fn test_command_filter() {
        let filter = EventFilter::commands(vec![CommandCode::ALARM_NOTICE]);
        let notice = Event::Unsolicited(Box::new(Message::new(
            crate::message::MessageBody::AlarmNotice(None),
        )));
        let status = Event::Unsolicited(Box::new(Message::status()));

        assert!(filter.matches(&notice));
        assert!(!filter.matches(&status));
        assert!(!filter.matches(&Event::ChecksumFailure));
    }

    #[test]
    fn test_alarm_filter() {
        let filter = EventFilter::alarms();
        assert!(filter.matches(&Event::Alarm(AlarmKind::Occlusion)));
        assert!(!filter.matches(&Event::Connected));
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_for_filters_and_times_out() {
        let dispatcher = EventDispatcher::new(16);
        let waiter = {
            let dispatcher = dispatcher.clone();
            tokio::spawn(async move {
                dispatcher
                    .wait_for(EventFilter::alarms(), Duration::from_secs(1))
                    .await
            })
        };
        tokio::task::yield_now().await;

        dispatcher.dispatch(Event::ChecksumFailure);
        dispatcher.dispatch(Event::Alarm(AlarmKind::EmptyReservoir));
        assert!(matches!(
            waiter.await.unwrap(),
            Some(Event::Alarm(AlarmKind::EmptyReservoir))
        ));

        let none = dispatcher
            .wait_for(EventFilter::alarms(), Duration::from_millis(50))
            .await;
        assert!(none.is_none());
    }
}
