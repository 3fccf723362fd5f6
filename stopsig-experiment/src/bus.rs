//! Synchronous, typed publish/subscribe.
//!
//! Handlers run inline inside [`EventBus::publish`], in the order they were
//! subscribed. `publish` returns only after every matching handler ran, so a
//! caller that inspects shared state right after publishing always sees every
//! listener's update. Handlers do not receive the bus and cannot publish.

use stopsig_core::{Envelope, Event, EventKind, Source};

pub type Handler = Box<dyn FnMut(&Envelope) + Send>;

/// Returned by [`EventBus::subscribe`]; identifies the handler for removal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

struct Subscription {
    id: SubscriptionId,
    kind: EventKind,
    handler: Handler,
}

#[derive(Default)]
pub struct EventBus {
    subscriptions: Vec<Subscription>,
    next_id: u64,
}

impl EventBus {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe<F>(&mut self, kind: EventKind, handler: F) -> SubscriptionId
    where
        F: FnMut(&Envelope) + Send + 'static,
    {
        let id = SubscriptionId(self.next_id);
        self.next_id += 1;
        self.subscriptions.push(Subscription {
            id,
            kind,
            handler: Box::new(handler),
        });
        id
    }

    /// Removes a handler. Returns `false` if it was not subscribed to `kind`.
    pub fn unsubscribe(&mut self, kind: EventKind, id: SubscriptionId) -> bool {
        let before = self.subscriptions.len();
        self.subscriptions.retain(|sub| !(sub.id == id && sub.kind == kind));
        before != self.subscriptions.len()
    }

    /// Delivers `event` to every handler of its kind. No subscribers is a no-op.
    pub fn publish(&mut self, source: Source, event: Event) {
        let envelope = Envelope::new(source, event);
        let kind = envelope.kind();
        tracing::trace!(?kind, ?source, "publish");
        for sub in self.subscriptions.iter_mut().filter(|sub| sub.kind == kind) {
            (sub.handler)(&envelope);
        }
    }

    pub fn subscriber_count(&self, kind: EventKind) -> usize {
        self.subscriptions
            .iter()
            .filter(|sub| sub.kind == kind)
            .count()
    }

    pub fn clear(&mut self) {
        self.subscriptions.clear();
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("subscriptions", &self.subscriptions.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::Arc;
    use stopsig_core::Side;

    #[test]
    fn delivers_in_subscription_order() {
        let mut bus = EventBus::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        for tag in ["first", "second", "third"] {
            let seen = Arc::clone(&seen);
            bus.subscribe(EventKind::BusyChanged, move |_| seen.lock().push(tag));
        }
        bus.publish(
            Source::Stimulus(Side::Left),
            Event::BusyChanged { busy: true },
        );
        assert_eq!(*seen.lock(), vec!["first", "second", "third"]);
    }

    #[test]
    fn only_matching_kind_is_delivered() {
        let mut bus = EventBus::new();
        let hits = Arc::new(Mutex::new(0));
        let counter = Arc::clone(&hits);
        bus.subscribe(EventKind::FeedbackShowing, move |env| {
            assert_eq!(env.source, Source::Presenter);
            *counter.lock() += 1;
        });
        bus.publish(Source::Orchestrator, Event::TrialInitiated { index: 0 });
        bus.publish(Source::Presenter, Event::FeedbackShowing { showing: true });
        assert_eq!(*hits.lock(), 1);
    }

    #[test]
    fn unsubscribe_removes_only_that_handler() {
        let mut bus = EventBus::new();
        let hits = Arc::new(Mutex::new(Vec::new()));
        let a = Arc::clone(&hits);
        let b = Arc::clone(&hits);
        let first = bus.subscribe(EventKind::ResponseRegistered, move |_| a.lock().push(1));
        bus.subscribe(EventKind::ResponseRegistered, move |_| b.lock().push(2));

        assert!(!bus.unsubscribe(EventKind::BusyChanged, first));
        assert!(bus.unsubscribe(EventKind::ResponseRegistered, first));
        assert!(!bus.unsubscribe(EventKind::ResponseRegistered, first));

        bus.publish(Source::Stimulus(Side::Right), Event::ResponseRegistered);
        assert_eq!(*hits.lock(), vec![2]);
    }

    #[test]
    fn publish_without_subscribers_is_a_no_op() {
        let mut bus = EventBus::new();
        bus.publish(Source::Orchestrator, Event::AnimationChanged { running: false });
        assert_eq!(bus.subscriber_count(EventKind::AnimationChanged), 0);
    }

    #[test]
    fn clear_drops_every_subscription() {
        let mut bus = EventBus::new();
        bus.subscribe(EventKind::BusyChanged, |_| {});
        bus.subscribe(EventKind::TrialResolved, |_| {});
        bus.clear();
        assert_eq!(bus.subscriber_count(EventKind::BusyChanged), 0);
        assert_eq!(bus.subscriber_count(EventKind::TrialResolved), 0);
    }
}
