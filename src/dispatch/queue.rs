use std::{
    collections::VecDeque,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::{
    error::EventError,
    types::{BlueprintEvent, RawEvent, ValueChanged, ValueRemoved},
};

use super::observers::{ObserverList, SubscriptionId};

pub type ValueChangedCallback = dyn Fn(&str, &str) + Send + Sync;
pub type ValueRemovedCallback = dyn Fn(&str) + Send + Sync;

/// A decoded notification waiting for the next drain.
pub type PendingAction = Box<dyn FnOnce() + Send>;

/// Buffers contract notifications received on the transport side until the
/// host drains them on its own thread.
///
/// Subscribers are never called from `on_raw_event`; they only run inside
/// `drain`, in the order the events were received.
pub struct EventDispatchQueue {
    pending: Mutex<VecDeque<PendingAction>>,
    draining: AtomicBool,
    value_changed: Arc<ObserverList<ValueChangedCallback>>,
    value_removed: Arc<ObserverList<ValueRemovedCallback>>,
}

impl EventDispatchQueue {
    pub fn new() -> Self {
        Self {
            pending: Mutex::new(VecDeque::new()),
            draining: AtomicBool::new(false),
            value_changed: Arc::new(ObserverList::new()),
            value_removed: Arc::new(ObserverList::new()),
        }
    }

    pub fn subscribe_value_changed(
        &self,
        callback: impl Fn(&str, &str) + Send + Sync + 'static,
    ) -> SubscriptionId {
        self.value_changed.subscribe(Arc::new(callback))
    }

    pub fn subscribe_value_removed(
        &self,
        callback: impl Fn(&str) + Send + Sync + 'static,
    ) -> SubscriptionId {
        self.value_removed.subscribe(Arc::new(callback))
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.value_changed.unsubscribe(id) || self.value_removed.unsubscribe(id)
    }

    /// Decodes a raw contract event and queues its delivery.
    ///
    /// On error nothing is queued and already pending notifications are left
    /// as they were.
    pub fn on_raw_event(&self, event: &RawEvent) -> Result<(), EventError> {
        match BlueprintEvent::decode(event)? {
            BlueprintEvent::ValueChanged(ValueChanged { key, value }) => {
                let observers = Arc::clone(&self.value_changed);
                self.enqueue(move || {
                    observers.notify(|callback| callback(key.as_str(), value.as_str()));
                });
            }
            BlueprintEvent::ValueRemoved(ValueRemoved { key }) => {
                let observers = Arc::clone(&self.value_removed);
                self.enqueue(move || {
                    observers.notify(|callback| callback(key.as_str()));
                });
            }
        }

        trace!(event = %event.name, "Queued contract event");
        Ok(())
    }

    pub fn enqueue(&self, action: impl FnOnce() + Send + 'static) {
        self.pending.lock().push_back(Box::new(action));
    }

    /// Runs the actions that were pending when the call started, oldest
    /// first, and returns how many ran.
    ///
    /// Actions queued while draining are left for the next call. Calling
    /// `drain` from inside a subscriber returns 0 without running anything.
    pub fn drain(&self) -> usize {
        let batch = self.pending.lock().len();
        if batch == 0 {
            return 0;
        }

        let Some(_guard) = DrainGuard::acquire(&self.draining) else {
            return 0;
        };

        let mut invoked = 0;
        while invoked < batch {
            // The lock must be released before the action runs.
            let action = self.pending.lock().pop_front();
            let Some(action) = action else { break };
            action();
            invoked += 1;
        }

        debug!(invoked, "Drained contract events");
        invoked
    }

    pub fn len(&self) -> usize {
        self.pending.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for EventDispatchQueue {
    fn default() -> Self {
        Self::new()
    }
}

struct DrainGuard<'a>(&'a AtomicBool);

impl<'a> DrainGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::atomic::AtomicUsize, thread};

    use rstest::rstest;

    use super::*;

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum Seen {
        Changed(String, String),
        Removed(String),
    }

    fn recording_queue() -> (Arc<EventDispatchQueue>, Arc<Mutex<Vec<Seen>>>) {
        let queue = Arc::new(EventDispatchQueue::new());
        let seen = Arc::new(Mutex::new(Vec::new()));

        let sink = Arc::clone(&seen);
        queue.subscribe_value_changed(move |key, value| {
            sink.lock()
                .push(Seen::Changed(key.to_string(), value.to_string()))
        });
        let sink = Arc::clone(&seen);
        queue.subscribe_value_removed(move |key| sink.lock().push(Seen::Removed(key.to_string())));

        (queue, seen)
    }

    #[test]
    fn test_value_changed_delivered_once() {
        let (queue, seen) = recording_queue();

        queue
            .on_raw_event(&RawEvent::value_changed("a", "b").unwrap())
            .unwrap();
        assert!(seen.lock().is_empty());

        assert_eq!(queue.drain(), 1);
        assert_eq!(
            *seen.lock(),
            vec![Seen::Changed("a".to_string(), "b".to_string())]
        );

        assert_eq!(queue.drain(), 0);
        assert_eq!(seen.lock().len(), 1);
    }

    #[test]
    fn test_drain_empty_queue() {
        let (queue, seen) = recording_queue();

        assert_eq!(queue.drain(), 0);
        assert!(seen.lock().is_empty());
    }

    #[test]
    fn test_drain_preserves_arrival_order() {
        let (queue, seen) = recording_queue();
        let events = vec![
            RawEvent::value_changed("a", "1").unwrap(),
            RawEvent::value_removed("a").unwrap(),
            RawEvent::value_changed("b", "2").unwrap(),
            RawEvent::value_changed("a", "3").unwrap(),
            RawEvent::value_removed("b").unwrap(),
        ];

        for event in &events {
            queue.on_raw_event(event).unwrap();
        }

        assert_eq!(queue.drain(), events.len());
        assert_eq!(
            *seen.lock(),
            vec![
                Seen::Changed("a".to_string(), "1".to_string()),
                Seen::Removed("a".to_string()),
                Seen::Changed("b".to_string(), "2".to_string()),
                Seen::Changed("a".to_string(), "3".to_string()),
                Seen::Removed("b".to_string()),
            ]
        );
    }

    #[rstest]
    #[case::unknown_tag(RawEvent::new("Foo", Vec::new()), "Foo")]
    #[case::truncated_payload(RawEvent::new("ValueChanged", vec![9, 0, 0, 0]), "ValueChanged")]
    fn test_rejected_event_keeps_pending_actions(#[case] bad: RawEvent, #[case] tag: &str) {
        let (queue, seen) = recording_queue();
        queue
            .on_raw_event(&RawEvent::value_removed("kept").unwrap())
            .unwrap();

        let error = queue.on_raw_event(&bad).unwrap_err();

        assert_eq!(error.tag(), tag);
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.drain(), 1);
        assert_eq!(*seen.lock(), vec![Seen::Removed("kept".to_string())]);
    }

    #[test]
    fn test_unknown_event_is_reported_as_unknown() {
        let queue = EventDispatchQueue::new();

        let error = queue.on_raw_event(&RawEvent::new("Foo", Vec::new())).unwrap_err();

        assert!(matches!(error, EventError::UnknownEvent { ref tag } if tag == "Foo"));
        assert!(queue.is_empty());
    }

    #[test]
    fn test_value_changed_does_not_notify_removed_subscribers() {
        let queue = EventDispatchQueue::new();
        let removed_calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&removed_calls);
        queue.subscribe_value_removed(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        queue
            .on_raw_event(&RawEvent::value_changed("a", "b").unwrap())
            .unwrap();
        queue.drain();

        assert_eq!(removed_calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_actions_queued_during_drain_wait_for_next_drain() {
        let queue = Arc::new(EventDispatchQueue::new());
        let order = Arc::new(Mutex::new(Vec::new()));

        let inner_queue = Arc::clone(&queue);
        let inner_order = Arc::clone(&order);
        queue.enqueue(move || {
            inner_order.lock().push("first");
            let later_order = Arc::clone(&inner_order);
            inner_queue.enqueue(move || later_order.lock().push("queued while draining"));
        });

        assert_eq!(queue.drain(), 1);
        assert_eq!(*order.lock(), vec!["first"]);
        assert_eq!(queue.len(), 1);

        assert_eq!(queue.drain(), 1);
        assert_eq!(*order.lock(), vec!["first", "queued while draining"]);
    }

    #[test]
    fn test_reentrant_drain_is_noop() {
        let queue = Arc::new(EventDispatchQueue::new());
        let nested = Arc::new(AtomicUsize::new(usize::MAX));

        let inner_queue = Arc::clone(&queue);
        let inner_nested = Arc::clone(&nested);
        queue.enqueue(move || {
            inner_nested.store(inner_queue.drain(), Ordering::SeqCst);
        });
        queue.enqueue(|| {});

        assert_eq!(queue.drain(), 2);
        assert_eq!(nested.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_unsubscribed_callback_is_not_invoked() {
        let queue = EventDispatchQueue::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let id = queue.subscribe_value_changed(move |_, _| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        queue
            .on_raw_event(&RawEvent::value_changed("a", "b").unwrap())
            .unwrap();
        assert!(queue.unsubscribe(id));
        queue.drain();

        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_concurrent_producer_and_consumer() {
        const EVENTS: usize = 2_000;

        let (queue, seen) = recording_queue();

        let producer_queue = Arc::clone(&queue);
        let producer = thread::spawn(move || {
            for index in 0..EVENTS {
                let event = RawEvent::value_changed(&index.to_string(), "v").unwrap();
                producer_queue.on_raw_event(&event).unwrap();
            }
        });

        let mut delivered = 0;
        while !producer.is_finished() {
            delivered += queue.drain();
            thread::yield_now();
        }
        producer.join().unwrap();
        delivered += queue.drain();

        assert_eq!(delivered, EVENTS);
        let keys: Vec<String> = seen
            .lock()
            .iter()
            .map(|seen| match seen {
                Seen::Changed(key, _) => key.clone(),
                Seen::Removed(key) => key.clone(),
            })
            .collect();
        let expected: Vec<String> = (0..EVENTS).map(|index| index.to_string()).collect();
        assert_eq!(keys, expected);
    }
}
