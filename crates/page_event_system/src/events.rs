//! Broadcast-with-history event queue.
//!
//! The queue keeps an append-only log of every event ever broadcast and an
//! append-only list of subscribers. Publishing appends to the log before
//! delivering to the subscribers present at that moment, in subscription
//! order. A subscriber may ask to be replayed the full log when it joins.
//!
//! Locks are never held while a handler runs, so handlers are free to call
//! back into the queue (for example to broadcast a follow-up event).

use crate::error::PluginError;
use crate::utils::current_timestamp_millis;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::{debug, error};

/// An immutable broadcast record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Event name, e.g. `"initialize"`
    pub name: String,
    /// Arbitrary structured payload
    pub payload: Value,
    /// Broadcast time in Unix milliseconds
    pub timestamp: u64,
}

impl Event {
    /// Creates an event stamped with the current wall-clock time.
    pub fn new(name: impl Into<String>, payload: Value) -> Self {
        Self {
            name: name.into(),
            payload,
            timestamp: current_timestamp_millis(),
        }
    }
}

/// Anything that can receive broadcast events.
///
/// Plugin instances are subscribers; tests and hosts may subscribe their own
/// types directly to an [`EventQueue`].
pub trait EventSubscriber: Send + Sync {
    /// Handles one delivered event.
    ///
    /// An error is logged and counted by the queue; it never stops delivery to
    /// other subscribers.
    fn handle_event(&self, name: &str, payload: &Value, timestamp: u64) -> Result<(), PluginError>;

    /// Name used in log output.
    fn subscriber_name(&self) -> &str {
        "subscriber"
    }
}

/// Delivery counters, in the spirit of an event system's runtime stats.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct QueueStats {
    /// Events appended to the history
    pub events_broadcast: u64,
    /// Live deliveries made at broadcast time
    pub deliveries: u64,
    /// Deliveries made while replaying history to a new subscriber
    pub replayed: u64,
    /// Deliveries whose handler returned an error
    pub delivery_failures: u64,
}

/// An appended event with the subscribers present when it was appended.
type Dispatch = (Arc<Event>, Vec<Arc<dyn EventSubscriber>>);

struct QueueInner {
    history: Vec<Arc<Event>>,
    subscribers: Vec<Arc<dyn EventSubscriber>>,
    /// Appended events not yet delivered live
    pending: VecDeque<Dispatch>,
    /// Whether some call is currently draining `pending`
    dispatching: bool,
}

/// Releases the dispatcher role if a handler panics mid-delivery.
struct DispatchGuard<'a> {
    queue: &'a EventQueue,
}

impl Drop for DispatchGuard<'_> {
    fn drop(&mut self) {
        if std::thread::panicking() {
            let mut inner = self.queue.inner.lock();
            inner.dispatching = false;
            inner.pending.clear();
        }
    }
}

/// Ordered event log plus live subscriber list.
pub struct EventQueue {
    inner: Mutex<QueueInner>,
    stats: Mutex<QueueStats>,
}

impl std::fmt::Debug for EventQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("EventQueue")
            .field("history", &inner.history.len())
            .field("subscribers", &inner.subscribers.len())
            .finish()
    }
}

impl EventQueue {
    /// Creates an empty queue.
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(QueueInner {
                history: Vec::new(),
                subscribers: Vec::new(),
                pending: VecDeque::new(),
                dispatching: false,
            }),
            stats: Mutex::new(QueueStats::default()),
        }
    }

    /// Adds a subscriber, optionally replaying the whole history to it first.
    ///
    /// With `replay_history`, every recorded event is delivered before this
    /// call returns, in broadcast order. Events broadcast by handlers while
    /// the replay is running are appended to the same replay; the subscriber
    /// only goes live once it has caught up with the log. Subscribers are
    /// never removed.
    pub fn subscribe(&self, subscriber: Arc<dyn EventSubscriber>, replay_history: bool) {
        if !replay_history {
            self.inner.lock().subscribers.push(subscriber);
            return;
        }

        let mut cursor = 0;
        loop {
            let pending: Vec<Arc<Event>> = {
                let mut inner = self.inner.lock();
                if cursor == inner.history.len() {
                    inner.subscribers.push(subscriber.clone());
                    break;
                }
                inner.history[cursor..].to_vec()
            };

            cursor += pending.len();
            for event in &pending {
                self.deliver(subscriber.as_ref(), event, true);
            }
        }

        debug!(
            "🔁 Replayed {} events to '{}'",
            cursor,
            subscriber.subscriber_name()
        );
    }

    /// Records an event and delivers it to every current subscriber.
    ///
    /// Subscribers added by a handler during this delivery do not receive
    /// this event live; they pick it up through their own replay if they
    /// asked for one.
    ///
    /// A broadcast made by a handler while another delivery is running is
    /// appended to the log at once but delivered live only after the outer
    /// delivery has reached every subscriber, so live delivery always
    /// follows log order.
    pub fn broadcast_event(&self, name: impl Into<String>, payload: Value) {
        let event = Arc::new(Event::new(name, payload));
        self.stats.lock().events_broadcast += 1;

        {
            let mut inner = self.inner.lock();
            inner.history.push(event.clone());
            let subscribers = inner.subscribers.clone();
            inner.pending.push_back((event.clone(), subscribers));
            if inner.dispatching {
                debug!("📥 Queued '{}' behind the delivery in progress", event.name);
                return;
            }
            inner.dispatching = true;
        }

        let _guard = DispatchGuard { queue: self };
        loop {
            let (event, subscribers) = {
                let mut inner = self.inner.lock();
                match inner.pending.pop_front() {
                    Some(next) => next,
                    None => {
                        inner.dispatching = false;
                        break;
                    }
                }
            };

            debug!(
                "📤 Broadcasting '{}' to {} subscribers",
                event.name,
                subscribers.len()
            );
            for subscriber in &subscribers {
                self.deliver(subscriber.as_ref(), &event, false);
            }
        }
    }

    fn deliver(&self, subscriber: &dyn EventSubscriber, event: &Event, replay: bool) {
        let result = subscriber.handle_event(&event.name, &event.payload, event.timestamp);

        let mut stats = self.stats.lock();
        if replay {
            stats.replayed += 1;
        } else {
            stats.deliveries += 1;
        }
        if let Err(e) = result {
            stats.delivery_failures += 1;
            drop(stats);
            error!(
                "❌ Subscriber '{}' failed on '{}': {}",
                subscriber.subscriber_name(),
                event.name,
                e
            );
        }
    }

    /// Snapshot of the recorded events, oldest first.
    pub fn history(&self) -> Vec<Event> {
        self.inner
            .lock()
            .history
            .iter()
            .map(|event| Event::clone(event))
            .collect()
    }

    /// Number of recorded events.
    pub fn len(&self) -> usize {
        self.inner.lock().history.len()
    }

    /// Whether nothing has been broadcast yet.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of live subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.inner.lock().subscribers.len()
    }

    /// Current delivery counters.
    pub fn stats(&self) -> QueueStats {
        self.stats.lock().clone()
    }
}

impl Default for EventQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<(String, Value)>>,
    }

    impl Recorder {
        fn names(&self) -> Vec<String> {
            self.seen.lock().iter().map(|(n, _)| n.clone()).collect()
        }
    }

    impl EventSubscriber for Recorder {
        fn handle_event(&self, name: &str, payload: &Value, _timestamp: u64) -> Result<(), PluginError> {
            self.seen.lock().push((name.to_string(), payload.clone()));
            Ok(())
        }
    }

    struct Failing;

    impl EventSubscriber for Failing {
        fn handle_event(&self, name: &str, _payload: &Value, _timestamp: u64) -> Result<(), PluginError> {
            Err(PluginError::HandlerFailed(format!("cannot handle {}", name)))
        }

        fn subscriber_name(&self) -> &str {
            "failing"
        }
    }

    #[test]
    fn test_replay_then_live_delivery() {
        let queue = EventQueue::new();
        for i in 0..3 {
            queue.broadcast_event(format!("e{}", i), json!({ "i": i }));
        }

        let recorder = Arc::new(Recorder::default());
        queue.subscribe(recorder.clone(), true);
        assert_eq!(recorder.names(), vec!["e0", "e1", "e2"]);

        queue.broadcast_event("e3", json!(null));
        queue.broadcast_event("e4", json!(null));
        assert_eq!(recorder.names(), vec!["e0", "e1", "e2", "e3", "e4"]);
        assert_eq!(recorder.seen.lock()[1].1, json!({ "i": 1 }));
    }

    #[test]
    fn test_subscribe_without_replay_skips_history() {
        let queue = EventQueue::new();
        queue.broadcast_event("before", json!(1));

        let recorder = Arc::new(Recorder::default());
        queue.subscribe(recorder.clone(), false);
        assert!(recorder.names().is_empty());

        queue.broadcast_event("after", json!(2));
        assert_eq!(recorder.names(), vec!["after"]);
    }

    #[test]
    fn test_history_is_append_only_and_ordered() {
        let queue = EventQueue::new();
        assert!(queue.is_empty());

        queue.broadcast_event("a", json!(null));
        let first = queue.history();
        queue.broadcast_event("b", json!(null));
        let second = queue.history();

        assert_eq!(first.len(), 1);
        assert_eq!(second.len(), 2);
        assert_eq!(second[0], first[0]);
        assert!(second[0].timestamp <= second[1].timestamp);
    }

    #[test]
    fn test_duplicate_subscription_delivers_twice() {
        let queue = EventQueue::new();
        let recorder = Arc::new(Recorder::default());
        queue.subscribe(recorder.clone(), false);
        queue.subscribe(recorder.clone(), false);

        queue.broadcast_event("x", json!(null));
        assert_eq!(recorder.names(), vec!["x", "x"]);
        assert_eq!(queue.subscriber_count(), 2);
    }

    #[test]
    fn test_failing_handler_does_not_block_others() {
        let queue = EventQueue::new();
        let before = Arc::new(Recorder::default());
        let after = Arc::new(Recorder::default());

        queue.subscribe(before.clone(), false);
        queue.subscribe(Arc::new(Failing), false);
        queue.subscribe(after.clone(), false);

        queue.broadcast_event("x", json!(null));

        assert_eq!(before.names(), vec!["x"]);
        assert_eq!(after.names(), vec!["x"]);
        let stats = queue.stats();
        assert_eq!(stats.events_broadcast, 1);
        assert_eq!(stats.deliveries, 3);
        assert_eq!(stats.delivery_failures, 1);
    }

    /// Broadcasts a follow-up event the first time it sees `trigger`.
    struct Echo {
        queue: Arc<EventQueue>,
        fired: Mutex<bool>,
        seen: Mutex<Vec<String>>,
    }

    impl EventSubscriber for Echo {
        fn handle_event(&self, name: &str, _payload: &Value, _timestamp: u64) -> Result<(), PluginError> {
            self.seen.lock().push(name.to_string());
            let first = {
                let mut fired = self.fired.lock();
                let first = name == "trigger" && !*fired;
                *fired |= first;
                first
            };
            if first {
                self.queue.broadcast_event("echo", json!(null));
            }
            Ok(())
        }
    }

    #[test]
    fn test_broadcast_during_replay_keeps_order() {
        let queue = Arc::new(EventQueue::new());
        queue.broadcast_event("trigger", json!(null));
        queue.broadcast_event("tail", json!(null));

        let echo = Arc::new(Echo {
            queue: queue.clone(),
            fired: Mutex::new(false),
            seen: Mutex::new(Vec::new()),
        });
        queue.subscribe(echo.clone(), true);

        // The echo is appended to the log and reaches the new subscriber via
        // replay, exactly once and in log order.
        assert_eq!(*echo.seen.lock(), vec!["trigger", "tail", "echo"]);
        let names: Vec<String> = queue.history().into_iter().map(|e| e.name).collect();
        assert_eq!(names, vec!["trigger", "tail", "echo"]);

        queue.broadcast_event("live", json!(null));
        assert_eq!(*echo.seen.lock(), vec!["trigger", "tail", "echo", "live"]);
    }

    /// Re-broadcasts `follow_up` whenever it sees `on`.
    struct Relay {
        queue: Arc<EventQueue>,
        on: &'static str,
        follow_up: &'static str,
    }

    impl EventSubscriber for Relay {
        fn handle_event(&self, name: &str, _payload: &Value, _timestamp: u64) -> Result<(), PluginError> {
            if name == self.on {
                self.queue.broadcast_event(self.follow_up, json!(null));
            }
            Ok(())
        }
    }

    #[test]
    fn test_broadcast_during_live_delivery_keeps_log_order() {
        let queue = Arc::new(EventQueue::new());
        let before = Arc::new(Recorder::default());
        let after = Arc::new(Recorder::default());

        queue.subscribe(before.clone(), false);
        queue.subscribe(
            Arc::new(Relay { queue: queue.clone(), on: "x", follow_up: "y" }),
            false,
        );
        queue.subscribe(
            Arc::new(Relay { queue: queue.clone(), on: "y", follow_up: "z" }),
            false,
        );
        queue.subscribe(after.clone(), false);

        queue.broadcast_event("x", json!(null));

        // Subscribers after the relays still see "x" before the follow-ups.
        assert_eq!(before.names(), vec!["x", "y", "z"]);
        assert_eq!(after.names(), vec!["x", "y", "z"]);
        let names: Vec<String> = queue.history().into_iter().map(|e| e.name).collect();
        assert_eq!(names, vec!["x", "y", "z"]);

        let stats = queue.stats();
        assert_eq!(stats.events_broadcast, 3);
        assert_eq!(stats.deliveries, 12);

        // The queue is idle again afterwards.
        queue.broadcast_event("w", json!(null));
        assert_eq!(after.names(), vec!["x", "y", "z", "w"]);
    }
}
