//! Lifecycle event fan-out.
//!
//! Every controller owns a [`Notifier`]. Dependents subscribe to it with a
//! weak handle, and the controller publishes its transitions to whoever is
//! subscribed at that moment. Delivery is synchronous and in subscription
//! order; the subscriber list is snapshotted before delivery so observers may
//! subscribe or unsubscribe while handling an event.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use crate::lock;

/// Process-unique identifier of a controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ControllerId(u64);

impl ControllerId {
    pub(crate) fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }

    pub fn get(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ControllerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Transitions a controller publishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifecycleEvent {
    Configured,
    Ready,
    Started,
    Stopped,
}

/// Receiver of lifecycle events.
pub trait LifecycleObserver: Send + Sync {
    fn on_lifecycle_event(&self, source: ControllerId, event: LifecycleEvent);
}

/// Handle returned by [`Notifier::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

struct Subscriber {
    id: SubscriptionId,
    observer: Weak<dyn LifecycleObserver>,
}

#[derive(Default)]
struct Subscribers {
    next_id: u64,
    entries: Vec<Subscriber>,
}

/// Synchronous, ordered publisher of [`LifecycleEvent`]s.
#[derive(Default)]
pub struct Notifier {
    subscribers: Mutex<Subscribers>,
}

impl Notifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe a weakly held observer. Dropped observers are pruned lazily.
    pub fn subscribe(&self, observer: Weak<dyn LifecycleObserver>) -> SubscriptionId {
        let mut subs = lock(&self.subscribers);
        subs.next_id += 1;
        let id = SubscriptionId(subs.next_id);
        subs.entries.push(Subscriber { id, observer });
        id
    }

    /// Remove a subscription. Returns `false` if it was not present.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subs = lock(&self.subscribers);
        let before = subs.entries.len();
        subs.entries.retain(|s| s.id != id);
        subs.entries.len() != before
    }

    /// Number of live subscribers.
    pub fn subscriber_count(&self) -> usize {
        lock(&self.subscribers)
            .entries
            .iter()
            .filter(|s| s.observer.strong_count() > 0)
            .count()
    }

    /// Deliver `event` to every live subscriber, in subscription order.
    ///
    /// No lock is held while observers run.
    pub fn publish(&self, source: ControllerId, event: LifecycleEvent) {
        let observers: Vec<Arc<dyn LifecycleObserver>> = {
            let mut subs = lock(&self.subscribers);
            subs.entries.retain(|s| s.observer.strong_count() > 0);
            subs.entries
                .iter()
                .filter_map(|s| s.observer.upgrade())
                .collect()
        };
        log::trace!(
            "controller {source} publishes {event:?} to {} observer(s)",
            observers.len()
        );
        for observer in observers {
            observer.on_lifecycle_event(source, event);
        }
    }
}

impl fmt::Debug for Notifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Notifier")
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}
