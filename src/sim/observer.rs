use std::any::Any;
use std::collections::VecDeque;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, Weak};
use std::thread::{self, ThreadId};

use tracing::{debug, error};

use super::lock;
use crate::vehicle::VehicleState;

pub type ObserverFn = Arc<dyn Fn(&VehicleState) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "observer-{}", self.0)
    }
}

struct Entry {
    id: SubscriptionId,
    /// Sequence number of the last mutation published before this entry was registered.
    since: u64,
    callback: ObserverFn,
}

#[derive(Default)]
struct Entries {
    next_id: u64,
    list: Vec<Entry>,
}

enum Delivery {
    Broadcast { seq: u64, snapshot: VehicleState },
    Initial { id: SubscriptionId, snapshot: VehicleState },
}

/// Fan-out of state snapshots to registered callbacks.
///
/// Deliveries are queued in mutation order and drained by one thread at a time. Other
/// threads wait for the drain and return only once their own delivery is done. A callback
/// may subscribe, unsubscribe or mutate the store without deadlocking; anything it triggers
/// is delivered by the same drain after it returns.
#[derive(Default)]
pub struct ObserverRegistry {
    entries: Mutex<Entries>,
    outbox: Mutex<VecDeque<Delivery>>,
    delivering: Mutex<()>,
    /// Thread currently holding `delivering`.
    drainer: Mutex<Option<ThreadId>>,
}

impl ObserverRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a callback and queues its initial snapshot. Must be called while the caller
    /// holds the state lock so `since` and `snapshot` agree.
    pub(crate) fn register(
        &self,
        since: u64,
        snapshot: VehicleState,
        callback: ObserverFn,
    ) -> SubscriptionId {
        let id = {
            let mut entries = lock(&self.entries);
            let id = SubscriptionId(entries.next_id);
            entries.next_id += 1;
            entries.list.push(Entry {
                id,
                since,
                callback,
            });
            id
        };
        lock(&self.outbox).push_back(Delivery::Initial { id, snapshot });
        debug!("Registered {}", id);
        id
    }

    /// Removes a callback. Returns false when the id was not registered.
    pub fn remove(&self, id: SubscriptionId) -> bool {
        let mut entries = lock(&self.entries);
        let before = entries.list.len();
        entries.list.retain(|entry| entry.id != id);
        let removed = entries.list.len() != before;
        if removed {
            debug!("Removed {}", id);
        }
        removed
    }

    pub fn contains(&self, id: SubscriptionId) -> bool {
        lock(&self.entries).list.iter().any(|entry| entry.id == id)
    }

    pub fn len(&self) -> usize {
        lock(&self.entries).list.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Queues a snapshot for every observer registered before `seq`. Must be called
    /// while the caller holds the state lock.
    pub(crate) fn enqueue(&self, seq: u64, snapshot: VehicleState) {
        lock(&self.outbox).push_back(Delivery::Broadcast { seq, snapshot });
    }

    /// Drains the outbox. Returns immediately when called from inside a callback, since
    /// the running drain picks up whatever the callback queued.
    pub(crate) fn flush(&self) {
        let me = thread::current().id();
        if *lock(&self.drainer) == Some(me) {
            return;
        }

        let _guard = lock(&self.delivering);
        *lock(&self.drainer) = Some(me);
        loop {
            let next = lock(&self.outbox).pop_front();
            match next {
                Some(delivery) => self.deliver(delivery),
                None => break,
            }
        }
        *lock(&self.drainer) = None;
    }

    fn deliver(&self, delivery: Delivery) {
        match delivery {
            Delivery::Broadcast { seq, snapshot } => {
                let targets: Vec<(SubscriptionId, ObserverFn)> = lock(&self.entries)
                    .list
                    .iter()
                    .filter(|entry| entry.since < seq)
                    .map(|entry| (entry.id, entry.callback.clone()))
                    .collect();
                for (id, callback) in targets {
                    // skip anything unsubscribed by an earlier callback in this round
                    if self.contains(id) {
                        invoke(id, &callback, &snapshot);
                    }
                }
            }
            Delivery::Initial { id, snapshot } => {
                let callback = lock(&self.entries)
                    .list
                    .iter()
                    .find(|entry| entry.id == id)
                    .map(|entry| entry.callback.clone());
                if let Some(callback) = callback {
                    invoke(id, &callback, &snapshot);
                }
            }
        }
    }
}

fn invoke(id: SubscriptionId, callback: &ObserverFn, snapshot: &VehicleState) {
    if let Err(payload) = catch_unwind(AssertUnwindSafe(|| callback(snapshot))) {
        error!("{} panicked during notification: {}", id, panic_message(&*payload));
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Handle returned by `subscribe`. Dropping it unregisters the callback.
pub struct Subscription {
    id: SubscriptionId,
    registry: Weak<ObserverRegistry>,
}

impl Subscription {
    pub(crate) fn new(id: SubscriptionId, registry: &Arc<ObserverRegistry>) -> Self {
        Self {
            id,
            registry: Arc::downgrade(registry),
        }
    }

    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Idempotent.
    pub fn unsubscribe(&self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.remove(self.id);
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}
