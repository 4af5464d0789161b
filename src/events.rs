// Event bus for record change notifications
//
// Listeners live in a slab arena; a ListenerId is a lightweight handle into
// it. A per-topic index (insertion ordered) keeps dispatch in registration
// order, which the engine relies on when several computed fields share a
// dependency.
//
// Dispatch never holds the bus lock while a listener runs. Listeners are
// cloned out of the arena first, so a listener may freely register or remove
// listeners, or write to the record and trigger nested dispatches.

use crate::context::MutationContext;
use crate::record::Record;
use foldhash::fast::RandomState;
use indexmap::IndexMap;
use parking_lot::RwLock;
use serde_json::Value;
use slab::Slab;
use std::fmt;
use std::sync::Arc;

/// Channel a listener subscribes to
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Topic {
    /// The named attribute changed value
    Change(String),
    /// At least one attribute changed during a write; fired once per write
    AnyChange,
    /// The validator rejected a write
    Invalid,
}

impl Topic {
    /// Change topic for one attribute
    pub fn change(attribute: impl Into<String>) -> Self {
        Topic::Change(attribute.into())
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Topic::Change(attribute) => write!(f, "change:{attribute}"),
            Topic::AnyChange => f.write_str("change"),
            Topic::Invalid => f.write_str("invalid"),
        }
    }
}

/// Payload of a [`Topic::Change`] notification
pub struct ChangeEvent<'a> {
    /// Record that was written
    pub record: &'a Record,
    /// Attribute whose value changed
    pub attribute: &'a str,
    /// Value the attribute was set to
    pub value: &'a Value,
    /// Options of the write that caused the change
    pub context: &'a MutationContext,
}

/// Payload of a [`Topic::AnyChange`] notification
pub struct BatchEvent<'a> {
    /// Record that was written
    pub record: &'a Record,
    /// Attributes that changed, in write order
    pub changed: &'a [String],
    /// Options of the write
    pub context: &'a MutationContext,
}

/// Payload of a [`Topic::Invalid`] notification
pub struct InvalidEvent<'a> {
    /// Record whose write was rejected
    pub record: &'a Record,
    /// Messages returned by the validator
    pub errors: &'a [String],
    /// Options of the rejected write
    pub context: &'a MutationContext,
}

/// Any event a record dispatches
pub enum RecordEvent<'a> {
    /// See [`Topic::Change`]
    Change(ChangeEvent<'a>),
    /// See [`Topic::AnyChange`]
    Batch(BatchEvent<'a>),
    /// See [`Topic::Invalid`]
    Invalid(InvalidEvent<'a>),
}

pub(crate) type Listener = Arc<dyn Fn(&RecordEvent<'_>) + Send + Sync>;

/// Handle to a registered listener, used to remove it again.
///
/// This is a zero-cost wrapper around a slab index. Once the listener is
/// removed the index may be reused, so a handle should be passed to
/// [`Record::off`](crate::Record::off) at most once.
#[repr(transparent)]
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub struct ListenerId(u32);

impl ListenerId {
    /// # Panics
    /// If the slab key does not fit in 32 bits, i.e. more than `u32::MAX`
    /// listeners are registered on one record at the same time.
    fn from_key(key: usize) -> Self {
        match u32::try_from(key) {
            Ok(index) => Self(index),
            Err(_) => panic!("record listener arena exceeded u32::MAX entries"),
        }
    }

    fn index(self) -> usize {
        self.0 as usize
    }
}

struct ListenerEntry {
    topic: Topic,
    listener: Listener,
}

#[derive(Default)]
struct BusState {
    listeners: Slab<ListenerEntry>,
    topics: IndexMap<Topic, Vec<ListenerId>, RandomState>,
}

/// Topic-indexed listener registry owned by a record
#[derive(Default)]
pub(crate) struct EventBus {
    state: RwLock<BusState>,
}

impl EventBus {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Register a listener; it runs after every listener already on `topic`
    pub(crate) fn on(&self, topic: Topic, listener: Listener) -> ListenerId {
        let mut state = self.state.write();
        let entry = state.listeners.vacant_entry();
        let id = ListenerId::from_key(entry.key());
        entry.insert(ListenerEntry {
            topic: topic.clone(),
            listener,
        });
        state.topics.entry(topic).or_default().push(id);
        id
    }

    /// Remove a listener. Returns false if it was not registered.
    pub(crate) fn off(&self, id: ListenerId) -> bool {
        let mut state = self.state.write();
        let Some(entry) = state.listeners.try_remove(id.index()) else {
            return false;
        };
        if let Some(ids) = state.topics.get_mut(&entry.topic) {
            ids.retain(|other| *other != id);
        }
        true
    }

    /// Number of listeners currently subscribed to `topic`
    pub(crate) fn listener_count(&self, topic: &Topic) -> usize {
        self.state.read().topics.get(topic).map_or(0, Vec::len)
    }

    /// Call every listener on `topic` in registration order
    ///
    /// Listeners registered during dispatch first run on the next emit. A
    /// listener removed during dispatch is skipped if it has not run yet.
    pub(crate) fn emit(&self, topic: &Topic, event: &RecordEvent<'_>) {
        // Clone listeners out so the lock is released before any of them runs
        let listeners: Vec<(ListenerId, Listener)> = {
            let state = self.state.read();
            match state.topics.get(topic) {
                Some(ids) => ids
                    .iter()
                    .filter_map(|id| {
                        let entry = state.listeners.get(id.index())?;
                        Some((*id, entry.listener.clone()))
                    })
                    .collect(),
                None => return,
            }
        };

        tracing::trace!(%topic, listeners = listeners.len(), "dispatching record event");
        for (id, listener) in listeners {
            // The slot may have been freed, or freed and reused, by an earlier listener
            if !self.is_registered(id, &listener) {
                tracing::trace!(%topic, "skipping listener removed during dispatch");
                continue;
            }
            listener(event);
        }
    }

    fn is_registered(&self, id: ListenerId, listener: &Listener) -> bool {
        self.state
            .read()
            .listeners
            .get(id.index())
            .is_some_and(|entry| Arc::ptr_eq(&entry.listener, listener))
    }
}
