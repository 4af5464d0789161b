// Host record: an attribute store with change events and optional validation
//
// The engine treats this type as an external collaborator and only talks to
// it through its public API: get/set/set_many for data, on_change/off for
// events, to_json for serialization.
//
// Write semantics:
// - A write validates the prospective attributes first (unless the mutation
//   context says otherwise). A rejected write changes nothing.
// - Only attributes whose value actually differs are stored and reported.
// - Change listeners run after every attribute of the write has been stored,
//   one Topic::Change per changed attribute followed by one Topic::AnyChange.
// - Silent writes store values but notify nobody.

use crate::context::MutationContext;
use crate::error::RecordError;
use crate::events::{
    BatchEvent, ChangeEvent, EventBus, InvalidEvent, ListenerId, RecordEvent, Topic,
};
use crate::serialize::SerializeOptions;
use indexmap::IndexMap;
use parking_lot::RwLock;
use serde_json::{Map, Value};
use std::sync::{Arc, Weak};

/// Ordered attribute storage of a record
pub type Attributes = IndexMap<String, Value>;

/// Record validation hook: `Err` carries one message per problem
pub type Validator = Arc<dyn Fn(&Attributes) -> Result<(), Vec<String>> + Send + Sync>;

struct RecordInner {
    attributes: RwLock<Attributes>,
    events: EventBus,
    validator: Option<Validator>,
    last_error: RwLock<Option<Vec<String>>>,
}

/// Mutable, event-emitting key/value record
///
/// `Record` is a cheap handle: clones share the same attributes and listeners.
///
/// # Example
/// ```ignore
/// let record = Record::builder()
///     .defaults(json!({ "netPrice": 0.0, "vatRate": 0.0 }))
///     .build(json!({ "netPrice": 100 }));
///
/// record.on_change("netPrice", |event| println!("now {}", event.value));
/// record.set("netPrice", json!(120))?;
/// ```
#[derive(Clone)]
pub struct Record {
    inner: Arc<RecordInner>,
}

/// Non-owning handle to a [`Record`]
#[derive(Clone)]
pub struct WeakRecord {
    inner: Weak<RecordInner>,
}

impl WeakRecord {
    /// Get the record back if it is still alive
    pub fn upgrade(&self) -> Option<Record> {
        self.inner.upgrade().map(|inner| Record { inner })
    }
}

/// Builder for records with defaults and a validator
#[derive(Default)]
pub struct RecordBuilder {
    defaults: Attributes,
    validator: Option<Validator>,
}

impl RecordBuilder {
    /// Attribute values used when the initial attributes do not provide them
    pub fn defaults(mut self, defaults: Value) -> Self {
        self.defaults = attributes_from_json(defaults);
        self
    }

    /// Validation hook run on writes
    pub fn validator<F>(mut self, validator: F) -> Self
    where
        F: Fn(&Attributes) -> Result<(), Vec<String>> + Send + Sync + 'static,
    {
        self.validator = Some(Arc::new(validator));
        self
    }

    /// Create the record
    ///
    /// Initial attributes are stored as-is on top of the defaults: no events
    /// are raised and the validator does not run.
    pub fn build(self, attributes: Value) -> Record {
        let mut merged = self.defaults;
        merged.extend(attributes_from_json(attributes));

        Record {
            inner: Arc::new(RecordInner {
                attributes: RwLock::new(merged),
                events: EventBus::new(),
                validator: self.validator,
                last_error: RwLock::new(None),
            }),
        }
    }
}

fn attributes_from_json(value: Value) -> Attributes {
    match value {
        Value::Object(map) => map.into_iter().collect(),
        Value::Null => Attributes::new(),
        other => {
            tracing::warn!(value = %other, "ignoring non-object record attributes");
            Attributes::new()
        }
    }
}

impl Record {
    /// Create a record without defaults or validator
    ///
    /// `attributes` should be a JSON object. `null` creates an empty record,
    /// anything else is ignored with a warning.
    pub fn new(attributes: Value) -> Self {
        Self::builder().build(attributes)
    }

    /// Start building a record with defaults and/or a validator
    pub fn builder() -> RecordBuilder {
        RecordBuilder::default()
    }

    /// Create a non-owning handle to this record
    pub fn downgrade(&self) -> WeakRecord {
        WeakRecord {
            inner: Arc::downgrade(&self.inner),
        }
    }

    /// Whether two handles refer to the same record
    pub fn ptr_eq(&self, other: &Record) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Current value of an attribute
    pub fn get(&self, name: &str) -> Option<Value> {
        self.inner.attributes.read().get(name).cloned()
    }

    /// Whether the attribute is present
    pub fn has(&self, name: &str) -> bool {
        self.inner.attributes.read().contains_key(name)
    }

    /// Copy of all attributes
    pub fn attributes(&self) -> Attributes {
        self.inner.attributes.read().clone()
    }

    /// Whether the record holds no attributes at all
    pub fn is_empty(&self) -> bool {
        self.inner.attributes.read().is_empty()
    }

    /// Number of attributes
    pub fn len(&self) -> usize {
        self.inner.attributes.read().len()
    }

    /// Write one attribute with a default (external, validated, notifying) context
    pub fn set(&self, name: impl Into<String>, value: Value) -> Result<(), RecordError> {
        self.set_with(name, value, &MutationContext::new())
    }

    /// Write one attribute with explicit mutation options
    ///
    /// When the attribute is a computed field with a setter, the dependency
    /// writes it back-propagates to use the same options.
    pub fn set_with(
        &self,
        name: impl Into<String>,
        value: Value,
        context: &MutationContext,
    ) -> Result<(), RecordError> {
        self.set_many([(name.into(), value)], context)
    }

    /// Write several attributes as one batch
    ///
    /// The whole batch is validated up front; if the validator rejects it,
    /// nothing is stored, [`Topic::Invalid`] listeners run and the validator's
    /// messages are returned.
    pub fn set_many<I>(&self, attributes: I, context: &MutationContext) -> Result<(), RecordError>
    where
        I: IntoIterator<Item = (String, Value)>,
    {
        let incoming: Vec<(String, Value)> = attributes.into_iter().collect();

        // 1. Validate the prospective state
        let validator = self
            .inner
            .validator
            .as_ref()
            .filter(|_| context.should_validate());
        if let Some(validator) = validator {
            let mut prospective = self.attributes();
            prospective.extend(incoming.iter().cloned());

            if let Err(errors) = validator(&prospective) {
                *self.inner.last_error.write() = Some(errors.clone());
                self.inner.events.emit(
                    &Topic::Invalid,
                    &RecordEvent::Invalid(InvalidEvent {
                        record: self,
                        errors: &errors,
                        context,
                    }),
                );
                return Err(RecordError::Invalid { errors });
            }
            *self.inner.last_error.write() = None;
        }

        // 2. Store values that actually changed
        let mut changed: Vec<(String, Value)> = Vec::new();
        {
            let mut current = self.inner.attributes.write();
            for (name, value) in incoming {
                if current.get(&name) == Some(&value) {
                    continue;
                }
                current.insert(name.clone(), value.clone());
                changed.push((name, value));
            }
        }
        // Attribute lock released - listeners may read and write the record

        // 3. Notify
        if context.is_silent() || changed.is_empty() {
            return Ok(());
        }

        for (name, value) in &changed {
            self.inner.events.emit(
                &Topic::change(name.as_str()),
                &RecordEvent::Change(ChangeEvent {
                    record: self,
                    attribute: name,
                    value,
                    context,
                }),
            );
        }

        let names: Vec<String> = changed.into_iter().map(|(name, _)| name).collect();
        self.inner.events.emit(
            &Topic::AnyChange,
            &RecordEvent::Batch(BatchEvent {
                record: self,
                changed: &names,
                context,
            }),
        );

        Ok(())
    }

    /// Run the validator against the current attributes
    ///
    /// Records without a validator are always valid.
    pub fn is_valid(&self) -> bool {
        match &self.inner.validator {
            Some(validator) => validator(&*self.inner.attributes.read()).is_ok(),
            None => true,
        }
    }

    /// Messages of the most recent rejected write, cleared by the next accepted one
    pub fn validation_error(&self) -> Option<Vec<String>> {
        self.inner.last_error.read().clone()
    }

    /// Default serialization: every attribute, in insertion order
    ///
    /// The options are accepted so that wrappers (see
    /// [`SerializationFilter`](crate::SerializationFilter)) share one signature
    /// with this method; the record itself ignores them.
    pub fn to_json(&self, _options: &SerializeOptions) -> Map<String, Value> {
        self.inner
            .attributes
            .read()
            .iter()
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect()
    }

    /// Listen for changes of one attribute
    pub fn on_change<F>(&self, attribute: impl Into<String>, listener: F) -> ListenerId
    where
        F: Fn(&ChangeEvent<'_>) + Send + Sync + 'static,
    {
        self.inner.events.on(
            Topic::Change(attribute.into()),
            Arc::new(move |event: &RecordEvent<'_>| {
                if let RecordEvent::Change(change) = event {
                    listener(change);
                }
            }),
        )
    }

    /// Listen for any write that changed at least one attribute
    pub fn on_any_change<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&BatchEvent<'_>) + Send + Sync + 'static,
    {
        self.inner.events.on(
            Topic::AnyChange,
            Arc::new(move |event: &RecordEvent<'_>| {
                if let RecordEvent::Batch(batch) = event {
                    listener(batch);
                }
            }),
        )
    }

    /// Listen for writes rejected by the validator
    pub fn on_invalid<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&InvalidEvent<'_>) + Send + Sync + 'static,
    {
        self.inner.events.on(
            Topic::Invalid,
            Arc::new(move |event: &RecordEvent<'_>| {
                if let RecordEvent::Invalid(invalid) = event {
                    listener(invalid);
                }
            }),
        )
    }

    /// Remove a listener. Returns false if it was not registered.
    pub fn off(&self, id: ListenerId) -> bool {
        self.inner.events.off(id)
    }

    /// Number of listeners subscribed to a topic
    pub fn listener_count(&self, topic: &Topic) -> usize {
        self.inner.events.listener_count(topic)
    }
}

impl std::fmt::Debug for Record {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Record")
            .field("attributes", &*self.inner.attributes.read())
            .field("has_validator", &self.inner.validator.is_some())
            .finish()
    }
}
