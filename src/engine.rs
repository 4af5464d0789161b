use crate::binder::{self, Binding};
use crate::config::EngineConfig;
use crate::events::ListenerId;
use crate::field::ComputedField;
use crate::record::Record;
use crate::registry::{ComputedSpec, Registry};
use crate::serialize::{SerializationFilter, SerializeOptions};
use serde_json::{Map, Value};
use std::fmt;
use std::sync::Arc;

/// Computed attributes attached to a [`Record`]
///
/// Construction performs the whole setup synchronously:
/// 1. the declaration is scanned into a [`Registry`]
/// 2. every field is bound to its dependencies, in registry order, and
///    computed once unless the record is empty
/// 3. the serialization filter is prepared from the registry
///
/// From then on computed values live in the record like any other attribute
/// and are kept current by the record's own change events.
///
/// The engine owns the listeners it installed. Dropping it removes them, after
/// which the computed attributes keep their last value but no longer react.
///
/// # Example
/// ```ignore
/// let record = Record::new(json!({ "netPrice": 100, "vatRate": 20 }));
/// let fields = ComputedFields::new(&record, ComputedSpec::new().field(gross_price));
///
/// assert_eq!(record.get("grossPrice"), Some(json!(120.0)));
///
/// record.set("vatRate", json!(5))?;      // grossPrice -> 105
/// record.set("grossPrice", json!(80))?;  // netPrice -> 80 / 1.2
/// ```
pub struct ComputedFields {
    record: Record,
    registry: Registry,
    config: EngineConfig,
    filter: SerializationFilter,
    // Kept so the bindings (and with them any external triggers) live as long as the engine
    bindings: Vec<Arc<Binding>>,
    listeners: Vec<ListenerId>,
}

impl ComputedFields {
    /// Attach the declared computed fields to `record` with the default configuration
    pub fn new(record: &Record, spec: ComputedSpec) -> Self {
        Self::from_declaration(record, Some(spec), EngineConfig::default())
    }

    /// Attach the declared computed fields to `record`
    pub fn with_config(record: &Record, spec: ComputedSpec, config: EngineConfig) -> Self {
        Self::from_declaration(record, Some(spec), config)
    }

    /// Attach whatever is declared; no declaration means no computed fields
    pub fn from_declaration(
        record: &Record,
        declaration: Option<ComputedSpec>,
        config: EngineConfig,
    ) -> Self {
        // 1. Registry scan
        let registry = Registry::scan(declaration);

        // 2. Binding and initial values
        let mut bindings = Vec::with_capacity(registry.len());
        let mut listeners = Vec::new();
        for field in registry.shared() {
            let bound = binder::bind(record, field.clone(), config);
            bindings.push(bound.binding);
            listeners.extend(bound.listeners);
        }

        // 3. Serialization
        let filter = SerializationFilter::new(&registry);

        tracing::debug!(
            fields = registry.len(),
            listeners = listeners.len(),
            "computed fields attached"
        );

        Self {
            record: record.clone(),
            registry,
            config,
            filter,
            bindings,
            listeners,
        }
    }

    /// Descriptor of the computed field called `name`
    pub fn lookup(&self, name: &str) -> Option<&ComputedField> {
        self.registry.lookup(name)
    }

    /// All computed fields, in registration order
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Configuration the engine was built with
    pub fn config(&self) -> EngineConfig {
        self.config
    }

    /// Record the fields are attached to
    pub fn record(&self) -> &Record {
        &self.record
    }

    /// Number of bound computed fields
    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    /// Whether no computed field is bound
    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    /// Serialize the record, leaving out non-serializable computed fields
    /// unless `options.include_computed` is set
    pub fn to_json(&self, options: &SerializeOptions) -> Map<String, Value> {
        self.filter.apply(self.record.to_json(options), options)
    }

    /// The filter used by [`to_json`](Self::to_json)
    pub fn serialization_filter(&self) -> &SerializationFilter {
        &self.filter
    }

    /// [`Record::to_json`] wrapped with this engine's filter
    pub fn serializer(&self) -> impl Fn(&Record, &SerializeOptions) -> Map<String, Value> + use<> {
        self.filter.wrap(Record::to_json)
    }

    /// Any serialization function wrapped with this engine's filter
    pub fn wrap_serializer<F>(
        &self,
        inner: F,
    ) -> impl Fn(&Record, &SerializeOptions) -> Map<String, Value> + use<F>
    where
        F: Fn(&Record, &SerializeOptions) -> Map<String, Value>,
    {
        self.filter.wrap(inner)
    }
}

impl Drop for ComputedFields {
    fn drop(&mut self) {
        for id in self.listeners.drain(..) {
            self.record.off(id);
        }
        tracing::debug!(fields = self.bindings.len(), "computed fields detached");
    }
}

impl fmt::Debug for ComputedFields {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComputedFields")
            .field("fields", &self.registry.names().collect::<Vec<_>>())
            .field("config", &self.config)
            .field("listeners", &self.listeners.len())
            .finish()
    }
}
