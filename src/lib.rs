#![deny(missing_docs)]

//! Computed attributes for event-emitting records.
//!
//! A computed field is an attribute whose value is derived from other
//! attributes of the same [`Record`]. The engine keeps it current as its
//! dependencies change and, when the field declares a setter, turns a direct
//! write to the field back into writes to its dependencies. Computed values are
//! stored in the record like any other attribute, so listeners, validation and
//! serialization see them without special cases.
//!
//! # Quick Start
//!
//! ```ignore
//! use computed_fields::{ComputedField, ComputedFields, ComputedSpec, Record};
//! use serde_json::json;
//!
//! let record = Record::new(json!({ "netPrice": 100, "vatRate": 20 }));
//!
//! let gross_price = ComputedField::new("grossPrice")
//!     .depends(["netPrice", "vatRate"])
//!     .get(|fields| {
//!         let net = fields.number("netPrice").unwrap_or_default();
//!         let rate = fields.number("vatRate").unwrap_or_default();
//!         json!(net * (1.0 + rate / 100.0))
//!     })
//!     .set(|value, fields| {
//!         let rate = fields.number("vatRate").unwrap_or_default();
//!         let gross = value.as_f64().unwrap_or_default();
//!         fields.set("netPrice", json!(gross / (1.0 + rate / 100.0)));
//!     });
//!
//! let fields = ComputedFields::new(&record, ComputedSpec::new().field(gross_price));
//! assert_eq!(record.get("grossPrice"), Some(json!(120.0)));
//!
//! record.set("vatRate", json!(5))?;       // grossPrice -> 105
//! record.set("grossPrice", json!(80))?;   // netPrice   -> 66.67
//! ```
//!
//! # Core Types
//!
//! - [`Record`] - Attribute store with per-attribute change events and an optional validator.
//! - [`ComputedField`] - Declaration of one computed attribute: dependencies, getter, setter.
//! - [`ComputedFields`] - The attached engine. Dropping it detaches every listener.
//! - [`MutationContext`] - Options carried by a write, including its [`Origin`].
//! - [`EngineConfig`] - Engine-wide switches.
//!
//! # Dependencies
//!
//! ```ignore
//! ComputedField::new("total")
//!     .depends(["price", "quantity"])                  // attributes of the record
//!     .depends_on_external(|trigger| {                 // anything else
//!         exchange_rates.on_update(move || trigger.fire());
//!     })
//! ```
//!
//! A field recomputes whenever one of its attribute dependencies changes or an
//! external trigger fires. Getters and setters only ever see a [`Snapshot`] of
//! the attribute dependencies, read fresh for every call.
//!
//! # Cycles
//!
//! Writes made by the engine to store a recomputed value carry
//! [`Origin::Computed`]. Those writes still notify other listeners, but are
//! never fed back through the field's setter. A single external write
//! therefore settles after at most two levels of propagation
//! (see [`cascade_depth`]).
//!
//! # Serialization
//!
//! ```ignore
//! ComputedField::new("grossPrice").serializable(false);
//!
//! fields.to_json(&SerializeOptions::default());        // without grossPrice
//! fields.to_json(&SerializeOptions::with_computed());  // with grossPrice
//!
//! let to_json = fields.wrap_serializer(my_serializer); // compose with your own
//! ```

// Internal modules
mod binder;
mod cascade;
mod config;
mod context;
mod engine;
mod error;
mod events;
mod field;
mod record;
mod registry;
mod serialize;
mod snapshot;

// Core types
pub use engine::ComputedFields;
pub use field::{ComputedField, Dependency, Getter, Setter, Subscribe, Trigger};
pub use record::{Attributes, Record, RecordBuilder, Validator, WeakRecord};
pub use registry::{ComputedSpec, Registry};
pub use snapshot::Snapshot;

// Writes and events
pub use context::{MutationContext, Origin};
pub use events::{BatchEvent, ChangeEvent, InvalidEvent, ListenerId, RecordEvent, Topic};

// Configuration, serialization and errors
pub use config::EngineConfig;
pub use error::{ConfigError, RecordError};
pub use serialize::{SerializationFilter, SerializeOptions};

// Diagnostics
pub use cascade::cascade_depth;

#[cfg(test)]
mod tests;
