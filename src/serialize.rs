use crate::record::Record;
use crate::registry::Registry;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;

/// Per-call serialization options
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SerializeOptions {
    /// Keep every computed field, including the ones declared
    /// `serializable(false)`
    pub include_computed: bool,
}

impl SerializeOptions {
    /// Options that keep every computed field
    pub fn with_computed() -> Self {
        Self {
            include_computed: true,
        }
    }
}

/// Strips non-serializable computed fields from serialized records
///
/// The filter never replaces a serialization function, it composes with one:
/// [`wrap`](Self::wrap) returns a new function that calls the wrapped one
/// first and post-processes its output. Keys that are not non-serializable
/// computed fields pass through untouched, in their original order.
#[derive(Clone, Debug, Default)]
pub struct SerializationFilter {
    hidden: Arc<[String]>,
}

impl SerializationFilter {
    /// Filter for the non-serializable fields of `registry`
    pub fn new(registry: &Registry) -> Self {
        Self {
            hidden: registry.non_serializable().map(str::to_string).collect(),
        }
    }

    /// Names removed from default output
    pub fn hidden(&self) -> impl Iterator<Item = &str> {
        self.hidden.iter().map(String::as_str)
    }

    /// Post-process one serialized record
    pub fn apply(
        &self,
        serialized: Map<String, Value>,
        options: &SerializeOptions,
    ) -> Map<String, Value> {
        if options.include_computed || self.hidden.is_empty() {
            return serialized;
        }

        serialized
            .into_iter()
            .filter(|(name, _)| !self.hidden.iter().any(|hidden| hidden == name))
            .collect()
    }

    /// Compose the filter with a serialization function
    ///
    /// ```ignore
    /// let to_json = filter.wrap(Record::to_json);
    /// let json = to_json(&record, &SerializeOptions::default());
    /// ```
    pub fn wrap<F>(
        &self,
        inner: F,
    ) -> impl Fn(&Record, &SerializeOptions) -> Map<String, Value> + use<F>
    where
        F: Fn(&Record, &SerializeOptions) -> Map<String, Value>,
    {
        let filter = self.clone();
        move |record: &Record, options: &SerializeOptions| {
            filter.apply(inner(record, options), options)
        }
    }
}
