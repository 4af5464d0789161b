use crate::field::Dependency;
use crate::record::Record;
use indexmap::{IndexMap, IndexSet};
use serde_json::Value;

/// Current values of a computed field's attribute dependencies
///
/// A snapshot is built fresh for every getter or setter call and never
/// cached. It holds exactly one entry per named dependency, read from the
/// record when the snapshot is resolved; attributes the record does not have
/// read as `Value::Null`. External dependencies have no entry.
///
/// Setters update the snapshot in place. Only existing entries can be
/// overwritten, so a setter can never make the engine write an attribute the
/// field does not depend on. Entries for attributes the record did not have
/// are only written back if the setter assigns them.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Snapshot {
    values: IndexMap<String, Value>,
    // Dependencies absent from the record and not yet assigned by a setter
    missing: IndexSet<String>,
}

impl Snapshot {
    /// Read the current value of every named dependency from `record`
    pub fn resolve(record: &Record, dependencies: &[Dependency]) -> Self {
        let mut snapshot = Self::default();
        for name in dependencies.iter().filter_map(Dependency::name) {
            let value = match record.get(name) {
                Some(value) => value,
                None => {
                    snapshot.missing.insert(name.to_string());
                    Value::Null
                }
            };
            snapshot.values.insert(name.to_string(), value);
        }
        snapshot
    }

    /// Value of a dependency
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    /// Value of a dependency as a number
    pub fn number(&self, name: &str) -> Option<f64> {
        self.values.get(name).and_then(Value::as_f64)
    }

    /// Overwrite a dependency value. Returns false, and changes nothing, if
    /// `name` is not a dependency of the field.
    pub fn set(&mut self, name: &str, value: Value) -> bool {
        match self.values.get_mut(name) {
            Some(slot) => {
                *slot = value;
                self.missing.shift_remove(name);
                true
            }
            None => {
                tracing::warn!(
                    attribute = name,
                    "setter wrote an attribute outside its dependencies"
                );
                false
            }
        }
    }

    /// Whether `name` is one of the snapshot's dependencies
    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether there are no entries
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Whether the record lacked `name` at resolve time and no setter has
    /// assigned it since
    pub fn is_missing(&self, name: &str) -> bool {
        self.missing.contains(name)
    }

    /// Entries in dependency order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.values.iter().map(|(name, value)| (name.as_str(), value))
    }

    /// Consume the snapshot into the `(name, value)` pairs to write back, in
    /// dependency order
    ///
    /// Missing attributes the setter left alone are skipped, so writing the
    /// entries back never creates them.
    pub fn into_entries(self) -> impl Iterator<Item = (String, Value)> {
        let missing = self.missing;
        self.values
            .into_iter()
            .filter(move |(name, _)| !missing.contains(name))
    }
}
