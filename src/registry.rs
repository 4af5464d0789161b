use crate::field::ComputedField;
use indexmap::IndexMap;
use indexmap::map::Entry;
use std::sync::Arc;

/// Declaration of the computed attributes of a record
///
/// This is the explicit counterpart of declaring getters and setters on a
/// model: a named, ordered collection of [`ComputedField`]s handed to the
/// engine at construction.
///
/// ```ignore
/// let spec = ComputedSpec::new()
///     .field(ComputedField::new("grossPrice").depends(["netPrice", "vatRate"]).get(gross))
///     .field(ComputedField::new("vat").depends(["netPrice", "vatRate"]).get(vat));
/// ```
#[derive(Clone, Debug, Default)]
pub struct ComputedSpec {
    fields: Vec<ComputedField>,
}

impl ComputedSpec {
    /// Empty declaration
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a field declaration
    pub fn field(mut self, field: ComputedField) -> Self {
        self.fields.push(field);
        self
    }

    /// Add a field declaration in place
    pub fn push(&mut self, field: ComputedField) {
        self.fields.push(field);
    }

    /// Number of declarations, including ones the registry will drop
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Whether nothing was declared
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

impl FromIterator<ComputedField> for ComputedSpec {
    fn from_iter<I: IntoIterator<Item = ComputedField>>(iter: I) -> Self {
        Self {
            fields: iter.into_iter().collect(),
        }
    }
}

/// Ordered set of computed-field descriptors of one engine
///
/// Built once by [`Registry::scan`] and never modified afterwards.
#[derive(Clone, Debug, Default)]
pub struct Registry {
    fields: Vec<Arc<ComputedField>>,
}

impl Registry {
    /// Extract the computed fields from a declaration
    ///
    /// - No declaration gives an empty registry.
    /// - Declarations with neither getter nor setter are skipped.
    /// - A name declared twice keeps the later declaration, at the position of
    ///   the first one.
    pub fn scan(spec: Option<ComputedSpec>) -> Self {
        let Some(spec) = spec else {
            tracing::debug!("no computed fields declared");
            return Self::default();
        };

        let mut by_name: IndexMap<String, ComputedField> = IndexMap::new();
        for field in spec.fields {
            if !field.has_getter() && !field.has_setter() {
                tracing::debug!(field = field.name(), "skipping declaration without get or set");
                continue;
            }

            match by_name.entry(field.name().to_string()) {
                Entry::Occupied(mut slot) => {
                    tracing::warn!(field = field.name(), "computed field declared twice");
                    slot.insert(field);
                }
                Entry::Vacant(slot) => {
                    slot.insert(field);
                }
            }
        }

        Self {
            fields: by_name.into_values().map(Arc::new).collect(),
        }
    }

    /// Descriptor of the computed field called `name`
    pub fn lookup(&self, name: &str) -> Option<&ComputedField> {
        self.fields
            .iter()
            .find(|field| field.name() == name)
            .map(Arc::as_ref)
    }

    /// Whether `name` is a computed field
    pub fn contains(&self, name: &str) -> bool {
        self.lookup(name).is_some()
    }

    /// Descriptors in registration order
    pub fn iter(&self) -> impl Iterator<Item = &ComputedField> {
        self.fields.iter().map(Arc::as_ref)
    }

    /// Field names in registration order
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|field| field.name())
    }

    /// Names of fields left out of default serialization
    pub fn non_serializable(&self) -> impl Iterator<Item = &str> {
        self.fields
            .iter()
            .filter(|field| !field.is_serializable())
            .map(|field| field.name())
    }

    /// Number of computed fields
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Whether there are no computed fields
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Shared descriptors, for the binder
    pub(crate) fn shared(&self) -> impl Iterator<Item = &Arc<ComputedField>> {
        self.fields.iter()
    }
}
