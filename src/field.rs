use crate::snapshot::Snapshot;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

/// Getter of a computed field: derives the value from a dependency snapshot
pub type Getter = Arc<dyn Fn(&Snapshot) -> Value + Send + Sync>;

/// Setter of a computed field: given the value written to the field, update
/// the dependency snapshot in place so that the getter would reproduce it
pub type Setter = Arc<dyn Fn(&Value, &mut Snapshot) + Send + Sync>;

/// Registration function of an external dependency
///
/// It is called once, when the field is bound, with a [`Trigger`] it must keep
/// and fire whenever its private source changes.
pub type Subscribe = Arc<dyn Fn(Trigger) + Send + Sync>;

/// Callback handed to external dependencies
///
/// Firing it recomputes the computed field it was created for. Once the
/// engine (or the record) is dropped, firing is a no-op.
#[derive(Clone)]
pub struct Trigger {
    callback: Arc<dyn Fn() + Send + Sync>,
}

impl Trigger {
    pub(crate) fn new<F>(callback: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        Self {
            callback: Arc::new(callback),
        }
    }

    /// Recompute the field this trigger belongs to
    pub fn fire(&self) {
        (self.callback)();
    }
}

impl fmt::Debug for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Trigger")
    }
}

/// Something a computed field depends on
#[derive(Clone)]
pub enum Dependency {
    /// An attribute of the record; its value appears in the snapshot
    Named(String),
    /// An outside source that announces its own changes through a [`Trigger`].
    /// It contributes nothing to the snapshot: getters and setters read it
    /// from wherever the source lives.
    External(Subscribe),
}

impl Dependency {
    /// Attribute name for named dependencies
    pub fn name(&self) -> Option<&str> {
        match self {
            Dependency::Named(name) => Some(name),
            Dependency::External(_) => None,
        }
    }
}

impl From<&str> for Dependency {
    fn from(name: &str) -> Self {
        Dependency::Named(name.to_string())
    }
}

impl From<String> for Dependency {
    fn from(name: String) -> Self {
        Dependency::Named(name)
    }
}

impl fmt::Debug for Dependency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Dependency::Named(name) => f.debug_tuple("Named").field(name).finish(),
            Dependency::External(_) => f.write_str("External"),
        }
    }
}

/// Declaration of one computed attribute
///
/// # Example
/// ```ignore
/// let gross_price = ComputedField::new("grossPrice")
///     .depends(["netPrice", "vatRate"])
///     .get(|fields| {
///         let net = fields.number("netPrice").unwrap_or_default();
///         let vat = fields.number("vatRate").unwrap_or_default();
///         json!(net * (1.0 + vat / 100.0))
///     })
///     .set(|value, fields| {
///         let vat = fields.number("vatRate").unwrap_or_default();
///         let gross = value.as_f64().unwrap_or_default();
///         fields.set("netPrice", json!(gross / (1.0 + vat / 100.0)));
///     });
/// ```
///
/// A field without setter is read-only: writing the attribute directly stores
/// the value but leaves the dependencies alone. A field without getter is
/// never recomputed.
#[derive(Clone)]
pub struct ComputedField {
    name: String,
    getter: Option<Getter>,
    setter: Option<Setter>,
    depends: Vec<Dependency>,
    serializable: bool,
    quiet: bool,
}

impl ComputedField {
    /// Start declaring a computed attribute called `name`
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            getter: None,
            setter: None,
            depends: Vec::new(),
            serializable: true,
            quiet: false,
        }
    }

    /// Add one dependency
    pub fn depends_on(mut self, dependency: impl Into<Dependency>) -> Self {
        self.depends.push(dependency.into());
        self
    }

    /// Add several named dependencies, in order
    pub fn depends<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.depends
            .extend(names.into_iter().map(|name| Dependency::Named(name.into())));
        self
    }

    /// Add an external dependency
    pub fn depends_on_external<F>(mut self, subscribe: F) -> Self
    where
        F: Fn(Trigger) + Send + Sync + 'static,
    {
        self.depends.push(Dependency::External(Arc::new(subscribe)));
        self
    }

    /// Set the getter
    pub fn get<F>(mut self, getter: F) -> Self
    where
        F: Fn(&Snapshot) -> Value + Send + Sync + 'static,
    {
        self.getter = Some(Arc::new(getter));
        self
    }

    /// Set the inverse setter
    pub fn set<F>(mut self, setter: F) -> Self
    where
        F: Fn(&Value, &mut Snapshot) + Send + Sync + 'static,
    {
        self.setter = Some(Arc::new(setter));
        self
    }

    /// Include the field in default serialization (the default) or not
    pub fn serializable(mut self, serializable: bool) -> Self {
        self.serializable = serializable;
        self
    }

    /// Store recomputed values without raising change notifications
    pub fn quiet(mut self, quiet: bool) -> Self {
        self.quiet = quiet;
        self
    }

    /// Attribute name of the field
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Declared dependencies, in declaration order
    pub fn dependencies(&self) -> &[Dependency] {
        &self.depends
    }

    /// Names of the attribute dependencies, in declaration order
    pub fn dependency_names(&self) -> impl Iterator<Item = &str> {
        self.depends.iter().filter_map(Dependency::name)
    }

    /// Whether a getter was declared
    pub fn has_getter(&self) -> bool {
        self.getter.is_some()
    }

    /// Whether a setter was declared
    pub fn has_setter(&self) -> bool {
        self.setter.is_some()
    }

    /// Whether writes to the field are ignored by the dependencies
    pub fn is_read_only(&self) -> bool {
        self.setter.is_none()
    }

    /// Whether the field appears in default serialization
    pub fn is_serializable(&self) -> bool {
        self.serializable
    }

    /// Whether recomputed values are stored silently
    pub fn is_quiet(&self) -> bool {
        self.quiet
    }

    /// Run the getter on a snapshot. `None` if no getter was declared.
    pub fn compute(&self, snapshot: &Snapshot) -> Option<Value> {
        self.getter.as_ref().map(|getter| getter(snapshot))
    }

    /// Run the setter on a snapshot. Returns false if no setter was declared.
    pub fn apply(&self, value: &Value, snapshot: &mut Snapshot) -> bool {
        match &self.setter {
            Some(setter) => {
                setter(value, snapshot);
                true
            }
            None => false,
        }
    }
}

impl fmt::Debug for ComputedField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComputedField")
            .field("name", &self.name)
            .field("depends", &self.depends)
            .field("get", &self.getter.is_some())
            .field("set", &self.setter.is_some())
            .field("serializable", &self.serializable)
            .field("quiet", &self.quiet)
            .finish()
    }
}
