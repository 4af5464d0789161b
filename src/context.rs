/// Where a record mutation came from.
///
/// Every write to a [`Record`](crate::Record) carries an origin inside its
/// [`MutationContext`], and every change event hands that context to its
/// listeners. This is how the engine tells its own writes apart from the
/// outside world's:
///
/// - `External`: a caller (or a back-propagating setter) wrote the value.
///   Listeners on a computed attribute react by running the field's setter.
/// - `Computed`: the engine wrote a freshly computed value. Listeners on that
///   computed attribute must not back-propagate it, otherwise every
///   recomputation would feed straight back into its own dependencies.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum Origin {
    /// Regular write from user/API code
    #[default]
    External,
    /// Write of a recomputed value; acts as the suppression flag
    Computed,
}

/// Options accompanying a single record mutation.
///
/// A context lives exactly as long as the write it describes. It is created by
/// the caller of [`Record::set_with`](crate::Record::set_with) or
/// [`Record::set_many`](crate::Record::set_many), passed by reference to the
/// change listeners of that write, and dropped when the write returns. Nothing
/// in it is persisted on the record.
///
/// # Example
/// ```ignore
/// // A plain write: validated and notified
/// record.set_with("netPrice", json!(100), &MutationContext::new())?;
///
/// // Written without raising change events (validation skipped as well)
/// record.set_with("netPrice", json!(100), &MutationContext::new().silent(true))?;
///
/// // Silent, but still run the validator
/// let ctx = MutationContext::new().silent(true).validate(true);
/// record.set_with("netPrice", json!(100), &ctx)?;
/// ```
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MutationContext {
    origin: Origin,
    silent: bool,
    validate: Option<bool>,
}

impl MutationContext {
    /// Context for a regular external write
    pub fn new() -> Self {
        Self::default()
    }

    /// Context for a write of a recomputed value (carries the suppression flag)
    pub fn computed() -> Self {
        Self {
            origin: Origin::Computed,
            ..Self::default()
        }
    }

    /// Write without raising change notifications
    ///
    /// Unless [`validate`](Self::validate) overrides it, silent writes also
    /// skip the record's validator.
    pub fn silent(mut self, silent: bool) -> Self {
        self.silent = silent;
        self
    }

    /// Force the validator on (`true`) or off (`false`) for this write
    pub fn validate(mut self, validate: bool) -> Self {
        self.validate = Some(validate);
        self
    }

    /// Origin of the write
    pub fn origin(&self) -> Origin {
        self.origin
    }

    /// Whether change listeners are skipped for this write
    pub fn is_silent(&self) -> bool {
        self.silent
    }

    /// Whether the record should run its validator for this write
    pub fn should_validate(&self) -> bool {
        self.validate.unwrap_or(!self.silent)
    }

    /// Whether this write is a recomputation that must not be back-propagated
    pub fn is_suppressed(&self) -> bool {
        self.origin == Origin::Computed
    }
}
