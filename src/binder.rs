// Update binder - two-way wiring between a computed field and its dependencies
//
// For a computed field N the binder installs:
// - update_computed on every dependency: recompute N from a fresh snapshot
//   and store it with a Computed-origin context (the suppression flag)
// - update_dependents on N itself: when N is written from outside, run N's
//   setter on a fresh snapshot and write the snapshot back
//
// CYCLE SUPPRESSION:
// update_computed's own write to N raises change:N like any other write. The
// update_dependents listener sees the Computed origin on that event and
// returns immediately, so a recomputation never flows back into the
// dependencies it was computed from. A cascade started by one external write
// therefore stops after at most two levels:
//
//   set(netPrice)   -> update_computed(grossPrice) -> [suppressed]
//   set(grossPrice) -> update_dependents -> set(netPrice)
//                   -> update_computed(grossPrice) -> [suppressed]

use crate::cascade::CascadeGuard;
use crate::config::EngineConfig;
use crate::context::MutationContext;
use crate::events::{ChangeEvent, ListenerId};
use crate::field::{ComputedField, Dependency, Trigger};
use crate::record::Record;
use crate::snapshot::Snapshot;
use std::sync::Arc;

/// Listener state for one computed field
pub(crate) struct Binding {
    field: Arc<ComputedField>,
    config: EngineConfig,
}

impl Binding {
    /// Recompute the field and store the result
    pub(crate) fn update_computed(&self, record: &Record) {
        if !self.field.has_getter() {
            return;
        }

        let guard = CascadeGuard::enter();
        let snapshot = Snapshot::resolve(record, self.field.dependencies());
        let Some(value) = self.field.compute(&snapshot) else {
            return;
        };

        let mut context = MutationContext::computed();
        if self.field.is_quiet() {
            context = context
                .silent(true)
                .validate(self.config.revalidate_on_quiet_update);
        }

        tracing::debug!(
            field = self.field.name(),
            depth = guard.depth(),
            %value,
            quiet = self.field.is_quiet(),
            "storing recomputed value"
        );

        if let Err(err) = record.set_with(self.field.name(), value, &context) {
            tracing::warn!(
                field = self.field.name(),
                error = %err,
                "record rejected recomputed value"
            );
        }
    }

    /// React to a write of the field itself
    pub(crate) fn update_dependents(&self, event: &ChangeEvent<'_>) {
        // The write came from update_computed: nothing to back-propagate
        if event.context.is_suppressed() {
            cov_mark::hit!(recomputed_write_not_backpropagated);
            tracing::trace!(field = self.field.name(), "skipping recomputed write");
            return;
        }

        if self.field.is_read_only() {
            cov_mark::hit!(read_only_write_ignored);
            tracing::trace!(field = self.field.name(), "write to read-only computed field");
            return;
        }

        let guard = CascadeGuard::enter();
        let mut snapshot = Snapshot::resolve(event.record, self.field.dependencies());

        if !self.config.backpropagate_unchanged
            && self.field.compute(&snapshot).as_ref() == Some(event.value)
        {
            cov_mark::hit!(unchanged_write_not_backpropagated);
            tracing::trace!(
                field = self.field.name(),
                "dependencies already produce written value"
            );
            return;
        }

        self.field.apply(event.value, &mut snapshot);

        tracing::debug!(
            field = self.field.name(),
            depth = guard.depth(),
            value = %event.value,
            "back-propagating write to dependencies"
        );

        // Same options as the triggering write. Its origin is External here,
        // so the dependency writes recompute the field as usual.
        if let Err(err) = event
            .record
            .set_many(snapshot.into_entries(), event.context)
        {
            tracing::warn!(
                field = self.field.name(),
                error = %err,
                "record rejected back-propagated dependencies"
            );
        }
    }
}

/// A bound field: its listener state plus the listeners registered on the record
pub(crate) struct Bound {
    pub(crate) binding: Arc<Binding>,
    pub(crate) listeners: Vec<ListenerId>,
}

/// Wire one computed field into `record`
///
/// 1. `update_computed` is subscribed to every named dependency; external
///    dependencies receive a [`Trigger`] that runs it
/// 2. `update_dependents` is subscribed to the field's own change topic
/// 3. If the record already holds attributes, the field is computed once;
///    an empty record defers computation to the first dependency change
pub(crate) fn bind(record: &Record, field: Arc<ComputedField>, config: EngineConfig) -> Bound {
    let binding = Arc::new(Binding { field, config });
    let mut listeners = Vec::new();

    // 1. Dependencies -> computed
    for dependency in binding.field.dependencies() {
        match dependency {
            Dependency::Named(name) => {
                let binding = binding.clone();
                listeners.push(record.on_change(name.as_str(), move |event| {
                    binding.update_computed(event.record)
                }));
            }
            Dependency::External(subscribe) => {
                // Weak handles: an outside source may outlive the engine and the record
                let binding = Arc::downgrade(&binding);
                let record = record.downgrade();
                subscribe(Trigger::new(move || {
                    if let (Some(binding), Some(record)) = (binding.upgrade(), record.upgrade()) {
                        binding.update_computed(&record);
                    }
                }));
            }
        }
    }

    // 2. Computed -> dependencies
    {
        let binding = binding.clone();
        listeners.push(record.on_change(binding.field.name().to_string(), move |event| {
            binding.update_dependents(event)
        }));
    }

    tracing::debug!(
        field = binding.field.name(),
        listeners = listeners.len(),
        "bound computed field"
    );

    // 3. Initial value
    if record.is_empty() {
        tracing::debug!(
            field = binding.field.name(),
            "record is empty, deferring first computation"
        );
    } else {
        binding.update_computed(record);
    }

    Bound { binding, listeners }
}
