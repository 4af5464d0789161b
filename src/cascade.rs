use std::cell::Cell;

// Thread-local cascade depth counter
// Incremented while a binder callback (recompute or back-propagation) runs,
// so nested callbacks triggered by its writes see a higher depth.
thread_local! {
    static CASCADE_DEPTH: Cell<usize> = const { Cell::new(0) };
}

/// RAII guard that marks one level of engine-driven propagation.
///
/// Dropping the guard (normally or while unwinding from a panicking getter or
/// setter) restores the previous depth.
pub(crate) struct CascadeGuard {
    depth: usize,
}

impl CascadeGuard {
    pub(crate) fn enter() -> Self {
        let depth = CASCADE_DEPTH.with(|d| {
            let depth = d.get() + 1;
            d.set(depth);
            depth
        });
        Self { depth }
    }

    /// Depth of the level this guard represents (1 for the outermost)
    pub(crate) fn depth(&self) -> usize {
        self.depth
    }
}

impl Drop for CascadeGuard {
    fn drop(&mut self) {
        CASCADE_DEPTH.with(|d| d.set(d.get().saturating_sub(1)));
    }
}

/// How many engine callbacks are currently running on this thread
///
/// Outside any record write this is 0. A write to a dependency runs the
/// recomputation at depth 1; a direct write to a computed field runs the
/// back-propagation at depth 1 and the recomputations it causes at depth 2.
/// Thanks to cycle suppression the depth never grows past that for a single
/// computed field, which makes this useful for diagnostics and tests.
pub fn cascade_depth() -> usize {
    CASCADE_DEPTH.with(Cell::get)
}
