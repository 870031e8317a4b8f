//! Explicit root table.
//!
//! Unlike stack scanning, roots are registered by address and must be
//! explicitly unregistered; the collector cannot infer when a caller is
//! done with one. The table tombstones removed entries rather than
//! shifting the array, then lazily compacts once the tombstone count makes
//! that worthwhile.

/// A growable table of root cells. Each cell is the *address of a variable
/// holding a heap pointer*, not the heap pointer itself — the mark phase
/// dereferences each cell once to read the current pointer value, so a
/// caller can mutate the rooted variable in place without re-rooting.
pub(crate) struct RootsTable {
    cells: Vec<Option<*mut *mut u8>>,
    live_count: usize,
}

impl RootsTable {
    pub(crate) fn new() -> Self {
        Self {
            cells: Vec::new(),
            live_count: 0,
        }
    }

    /// Register `cell` as a root, unless it is already registered.
    pub(crate) fn add(&mut self, cell: *mut *mut u8) {
        if self.cells.iter().flatten().any(|&c| c == cell) {
            return;
        }
        self.cells.push(Some(cell));
        self.live_count += 1;
        self.maybe_compact();
    }

    /// Unregister `cell`. A cell that was never registered (or was already
    /// removed) is a non-fatal no-op; the caller is warned when the
    /// `tracing` feature is enabled.
    pub(crate) fn remove(&mut self, cell: *mut *mut u8) {
        if let Some(slot) = self.cells.iter_mut().find(|c| **c == Some(cell)) {
            *slot = None;
            self.live_count -= 1;
        } else {
            #[cfg(feature = "tracing")]
            tracing::warn!(cell = ?cell, "unroot of a cell that was not registered");
        }
    }

    /// Number of live (non-tombstoned) roots.
    pub(crate) fn live_count(&self) -> usize {
        self.live_count
    }

    /// Iterate live root cells.
    pub(crate) fn iter(&self) -> impl Iterator<Item = *mut *mut u8> + '_ {
        self.cells.iter().filter_map(|c| *c)
    }

    /// Drop tombstones once the high-water mark exceeds twice the live
    /// count, so a long-running root churn doesn't grow the table forever.
    fn maybe_compact(&mut self) {
        if self.cells.len() > 2 * self.live_count.max(1) {
            self.cells.retain(Option::is_some);
        }
    }
}
