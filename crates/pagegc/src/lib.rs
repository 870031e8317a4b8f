//! A conservative mark-sweep garbage collector over a size-classed page
//! allocator.
//!
//! `pagegc` does not provide a smart pointer. Callers allocate raw bytes
//! through [`gc_alloc`], keep the returned address wherever they like
//! (including plain local variables, which the conservative stack scanner
//! will find on its own), and explicitly root anything that must survive a
//! collection while off the stack with [`gc_root`]/[`gc_unroot`].
//!
//! # Quick start
//!
//! ```ignore
//! use pagegc::{gc_init, gc_alloc, gc_collect};
//!
//! let stack_top = /* captured near main, see gc_init's docs */ 0;
//! gc_init(stack_top, false);
//! let ptr = gc_alloc(64);
//! gc_collect();
//! ```

#![warn(missing_docs)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_panics_doc)]

mod heap;
mod mark;
mod metrics;
mod pressure;
mod roots;
mod stack;

use std::cell::RefCell;
use std::ptr::NonNull;
use std::time::Instant;

use heap::{classify, ClassSlot, Heap};
use mark::Tracer;
use pressure::Pressure;
use roots::RootsTable;

pub use metrics::{last_gc_metrics, GcMetrics};

/// Tunables consumed once by [`gc_init_with_config`].
#[derive(Debug, Clone, Copy)]
pub struct GcConfig {
    /// How much bigger the pressure threshold is than the bytes that
    /// survived the previous collection.
    pub growth_factor: f64,
    /// Initial capacity of the address-to-page hash table.
    pub initial_index_capacity: usize,
    /// When `true`, pages left with zero live slots after a sweep are
    /// unmapped immediately instead of cached for reuse by another class.
    pub free_pages: bool,
}

impl Default for GcConfig {
    fn default() -> Self {
        Self {
            growth_factor: 1.5,
            initial_index_capacity: 128,
            free_pages: false,
        }
    }
}

struct Collector {
    heap: Heap,
    roots: RootsTable,
    tracer: Tracer,
    pressure: Pressure,
    stack_top_hint: usize,
}

thread_local! {
    static COLLECTOR: RefCell<Option<Collector>> = const { RefCell::new(None) };
}

fn with_collector<F, R>(f: F) -> R
where
    F: FnOnce(&mut Collector) -> R,
{
    COLLECTOR.with(|c| {
        let mut slot = c.borrow_mut();
        let collector = slot
            .as_mut()
            .expect("pagegc: gc_init must be called before using the collector");
        f(collector)
    })
}

/// Initialize the collector for the current thread with default tunables.
///
/// `stack_top_hint` should be the highest stack address the conservative
/// scanner is allowed to read — typically the address of a local variable
/// captured once near the top of the call stack (e.g. in `main`) and
/// threaded down to wherever `gc_init` is called. `free_memory` selects
/// whether emptied pages are returned to the OS immediately (`true`) or
/// cached for reuse by a different size class (`false`).
///
/// Returns `false` if the backing arena could not be initialized.
pub fn gc_init(stack_top_hint: usize, free_memory: bool) -> bool {
    gc_init_with_config(
        stack_top_hint,
        GcConfig {
            free_pages: free_memory,
            ..GcConfig::default()
        },
    )
}

/// Initialize the collector for the current thread with explicit tunables.
/// See [`gc_init`] for `stack_top_hint`.
pub fn gc_init_with_config(stack_top_hint: usize, config: GcConfig) -> bool {
    let Some(arena) = pagegc_arena::Arena::init() else {
        return false;
    };
    let heap = Heap::new(arena, config.initial_index_capacity, config.free_pages);
    let collector = Collector {
        heap,
        roots: RootsTable::new(),
        tracer: Tracer::new(),
        pressure: Pressure::new(config.growth_factor),
        stack_top_hint,
    };
    COLLECTOR.with(|c| *c.borrow_mut() = Some(collector));
    true
}

/// Tear down the collector, releasing every page, oversize block, and the
/// backing arena back to the OS.
pub fn gc_destroy() {
    let collector = COLLECTOR.with(|c| c.borrow_mut().take());
    if let Some(collector) = collector {
        collector.heap.destroy();
    }
}

/// Allocate `size` bytes. May trigger a collection first if allocation
/// pressure has crossed the configured threshold.
///
/// # Panics
///
/// Panics if the arena is exhausted even after a retry collection. This
/// mirrors an out-of-memory abort rather than exposing a fallible API that
/// callers would have to thread through every allocation site.
pub fn gc_alloc(size: usize) -> NonNull<u8> {
    with_collector(|c| {
        let slot = classify(size);
        let charged = charged_size(slot, size);
        if c.pressure.should_collect(charged) {
            run_collection(c);
        }
        if let Some(ptr) = try_alloc(c, slot, size) {
            c.pressure.record_alloc(charged);
            return ptr;
        }
        run_collection(c);
        match try_alloc(c, slot, size) {
            Some(ptr) => {
                c.pressure.record_alloc(charged);
                ptr
            }
            None => panic!("pagegc: arena exhausted"),
        }
    })
}

/// The size actually charged against pressure accounting: the rounded
/// slot size for a classed allocation (matching what `heap::live_bytes`
/// counts it as), or the raw length for an oversize one.
fn charged_size(slot: ClassSlot, size: usize) -> usize {
    match slot {
        ClassSlot::Class(idx) => heap::SIZE_CLASSES[idx],
        ClassSlot::Oversize => size,
    }
}

fn try_alloc(c: &mut Collector, slot: ClassSlot, size: usize) -> Option<NonNull<u8>> {
    match slot {
        ClassSlot::Class(idx) => c.heap.alloc_from_class(idx),
        ClassSlot::Oversize => c.heap.alloc_oversize(size),
    }
}

/// Run a collection now, regardless of pressure.
pub fn gc_collect() {
    with_collector(run_collection);
}

fn run_collection(c: &mut Collector) {
    #[cfg(feature = "tracing")]
    let _span = tracing::debug_span!("gc_collect").entered();

    let start = Instant::now();
    c.tracer.run(&mut c.heap, &c.roots, c.stack_top_hint);
    let (bytes_reclaimed, bytes_surviving) = c.heap.sweep();
    c.pressure.post_collect(c.heap.live_bytes());

    metrics::record_metrics(GcMetrics {
        duration: start.elapsed(),
        bytes_reclaimed,
        bytes_surviving,
        total_collections: 0,
    });
}

/// Register `cell` as a root: the mark phase will read `*cell` on every
/// collection and treat the result as a live pointer. `cell` is typically
/// `&mut` a local or field holding a [`gc_alloc`]'d address, so the root
/// stays correct even if the caller reassigns it between collections.
pub fn gc_root(cell: *mut *mut u8) {
    with_collector(|c| c.roots.add(cell));
}

/// Unregister a root added with [`gc_root`]. Unrooting a cell that was
/// never rooted (or already unrooted) is a non-fatal no-op.
pub fn gc_unroot(cell: *mut *mut u8) {
    with_collector(|c| c.roots.remove(cell));
}

#[doc(hidden)]
pub mod test_util {
    /// Tear down and leak any collector state on the current thread so the
    /// next test starts from a clean slate. Only available under `#[cfg(test)]`
    /// or the `test-util` feature.
    #[cfg(any(test, feature = "test-util"))]
    pub fn reset() {
        super::COLLECTOR.with(|c| c.borrow_mut().take());
        super::metrics::reset();
    }

    /// Resolve the slot size `size` would be rounded up to: one of the
    /// fifteen size classes, or `size` itself if it is oversize.
    #[cfg(any(test, feature = "test-util"))]
    #[must_use]
    pub fn classified_size(size: usize) -> usize {
        super::charged_size(super::classify(size), size)
    }

    /// Zero callee-saved registers so a value dropped moments earlier can't
    /// still be found there (or in the stack slot it was spilled from) and
    /// mistaken for a live root by the next collection.
    ///
    /// # Safety
    /// See [`crate::stack::clear_registers`].
    #[cfg(any(test, feature = "test-util"))]
    pub unsafe fn clear_registers() {
        // SAFETY: forwarded from caller.
        unsafe { super::stack::clear_registers() };
    }
}
