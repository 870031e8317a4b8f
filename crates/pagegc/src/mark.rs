//! Conservative mark phase: stack window, explicit roots, then a worklist
//! drain that treats every in-bounds word of a marked slot as a potential
//! pointer.

use crate::heap::{Heap, Page, PAGE};
use crate::roots::RootsTable;
use crate::stack;

/// LIFO worklist of (page, slot index) pairs awaiting their payload scan.
/// Capacity is retained across collections to avoid reallocating on every
/// `gc_collect`.
pub(crate) struct Tracer {
    worklist: Vec<(std::ptr::NonNull<Page>, usize)>,
    marked_count: usize,
}

impl Tracer {
    pub(crate) fn new() -> Self {
        Self {
            worklist: Vec::new(),
            marked_count: 0,
        }
    }

    /// Run a full mark pass: stack window, roots, then drain.
    ///
    /// `stack_top_hint` is the caller-supplied high bound for the
    /// conservative stack scan (see [`stack::spill_registers_and_scan`]).
    pub(crate) fn run(&mut self, heap: &mut Heap, roots: &RootsTable, stack_top_hint: usize) {
        self.worklist.clear();
        self.marked_count = 0;

        // SAFETY: stack_top_hint is attested by the caller to bound this
        // thread's live stack.
        unsafe {
            stack::spill_registers_and_scan(stack_top_hint, |word| {
                self.mark_ptr(heap, word);
            });
        }

        for cell in roots.iter() {
            // SAFETY: cell is a live root cell registered through gc_root;
            // it points at a caller-owned variable holding a heap pointer.
            let ptr = unsafe { cell.read() };
            self.mark_ptr(heap, ptr as usize);
        }

        self.drain(heap);

        #[cfg(feature = "tracing")]
        tracing::debug!(marked = self.marked_count, "mark phase complete");
    }

    fn drain(&mut self, heap: &mut Heap) {
        while let Some((page, slot_idx)) = self.worklist.pop() {
            // SAFETY: page was pushed by mark_ptr, which only pushes pages
            // obtained from the heap's own index; it stays alive for the
            // duration of collection.
            let p = unsafe { page.as_ref() };
            let base = p.slot_ptr(slot_idx) as usize;
            let size_class = p.size_class;
            let n_words = size_class / std::mem::size_of::<usize>();
            for w in 0..n_words {
                let addr = base + w * std::mem::size_of::<usize>();
                // SAFETY: addr is within the bounds of this live slot.
                let word = unsafe { (addr as *const usize).read_unaligned() };
                self.mark_ptr(heap, word);
            }
        }
    }

    /// Conservatively treat `candidate` as a possible heap pointer: reject
    /// it unless it resolves to an in-use slot of a known page, then mark
    /// that slot (if not already marked) and push it for payload scanning.
    fn mark_ptr(&mut self, heap: &mut Heap, candidate: usize) {
        if candidate == 0 {
            return;
        }
        let Some(page) = heap.lookup_page(candidate) else {
            return;
        };
        // SAFETY: page came from the heap's own index and stays alive for
        // the duration of collection. The borrow is scoped to this block so
        // it ends before the mutation below touches the same page.
        let slot_idx = {
            let p = unsafe { page.as_ref() };
            let offset = candidate - p.block.as_ptr() as usize;
            if offset >= PAGE {
                return;
            }
            let slot_idx = offset / p.size_class;
            if slot_idx >= p.n_slots || !p.in_use_bits.get(slot_idx) || p.mark_bits.get(slot_idx) {
                return;
            }
            slot_idx
        };
        // SAFETY: page is the same live page looked up above; the shared
        // borrow taken to compute slot_idx has already ended.
        unsafe { (*page.as_ptr()).mark_bits.set(slot_idx) };
        self.worklist.push((page, slot_idx));
        self.marked_count += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::heap::Heap;
    use pagegc_arena::Arena;

    fn test_heap() -> Heap {
        let arena = Arena::init().expect("arena init");
        Heap::new(arena, 128, false)
    }

    #[test]
    fn mark_ptr_rejects_out_of_bounds_offset() {
        let mut heap = test_heap();
        let ptr = heap.alloc_from_class(0).unwrap();
        let mut tracer = Tracer::new();
        // An address inside the page but past its last slot's class bound
        // must not be accepted by truncating division into a bogus slot.
        let bogus = ptr.as_ptr() as usize + PAGE - 1;
        tracer.mark_ptr(&mut heap, bogus);
        assert!(tracer.worklist.is_empty());
    }

    #[test]
    fn mark_ptr_marks_known_in_use_slot_once() {
        let mut heap = test_heap();
        let ptr = heap.alloc_from_class(0).unwrap();
        let mut tracer = Tracer::new();
        tracer.mark_ptr(&mut heap, ptr.as_ptr() as usize);
        assert_eq!(tracer.worklist.len(), 1);
        tracer.mark_ptr(&mut heap, ptr.as_ptr() as usize);
        assert_eq!(tracer.worklist.len(), 1, "already-marked slot is not re-pushed");
    }

    #[test]
    fn mark_ptr_rejects_free_slot() {
        let mut heap = test_heap();
        let ptr = heap.alloc_from_class(0).unwrap();
        heap.sweep(); // nothing marked, so the slot is reclaimed
        let mut tracer = Tracer::new();
        tracer.mark_ptr(&mut heap, ptr.as_ptr() as usize);
        assert!(tracer.worklist.is_empty());
    }
}
