//! BiBOP-style page allocator: a fixed size-class list, one page index for
//! O(1) address resolution, and a side table for allocations too large to
//! fit any class.

mod book;
mod index;
mod page;

use std::ptr::NonNull;

use pagegc_arena::Arena;

use book::Book;
use index::PageIndex;
pub(crate) use page::Page;

/// Page size, in bytes. Must be a power of two; reference value is 1 MiB.
pub(crate) const PAGE: usize = 1 << 20;

/// Ascending slot sizes a page can be carved into. The first class whose
/// size is `>= requested` wins; anything past the last class is oversize.
pub(crate) const SIZE_CLASSES: [usize; 15] = [
    16, 32, 64, 128, 256, 512, 1024, 2048, 4096, 8192, 16384, 32768, 65536, 131072, 262144,
];

/// Result of classifying a requested allocation size.
#[derive(Clone, Copy)]
pub(crate) enum ClassSlot {
    Class(usize),
    Oversize,
}

pub(crate) fn classify(size: usize) -> ClassSlot {
    match SIZE_CLASSES.iter().position(|&c| size <= c) {
        Some(idx) => ClassSlot::Class(idx),
        None => ClassSlot::Oversize,
    }
}

pub(crate) struct Heap {
    arena: Arena,
    book: Book,
    index: PageIndex,
    oversize: Vec<(NonNull<u8>, usize)>,
    free_pages: bool,
}

impl Heap {
    pub(crate) fn new(arena: Arena, initial_index_capacity: usize, free_pages: bool) -> Self {
        Self {
            arena,
            book: Book::new(SIZE_CLASSES.len()),
            index: PageIndex::new(initial_index_capacity),
            oversize: Vec::new(),
            free_pages,
        }
    }

    /// Allocate one slot from size class `idx`, obtaining a new or recycled
    /// page if the class's current pages are all full.
    ///
    /// 1. pop a free slot from the head of `class_pages[idx]` if one exists
    /// 2. otherwise reuse a page from the empty-page cache, rebound to `idx`
    /// 3. otherwise request a fresh page from the arena
    pub(crate) fn alloc_from_class(&mut self, idx: usize) -> Option<NonNull<u8>> {
        let size_class = SIZE_CLASSES[idx];

        for mut page in self.book.class_pages(idx) {
            // SAFETY: page is a live node owned by this Heap's Book.
            let slot = unsafe { page.as_mut() }.alloc_from_freelist();
            if let Some(slot_idx) = slot {
                // SAFETY: page is a live node owned by this Heap's Book.
                let p = unsafe { page.as_ref() };
                return NonNull::new(p.slot_ptr(slot_idx));
            }
        }

        if let Some(mut page) = self.book.pop_front_empty() {
            // SAFETY: page came from this Heap's empty cache, exclusively owned.
            unsafe { page.as_mut() }.reset_for_class(PAGE, size_class);
            self.book.push_front_class(idx, page);
            // SAFETY: page was just pushed, still exclusively reachable here.
            let slot_idx = unsafe { page.as_mut() }.alloc_from_freelist()?;
            // SAFETY: page is a live node owned by this Heap's Book.
            let p = unsafe { page.as_ref() };
            return NonNull::new(p.slot_ptr(slot_idx));
        }

        let mut page = self.new_page_for_class(idx)?;
        self.book.push_front_class(idx, page);
        // SAFETY: page was just pushed, still exclusively reachable here.
        let slot_idx = unsafe { page.as_mut() }.alloc_from_freelist()?;
        // SAFETY: page is a live node owned by this Heap's Book.
        let p = unsafe { page.as_ref() };
        NonNull::new(p.slot_ptr(slot_idx))
    }

    fn new_page_for_class(&mut self, idx: usize) -> Option<NonNull<Page>> {
        let block = self.arena.alloc_page(PAGE)?;
        let page = Box::new(Page::new(block, PAGE, SIZE_CLASSES[idx]));
        let page = NonNull::new(Box::into_raw(page))?;
        self.index.insert(block.as_ptr() as usize, page);
        self.book.page_count += 1;
        Some(page)
    }

    /// Request a raw buffer too large for any size class. Never tracked by
    /// the page index; never reclaimed until [`Heap::destroy`].
    pub(crate) fn alloc_oversize(&mut self, len: usize) -> Option<NonNull<u8>> {
        let ptr = self.arena.alloc_raw(len)?;
        self.oversize.push((ptr, len));
        Some(ptr)
    }

    /// Resolve an arbitrary address to the page that owns it, if any.
    pub(crate) fn lookup_page(&self, addr: usize) -> Option<NonNull<Page>> {
        self.index.lookup(addr, PAGE)
    }

    /// Walk every class list, reclaiming unmarked in-use slots and clearing
    /// mark bits on survivors. Pages left with zero live slots are either
    /// freed back to the arena (`free_pages`) or handed to the empty cache.
    /// Returns `(bytes_reclaimed, bytes_surviving)`.
    pub(crate) fn sweep(&mut self) -> (usize, usize) {
        let mut bytes_reclaimed = 0usize;
        let mut bytes_surviving = 0usize;

        for idx in 0..SIZE_CLASSES.len() {
            let size_class = SIZE_CLASSES[idx];
            let pages: Vec<_> = self.book.class_pages(idx).collect();
            for mut page in pages {
                // Scoped so the mutable borrow of the page ends before the
                // list surgery below, which reaches the same page through a
                // raw pointer rather than this reference.
                let emptied = {
                    // SAFETY: page is a live node owned by this Heap's Book.
                    let p = unsafe { page.as_mut() };
                    for slot in 0..p.n_slots {
                        if p.in_use_bits.get(slot) {
                            if p.mark_bits.get(slot) {
                                p.mark_bits.clear(slot);
                                bytes_surviving += size_class;
                            } else {
                                p.reclaim(slot);
                                bytes_reclaimed += size_class;
                            }
                        }
                    }
                    p.in_use_count == 0
                };
                if emptied {
                    self.book.unlink_class(idx, page);
                    if self.free_pages {
                        self.free_page(page);
                    } else {
                        self.book.push_front_empty(page);
                    }
                }
            }
        }

        #[cfg(feature = "tracing")]
        tracing::debug!(bytes_reclaimed, bytes_surviving, "sweep phase complete");

        (bytes_reclaimed, bytes_surviving)
    }

    fn free_page(&mut self, page: NonNull<Page>) {
        // SAFETY: page is being removed from every structure that tracks it;
        // no other reference to it survives this call.
        let boxed = unsafe { Box::from_raw(page.as_ptr()) };
        self.index.remove(boxed.block.as_ptr() as usize);
        self.arena.dealloc_page(boxed.block, PAGE);
        self.book.page_count -= 1;
    }

    /// Sum of `in_use_count * size_class` over every class list, excluding
    /// the empty-page cache and oversize table.
    pub(crate) fn live_bytes(&self) -> usize {
        (0..SIZE_CLASSES.len())
            .map(|idx| {
                let size_class = SIZE_CLASSES[idx];
                self.book
                    .class_pages(idx)
                    // SAFETY: pages yielded here are live nodes owned by this Heap's Book.
                    .map(|page| unsafe { page.as_ref() }.in_use_count * size_class)
                    .sum::<usize>()
            })
            .sum()
    }

    /// Tear down every page, the oversize table, and the backing arena.
    pub(crate) fn destroy(mut self) {
        for idx in 0..SIZE_CLASSES.len() {
            let pages: Vec<_> = self.book.class_pages(idx).collect();
            for page in pages {
                self.book.unlink_class(idx, page);
                self.free_page(page);
            }
        }
        while let Some(page) = self.book.pop_front_empty() {
            // SAFETY: page came from the empty cache, exclusively owned.
            let boxed = unsafe { Box::from_raw(page.as_ptr()) };
            self.index.remove(boxed.block.as_ptr() as usize);
            self.arena.dealloc_page(boxed.block, PAGE);
        }
        for (ptr, len) in self.oversize.drain(..) {
            self.arena.dealloc_raw(ptr, len);
        }
        self.arena.destroy();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_heap() -> Heap {
        let arena = Arena::init().expect("arena init");
        Heap::new(arena, 128, false)
    }

    #[test]
    fn classify_picks_smallest_fitting_class() {
        assert!(matches!(classify(1), ClassSlot::Class(0)));
        assert!(matches!(classify(16), ClassSlot::Class(0)));
        assert!(matches!(classify(17), ClassSlot::Class(1)));
        assert!(matches!(classify(262144), ClassSlot::Class(14)));
        assert!(matches!(classify(262145), ClassSlot::Oversize));
    }

    #[test]
    fn alloc_from_class_resolves_through_index() {
        let mut heap = test_heap();
        let ptr = heap.alloc_from_class(0).expect("alloc");
        let page = heap.lookup_page(ptr.as_ptr() as usize);
        assert!(page.is_some());
    }

    #[test]
    fn sweep_reclaims_unmarked_and_preserves_marked() {
        let mut heap = test_heap();
        let a = heap.alloc_from_class(0).unwrap();
        let _b = heap.alloc_from_class(0).unwrap();

        let mut page = heap.lookup_page(a.as_ptr() as usize).unwrap();
        // SAFETY: page is live and owned by this heap; mark slot 0 (a).
        unsafe { page.as_mut() }.mark_bits.set(0);

        let (reclaimed, surviving) = heap.sweep();
        assert_eq!(reclaimed, 16);
        assert_eq!(surviving, 16);
        assert_eq!(heap.live_bytes(), 16);
    }

    #[test]
    fn empty_page_after_sweep_is_recycled_for_new_class() {
        let mut heap = test_heap();
        let ptr = heap.alloc_from_class(0).unwrap();
        let page_before = heap.lookup_page(ptr.as_ptr() as usize).unwrap();
        heap.sweep();
        assert_eq!(heap.live_bytes(), 0);

        let ptr2 = heap.alloc_from_class(1).unwrap();
        let page_after = heap.lookup_page(ptr2.as_ptr() as usize).unwrap();
        assert_eq!(page_before, page_after);
    }
}
