//! Per-size-class page lists plus the empty-page cache.
//!
//! Each list is an intrusive singly linked list threaded through
//! [`Page::next`]; a page lives in exactly one list at a time.

use std::ptr::NonNull;

use super::page::Page;

pub(crate) struct Book {
    class_heads: Vec<Option<NonNull<Page>>>,
    empty_head: Option<NonNull<Page>>,
    pub(crate) page_count: usize,
}

impl Book {
    pub(crate) fn new(n_classes: usize) -> Self {
        Self {
            class_heads: vec![None; n_classes],
            empty_head: None,
            page_count: 0,
        }
    }

    pub(crate) fn class_head(&self, class_idx: usize) -> Option<NonNull<Page>> {
        self.class_heads[class_idx]
    }

    pub(crate) fn push_front_class(&mut self, class_idx: usize, mut page: NonNull<Page>) {
        // SAFETY: page is an exclusively-owned Page the caller is inserting.
        unsafe {
            page.as_mut().next = self.class_heads[class_idx];
        }
        self.class_heads[class_idx] = Some(page);
    }

    pub(crate) fn push_front_empty(&mut self, mut page: NonNull<Page>) {
        // SAFETY: page is an exclusively-owned Page the caller is inserting.
        unsafe {
            page.as_mut().next = self.empty_head;
        }
        self.empty_head = Some(page);
    }

    pub(crate) fn pop_front_empty(&mut self) -> Option<NonNull<Page>> {
        let page = self.empty_head?;
        // SAFETY: page is a live list node owned by this Book.
        self.empty_head = unsafe { page.as_ref().next };
        Some(page)
    }

    /// Remove `target` from class list `class_idx`. `target` must currently
    /// be in that list.
    pub(crate) fn unlink_class(&mut self, class_idx: usize, target: NonNull<Page>) {
        let mut cursor = &mut self.class_heads[class_idx];
        loop {
            let Some(node) = *cursor else {
                panic!("page not found in its class list");
            };
            if node == target {
                // SAFETY: target is a live list node owned by this Book.
                *cursor = unsafe { target.as_ref().next };
                return;
            }
            // SAFETY: node is a live list node owned by this Book.
            cursor = unsafe { &mut (*node.as_ptr()).next };
        }
    }

    /// Iterate pages in class list `class_idx`, yielding each as a raw
    /// pointer so the sweeper can mutate pages while walking the list.
    pub(crate) fn class_pages(&self, class_idx: usize) -> impl Iterator<Item = NonNull<Page>> + '_ {
        let mut cursor = self.class_heads[class_idx];
        std::iter::from_fn(move || {
            let node = cursor?;
            // SAFETY: node is a live list node owned by this Book.
            cursor = unsafe { node.as_ref().next };
            Some(node)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::alloc::{alloc, Layout};

    fn leaked_page(size_class: usize) -> NonNull<Page> {
        let layout = Layout::from_size_align(4096, 4096).unwrap();
        // SAFETY: layout is non-zero sized; leaked intentionally for this test.
        let block = NonNull::new(unsafe { alloc(layout) }).unwrap();
        let page = Box::new(Page::new(block, 4096, size_class));
        NonNull::new(Box::into_raw(page)).unwrap()
    }

    #[test]
    fn push_and_unlink_class_list() {
        let mut book = Book::new(1);
        let a = leaked_page(64);
        let b = leaked_page(64);
        let c = leaked_page(64);
        book.push_front_class(0, a);
        book.push_front_class(0, b);
        book.push_front_class(0, c);

        let order: Vec<_> = book.class_pages(0).collect();
        assert_eq!(order, vec![c, b, a]);

        book.unlink_class(0, b);
        let order: Vec<_> = book.class_pages(0).collect();
        assert_eq!(order, vec![c, a]);
    }

    #[test]
    fn empty_cache_is_lifo() {
        let mut book = Book::new(1);
        let a = leaked_page(64);
        let b = leaked_page(64);
        book.push_front_empty(a);
        book.push_front_empty(b);
        assert_eq!(book.pop_front_empty(), Some(b));
        assert_eq!(book.pop_front_empty(), Some(a));
        assert_eq!(book.pop_front_empty(), None);
    }
}
