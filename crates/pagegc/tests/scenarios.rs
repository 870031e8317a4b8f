//! Black-box collector scenarios, run through the public API only.
//!
//! Each test runs on its own thread (the default `cargo test` harness), so
//! each gets an independent collector without needing explicit teardown
//! between tests. Assertions about "is this reclaimed" never keep the
//! allocated address around in a plain stack local afterward — a
//! conservative scanner would find it there and correctly (if unhelpfully
//! for the test) keep it alive. Where a value must persist past a
//! collection it is rooted explicitly through a heap-allocated cell
//! instead, matching how a real caller would use the API.

#![cfg(feature = "test-util")]

use pagegc::test_util::{classified_size, clear_registers};
use pagegc::{gc_alloc, gc_collect, gc_destroy, gc_init, gc_root, gc_unroot, last_gc_metrics};

fn stack_top() -> usize {
    let local = 0usize;
    std::hint::black_box(&local);
    std::ptr::addr_of!(local) as usize + (1 << 20)
}

#[test]
fn s1_size_classification() {
    assert_eq!(classified_size(1), 16);
    assert_eq!(classified_size(16), 16);
    assert_eq!(classified_size(17), 32);
    assert_eq!(classified_size(32), 32);
    assert_eq!(classified_size(513), 1024);
}

#[test]
fn s2_unrooted_allocation_is_reclaimed() {
    assert!(gc_init(stack_top(), false));
    let _ = gc_alloc(64);
    // SAFETY: no register content is needed past this point in the test.
    unsafe { clear_registers() };
    gc_collect();
    assert_eq!(last_gc_metrics().bytes_reclaimed, 64);
    gc_destroy();
}

#[test]
fn s3_emptied_page_is_recycled_for_a_different_class() {
    assert!(gc_init(stack_top(), false));
    let _ = gc_alloc(16);
    // SAFETY: no register content is needed past this point in the test.
    unsafe { clear_registers() };
    gc_collect();
    assert_eq!(last_gc_metrics().bytes_reclaimed, 16);

    // A page emptied while bound to one class must still be usable by a
    // different class's next allocation rather than sitting stuck.
    let large = gc_alloc(4096);
    assert!(!large.as_ptr().is_null());
    gc_destroy();
}

#[test]
fn s4_oversize_allocation_survives_every_collection_unrooted() {
    assert!(gc_init(stack_top(), false));
    let oversize_len = 1 << 20; // the page size itself: past the largest class (262144)
    assert_eq!(classified_size(oversize_len), oversize_len, "must not round into a class");
    let ptr = gc_alloc(oversize_len);
    assert!(!ptr.as_ptr().is_null());

    // Oversize blocks sit outside the page index entirely: no amount of
    // collection reclaims them or counts them as live bytes.
    gc_collect();
    assert_eq!(last_gc_metrics().bytes_surviving, 0);
    gc_collect();
    assert_eq!(last_gc_metrics().bytes_surviving, 0);
    gc_destroy();
}

#[test]
fn s5_pressure_triggers_collection_without_explicit_gc_collect() {
    assert!(gc_init(stack_top(), false));
    // Allocate well past the default growth-factor threshold without ever
    // rooting anything or calling gc_collect directly; gc_alloc must run
    // its own collections so the heap doesn't grow unbounded.
    // Threshold starts at PAGE (1 MiB) * growth_factor (1.5) = 1.5 MiB;
    // 10_000 * 256 bytes comfortably clears it partway through the loop.
    for _ in 0..10_000 {
        let _ = gc_alloc(256);
    }
    assert!(last_gc_metrics().total_collections > 0);
    gc_destroy();
}

#[test]
fn s6_rooting_and_unrooting_controls_reclaim() {
    assert!(gc_init(stack_top(), false));

    // The cell lives in a heap allocation, not a plain stack local, so the
    // only thing keeping the allocation alive is the explicit root below.
    let mut cell: Box<*mut u8> = Box::new(gc_alloc(64).as_ptr());
    let cell_ptr: *mut *mut u8 = &mut *cell;
    gc_root(cell_ptr);

    gc_collect();
    assert_eq!(last_gc_metrics().bytes_surviving, 64, "rooted allocation must survive");

    gc_unroot(cell_ptr);
    *cell = std::ptr::null_mut();
    drop(cell);
    // SAFETY: no register content is needed past this point in the test.
    unsafe { clear_registers() };
    gc_collect();
    assert_eq!(
        last_gc_metrics().bytes_surviving,
        0,
        "unrooted allocation must be reclaimed on the next collection"
    );
    gc_destroy();
}
