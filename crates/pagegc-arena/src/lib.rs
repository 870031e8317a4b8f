//! Page-aligned bump arena.
//!
//! `pagegc-arena` implements the two supplier contracts a BiBOP-style page
//! allocator needs: a page-sized, page-aligned buffer, and a raw buffer of
//! arbitrary size for over-sized allocations. Both are backed by anonymous
//! OS memory mappings rather than the global Rust allocator, so that
//! releasing a page (or an oversize block) actually gives the memory back
//! to the operating system.
//!
//! This crate owns no collector invariants. It is a thin, fallible wrapper
//! over `mmap`/`VirtualAlloc`; the garbage collector in `pagegc` is the
//! only thing that interprets the bytes it hands out.

use std::ptr::NonNull;

#[cfg(unix)]
mod unix;
#[cfg(unix)]
use unix as os;

#[cfg(windows)]
mod windows;
#[cfg(windows)]
use windows as os;

/// A single live mapping handed out by the arena, tracked so [`Arena::drop`]
/// can free everything still outstanding at teardown even if the collector
/// forgot to release something explicitly.
struct Mapping {
    ptr: *mut u8,
    len: usize,
}

/// Handle to the arena's OS-backed memory pool.
///
/// Created by [`Arena::init`], torn down by [`Arena::destroy`] (or by
/// dropping it). An `Arena` resets only the state reachable through `self`
/// — never a process-wide global — so that two `Arena`s (as in tests that
/// reinitialize the collector) never interfere with each other.
pub struct Arena {
    live: Vec<Mapping>,
}

impl Arena {
    /// Initialize the arena. Returns `None` only if the OS cannot even
    /// report a page size, which in practice never happens on supported
    /// platforms; the `Option` return mirrors the spec's `arena_init`
    /// fallibility contract.
    #[must_use]
    pub fn init() -> Option<Self> {
        if os_page_size() == 0 {
            return None;
        }
        Some(Self { live: Vec::new() })
    }

    /// Request a buffer of exactly `page_size` bytes, aligned to `page_size`.
    ///
    /// `page_size` must be a power of two at least as large as the OS page
    /// size. Implemented by over-allocating `2 * page_size` and trimming
    /// the unneeded head/tail back to the OS, since `mmap`/`VirtualAlloc`
    /// only guarantee OS-granularity alignment, which is typically far
    /// smaller than the collector's page size (reference: 1 MiB).
    pub fn alloc_page(&mut self, page_size: usize) -> Option<NonNull<u8>> {
        debug_assert!(page_size.is_power_of_two());

        #[cfg(unix)]
        {
            self.alloc_page_unix(page_size)
        }
        #[cfg(windows)]
        {
            self.alloc_page_windows(page_size)
        }
    }

    #[cfg(unix)]
    fn alloc_page_unix(&mut self, page_size: usize) -> Option<NonNull<u8>> {
        let oversized_len = page_size * 2;
        // SAFETY: oversized_len is non-zero.
        let base = unsafe { os::map_anon(0, oversized_len) }.ok()?;
        let base_addr = base as usize;
        let aligned_addr = (base_addr + page_size - 1) & !(page_size - 1);

        let head_slack = aligned_addr - base_addr;
        let tail_slack = oversized_len - head_slack - page_size;

        if head_slack > 0 {
            // SAFETY: [base, base+head_slack) is a prefix of the mapping we just made.
            unsafe { os::unmap(base, head_slack) };
        }
        if tail_slack > 0 {
            // SAFETY: the tail slack is the suffix of the mapping, past the aligned page.
            unsafe { os::unmap((aligned_addr + page_size) as *mut u8, tail_slack) };
        }

        let ptr = aligned_addr as *mut u8;
        self.live.push(Mapping {
            ptr,
            len: page_size,
        });
        NonNull::new(ptr)
    }

    #[cfg(windows)]
    fn alloc_page_windows(&mut self, page_size: usize) -> Option<NonNull<u8>> {
        // VirtualFree(MEM_RELEASE) cannot release a sub-range of a
        // reservation, so trimming like the Unix path is impossible. Instead:
        // reserve a region twice the size to find an aligned address within
        // it, release the whole thing, then immediately re-reserve at that
        // exact address. A second allocator could in principle steal the
        // address between release and re-reserve; retry a bounded number of
        // times (the collector is single-threaded, so in practice only the
        // OS itself competes for the address).
        const ATTEMPTS: u32 = 8;
        for _ in 0..ATTEMPTS {
            let oversized_len = page_size * 2;
            // SAFETY: oversized_len is non-zero.
            let probe = unsafe { os::map_anon(0, oversized_len) }.ok()?;
            let probe_addr = probe as usize;
            let aligned_addr = (probe_addr + page_size - 1) & !(page_size - 1);
            // SAFETY: probe is the base of a reservation we just made and have not released.
            unsafe { os::unmap(probe) };

            // SAFETY: aligned_addr was free immediately prior to this call.
            if let Ok(ptr) = unsafe { os::map_anon(aligned_addr, page_size) } {
                if ptr as usize == aligned_addr {
                    self.live.push(Mapping {
                        ptr,
                        len: page_size,
                    });
                    return NonNull::new(ptr);
                }
                // SAFETY: ptr is a fresh reservation we just made at an
                // address we didn't ask for; release it and retry.
                unsafe { os::unmap(ptr) };
            }
        }
        None
    }

    /// Request a raw buffer of exactly `len` bytes, for an over-sized
    /// allocation. Alignment is at least pointer width (the OS page size
    /// satisfies that trivially).
    pub fn alloc_raw(&mut self, len: usize) -> Option<NonNull<u8>> {
        if len == 0 {
            return None;
        }
        // SAFETY: len is non-zero, checked above.
        let ptr = unsafe { os::map_anon(0, len) }.ok()?;
        self.live.push(Mapping { ptr, len });
        NonNull::new(ptr)
    }

    /// Return a page obtained from [`Arena::alloc_page`] to the OS.
    pub fn dealloc_page(&mut self, ptr: NonNull<u8>, page_size: usize) {
        self.dealloc_raw(ptr, page_size);
    }

    /// Return a buffer obtained from [`Arena::alloc_raw`] (or `alloc_page`)
    /// to the OS.
    pub fn dealloc_raw(&mut self, ptr: NonNull<u8>, len: usize) {
        let raw = ptr.as_ptr();
        if let Some(pos) = self.live.iter().position(|m| m.ptr == raw) {
            self.live.swap_remove(pos);
        }
        #[cfg(unix)]
        // SAFETY: ptr/len describe a mapping this Arena previously handed out.
        unsafe {
            os::unmap(raw, len);
        }
        #[cfg(windows)]
        // SAFETY: ptr is a reservation base this Arena previously handed out.
        unsafe {
            os::unmap(raw);
        }
    }

    /// Tear down the arena, releasing every mapping still outstanding. The
    /// collector is expected to have already released most pages explicitly
    /// (in free-pages mode) or to rely entirely on this sweep (default mode,
    /// where pages and oversize blocks accumulate until destruction).
    pub fn destroy(mut self) {
        self.release_all();
    }

    fn release_all(&mut self) {
        for mapping in self.live.drain(..) {
            #[cfg(unix)]
            // SAFETY: mapping describes a live mapping this Arena owns.
            unsafe {
                os::unmap(mapping.ptr, mapping.len);
            }
            #[cfg(windows)]
            // SAFETY: mapping.ptr is a reservation base this Arena owns.
            unsafe {
                os::unmap(mapping.ptr);
            }
        }
    }
}

impl Drop for Arena {
    fn drop(&mut self) {
        self.release_all();
    }
}

/// Returns the OS page size (the minimum alignment/granularity any mapping
/// can rely on, not to be confused with the collector's own page size).
#[must_use]
pub fn os_page_size() -> usize {
    os::os_page_size()
}
