use std::io::{self, Error};
use std::ptr;
use std::sync::atomic::{AtomicUsize, Ordering};

#[cfg(any(target_os = "linux", target_os = "android"))]
const MAP_POPULATE: libc::c_int = libc::MAP_POPULATE;

#[cfg(not(any(target_os = "linux", target_os = "android")))]
const MAP_POPULATE: libc::c_int = 0;

/// Returns the system page size, cached atomically.
pub fn os_page_size() -> usize {
    static PAGE_SIZE: AtomicUsize = AtomicUsize::new(0);

    match PAGE_SIZE.load(Ordering::Relaxed) {
        0 => {
            // SAFETY: sysconf with _SC_PAGESIZE never fails on supported targets.
            let page_size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) as usize };
            PAGE_SIZE.store(page_size, Ordering::Relaxed);
            page_size
        }
        page_size => page_size,
    }
}

/// Reserve and commit an anonymous mapping of `len` bytes, optionally at a
/// hint address. The OS only guarantees alignment to the system page size.
///
/// # Safety
///
/// `len` must be non-zero.
pub unsafe fn map_anon(hint_addr: usize, len: usize) -> io::Result<*mut u8> {
    let addr = if hint_addr == 0 {
        ptr::null_mut()
    } else {
        hint_addr as *mut libc::c_void
    };

    let flags = libc::MAP_PRIVATE | libc::MAP_ANON | MAP_POPULATE;
    let prot = libc::PROT_READ | libc::PROT_WRITE;

    // SAFETY: caller guarantees len > 0; mmap is safe to call with a null
    // or non-null hint address regardless of whether memory is mapped there.
    let ptr = unsafe { libc::mmap(addr, len, prot, flags, -1, 0) };

    if ptr == libc::MAP_FAILED {
        return Err(Error::last_os_error());
    }

    Ok(ptr.cast::<u8>())
}

/// Unmap a region previously returned by [`map_anon`].
///
/// # Safety
///
/// `ptr` and `len` must describe a mapping currently owned by the caller,
/// exactly as returned by a prior `map_anon` or a sub-range trimmed from one.
pub unsafe fn unmap(ptr: *mut u8, len: usize) {
    if len == 0 {
        return;
    }
    // SAFETY: caller guarantees this is a live mapping of this length.
    unsafe {
        libc::munmap(ptr.cast::<libc::c_void>(), len);
    }
}
