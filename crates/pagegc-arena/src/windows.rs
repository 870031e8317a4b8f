use std::io::{self, Error};
use std::mem;
use std::ptr;

use windows_sys::Win32::System::Memory::{
    VirtualAlloc, VirtualFree, MEM_COMMIT, MEM_RELEASE, MEM_RESERVE, PAGE_READWRITE,
};
use windows_sys::Win32::System::SystemInformation::{GetSystemInfo, SYSTEM_INFO};

/// Returns the system allocation granularity (typically 64KB on Windows).
pub fn allocation_granularity() -> usize {
    // SAFETY: GetSystemInfo fills a local, stack-owned struct.
    unsafe {
        let mut info: SYSTEM_INFO = mem::zeroed();
        GetSystemInfo(&mut info);
        let gran = info.dwAllocationGranularity as usize;
        if gran == 0 {
            65536
        } else {
            gran
        }
    }
}

/// Returns the system page size.
pub fn os_page_size() -> usize {
    // SAFETY: GetSystemInfo fills a local, stack-owned struct.
    unsafe {
        let mut info: SYSTEM_INFO = mem::zeroed();
        GetSystemInfo(&mut info);
        let size = info.dwPageSize as usize;
        if size == 0 {
            4096
        } else {
            size
        }
    }
}

/// Reserve and commit an anonymous mapping of `len` bytes, optionally at a
/// hint address. `VirtualAlloc` only guarantees alignment to the allocation
/// granularity, not to arbitrary power-of-two sizes.
///
/// # Safety
///
/// `len` must be non-zero.
pub unsafe fn map_anon(hint_addr: usize, len: usize) -> io::Result<*mut u8> {
    let addr = if hint_addr == 0 {
        ptr::null()
    } else {
        hint_addr as *const std::ffi::c_void
    };

    // SAFETY: len is non-zero per caller contract; VirtualAlloc tolerates any address hint.
    let mut ptr = unsafe { VirtualAlloc(addr, len, MEM_COMMIT | MEM_RESERVE, PAGE_READWRITE) };

    if ptr.is_null() && !addr.is_null() {
        // SAFETY: retry letting the OS pick the address.
        ptr = unsafe { VirtualAlloc(ptr::null(), len, MEM_COMMIT | MEM_RESERVE, PAGE_READWRITE) };
    }

    if ptr.is_null() {
        return Err(Error::last_os_error());
    }

    Ok(ptr.cast::<u8>())
}

/// Release a mapping previously returned by [`map_anon`] *in its entirety*.
///
/// `VirtualFree(MEM_RELEASE)` requires the exact base address and size of the
/// original reservation; it cannot release a sub-range.
///
/// # Safety
///
/// `ptr` must be the base address returned by a prior `map_anon` call that
/// has not already been released.
pub unsafe fn unmap(ptr: *mut u8) {
    // SAFETY: caller guarantees ptr is a live reservation base; dwSize must be
    // 0 for MEM_RELEASE per the Win32 contract.
    unsafe {
        VirtualFree(ptr.cast::<std::ffi::c_void>(), 0, MEM_RELEASE);
    }
}
