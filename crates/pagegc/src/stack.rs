//! Conservative stack scanning for root tracking.
//!
//! Spills callee-saved registers onto the stack so a root hiding only in a
//! register is not missed, then walks word-by-word from a fresh on-stack
//! address up to a caller-supplied high bound.

/// Spill CPU registers onto the stack, then scan every word between a fresh
/// address on this frame's stack and `stack_top_hint` (the highest address
/// the caller wants scanned, typically captured once near `main` and passed
/// down). Assumes a downward-growing stack: low addresses are scanned first.
///
/// If `stack_top_hint` is below the current stack pointer the two bounds are
/// swapped, so a caller that passes a stale or wrong-direction hint still
/// gets a scan rather than silent skip.
#[inline(never)]
pub(crate) unsafe fn spill_registers_and_scan<F>(stack_top_hint: usize, mut scan_fn: F)
where
    F: FnMut(usize),
{
    #[cfg(all(target_arch = "x86_64", not(miri)))]
    let mut regs = [0usize; 6];
    #[cfg(all(target_arch = "x86_64", not(miri)))]
    // SAFETY: the six outputs are plain stack slots; this reads callee-saved
    // registers without clobbering anything the caller depends on.
    unsafe {
        std::arch::asm!(
            "mov {0}, rbx",
            "mov {1}, rbp",
            "mov {2}, r12",
            "mov {3}, r13",
            "mov {4}, r14",
            "mov {5}, r15",
            out(reg) regs[0],
            out(reg) regs[1],
            out(reg) regs[2],
            out(reg) regs[3],
            out(reg) regs[4],
            out(reg) regs[5],
        );
    }
    #[cfg(all(target_arch = "x86_64", not(miri)))]
    std::hint::black_box(&regs);

    // Other architectures (and Miri, which rejects inline asm) fall back to
    // a dummy array plus black_box to discourage the optimizer from keeping
    // roots in registers across this call.
    #[cfg(any(not(target_arch = "x86_64"), miri))]
    let regs = [0usize; 32];
    #[cfg(any(not(target_arch = "x86_64"), miri))]
    std::hint::black_box(&regs);

    let sp = std::ptr::addr_of!(scan_fn) as usize;
    let (low, high) = if sp <= stack_top_hint {
        (sp, stack_top_hint)
    } else {
        (stack_top_hint, sp)
    };

    let mut current = low & !(std::mem::align_of::<usize>() - 1);
    while current < high {
        // SAFETY: current ranges over [low, high), a subrange of the
        // caller's own live stack as attested by stack_top_hint.
        let word = unsafe { std::ptr::read_volatile(current as *const usize) };
        scan_fn(word);
        current += std::mem::size_of::<usize>();
    }
}

/// Zero callee-saved registers so a stale pointer value left over from an
/// earlier computation isn't mistaken for a live root on the next scan.
/// Exposed to tests through `test_util::clear_registers`, where it matters:
/// a value dropped moments earlier can still sit in a register (or the
/// stack slot it was spilled from) and outlive the variable that held it.
///
/// # Safety
/// Clobbers `rbx`/`rbp`/`r12`-`r15`. Caller must not depend on those
/// registers holding anything across this call (in practice: call it only
/// between statements, never mid-expression).
#[cfg(any(test, feature = "test-util"))]
#[cfg(all(target_arch = "x86_64", not(miri)))]
pub(crate) unsafe fn clear_registers() {
    // SAFETY: forwarded from caller; this clobbers only callee-saved
    // registers, which the caller has already agreed not to rely on.
    unsafe {
        std::arch::asm!(
            "xor rbx, rbx",
            "xor r12, r12",
            "xor r13, r13",
            "xor r14, r14",
            "xor r15, r15",
            out("rbx") _,
            out("r12") _,
            out("r13") _,
            out("r14") _,
            out("r15") _,
        );
    }
}

#[cfg(any(test, feature = "test-util"))]
#[cfg(any(not(target_arch = "x86_64"), miri))]
pub(crate) unsafe fn clear_registers() {}
