//! Memory barrier macros for T4 queue operations.
//!
//! The adapter reads descriptor rings and writes completion rings through
//! DMA, so every producer->device and device->consumer handoff needs an
//! explicit ordering point.

/// Store-store ordering barrier for device writes (`wmb()`).
///
/// Issued between the last descriptor write and the doorbell register write
/// so the adapter never observes a PIDX increment before the descriptor
/// contents it covers.
/// On x86/x86_64 stores are already ordered (TSO); an `sfence` still flushes
/// any write-combined descriptor stores and keeps the compiler from sinking
/// plain stores past the doorbell.
/// On ARM64, uses `dmb oshst`.
/// Equivalent to rdma-core's `udma_to_device_barrier()`.
macro_rules! udma_to_device_barrier {
    () => {
        #[cfg(target_arch = "x86_64")]
        unsafe {
            std::arch::x86_64::_mm_sfence();
        }
        #[cfg(target_arch = "x86")]
        unsafe {
            std::arch::x86::_mm_sfence();
        }
        #[cfg(target_arch = "aarch64")]
        unsafe {
            std::arch::asm!("dmb oshst", options(nostack, preserves_flags));
        }
        #[cfg(not(any(target_arch = "x86_64", target_arch = "x86", target_arch = "aarch64")))]
        {
            std::sync::atomic::fence(std::sync::atomic::Ordering::Release);
        }
    };
}

/// Load barrier for device reads.
///
/// Used after the CQE generation bit matched, so the remaining CQE words are
/// read no earlier than the generation bit that validated them.
/// On x86/x86_64, this is a compiler barrier only - TSO guarantees load-load
/// ordering.
/// On ARM, explicit barrier is required (dmb ld).
/// Equivalent to rdma-core's `udma_from_device_barrier()`.
macro_rules! udma_from_device_barrier {
    () => {
        #[cfg(target_arch = "aarch64")]
        unsafe {
            std::arch::asm!("dmb ld", options(nostack, preserves_flags));
        }
        #[cfg(any(target_arch = "x86_64", target_arch = "x86"))]
        {
            std::sync::atomic::compiler_fence(std::sync::atomic::Ordering::Acquire);
        }
        #[cfg(not(any(target_arch = "x86_64", target_arch = "x86", target_arch = "aarch64")))]
        {
            std::sync::atomic::fence(std::sync::atomic::Ordering::Acquire);
        }
    };
}
