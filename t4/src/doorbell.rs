//! Doorbell and GTS register writes.
//!
//! Both registers take a single little-endian 32-bit store. [`Doorbell`] is the
//! narrow capability the queues hold for it; [`UserDoorbell`] is the real MMIO
//! implementation over a mapped user doorbell page.

use std::ptr::NonNull;

// =============================================================================
// Register layouts
// =============================================================================

/// SGE_PF_KDOORBELL: egress queue id.
pub const S_QID: u32 = 15;
pub const M_QID: u32 = 0x1ffff;
/// SGE_PF_KDOORBELL: producer index increment.
pub const S_PIDX: u32 = 0;
pub const M_PIDX: u32 = 0x3fff;

/// SGE_PF_GTS: ingress queue id.
pub const S_INGRESSQID: u32 = 16;
pub const M_INGRESSQID: u32 = 0xffff;
/// SGE_PF_GTS: holdoff timer selector.
pub const S_TIMERREG: u32 = 13;
pub const M_TIMERREG: u32 = 0x7;
/// SGE_PF_GTS: arm for solicited events only.
pub const S_SEINTARM: u32 = 12;
pub const M_SEINTARM: u32 = 0x1;
/// SGE_PF_GTS: consumer index increment.
pub const S_CIDXINC: u32 = 0;
pub const M_CIDXINC: u32 = 0xfff;

/// Encode a work queue doorbell write.
///
/// `inc` is already scaled to hardware slots.
#[inline]
pub fn kdoorbell_value(qid: u32, qid_mask: u32, inc: u16) -> u32 {
    debug_assert!(inc as u32 <= M_PIDX, "pidx increment {} overflows", inc);
    (((qid & qid_mask) & M_QID) << S_QID) | (((inc as u32) & M_PIDX) << S_PIDX)
}

/// Encode a CQ arm (GTS) write.
#[inline]
pub fn gts_value(solicited_only: bool, cidx_inc: u16, timer_reg: u8, cqid: u32, qid_mask: u32) -> u32 {
    debug_assert!(cidx_inc as u32 <= M_CIDXINC, "cidx increment {} overflows", cidx_inc);
    ((solicited_only as u32 & M_SEINTARM) << S_SEINTARM)
        | (((cidx_inc as u32) & M_CIDXINC) << S_CIDXINC)
        | (((timer_reg as u32) & M_TIMERREG) << S_TIMERREG)
        | (((cqid & qid_mask) & M_INGRESSQID) << S_INGRESSQID)
}

// =============================================================================
// Doorbell capability
// =============================================================================

/// Ordered single-word register write.
///
/// Implementations must perform exactly one store per call and must not
/// merge, elide or reorder it relative to other calls.
pub trait Doorbell {
    fn write(&self, value: u32);
}

/// Memory-mapped user doorbell or GTS register.
#[derive(Debug)]
pub struct UserDoorbell {
    reg: NonNull<u32>,
}

impl UserDoorbell {
    /// Wrap a mapped register.
    ///
    /// # Safety
    /// `reg` must point to a 4-byte aligned, mapped device register that stays
    /// mapped for the lifetime of this value.
    pub unsafe fn new(reg: NonNull<u32>) -> Self {
        Self { reg }
    }

    pub fn as_ptr(&self) -> *mut u32 {
        self.reg.as_ptr()
    }
}

impl Doorbell for UserDoorbell {
    #[inline]
    fn write(&self, value: u32) {
        // PCI registers are little-endian.
        unsafe {
            std::ptr::write_volatile(self.reg.as_ptr(), value.to_le());
        }
    }
}

// SAFETY: the register is only ever written with single volatile stores and
// the owning queue is single-writer.
unsafe impl Send for UserDoorbell {}
