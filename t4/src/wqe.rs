//! Work request descriptors.
//!
//! A ring is an array of 64-byte egress queue slots. Each SQ entry spans
//! [`T4_SQ_NUM_SLOTS`] slots and each RQ entry [`T4_RQ_NUM_SLOTS`]. Every entry
//! starts with the same 8-byte firmware work request header:
//!
//! ```text
//! byte 0    opcode
//! byte 1    flags
//! byte 2-3  wrid (host order)
//! byte 4-6  reserved, zero
//! byte 7    len16 (entry length in 16-byte units)
//! ```
//!
//! Slots past `len16` must start with a zero flit so the adapter can walk the
//! ring at a fixed stride.

use std::mem::{align_of, size_of};

use bitflags::bitflags;
use static_assertions::const_assert_eq;

/// Egress queue slot size in bytes.
pub const T4_EQ_SIZE: usize = 64;
/// Slots per SQ entry.
pub const T4_SQ_NUM_SLOTS: usize = 4;
/// Bytes per SQ entry.
pub const T4_SQ_NUM_BYTES: usize = T4_EQ_SIZE * T4_SQ_NUM_SLOTS;
/// Slots per RQ entry.
pub const T4_RQ_NUM_SLOTS: usize = 2;
/// Bytes per RQ entry.
pub const T4_RQ_NUM_BYTES: usize = T4_EQ_SIZE * T4_RQ_NUM_SLOTS;

const FLITS_PER_SLOT: usize = T4_EQ_SIZE / size_of::<u64>();

/// Firmware work request opcodes (header byte 0).
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WrOpcode {
    /// Resource (queue) management.
    Res = 0x0c,
    /// RDMA connection init.
    Init = 0x0d,
    RdmaWrite = 0x14,
    Send = 0x15,
    RdmaRead = 0x16,
    Recv = 0x17,
    /// Bind memory window.
    BindMw = 0x18,
    /// Fast register non-shared MR.
    FrNsmr = 0x19,
    /// Invalidate local STag.
    InvLstag = 0x1a,
}

impl WrOpcode {
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0x0c => Some(Self::Res),
            0x0d => Some(Self::Init),
            0x14 => Some(Self::RdmaWrite),
            0x15 => Some(Self::Send),
            0x16 => Some(Self::RdmaRead),
            0x17 => Some(Self::Recv),
            0x18 => Some(Self::BindMw),
            0x19 => Some(Self::FrNsmr),
            0x1a => Some(Self::InvLstag),
            _ => None,
        }
    }
}

bitflags! {
    /// Work request flags (header byte 1).
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct WrFlags: u8 {
        /// Generate a CQE on completion.
        const COMPLETION = 0x01;
        const NOTIFICATION = 0x02;
        const SOLICITED_EVENT = 0x04;
        /// Wait for outstanding reads before starting.
        const READ_FENCE = 0x08;
        /// Wait for all prior WRs before starting.
        const LOCAL_FENCE = 0x10;
        const RDMA_READ_INVALIDATE = 0x20;
    }
}

/// Round a byte count up to 16-byte units, saturating at `u8::MAX`.
#[inline]
pub fn len16(bytes: usize) -> u8 {
    u8::try_from(bytes.div_ceil(16)).unwrap_or(u8::MAX)
}

/// One ring entry of `FLITS` big-endian 64-bit words.
#[repr(C, align(64))]
#[derive(Clone)]
pub struct Wqe<const FLITS: usize> {
    flits: [u64; FLITS],
}

/// Send queue entry (4 slots).
pub type SqWqe = Wqe<{ FLITS_PER_SLOT * T4_SQ_NUM_SLOTS }>;
/// Receive queue entry (2 slots).
pub type RqWqe = Wqe<{ FLITS_PER_SLOT * T4_RQ_NUM_SLOTS }>;

const_assert_eq!(size_of::<SqWqe>(), T4_SQ_NUM_BYTES);
const_assert_eq!(size_of::<RqWqe>(), T4_RQ_NUM_BYTES);
const_assert_eq!(align_of::<SqWqe>(), T4_EQ_SIZE);

impl<const FLITS: usize> Default for Wqe<FLITS> {
    fn default() -> Self {
        Self { flits: [0; FLITS] }
    }
}

impl<const FLITS: usize> Wqe<FLITS> {
    /// Slots covered by one entry.
    pub const SLOTS: usize = FLITS / FLITS_PER_SLOT;
    /// Bytes covered by one entry.
    pub const BYTES: usize = FLITS * size_of::<u64>();

    /// Write the work request header and clear every slot past `len16`.
    #[inline]
    pub fn init_header(&mut self, wrid: u16, opcode: WrOpcode, flags: WrFlags, len16: u8) {
        debug_assert!(
            len16 as usize * 16 <= Self::BYTES,
            "len16 {} exceeds entry size {}",
            len16,
            Self::BYTES
        );
        let wrid = wrid.to_ne_bytes();
        let hdr = [opcode as u8, flags.bits(), wrid[0], wrid[1], 0, 0, 0, len16];
        unsafe {
            std::ptr::write_volatile(&mut self.flits[0], u64::from_ne_bytes(hdr));
        }

        let slots_used = (len16 as usize * 16).div_ceil(T4_EQ_SIZE);
        for slot in slots_used..Self::SLOTS {
            for flit in &mut self.flits[slot * FLITS_PER_SLOT..(slot + 1) * FLITS_PER_SLOT] {
                unsafe {
                    std::ptr::write_volatile(flit, 0);
                }
            }
        }
    }

    #[inline]
    pub fn opcode(&self) -> u8 {
        self.header_bytes()[0]
    }

    #[inline]
    pub fn flags(&self) -> WrFlags {
        WrFlags::from_bits_retain(self.header_bytes()[1])
    }

    #[inline]
    pub fn wrid(&self) -> u16 {
        let b = self.header_bytes();
        u16::from_ne_bytes([b[2], b[3]])
    }

    #[inline]
    pub fn len16(&self) -> u8 {
        self.header_bytes()[7]
    }

    /// Raw flits, for writing the opcode-specific body.
    #[inline]
    pub fn flits_mut(&mut self) -> &mut [u64; FLITS] {
        &mut self.flits
    }

    #[inline]
    pub fn flits(&self) -> &[u64; FLITS] {
        &self.flits
    }

    fn header_bytes(&self) -> [u8; 8] {
        unsafe { std::ptr::read_volatile(&self.flits[0]) }.to_ne_bytes()
    }
}
