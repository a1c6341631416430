//! Completion queue entry layout and decoding.
//!
//! CQE layout (32 bytes):
//! ```text
//! offset  0: header        (4B, big-endian) qpid[31:12] swcqe[11] status[9:5] type[4] opcode[3:0]
//! offset  4: len           (4B, big-endian)
//! offset  8: payload       (8B) recv {stag, msn} | send {rsvd, cidx} | generic {wrid_hi, wrid_low}
//! offset 16: reserved      (8B)
//! offset 24: bits_type_ts  (8B, big-endian) gen[63] ovf[62] iqtype[61:60] ts[59:0]
//! ```
//!
//! The send `cidx` and the generic wrid halves are stored in host order, the
//! way the adapter and the flush path write them.

use std::mem::{align_of, offset_of, size_of};
use std::ptr::addr_of;

use static_assertions::const_assert_eq;

// =============================================================================
// Bit layouts
// =============================================================================

pub const S_CQE_QPID: u32 = 12;
pub const M_CQE_QPID: u32 = 0xFFFFF;
pub const S_CQE_SWCQE: u32 = 11;
pub const M_CQE_SWCQE: u32 = 0x1;
pub const S_CQE_STATUS: u32 = 5;
pub const M_CQE_STATUS: u32 = 0x1F;
pub const S_CQE_TYPE: u32 = 4;
pub const M_CQE_TYPE: u32 = 0x1;
pub const S_CQE_OPCODE: u32 = 0;
pub const M_CQE_OPCODE: u32 = 0xF;

pub const S_CQE_GENBIT: u32 = 63;
pub const M_CQE_GENBIT: u64 = 0x1;
pub const S_CQE_OVFBIT: u32 = 62;
pub const M_CQE_OVFBIT: u64 = 0x1;
pub const S_CQE_IQTYPE: u32 = 60;
pub const M_CQE_IQTYPE: u64 = 0x3;
pub const M_CQE_TS: u64 = 0x0fff_ffff_ffff_ffff;

// =============================================================================
// Field types
// =============================================================================

/// RDMA opcodes carried in the CQE header.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RiOpcode {
    #[default]
    RdmaWrite = 0x0,
    ReadReq = 0x1,
    ReadResp = 0x2,
    Send = 0x3,
    SendWithInv = 0x4,
    SendWithSe = 0x5,
    SendWithSeInv = 0x6,
    Terminate = 0x7,
    RdmaInit = 0x8,
    BindMw = 0x9,
    FastRegister = 0xa,
    LocalInv = 0xb,
    QpModify = 0xc,
    Bypass = 0xd,
    Receive = 0xe,
    SgeEcCrReturn = 0xf,
}

impl RiOpcode {
    /// Decode the low four bits.
    pub fn from_bits(v: u8) -> Self {
        match v & 0xf {
            0x0 => Self::RdmaWrite,
            0x1 => Self::ReadReq,
            0x2 => Self::ReadResp,
            0x3 => Self::Send,
            0x4 => Self::SendWithInv,
            0x5 => Self::SendWithSe,
            0x6 => Self::SendWithSeInv,
            0x7 => Self::Terminate,
            0x8 => Self::RdmaInit,
            0x9 => Self::BindMw,
            0xa => Self::FastRegister,
            0xb => Self::LocalInv,
            0xc => Self::QpModify,
            0xd => Self::Bypass,
            0xe => Self::Receive,
            _ => Self::SgeEcCrReturn,
        }
    }

    /// Plain send, send with SE, send with invalidate, or both.
    pub fn is_send(self) -> bool {
        matches!(
            self,
            Self::Send | Self::SendWithSe | Self::SendWithInv | Self::SendWithSeInv
        )
    }
}

/// CQE and async event status codes.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CqeStatus {
    Success = 0x0,
    /// STag invalid: off limits, zero, or key mismatch.
    Stag = 0x1,
    /// Protection domain mismatch.
    Pdid = 0x2,
    /// QP id mismatch.
    Qpid = 0x3,
    /// Invalid access right.
    Access = 0x4,
    Wrap = 0x5,
    /// Base and bounds violation.
    Bound = 0x6,
    InvalidateSharedMr = 0x7,
    InvalidateMrWithMwBound = 0x8,
    Ecc = 0x9,
    /// ECC error while reading the PSTAG of a MW invalidate.
    EccPstag = 0xa,
    PblAddrBound = 0xb,
    /// Flushed by software.
    SwFlush = 0xc,
    Crc = 0x10,
    Marker = 0x11,
    PduLenErr = 0x12,
    OutOfRqe = 0x13,
    DdpVersion = 0x14,
    RdmaVersion = 0x15,
    Opcode = 0x16,
    DdpQueueNum = 0x17,
    Msn = 0x18,
    Tbit = 0x19,
    /// MO not zero for TERMINATE or READ_REQ.
    Mo = 0x1a,
    MsnGap = 0x1b,
    MsnRange = 0x1c,
    IrdOverflow = 0x1d,
    RqeAddrBound = 0x1e,
    InternalErr = 0x1f,
}

impl CqeStatus {
    pub fn from_u8(v: u8) -> Option<Self> {
        Some(match v {
            0x0 => Self::Success,
            0x1 => Self::Stag,
            0x2 => Self::Pdid,
            0x3 => Self::Qpid,
            0x4 => Self::Access,
            0x5 => Self::Wrap,
            0x6 => Self::Bound,
            0x7 => Self::InvalidateSharedMr,
            0x8 => Self::InvalidateMrWithMwBound,
            0x9 => Self::Ecc,
            0xa => Self::EccPstag,
            0xb => Self::PblAddrBound,
            0xc => Self::SwFlush,
            0x10 => Self::Crc,
            0x11 => Self::Marker,
            0x12 => Self::PduLenErr,
            0x13 => Self::OutOfRqe,
            0x14 => Self::DdpVersion,
            0x15 => Self::RdmaVersion,
            0x16 => Self::Opcode,
            0x17 => Self::DdpQueueNum,
            0x18 => Self::Msn,
            0x19 => Self::Tbit,
            0x1a => Self::Mo,
            0x1b => Self::MsnGap,
            0x1c => Self::MsnRange,
            0x1d => Self::IrdOverflow,
            0x1e => Self::RqeAddrBound,
            0x1f => Self::InternalErr,
            _ => return None,
        })
    }
}

/// Which work queue a CQE retires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CqeType {
    Recv,
    Send,
}

/// Decoded CQE header word.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CqeHeader {
    pub qpid: u32,
    /// Synthesized by software rather than written by the adapter.
    pub sw: bool,
    pub status: u8,
    pub ty: CqeType,
    pub opcode: u8,
}

impl CqeHeader {
    /// Host-order header word.
    pub fn encode(&self) -> u32 {
        ((self.qpid & M_CQE_QPID) << S_CQE_QPID)
            | ((self.sw as u32 & M_CQE_SWCQE) << S_CQE_SWCQE)
            | ((self.status as u32 & M_CQE_STATUS) << S_CQE_STATUS)
            | ((matches!(self.ty, CqeType::Send) as u32) << S_CQE_TYPE)
            | ((self.opcode as u32 & M_CQE_OPCODE) << S_CQE_OPCODE)
    }

    /// Decode a host-order header word.
    pub fn decode(raw: u32) -> Self {
        Self {
            qpid: (raw >> S_CQE_QPID) & M_CQE_QPID,
            sw: (raw >> S_CQE_SWCQE) & M_CQE_SWCQE != 0,
            status: ((raw >> S_CQE_STATUS) & M_CQE_STATUS) as u8,
            ty: if (raw >> S_CQE_TYPE) & M_CQE_TYPE != 0 {
                CqeType::Send
            } else {
                CqeType::Recv
            },
            opcode: ((raw >> S_CQE_OPCODE) & M_CQE_OPCODE) as u8,
        }
    }
}

/// Decoded trailing 64-bit word.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CqeTrailer {
    pub gen: u8,
    pub overflow: bool,
    pub iq_type: u8,
    /// 60-bit adapter timestamp.
    pub timestamp: u64,
}

impl CqeTrailer {
    pub fn encode(&self) -> u64 {
        ((self.gen as u64 & M_CQE_GENBIT) << S_CQE_GENBIT)
            | ((self.overflow as u64 & M_CQE_OVFBIT) << S_CQE_OVFBIT)
            | ((self.iq_type as u64 & M_CQE_IQTYPE) << S_CQE_IQTYPE)
            | (self.timestamp & M_CQE_TS)
    }

    pub fn decode(raw: u64) -> Self {
        Self {
            gen: ((raw >> S_CQE_GENBIT) & M_CQE_GENBIT) as u8,
            overflow: (raw >> S_CQE_OVFBIT) & M_CQE_OVFBIT != 0,
            iq_type: ((raw >> S_CQE_IQTYPE) & M_CQE_IQTYPE) as u8,
            timestamp: raw & M_CQE_TS,
        }
    }
}

/// Type-specific payload, selected by the header's entry type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CqePayload {
    Recv { stag: u32, msn: u32 },
    Send { cidx: u16 },
}

// =============================================================================
// CQE
// =============================================================================

/// Completion queue entry, byte-for-byte as the adapter writes it.
#[repr(C)]
#[derive(Clone, Copy, PartialEq, Eq, Default)]
pub struct Cqe {
    header: u32,
    len: u32,
    payload: [u8; 8],
    _rsvd: u64,
    bits_type_ts: u64,
}

const_assert_eq!(size_of::<Cqe>(), 32);
const_assert_eq!(align_of::<Cqe>(), 8);
const_assert_eq!(offset_of!(Cqe, payload), 8);
const_assert_eq!(offset_of!(Cqe, bits_type_ts), 24);

impl Cqe {
    /// Start a CQE from its header; everything else is zero.
    pub fn new(header: CqeHeader) -> Self {
        Self {
            header: header.encode().to_be(),
            ..Default::default()
        }
    }

    pub fn with_len(mut self, len: u32) -> Self {
        self.len = len.to_be();
        self
    }

    pub fn with_recv_info(mut self, stag: u32, msn: u32) -> Self {
        self.payload[..4].copy_from_slice(&stag.to_be_bytes());
        self.payload[4..].copy_from_slice(&msn.to_be_bytes());
        self
    }

    pub fn with_send_cidx(mut self, cidx: u16) -> Self {
        self.payload[..6].fill(0);
        self.payload[6..].copy_from_slice(&cidx.to_ne_bytes());
        self
    }

    pub fn with_wrid(mut self, hi: u32, low: u32) -> Self {
        self.payload[..4].copy_from_slice(&hi.to_ne_bytes());
        self.payload[4..].copy_from_slice(&low.to_ne_bytes());
        self
    }

    pub fn with_trailer(mut self, trailer: CqeTrailer) -> Self {
        self.bits_type_ts = trailer.encode().to_be();
        self
    }

    /// Copy a CQE out of ring memory.
    ///
    /// # Safety
    /// `ptr` must point to a readable, 8-byte aligned CQE.
    #[inline]
    pub(crate) unsafe fn read_volatile(ptr: *const Cqe) -> Self {
        std::ptr::read_volatile(ptr)
    }

    /// Load only the trailing word of a CQE in ring memory.
    ///
    /// # Safety
    /// Same as [`Cqe::read_volatile`].
    #[inline]
    pub(crate) unsafe fn read_trailer(ptr: *const Cqe) -> CqeTrailer {
        CqeTrailer::decode(u64::from_be(std::ptr::read_volatile(addr_of!((*ptr).bits_type_ts))))
    }

    // -------------------------------------------------------------------------
    // Header
    // -------------------------------------------------------------------------

    #[inline]
    pub fn header(&self) -> CqeHeader {
        CqeHeader::decode(u32::from_be(self.header))
    }

    #[inline]
    pub fn qpid(&self) -> u32 {
        self.header().qpid
    }

    /// Synthesized by software (flush) rather than written by the adapter.
    #[inline]
    pub fn is_sw(&self) -> bool {
        self.header().sw
    }

    /// Raw status code.
    #[inline]
    pub fn status(&self) -> u8 {
        self.header().status
    }

    /// Status code, if it is one the adapter defines.
    #[inline]
    pub fn status_code(&self) -> Option<CqeStatus> {
        CqeStatus::from_u8(self.status())
    }

    #[inline]
    pub fn cqe_type(&self) -> CqeType {
        self.header().ty
    }

    #[inline]
    pub fn is_sq(&self) -> bool {
        self.cqe_type() == CqeType::Send
    }

    #[inline]
    pub fn is_rq(&self) -> bool {
        self.cqe_type() == CqeType::Recv
    }

    /// Raw 4-bit opcode.
    #[inline]
    pub fn opcode(&self) -> u8 {
        self.header().opcode
    }

    #[inline]
    pub fn ri_opcode(&self) -> RiOpcode {
        RiOpcode::from_bits(self.opcode())
    }

    #[inline]
    pub fn is_send_opcode(&self) -> bool {
        self.ri_opcode().is_send()
    }

    #[inline]
    pub fn len(&self) -> u32 {
        u32::from_be(self.len)
    }

    // -------------------------------------------------------------------------
    // Payload
    // -------------------------------------------------------------------------

    /// Payload interpreted by entry type.
    #[inline]
    pub fn payload(&self) -> CqePayload {
        match self.cqe_type() {
            CqeType::Recv => CqePayload::Recv {
                stag: self.be_word(0),
                msn: self.be_word(4),
            },
            CqeType::Send => CqePayload::Send {
                cidx: u16::from_ne_bytes([self.payload[6], self.payload[7]]),
            },
        }
    }

    /// Generic high half of the work request id.
    #[inline]
    pub fn wrid_hi(&self) -> u32 {
        self.ne_word(0)
    }

    /// Generic low half of the work request id.
    #[inline]
    pub fn wrid_low(&self) -> u32 {
        self.ne_word(4)
    }

    fn be_word(&self, off: usize) -> u32 {
        u32::from_be_bytes([
            self.payload[off],
            self.payload[off + 1],
            self.payload[off + 2],
            self.payload[off + 3],
        ])
    }

    fn ne_word(&self, off: usize) -> u32 {
        u32::from_ne_bytes([
            self.payload[off],
            self.payload[off + 1],
            self.payload[off + 2],
            self.payload[off + 3],
        ])
    }

    // -------------------------------------------------------------------------
    // Trailer
    // -------------------------------------------------------------------------

    #[inline]
    pub fn trailer(&self) -> CqeTrailer {
        CqeTrailer::decode(u64::from_be(self.bits_type_ts))
    }

    #[inline]
    pub fn gen(&self) -> u8 {
        self.trailer().gen
    }

    #[inline]
    pub fn overflow(&self) -> bool {
        self.trailer().overflow
    }

    #[inline]
    pub fn iq_type(&self) -> u8 {
        self.trailer().iq_type
    }

    #[inline]
    pub fn timestamp(&self) -> u64 {
        self.trailer().timestamp
    }
}

impl std::fmt::Debug for Cqe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cqe")
            .field("header", &self.header())
            .field("len", &self.len())
            .field("payload", &self.payload())
            .field("trailer", &self.trailer())
            .finish()
    }
}
