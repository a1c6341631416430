//! Work queues: send and receive rings with their shadow arrays.
//!
//! Both rings live in driver-mapped memory of `size + 1` entries; the last
//! entry is the [`StatusPage`]. Software keeps a shadow entry per descriptor
//! so completions can be matched back to the caller's work request.
//!
//! Posting is a three-step sequence the caller drives:
//!
//! 1. fill the descriptor at `pidx` ([`Sq::pending_wqe`]) and its shadow,
//! 2. `produce()` once per descriptor,
//! 3. ring the doorbell with the number of descriptors produced.

use std::ptr::NonNull;

use tracing::{debug, trace};

use crate::config::{check_size, RqConfig, SqConfig, T4_MAX_RQ_SIZE, T4_MAX_SQ_SIZE};
use crate::cqe::{Cqe, RiOpcode};
use crate::doorbell::{kdoorbell_value, Doorbell, M_PIDX};
use crate::error::{Error, QueueName, Result};
use crate::ring::RingIndex;
use crate::status::{Sentinel, StatusPage};
use crate::wqe::{RqWqe, SqWqe, T4_RQ_NUM_SLOTS, T4_SQ_NUM_SLOTS};

/// Software shadow of one SQ descriptor.
#[derive(Debug, Clone, Copy, Default)]
pub struct SwSqe {
    pub wr_id: u64,
    /// Completion saved when it arrives out of order.
    pub cqe: Cqe,
    /// Bytes requested by an RDMA read.
    pub read_len: u32,
    pub opcode: RiOpcode,
    pub complete: bool,
    pub signaled: bool,
    /// Ring index this shadow belongs to.
    pub idx: u16,
}

/// Software shadow of one RQ descriptor.
#[derive(Debug, Clone, Copy, Default)]
pub struct SwRqe {
    pub wr_id: u64,
}

/// Ring `udb` for `inc` descriptors of `slots` hardware slots each.
///
/// The slot count must fit the 14-bit pidx field; nothing is written otherwise.
#[inline]
fn write_kdoorbell<D: Doorbell>(
    udb: &D,
    queue: QueueName,
    qid: u32,
    qid_mask: u32,
    inc: u16,
    slots: usize,
) -> Result<()> {
    let inc = inc
        .checked_mul(slots as u16)
        .filter(|&v| v as u32 <= M_PIDX)
        .ok_or(Error::DoorbellIncrement { queue, inc })?;
    let val = kdoorbell_value(qid, qid_mask, inc);
    trace!(qid, inc, val, "ring doorbell");
    // Descriptors must be visible to the adapter before it sees the doorbell.
    udma_to_device_barrier!();
    udb.write(val);
    Ok(())
}

fn check_shadow(queue: QueueName, expected: u16, actual: usize) -> Result<()> {
    if actual != expected as usize {
        return Err(Error::ShadowLength {
            queue,
            expected: expected as usize,
            actual,
        });
    }
    Ok(())
}

// =============================================================================
// Send queue
// =============================================================================

/// Send queue.
pub struct Sq<D> {
    queue: NonNull<SqWqe>,
    sw_sq: Box<[SwSqe]>,
    ring: RingIndex,
    /// Oldest outstanding RDMA read, as an index into the shadow array.
    oldest_read: Option<u16>,
    udb: D,
    qid: u32,
}

impl<D: Doorbell> Sq<D> {
    /// Wrap a mapped send ring.
    ///
    /// # Safety
    /// `queue` must point to `config.size + 1` writable, 64-byte aligned
    /// entries that outlive the returned value. The last entry is used as
    /// the status page.
    pub unsafe fn new(config: &SqConfig, queue: NonNull<SqWqe>, sw_sq: Box<[SwSqe]>, udb: D) -> Result<Self> {
        check_size("sq", config.size, T4_MAX_SQ_SIZE)?;
        check_shadow(QueueName::Sq, config.size, sw_sq.len())?;
        Ok(Self {
            queue,
            sw_sq,
            ring: RingIndex::work_queue(QueueName::Sq, config.size),
            oldest_read: None,
            udb,
            qid: config.qid,
        })
    }

    #[inline]
    pub fn qid(&self) -> u32 {
        self.qid
    }

    #[inline]
    pub fn size(&self) -> u16 {
        self.ring.size()
    }

    #[inline]
    pub fn in_use(&self) -> u16 {
        self.ring.in_use()
    }

    #[inline]
    pub fn pidx(&self) -> u16 {
        self.ring.pidx()
    }

    #[inline]
    pub fn cidx(&self) -> u16 {
        self.ring.cidx()
    }

    #[inline]
    pub fn avail(&self) -> u16 {
        self.ring.avail()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.ring.is_empty()
    }

    #[inline]
    pub fn is_full(&self) -> bool {
        self.ring.is_full()
    }

    #[inline]
    pub fn produce(&mut self) -> Result<()> {
        self.ring.produce()
    }

    #[inline]
    pub fn consume(&mut self) -> Result<()> {
        self.ring.consume()
    }

    /// Descriptor at `idx`.
    ///
    /// Panics if `idx` is not a ring index (`idx >= size`).
    #[inline]
    pub fn wqe_mut(&mut self, idx: u16) -> &mut SqWqe {
        assert!(idx < self.size(), "sq index {} out of range", idx);
        unsafe { &mut *self.queue.as_ptr().add(idx as usize) }
    }

    /// Descriptor at `pidx`, the next one to be posted.
    #[inline]
    pub fn pending_wqe(&mut self) -> &mut SqWqe {
        self.wqe_mut(self.pidx())
    }

    #[inline]
    pub fn sw_sqe(&self, idx: u16) -> &SwSqe {
        &self.sw_sq[idx as usize]
    }

    #[inline]
    pub fn sw_sqe_mut(&mut self, idx: u16) -> &mut SwSqe {
        &mut self.sw_sq[idx as usize]
    }

    #[inline]
    pub fn oldest_read(&self) -> Option<u16> {
        self.oldest_read
    }

    #[inline]
    pub fn set_oldest_read(&mut self, idx: Option<u16>) {
        self.oldest_read = idx;
    }

    /// Move `oldest_read` to the next posted RDMA read, or clear it.
    ///
    /// The scan starts after the current oldest read (or at `cidx` when none
    /// is tracked) and stops at `pidx`.
    pub fn advance_oldest_read(&mut self) {
        let mut idx = match self.oldest_read {
            Some(idx) => self.ring.wrap_next(idx),
            None => self.cidx(),
        };
        let pidx = self.pidx();
        while idx != pidx {
            if self.sw_sq[idx as usize].opcode == RiOpcode::ReadReq {
                self.oldest_read = Some(idx);
                return;
            }
            idx = self.ring.wrap_next(idx);
        }
        self.oldest_read = None;
    }

    /// Status page at the end of the ring.
    #[inline]
    pub fn sentinel(&self) -> Sentinel<'_> {
        unsafe {
            let page = self.queue.as_ptr().add(self.size() as usize) as *mut StatusPage;
            Sentinel::new(NonNull::new_unchecked(page))
        }
    }

    /// Notify the adapter of `inc` new descriptors.
    pub fn ring_doorbell(&self, qid_mask: u32, inc: u16) -> Result<()> {
        write_kdoorbell(&self.udb, QueueName::Sq, self.qid, qid_mask, inc, T4_SQ_NUM_SLOTS)
    }
}

// =============================================================================
// Receive queue
// =============================================================================

/// Receive queue.
pub struct Rq<D> {
    queue: NonNull<RqWqe>,
    sw_rq: Box<[SwRqe]>,
    ring: RingIndex,
    /// Message sequence number expected on the next receive completion.
    msn: u32,
    rqt_hwaddr: u32,
    rqt_size: u16,
    udb: D,
    qid: u32,
}

impl<D: Doorbell> Rq<D> {
    /// Wrap a mapped receive ring.
    ///
    /// # Safety
    /// `queue` must point to `config.size + 1` writable, 64-byte aligned
    /// entries that outlive the returned value. The last entry is used as
    /// the status page.
    pub unsafe fn new(config: &RqConfig, queue: NonNull<RqWqe>, sw_rq: Box<[SwRqe]>, udb: D) -> Result<Self> {
        check_size("rq", config.size, T4_MAX_RQ_SIZE)?;
        check_shadow(QueueName::Rq, config.size, sw_rq.len())?;
        Ok(Self {
            queue,
            sw_rq,
            ring: RingIndex::work_queue(QueueName::Rq, config.size),
            msn: 1,
            rqt_hwaddr: config.rqt_hwaddr,
            rqt_size: config.rqt_size,
            udb,
            qid: config.qid,
        })
    }

    #[inline]
    pub fn qid(&self) -> u32 {
        self.qid
    }

    #[inline]
    pub fn size(&self) -> u16 {
        self.ring.size()
    }

    #[inline]
    pub fn in_use(&self) -> u16 {
        self.ring.in_use()
    }

    #[inline]
    pub fn pidx(&self) -> u16 {
        self.ring.pidx()
    }

    #[inline]
    pub fn cidx(&self) -> u16 {
        self.ring.cidx()
    }

    #[inline]
    pub fn avail(&self) -> u16 {
        self.ring.avail()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.ring.is_empty()
    }

    #[inline]
    pub fn is_full(&self) -> bool {
        self.ring.is_full()
    }

    #[inline]
    pub fn msn(&self) -> u32 {
        self.msn
    }

    #[inline]
    pub fn rqt_hwaddr(&self) -> u32 {
        self.rqt_hwaddr
    }

    #[inline]
    pub fn rqt_size(&self) -> u16 {
        self.rqt_size
    }

    #[inline]
    pub fn produce(&mut self) -> Result<()> {
        self.ring.produce()
    }

    /// Retire the descriptor at `cidx` and advance the expected msn.
    #[inline]
    pub fn consume(&mut self) -> Result<()> {
        self.ring.consume()?;
        self.msn = self.msn.wrapping_add(1);
        Ok(())
    }

    /// Descriptor at `idx`.
    ///
    /// Panics if `idx >= size`.
    #[inline]
    pub fn wqe_mut(&mut self, idx: u16) -> &mut RqWqe {
        assert!(idx < self.size(), "rq index {} out of range", idx);
        unsafe { &mut *self.queue.as_ptr().add(idx as usize) }
    }

    #[inline]
    pub fn pending_wqe(&mut self) -> &mut RqWqe {
        self.wqe_mut(self.pidx())
    }

    #[inline]
    pub fn sw_rqe(&self, idx: u16) -> &SwRqe {
        &self.sw_rq[idx as usize]
    }

    #[inline]
    pub fn sw_rqe_mut(&mut self, idx: u16) -> &mut SwRqe {
        &mut self.sw_rq[idx as usize]
    }

    #[inline]
    pub fn sentinel(&self) -> Sentinel<'_> {
        unsafe {
            let page = self.queue.as_ptr().add(self.size() as usize) as *mut StatusPage;
            Sentinel::new(NonNull::new_unchecked(page))
        }
    }

    pub fn ring_doorbell(&self, qid_mask: u32, inc: u16) -> Result<()> {
        write_kdoorbell(&self.udb, QueueName::Rq, self.qid, qid_mask, inc, T4_RQ_NUM_SLOTS)
    }
}

// =============================================================================
// Work queue
// =============================================================================

/// Send and receive queue of one QP.
pub struct Wq<D> {
    sq: Sq<D>,
    rq: Rq<D>,
    qid_mask: u32,
    /// Software-side fatal error, set by the verbs layer.
    error: bool,
}

impl<D: Doorbell> Wq<D> {
    pub fn new(sq: Sq<D>, rq: Rq<D>, qid_mask: u32) -> Self {
        Self {
            sq,
            rq,
            qid_mask,
            error: false,
        }
    }

    #[inline]
    pub fn sq(&self) -> &Sq<D> {
        &self.sq
    }

    #[inline]
    pub fn sq_mut(&mut self) -> &mut Sq<D> {
        &mut self.sq
    }

    #[inline]
    pub fn rq(&self) -> &Rq<D> {
        &self.rq
    }

    #[inline]
    pub fn rq_mut(&mut self) -> &mut Rq<D> {
        &mut self.rq
    }

    #[inline]
    pub fn qid_mask(&self) -> u32 {
        self.qid_mask
    }

    // -------------------------------------------------------------------------
    // Receive side
    // -------------------------------------------------------------------------

    #[inline]
    pub fn rqes_posted(&self) -> u16 {
        self.rq.in_use()
    }

    #[inline]
    pub fn rq_empty(&self) -> bool {
        self.rq.is_empty()
    }

    #[inline]
    pub fn rq_full(&self) -> bool {
        self.rq.is_full()
    }

    #[inline]
    pub fn rq_avail(&self) -> u16 {
        self.rq.avail()
    }

    #[inline]
    pub fn rq_produce(&mut self) -> Result<()> {
        self.rq.produce()
    }

    #[inline]
    pub fn rq_consume(&mut self) -> Result<()> {
        self.rq.consume()
    }

    // -------------------------------------------------------------------------
    // Send side
    // -------------------------------------------------------------------------

    #[inline]
    pub fn sq_empty(&self) -> bool {
        self.sq.is_empty()
    }

    #[inline]
    pub fn sq_full(&self) -> bool {
        self.sq.is_full()
    }

    #[inline]
    pub fn sq_avail(&self) -> u16 {
        self.sq.avail()
    }

    #[inline]
    pub fn sq_produce(&mut self) -> Result<()> {
        self.sq.produce()
    }

    #[inline]
    pub fn sq_consume(&mut self) -> Result<()> {
        self.sq.consume()
    }

    // -------------------------------------------------------------------------
    // Doorbells
    // -------------------------------------------------------------------------

    /// Tell the adapter `inc` more SQ descriptors are ready.
    ///
    /// Does not consult `db_off`; see [`Wq::try_ring_sq_db`]. Fails with
    /// [`Error::DoorbellIncrement`] if `inc` descriptors exceed the pidx field.
    pub fn ring_sq_db(&self, inc: u16) -> Result<()> {
        self.sq.ring_doorbell(self.qid_mask, inc)
    }

    /// Tell the adapter `inc` more RQ descriptors are ready.
    pub fn ring_rq_db(&self, inc: u16) -> Result<()> {
        self.rq.ring_doorbell(self.qid_mask, inc)
    }

    /// Ring the SQ doorbell unless doorbells are disabled.
    ///
    /// Returns whether the doorbell was written.
    pub fn try_ring_sq_db(&self, inc: u16) -> Result<bool> {
        if !self.db_enabled() {
            return Ok(false);
        }
        self.ring_sq_db(inc)?;
        Ok(true)
    }

    /// Ring the RQ doorbell unless doorbells are disabled.
    pub fn try_ring_rq_db(&self, inc: u16) -> Result<bool> {
        if !self.db_enabled() {
            return Ok(false);
        }
        self.ring_rq_db(inc)?;
        Ok(true)
    }

    // -------------------------------------------------------------------------
    // Status
    // -------------------------------------------------------------------------

    /// Either software or the adapter has flagged this QP fatal.
    #[inline]
    pub fn in_error(&self) -> bool {
        self.error || self.sq.sentinel().qp_err()
    }

    /// Record a software-detected fatal error without touching the status page.
    pub fn set_sw_error(&mut self) {
        if !self.error {
            debug!(qid = self.sq.qid(), "wq marked in error by software");
        }
        self.error = true;
    }

    /// Flag the QP fatal in both status pages.
    pub fn set_error(&self) {
        debug!(sq = self.sq.qid(), rq = self.rq.qid(), "wq set in error");
        self.sq.sentinel().set_qp_err(true);
        self.rq.sentinel().set_qp_err(true);
    }

    pub fn disable_db(&self) {
        debug!(sq = self.sq.qid(), rq = self.rq.qid(), "doorbells disabled");
        self.sq.sentinel().set_db_off(true);
        self.rq.sentinel().set_db_off(true);
    }

    pub fn enable_db(&self) {
        debug!(sq = self.sq.qid(), rq = self.rq.qid(), "doorbells enabled");
        self.sq.sentinel().set_db_off(false);
        self.rq.sentinel().set_db_off(false);
    }

    /// Doorbell state as seen through the SQ status page.
    #[inline]
    pub fn db_enabled(&self) -> bool {
        !self.sq.sentinel().db_off()
    }
}

// SAFETY: the rings are owned by this queue and only touched through `&mut
// self` or single volatile accesses to the status page.
unsafe impl<D: Send> Send for Sq<D> {}
unsafe impl<D: Send> Send for Rq<D> {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WqConfig;
    use crate::doorbell::{M_PIDX, S_QID};
    use crate::test_utils::{QueueMem, RecordingDoorbell, TestWq};
    use crate::wqe::{WrFlags, WrOpcode};

    #[test]
    fn test_fresh_wq_is_empty() {
        let t = TestWq::with_sizes(8, 4);
        assert!(t.wq.sq_empty());
        assert!(t.wq.rq_empty());
        assert_eq!(t.wq.sq_avail(), 7);
        assert_eq!(t.wq.rq_avail(), 3);
        assert_eq!(t.wq.rqes_posted(), 0);
        assert_eq!(t.wq.rq().msn(), 1);
        assert!(t.wq.db_enabled());
        assert!(!t.wq.in_error());
    }

    #[test]
    fn test_shadow_length_checked() {
        let mem = QueueMem::<SqWqe>::new(9);
        let config = SqConfig { qid: 1, size: 8 };
        let res = unsafe {
            Sq::new(
                &config,
                mem.as_non_null(),
                vec![SwSqe::default(); 7].into_boxed_slice(),
                RecordingDoorbell::new(),
            )
        };
        assert!(matches!(
            res,
            Err(Error::ShadowLength {
                queue: QueueName::Sq,
                expected: 8,
                actual: 7
            })
        ));
    }

    #[test]
    fn test_rq_size_checked() {
        let mem = QueueMem::<RqWqe>::new(2);
        let config = RqConfig {
            size: 1,
            ..Default::default()
        };
        let res = unsafe {
            Rq::new(
                &config,
                mem.as_non_null(),
                vec![SwRqe::default(); 1].into_boxed_slice(),
                RecordingDoorbell::new(),
            )
        };
        assert!(matches!(res, Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn test_sq_doorbell_scales_by_slots() {
        let mut config = WqConfig::default();
        config.sq.qid = 3;
        config.sq.size = 16;
        let t = TestWq::new(&config);

        t.wq.ring_sq_db(1).unwrap();
        assert_eq!(t.sq_db.last(), Some((3 << S_QID) | 4));
        assert_eq!(t.rq_db.count(), 0);
    }

    #[test]
    fn test_rq_doorbell_scales_by_slots() {
        let mut config = WqConfig::default();
        config.rq.qid = 9;
        let t = TestWq::new(&config);

        t.wq.ring_rq_db(3).unwrap();
        assert_eq!(t.rq_db.last(), Some((9 << S_QID) | 6));
        assert_eq!(t.rq_db.last().map(|v| v & M_PIDX), Some(6));
    }

    #[test]
    fn test_doorbell_uses_qid_mask() {
        let mut config = WqConfig::default();
        config.sq.qid = 0x405;
        config.qid_mask = 0x3ff;
        let t = TestWq::new(&config);

        t.wq.ring_sq_db(2).unwrap();
        assert_eq!(t.sq_db.last(), Some((5 << S_QID) | 8));
    }

    #[test]
    fn test_doorbell_increment_past_pidx_field_rejected() {
        let mut config = WqConfig::default();
        config.sq.size = 16;
        config.rq.size = 16;
        let t = TestWq::new(&config);

        // 0x1000 descriptors of 4 slots need 16 bits of pidx.
        assert!(matches!(
            t.wq.ring_sq_db(0x1000),
            Err(Error::DoorbellIncrement {
                queue: QueueName::Sq,
                inc: 0x1000
            })
        ));
        // Would wrap u16.
        assert!(matches!(
            t.wq.ring_sq_db(u16::MAX),
            Err(Error::DoorbellIncrement { .. })
        ));
        assert!(matches!(
            t.wq.try_ring_rq_db(0x2000),
            Err(Error::DoorbellIncrement {
                queue: QueueName::Rq,
                ..
            })
        ));
        assert_eq!(t.sq_db.count(), 0);
        assert_eq!(t.rq_db.count(), 0);

        // Largest RQ increment that fits.
        t.wq.ring_rq_db(0x1fff).unwrap();
        assert_eq!(t.rq_db.last().map(|v| v & M_PIDX), Some(0x3ffe));
    }

    #[test]
    fn test_try_ring_respects_db_off() {
        let t = TestWq::with_sizes(8, 8);

        t.wq.disable_db();
        assert!(!t.wq.db_enabled());
        assert!(t.wq.sq().sentinel().db_off());
        assert!(t.wq.rq().sentinel().db_off());
        assert!(!t.wq.try_ring_sq_db(1).unwrap());
        assert!(!t.wq.try_ring_rq_db(1).unwrap());
        assert_eq!(t.sq_db.count(), 0);
        assert_eq!(t.rq_db.count(), 0);

        t.wq.enable_db();
        assert!(t.wq.try_ring_sq_db(1).unwrap());
        assert!(t.wq.try_ring_rq_db(1).unwrap());
        assert_eq!(t.sq_db.count(), 1);
        assert_eq!(t.rq_db.count(), 1);
    }

    #[test]
    fn test_error_from_either_side() {
        let mut t = TestWq::with_sizes(8, 8);
        assert!(!t.wq.in_error());

        // Adapter writes qp_err into the SQ status page.
        t.wq.sq().sentinel().set_qp_err(true);
        assert!(t.wq.in_error());
        t.wq.sq().sentinel().set_qp_err(false);
        assert!(!t.wq.in_error());

        t.wq.set_sw_error();
        assert!(t.wq.in_error());
        assert!(!t.wq.sq().sentinel().qp_err());
    }

    #[test]
    fn test_set_error_marks_both_pages() {
        let t = TestWq::with_sizes(4, 4);
        t.wq.set_error();
        assert!(t.wq.sq().sentinel().qp_err());
        assert!(t.wq.rq().sentinel().qp_err());
        assert!(t.wq.in_error());
    }

    #[test]
    fn test_sentinel_lives_past_last_entry() {
        let t = TestWq::with_sizes(4, 4);
        t.wq.disable_db();

        // Entry 4 of the SQ is the status page; db_off is byte 13 of it.
        let bytes = t.sq_mem.bytes();
        assert_eq!(bytes[4 * SqWqe::BYTES + 13], 1);
        assert!(bytes[..4 * SqWqe::BYTES].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_rq_consume_advances_msn() {
        let mut t = TestWq::with_sizes(4, 4);
        t.wq.rq_produce().unwrap();
        t.wq.rq_produce().unwrap();
        assert_eq!(t.wq.rqes_posted(), 2);

        t.wq.rq_consume().unwrap();
        assert_eq!(t.wq.rq().msn(), 2);
        t.wq.rq_consume().unwrap();
        assert_eq!(t.wq.rq().msn(), 3);

        // A rejected consume must not bump the msn.
        assert!(t.wq.rq_consume().is_err());
        assert_eq!(t.wq.rq().msn(), 3);
    }

    #[test]
    fn test_post_writes_descriptor_at_pidx() {
        let mut t = TestWq::with_sizes(4, 4);
        let sq = t.wq.sq_mut();

        for i in 0..3u16 {
            let pidx = sq.pidx();
            sq.pending_wqe()
                .init_header(pidx, WrOpcode::Send, WrFlags::COMPLETION, 2);
            let shadow = sq.sw_sqe_mut(pidx);
            shadow.wr_id = 100 + i as u64;
            shadow.idx = pidx;
            shadow.signaled = true;
            sq.produce().unwrap();
        }
        assert!(t.wq.sq_full());

        for i in 0..3u16 {
            let wqe = t.sq_mem.read(i as usize);
            assert_eq!(wqe.wrid(), i);
            assert_eq!(wqe.opcode(), WrOpcode::Send as u8);
            assert_eq!(t.wq.sq().sw_sqe(i).wr_id, 100 + i as u64);
        }
    }

    #[test]
    fn test_advance_oldest_read() {
        let mut t = TestWq::with_sizes(8, 4);
        let sq = t.wq.sq_mut();

        let ops = [
            RiOpcode::Send,
            RiOpcode::ReadReq,
            RiOpcode::RdmaWrite,
            RiOpcode::ReadReq,
            RiOpcode::Send,
        ];
        for op in ops {
            let pidx = sq.pidx();
            sq.sw_sqe_mut(pidx).opcode = op;
            sq.produce().unwrap();
        }

        assert_eq!(sq.oldest_read(), None);
        sq.advance_oldest_read();
        assert_eq!(sq.oldest_read(), Some(1));
        sq.advance_oldest_read();
        assert_eq!(sq.oldest_read(), Some(3));
        sq.advance_oldest_read();
        assert_eq!(sq.oldest_read(), None);
    }

    #[test]
    fn test_advance_oldest_read_wraps() {
        let mut t = TestWq::with_sizes(4, 4);
        let sq = t.wq.sq_mut();

        // Move pidx/cidx to 3 so the next posts wrap around.
        for _ in 0..3 {
            sq.produce().unwrap();
            sq.consume().unwrap();
        }
        for op in [RiOpcode::ReadReq, RiOpcode::Send, RiOpcode::ReadReq] {
            let pidx = sq.pidx();
            sq.sw_sqe_mut(pidx).opcode = op;
            sq.produce().unwrap();
        }
        assert_eq!(sq.pidx(), 2);

        sq.advance_oldest_read();
        assert_eq!(sq.oldest_read(), Some(3));
        sq.advance_oldest_read();
        assert_eq!(sq.oldest_read(), Some(1));
        sq.advance_oldest_read();
        assert_eq!(sq.oldest_read(), None);
    }
}
