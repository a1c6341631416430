//! Completion queue engine.
//!
//! The hardware ring holds `size` CQEs followed by a [`StatusPage`]. Validity
//! of the entry at `cidx` is decided by its generation bit: the adapter
//! writes entries with the current generation and the expected value flips
//! each time `cidx` wraps. An entry with the stale generation but a newer
//! timestamp than the last one consumed means the adapter lapped us; that is
//! reported once as [`Error::CqOverflow`] and the CQ stays errored.
//!
//! A software ring of the same size queues completions synthesized by the
//! verbs layer (flushes, out-of-order reads). [`Cq::next_cqe`] always drains
//! it before looking at hardware.

use std::ptr::NonNull;

use tracing::{debug, trace, warn};

use crate::config::CqConfig;
use crate::cqe::Cqe;
use crate::doorbell::{gts_value, Doorbell, M_CIDXINC};
use crate::error::{Error, QueueName, Result};
use crate::ring::RingIndex;
use crate::status::{Sentinel, StatusPage};

/// Timer selector that updates `cidx` without restarting the holdoff timer.
const GTS_TIMER_NO_UPDATE: u8 = 7;

/// Where a polled CQE came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CqeSource {
    Software,
    Hardware,
}

/// A CQE returned by [`Cq::next_cqe`], to be retired with [`Cq::consume`].
#[derive(Debug, Clone, Copy)]
pub struct PolledCqe {
    pub cqe: Cqe,
    pub source: CqeSource,
}

/// Completion queue.
pub struct Cq<D> {
    queue: NonNull<Cqe>,
    sw_queue: Box<[Cqe]>,
    sw: RingIndex,
    ugts: D,
    /// Timestamp of the last hardware CQE consumed.
    timestamp: u64,
    cqid: u32,
    qid_mask: u32,
    timer_reg: u8,
    size: u16,
    cidx: u16,
    /// Hardware CQEs consumed since the last GTS write.
    cidx_inc: u16,
    gen: u8,
    /// Sticky overflow flag.
    error: bool,
}

impl<D: Doorbell> Cq<D> {
    /// Wrap a mapped completion ring.
    ///
    /// # Safety
    /// `queue` must point to `config.size + 1` readable and writable CQEs
    /// that outlive the returned value. The last entry is used as the status
    /// page.
    pub unsafe fn new(config: &CqConfig, queue: NonNull<Cqe>, sw_queue: Box<[Cqe]>, ugts: D) -> Result<Self> {
        config.validate()?;
        if sw_queue.len() != config.size as usize {
            return Err(Error::ShadowLength {
                queue: QueueName::SwCq,
                expected: config.size as usize,
                actual: sw_queue.len(),
            });
        }
        Ok(Self {
            queue,
            sw_queue,
            sw: RingIndex::unreserved(QueueName::SwCq, config.size),
            ugts,
            timestamp: 0,
            cqid: config.cqid,
            qid_mask: config.qid_mask,
            timer_reg: config.timer_reg,
            size: config.size,
            cidx: 0,
            cidx_inc: 0,
            gen: 1,
            error: false,
        })
    }

    #[inline]
    pub fn cqid(&self) -> u32 {
        self.cqid
    }

    #[inline]
    pub fn size(&self) -> u16 {
        self.size
    }

    #[inline]
    pub fn cidx(&self) -> u16 {
        self.cidx
    }

    /// Generation expected at `cidx`.
    #[inline]
    pub fn gen(&self) -> u8 {
        self.gen
    }

    #[inline]
    pub fn cidx_inc(&self) -> u16 {
        self.cidx_inc
    }

    #[inline]
    pub fn timestamp(&self) -> u64 {
        self.timestamp
    }

    /// Whether an overflow has been detected.
    #[inline]
    pub fn is_errored(&self) -> bool {
        self.error
    }

    // =========================================================================
    // Arm
    // =========================================================================

    /// Request an interrupt for the next completion (or the next solicited
    /// one) and hand accumulated consumer credits back to the adapter.
    pub fn arm(&mut self, solicited_only: bool) {
        let val = gts_value(solicited_only, self.cidx_inc, self.timer_reg, self.cqid, self.qid_mask);
        trace!(cqid = self.cqid, cidx_inc = self.cidx_inc, solicited_only, val, "arm cq");
        self.cidx_inc = 0;
        self.ugts.write(val);
    }

    // =========================================================================
    // Hardware ring
    // =========================================================================

    #[inline]
    fn slot(&self, idx: u16) -> *const Cqe {
        unsafe { self.queue.as_ptr().add(idx as usize) }
    }

    /// Whether `cqe` carries the generation expected at `cidx`.
    #[inline]
    pub fn is_valid(&self, cqe: &Cqe) -> bool {
        cqe.gen() == self.gen
    }

    /// Peek the hardware CQE at `cidx`.
    ///
    /// Returns `Ok(None)` when the adapter has not written it yet. An entry
    /// with a stale generation but a timestamp newer than the last consumed
    /// one means the ring overflowed: the CQ is marked errored and
    /// [`Error::CqOverflow`] is returned.
    pub fn next_hw_cqe(&mut self) -> Result<Option<Cqe>> {
        let slot = self.slot(self.cidx);
        let trailer = unsafe { Cqe::read_trailer(slot) };
        if trailer.gen == self.gen {
            // Trailer first, body after: the adapter writes the generation last.
            udma_from_device_barrier!();
            let cqe = unsafe { Cqe::read_volatile(slot) };
            self.timestamp = cqe.timestamp();
            return Ok(Some(cqe));
        }
        if trailer.timestamp > self.timestamp {
            if !self.error {
                warn!(
                    cqid = self.cqid,
                    cidx = self.cidx,
                    last_ts = self.timestamp,
                    ts = trailer.timestamp,
                    "cq overflow"
                );
            }
            self.error = true;
            return Err(Error::CqOverflow { cqid: self.cqid });
        }
        Ok(None)
    }

    /// Retire the hardware CQE at `cidx`.
    ///
    /// Flips the expected generation when `cidx` wraps. Credits are returned
    /// to the adapter on the next [`Cq::arm`]; if they reach the width of the
    /// GTS credit field first, they are flushed without re-arming.
    pub fn hw_consume(&mut self) {
        self.cidx_inc += 1;
        if self.cidx_inc as u32 == M_CIDXINC {
            let val = gts_value(false, self.cidx_inc, GTS_TIMER_NO_UPDATE, self.cqid, self.qid_mask);
            trace!(cqid = self.cqid, val, "flush cq credits");
            self.cidx_inc = 0;
            self.ugts.write(val);
        }
        self.cidx += 1;
        if self.cidx == self.size {
            self.cidx = 0;
            self.gen ^= 1;
        }
    }

    // =========================================================================
    // Software ring
    // =========================================================================

    #[inline]
    pub fn sw_in_use(&self) -> u16 {
        self.sw.in_use()
    }

    #[inline]
    pub fn sw_pidx(&self) -> u16 {
        self.sw.pidx()
    }

    #[inline]
    pub fn sw_cidx(&self) -> u16 {
        self.sw.cidx()
    }

    /// Slot the next software CQE is written to.
    #[inline]
    pub fn sw_slot_mut(&mut self) -> &mut Cqe {
        &mut self.sw_queue[self.sw.pidx() as usize]
    }

    /// Publish the CQE at `sw_pidx`.
    #[inline]
    pub fn sw_produce(&mut self) -> Result<()> {
        self.sw.produce()
    }

    #[inline]
    pub fn sw_consume(&mut self) -> Result<()> {
        self.sw.consume()
    }

    /// Append a synthesized CQE to the software ring.
    pub fn insert_sw_cqe(&mut self, cqe: Cqe) -> Result<()> {
        if self.sw.is_full() {
            return Err(Error::QueueFull {
                queue: QueueName::SwCq,
            });
        }
        *self.sw_slot_mut() = cqe;
        self.sw.produce()
    }

    /// Oldest software CQE, if any.
    #[inline]
    pub fn next_sw_cqe(&self) -> Option<Cqe> {
        if self.sw.is_empty() {
            return None;
        }
        Some(self.sw_queue[self.sw.cidx() as usize])
    }

    // =========================================================================
    // Polling
    // =========================================================================

    /// Next CQE to process: software entries first, then hardware.
    ///
    /// Once overflowed, always `Ok(None)`.
    pub fn next_cqe(&mut self) -> Result<Option<PolledCqe>> {
        if self.error {
            return Ok(None);
        }
        if let Some(cqe) = self.next_sw_cqe() {
            return Ok(Some(PolledCqe {
                cqe,
                source: CqeSource::Software,
            }));
        }
        Ok(self.next_hw_cqe()?.map(|cqe| PolledCqe {
            cqe,
            source: CqeSource::Hardware,
        }))
    }

    /// Retire a CQE returned by [`Cq::next_cqe`].
    pub fn consume(&mut self, source: CqeSource) -> Result<()> {
        match source {
            CqeSource::Software => self.sw_consume(),
            CqeSource::Hardware => {
                self.hw_consume();
                Ok(())
            }
        }
    }

    // =========================================================================
    // Status page
    // =========================================================================

    #[inline]
    pub fn sentinel(&self) -> Sentinel<'_> {
        unsafe {
            let page = self.queue.as_ptr().add(self.size as usize) as *mut StatusPage;
            Sentinel::new(NonNull::new_unchecked(page))
        }
    }

    #[inline]
    pub fn in_error(&self) -> bool {
        self.sentinel().qp_err()
    }

    pub fn set_error(&self) {
        debug!(cqid = self.cqid, "cq set in error");
        self.sentinel().set_qp_err(true);
    }

    pub fn clear_error(&self) {
        debug!(cqid = self.cqid, "cq error cleared");
        self.sentinel().set_qp_err(false);
    }
}

// SAFETY: the ring is only read through single volatile loads and all index
// state is behind `&mut self`.
unsafe impl<D: Send> Send for Cq<D> {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cqe::{CqeHeader, CqeTrailer, CqeType};
    use crate::doorbell::{M_SEINTARM, S_INGRESSQID, S_SEINTARM, S_TIMERREG};
    use crate::test_utils::TestCq;

    fn hw_cqe(gen: u8, ts: u64, qpid: u32) -> Cqe {
        Cqe::new(CqeHeader {
            qpid,
            sw: false,
            status: 0,
            ty: CqeType::Send,
            opcode: 0,
        })
        .with_trailer(CqeTrailer {
            gen,
            timestamp: ts,
            ..Default::default()
        })
    }

    #[test]
    fn test_initial_state() {
        let t = TestCq::with_size(8);
        assert_eq!(t.cq.gen(), 1);
        assert_eq!(t.cq.cidx(), 0);
        assert_eq!(t.cq.timestamp(), 0);
        assert_eq!(t.cq.sw_in_use(), 0);
        assert!(!t.cq.is_errored());
        assert!(!t.cq.in_error());
    }

    #[test]
    fn test_empty_ring_is_not_an_error() {
        let mut t = TestCq::with_size(8);
        assert!(matches!(t.cq.next_hw_cqe(), Ok(None)));
        assert!(matches!(t.cq.next_cqe(), Ok(None)));
        assert!(!t.cq.is_errored());
    }

    #[test]
    fn test_valid_hw_cqe_updates_timestamp() {
        let mut t = TestCq::with_size(8);
        t.hw_write(0, hw_cqe(1, 42, 7));

        let cqe = t.cq.next_hw_cqe().unwrap().unwrap();
        assert_eq!(cqe.qpid(), 7);
        assert!(t.cq.is_valid(&cqe));
        assert_eq!(t.cq.timestamp(), 42);

        // Peeking does not advance.
        assert_eq!(t.cq.cidx(), 0);
        t.cq.hw_consume();
        assert_eq!(t.cq.cidx(), 1);
        assert_eq!(t.cq.cidx_inc(), 1);
    }

    #[test]
    fn test_wrap_flips_gen_once() {
        let mut t = TestCq::with_size(4);
        for _ in 0..4 {
            t.cq.hw_consume();
        }
        assert_eq!(t.cq.cidx(), 0);
        assert_eq!(t.cq.gen(), 0);

        for _ in 0..3 {
            t.cq.hw_consume();
        }
        assert_eq!(t.cq.gen(), 0);
        t.cq.hw_consume();
        assert_eq!(t.cq.gen(), 1);
    }

    #[test]
    fn test_stale_gen_with_old_timestamp_is_no_data() {
        let mut t = TestCq::with_size(4);
        t.hw_write(0, hw_cqe(1, 10, 1));
        t.cq.next_hw_cqe().unwrap().unwrap();
        t.cq.hw_consume();

        // Slot 1 still holds a stale-generation entry from before.
        t.hw_write(1, hw_cqe(0, 5, 1));
        assert!(matches!(t.cq.next_hw_cqe(), Ok(None)));
        assert!(!t.cq.is_errored());
    }

    #[test]
    fn test_overflow_is_sticky() {
        let mut t = TestCq::with_size(4);
        t.hw_write(0, hw_cqe(1, 10, 1));
        t.cq.next_hw_cqe().unwrap().unwrap();
        t.cq.hw_consume();

        // Stale generation but a newer timestamp: the adapter lapped us.
        t.hw_write(1, hw_cqe(0, 20, 1));
        assert!(matches!(t.cq.next_hw_cqe(), Err(Error::CqOverflow { cqid: 0 })));
        assert!(t.cq.is_errored());

        // Even a valid entry is hidden from next_cqe now.
        t.hw_write(1, hw_cqe(1, 30, 1));
        t.cq.insert_sw_cqe(Cqe::default()).unwrap();
        assert!(matches!(t.cq.next_cqe(), Ok(None)));
    }

    /// Counts WARN events emitted on the current thread.
    struct WarnCounter(std::sync::Arc<std::sync::atomic::AtomicUsize>);

    impl tracing::Subscriber for WarnCounter {
        fn enabled(&self, _: &tracing::Metadata<'_>) -> bool {
            true
        }

        fn new_span(&self, _: &tracing::span::Attributes<'_>) -> tracing::span::Id {
            tracing::span::Id::from_u64(1)
        }

        fn record(&self, _: &tracing::span::Id, _: &tracing::span::Record<'_>) {}

        fn record_follows_from(&self, _: &tracing::span::Id, _: &tracing::span::Id) {}

        fn event(&self, event: &tracing::Event<'_>) {
            if *event.metadata().level() == tracing::Level::WARN {
                self.0.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
            }
        }

        fn enter(&self, _: &tracing::span::Id) {}

        fn exit(&self, _: &tracing::span::Id) {}
    }

    #[test]
    fn test_overflow_warns_once() {
        let warnings = std::sync::Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let subscriber = WarnCounter(warnings.clone());

        tracing::subscriber::with_default(subscriber, || {
            let mut t = TestCq::with_size(4);
            t.hw_write(0, hw_cqe(1, 10, 1));
            t.cq.next_hw_cqe().unwrap().unwrap();
            t.cq.hw_consume();
            t.hw_write(1, hw_cqe(0, 20, 1));

            // Polling the hardware ring directly keeps reporting the overflow.
            for _ in 0..3 {
                assert!(matches!(t.cq.next_hw_cqe(), Err(Error::CqOverflow { .. })));
            }
            assert!(t.cq.is_errored());
        });

        assert_eq!(warnings.load(std::sync::atomic::Ordering::Relaxed), 1);
    }

    #[test]
    fn test_sw_cqes_before_hw() {
        let mut t = TestCq::with_size(8);
        t.hw_write(0, hw_cqe(1, 1, 100));
        t.cq.insert_sw_cqe(Cqe::default().with_len(1)).unwrap();
        t.cq.insert_sw_cqe(Cqe::default().with_len(2)).unwrap();

        let p = t.cq.next_cqe().unwrap().unwrap();
        assert_eq!(p.source, CqeSource::Software);
        assert_eq!(p.cqe.len(), 1);
        t.cq.consume(p.source).unwrap();

        let p = t.cq.next_cqe().unwrap().unwrap();
        assert_eq!(p.source, CqeSource::Software);
        assert_eq!(p.cqe.len(), 2);
        t.cq.consume(p.source).unwrap();

        let p = t.cq.next_cqe().unwrap().unwrap();
        assert_eq!(p.source, CqeSource::Hardware);
        assert_eq!(p.cqe.qpid(), 100);
        t.cq.consume(p.source).unwrap();
        assert_eq!(t.cq.cidx(), 1);

        assert!(matches!(t.cq.next_cqe(), Ok(None)));
    }

    #[test]
    fn test_sw_ring_full() {
        let mut t = TestCq::with_size(2);
        t.cq.insert_sw_cqe(Cqe::default()).unwrap();
        t.cq.insert_sw_cqe(Cqe::default()).unwrap();
        assert!(matches!(
            t.cq.insert_sw_cqe(Cqe::default()),
            Err(Error::QueueFull {
                queue: QueueName::SwCq
            })
        ));
        assert_eq!(t.cq.sw_in_use(), 2);
        assert_eq!(t.cq.sw_pidx(), 0);
    }

    #[test]
    fn test_sw_slot_then_produce() {
        let mut t = TestCq::with_size(4);
        *t.cq.sw_slot_mut() = Cqe::default().with_len(9);
        t.cq.sw_produce().unwrap();
        assert_eq!(t.cq.next_sw_cqe().map(|c| c.len()), Some(9));
        t.cq.sw_consume().unwrap();
        assert!(t.cq.next_sw_cqe().is_none());
        assert!(t.cq.sw_consume().is_err());
    }

    #[test]
    fn test_arm_writes_gts_and_resets_credits() {
        let mut t = TestCq::new(&CqConfig {
            cqid: 5,
            size: 8,
            ..Default::default()
        });
        for _ in 0..3 {
            t.cq.hw_consume();
        }

        t.cq.arm(true);
        let val = t.gts.last().unwrap();
        assert_eq!(val & M_CIDXINC, 3);
        assert_eq!((val >> S_SEINTARM) & M_SEINTARM, 1);
        assert_eq!((val >> S_TIMERREG) & 7, 6);
        assert_eq!(val >> S_INGRESSQID, 5);
        assert_eq!(t.cq.cidx_inc(), 0);

        t.cq.arm(false);
        let val = t.gts.last().unwrap();
        assert_eq!(val & M_CIDXINC, 0);
        assert_eq!((val >> S_SEINTARM) & M_SEINTARM, 0);
        assert_eq!(t.gts.count(), 2);
    }

    #[test]
    fn test_credits_flushed_at_field_width() {
        let mut t = TestCq::with_size(64);
        for _ in 0..M_CIDXINC {
            t.cq.hw_consume();
        }
        assert_eq!(t.gts.count(), 1);
        let val = t.gts.last().unwrap();
        assert_eq!(val & M_CIDXINC, M_CIDXINC);
        assert_eq!((val >> S_SEINTARM) & M_SEINTARM, 0);
        assert_eq!(t.cq.cidx_inc(), 0);
    }

    #[test]
    fn test_status_page_flag() {
        let t = TestCq::with_size(4);
        t.cq.set_error();
        assert!(t.cq.in_error());
        // The status page occupies CQE slot `size`.
        assert_eq!(t.mem.bytes()[4 * 32 + 12], 1);
        t.cq.clear_error();
        assert!(!t.cq.in_error());
    }

    #[test]
    fn test_sw_queue_length_checked() {
        let mem = crate::test_utils::QueueMem::<Cqe>::new(5);
        let res = unsafe {
            Cq::new(
                &CqConfig {
                    size: 4,
                    ..Default::default()
                },
                mem.as_non_null(),
                vec![Cqe::default(); 3].into_boxed_slice(),
                crate::test_utils::RecordingDoorbell::new(),
            )
        };
        assert!(matches!(
            res,
            Err(Error::ShadowLength {
                queue: QueueName::SwCq,
                ..
            })
        ));
    }
}
