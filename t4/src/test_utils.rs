//! Test helpers standing in for driver-mapped queue memory and doorbells.
//!
//! Enable the `test-utils` feature to use these from integration tests and
//! benchmarks.

use std::alloc::{alloc_zeroed, dealloc, Layout};
use std::cell::RefCell;
use std::ptr::NonNull;
use std::rc::Rc;

use crate::config::{CqConfig, WqConfig};
use crate::cq::Cq;
use crate::cqe::Cqe;
use crate::doorbell::Doorbell;
use crate::wq::{Rq, Sq, SwRqe, SwSqe, Wq};
use crate::wqe::{RqWqe, SqWqe};

/// Page size for aligned allocations.
pub const PAGE_SIZE: usize = 4096;

/// Page-aligned, zeroed array of `len` entries of `T`.
///
/// Plays the role of the DMA ring the kernel driver would map.
pub struct QueueMem<T> {
    ptr: NonNull<T>,
    len: usize,
    layout: Layout,
}

impl<T> QueueMem<T> {
    /// Allocate `len` zeroed entries.
    pub fn new(len: usize) -> Self {
        assert!(len > 0 && std::mem::size_of::<T>() > 0);
        let layout = Layout::array::<T>(len)
            .and_then(|l| l.align_to(PAGE_SIZE))
            .expect("queue layout")
            .pad_to_align();
        let raw = unsafe { alloc_zeroed(layout) } as *mut T;
        let ptr = NonNull::new(raw).expect("alloc_zeroed failed");
        Self { ptr, len, layout }
    }

    pub fn as_non_null(&self) -> NonNull<T> {
        self.ptr
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Store an entry the way the adapter would.
    pub fn write(&self, idx: usize, value: T) {
        assert!(idx < self.len);
        unsafe { std::ptr::write_volatile(self.ptr.as_ptr().add(idx), value) }
    }

    pub fn read(&self, idx: usize) -> T {
        assert!(idx < self.len);
        unsafe { std::ptr::read_volatile(self.ptr.as_ptr().add(idx)) }
    }

    /// Raw bytes of the whole allocation.
    pub fn bytes(&self) -> &[u8] {
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr() as *const u8, self.layout.size()) }
    }
}

impl<T> Drop for QueueMem<T> {
    fn drop(&mut self) {
        unsafe { dealloc(self.ptr.as_ptr() as *mut u8, self.layout) }
    }
}

/// Doorbell that records every value written to it.
///
/// Clones share the same log, so a test can keep one handle and move the
/// other into a queue.
#[derive(Debug, Clone, Default)]
pub struct RecordingDoorbell {
    writes: Rc<RefCell<Vec<u32>>>,
}

impl RecordingDoorbell {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn writes(&self) -> Vec<u32> {
        self.writes.borrow().clone()
    }

    pub fn last(&self) -> Option<u32> {
        self.writes.borrow().last().copied()
    }

    pub fn count(&self) -> usize {
        self.writes.borrow().len()
    }

    pub fn clear(&self) {
        self.writes.borrow_mut().clear();
    }
}

impl Doorbell for RecordingDoorbell {
    fn write(&self, value: u32) {
        self.writes.borrow_mut().push(value);
    }
}

// =============================================================================
// Ready-made queues
// =============================================================================

/// A work queue over test memory, with handles on both doorbells.
///
/// Field order keeps the queue dropped before the memory it points into.
pub struct TestWq {
    pub wq: Wq<RecordingDoorbell>,
    pub sq_db: RecordingDoorbell,
    pub rq_db: RecordingDoorbell,
    pub sq_mem: QueueMem<SqWqe>,
    pub rq_mem: QueueMem<RqWqe>,
}

impl TestWq {
    pub fn new(config: &WqConfig) -> Self {
        let sq_size = config.sq.size as usize;
        let rq_size = config.rq.size as usize;
        let sq_mem = QueueMem::<SqWqe>::new(sq_size + 1);
        let rq_mem = QueueMem::<RqWqe>::new(rq_size + 1);
        let sq_db = RecordingDoorbell::new();
        let rq_db = RecordingDoorbell::new();

        let sq = unsafe {
            Sq::new(
                &config.sq,
                sq_mem.as_non_null(),
                vec![SwSqe::default(); sq_size].into_boxed_slice(),
                sq_db.clone(),
            )
        }
        .expect("sq");
        let rq = unsafe {
            Rq::new(
                &config.rq,
                rq_mem.as_non_null(),
                vec![SwRqe::default(); rq_size].into_boxed_slice(),
                rq_db.clone(),
            )
        }
        .expect("rq");

        Self {
            wq: Wq::new(sq, rq, config.qid_mask),
            sq_db,
            rq_db,
            sq_mem,
            rq_mem,
        }
    }

    /// Work queue with the given ring sizes and default ids.
    pub fn with_sizes(sq_size: u16, rq_size: u16) -> Self {
        let mut config = WqConfig::default();
        config.sq.size = sq_size;
        config.rq.size = rq_size;
        Self::new(&config)
    }
}

/// A completion queue over test memory.
///
/// `mem` holds `size + 1` CQEs; the last one is the status page.
pub struct TestCq {
    pub cq: Cq<RecordingDoorbell>,
    pub gts: RecordingDoorbell,
    pub mem: QueueMem<Cqe>,
}

impl TestCq {
    pub fn new(config: &CqConfig) -> Self {
        let size = config.size as usize;
        let mem = QueueMem::<Cqe>::new(size + 1);
        let gts = RecordingDoorbell::new();
        let cq = unsafe {
            Cq::new(
                config,
                mem.as_non_null(),
                vec![Cqe::default(); size].into_boxed_slice(),
                gts.clone(),
            )
        }
        .expect("cq");
        Self { cq, gts, mem }
    }

    pub fn with_size(size: u16) -> Self {
        Self::new(&CqConfig {
            size,
            ..Default::default()
        })
    }

    /// Write a CQE into hardware slot `idx`.
    pub fn hw_write(&self, idx: u16, cqe: Cqe) {
        assert!(idx < self.cq.size());
        self.mem.write(idx as usize, cqe);
    }
}
