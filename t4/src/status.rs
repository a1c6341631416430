//! Status page appended past the last usable entry of every ring.
//!
//! The first flit is owned by the adapter. The second carries two sticky
//! bytes shared with software: `qp_err` (set by either side) and `db_off`
//! (software only, tells producers to skip the doorbell).

use std::marker::PhantomData;
use std::mem::{offset_of, size_of};
use std::ptr::{addr_of, addr_of_mut, NonNull};

use static_assertions::const_assert_eq;

/// Status page layout.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct StatusPage {
    _rsvd1: u32,
    _rsvd2: u16,
    qid: u16,
    cidx: u16,
    pidx: u16,
    qp_err: u8,
    db_off: u8,
}

const_assert_eq!(offset_of!(StatusPage, qid), 6);
const_assert_eq!(offset_of!(StatusPage, qp_err), 12);
const_assert_eq!(offset_of!(StatusPage, db_off), 13);
const_assert_eq!(size_of::<StatusPage>(), 16);

/// Handle to the status page living in the trailing slot of a ring.
///
/// Every access is a single volatile byte load or store; the adapter may
/// write `qp_err` at any time. The handle borrows the queue it came from,
/// so it cannot outlive the ring memory:
///
/// ```compile_fail
/// use std::ptr::NonNull;
/// use t4::doorbell::Doorbell;
/// use t4::wq::{Sq, SwSqe};
/// use t4::wqe::SqWqe;
/// use t4::SqConfig;
///
/// struct Nop;
/// impl Doorbell for Nop {
///     fn write(&self, _: u32) {}
/// }
///
/// let mut mem = vec![SqWqe::default(); 5];
/// let config = SqConfig { qid: 0, size: 4 };
/// let sentinel = {
///     let sq = unsafe {
///         Sq::new(
///             &config,
///             NonNull::new(mem.as_mut_ptr()).unwrap(),
///             vec![SwSqe::default(); 4].into_boxed_slice(),
///             Nop,
///         )
///     }
///     .unwrap();
///     sq.sentinel()
/// };
/// sentinel.set_qp_err(true);
/// ```
#[derive(Debug, Clone, Copy)]
pub struct Sentinel<'a> {
    page: NonNull<StatusPage>,
    _ring: PhantomData<&'a StatusPage>,
}

impl<'a> Sentinel<'a> {
    /// # Safety
    /// `page` must point into ring memory that stays valid for `'a`.
    pub(crate) unsafe fn new(page: NonNull<StatusPage>) -> Self {
        Self {
            page,
            _ring: PhantomData,
        }
    }

    #[inline]
    pub fn qp_err(&self) -> bool {
        unsafe { std::ptr::read_volatile(addr_of!((*self.page.as_ptr()).qp_err)) != 0 }
    }

    #[inline]
    pub fn set_qp_err(&self, on: bool) {
        unsafe {
            std::ptr::write_volatile(addr_of_mut!((*self.page.as_ptr()).qp_err), on as u8);
        }
    }

    #[inline]
    pub fn db_off(&self) -> bool {
        unsafe { std::ptr::read_volatile(addr_of!((*self.page.as_ptr()).db_off)) != 0 }
    }

    #[inline]
    pub fn set_db_off(&self, off: bool) {
        unsafe {
            std::ptr::write_volatile(addr_of_mut!((*self.page.as_ptr()).db_off), off as u8);
        }
    }

    /// Queue id as last reported by the adapter.
    #[inline]
    pub fn hw_qid(&self) -> u16 {
        u16::from_be(unsafe { std::ptr::read_volatile(addr_of!((*self.page.as_ptr()).qid)) })
    }

    /// Adapter consumer index as last reported by the adapter.
    #[inline]
    pub fn hw_cidx(&self) -> u16 {
        u16::from_be(unsafe { std::ptr::read_volatile(addr_of!((*self.page.as_ptr()).cidx)) })
    }

    /// Adapter producer index as last reported by the adapter.
    #[inline]
    pub fn hw_pidx(&self) -> u16 {
        u16::from_be(unsafe { std::ptr::read_volatile(addr_of!((*self.page.as_ptr()).pidx)) })
    }
}
