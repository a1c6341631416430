//! Ring index bookkeeping shared by the SQ, RQ and software CQ.
//!
//! Occupancy is tracked explicitly in `in_use`, so `pidx == cidx` is
//! unambiguous. Work queues keep one entry free (`reserve = 1`); the
//! software CQ uses every entry (`reserve = 0`).

use crate::error::{Error, QueueName, Result};

#[derive(Debug, Clone)]
pub struct RingIndex {
    name: QueueName,
    size: u16,
    reserve: u16,
    in_use: u16,
    pidx: u16,
    cidx: u16,
}

impl RingIndex {
    /// Ring for a work queue: at most `size - 1` entries in flight.
    pub fn work_queue(name: QueueName, size: u16) -> Self {
        Self::new(name, size, 1)
    }

    /// Ring using every entry.
    pub fn unreserved(name: QueueName, size: u16) -> Self {
        Self::new(name, size, 0)
    }

    fn new(name: QueueName, size: u16, reserve: u16) -> Self {
        debug_assert!(size > reserve, "ring of size {} cannot reserve {}", size, reserve);
        Self {
            name,
            size,
            reserve,
            in_use: 0,
            pidx: 0,
            cidx: 0,
        }
    }

    #[inline]
    pub fn size(&self) -> u16 {
        self.size
    }

    #[inline]
    pub fn in_use(&self) -> u16 {
        self.in_use
    }

    #[inline]
    pub fn pidx(&self) -> u16 {
        self.pidx
    }

    #[inline]
    pub fn cidx(&self) -> u16 {
        self.cidx
    }

    #[inline]
    pub fn capacity(&self) -> u16 {
        self.size - self.reserve
    }

    #[inline]
    pub fn avail(&self) -> u16 {
        self.capacity() - self.in_use
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.in_use == 0
    }

    #[inline]
    pub fn is_full(&self) -> bool {
        self.in_use == self.capacity()
    }

    /// Account for one entry written at `pidx`.
    #[inline]
    pub fn produce(&mut self) -> Result<()> {
        if self.is_full() {
            return Err(Error::QueueFull { queue: self.name });
        }
        self.in_use += 1;
        self.pidx = self.wrap_next(self.pidx);
        Ok(())
    }

    /// Retire the entry at `cidx`.
    #[inline]
    pub fn consume(&mut self) -> Result<()> {
        if self.is_empty() {
            return Err(Error::QueueEmpty { queue: self.name });
        }
        self.in_use -= 1;
        self.cidx = self.wrap_next(self.cidx);
        Ok(())
    }

    /// Index following `idx`, wrapping at `size`.
    #[inline]
    pub fn wrap_next(&self, idx: u16) -> u16 {
        let next = idx + 1;
        if next == self.size { 0 } else { next }
    }
}
