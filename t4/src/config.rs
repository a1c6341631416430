//! Queue geometry handed over by the verbs layer at creation time.
//!
//! The kernel driver decides queue ids, ring sizes and the user doorbell qid
//! mask; these structs carry those values into the queue engine.

use crate::error::{Error, Result};

/// Largest RQ the adapter supports.
pub const T4_MAX_RQ_SIZE: u16 = 1024;
/// Largest SQ the adapter supports.
pub const T4_MAX_SQ_SIZE: u16 = 1024;
/// Deepest usable QP (one slot is kept free).
pub const T4_MAX_QP_DEPTH: u16 = T4_MAX_RQ_SIZE - 1;
/// Largest CQ the adapter supports.
pub const T4_MAX_CQ_DEPTH: u16 = 8192;
/// Outstanding RDMA reads per QP.
pub const T4_MAX_READ_DEPTH: u16 = 16;
/// Default interrupt holdoff timer selector written on CQ arm.
pub const T4_DEFAULT_TIMER_REG: u8 = 6;

/// Send queue configuration.
#[derive(Debug, Clone)]
pub struct SqConfig {
    /// Egress queue id.
    pub qid: u32,
    /// Number of entries, including the one kept free.
    pub size: u16,
}

impl Default for SqConfig {
    fn default() -> Self {
        Self { qid: 0, size: 128 }
    }
}

/// Receive queue configuration.
#[derive(Debug, Clone)]
pub struct RqConfig {
    /// Egress queue id.
    pub qid: u32,
    /// Number of entries, including the one kept free.
    pub size: u16,
    /// Adapter address of the RQ table.
    pub rqt_hwaddr: u32,
    /// Number of RQ table entries.
    pub rqt_size: u16,
}

impl Default for RqConfig {
    fn default() -> Self {
        Self {
            qid: 0,
            size: 128,
            rqt_hwaddr: 0,
            rqt_size: 128,
        }
    }
}

/// Work queue (SQ + RQ) configuration.
#[derive(Debug, Clone)]
pub struct WqConfig {
    pub sq: SqConfig,
    pub rq: RqConfig,
    /// Mask folding a qid into the bits the user doorbell expects.
    pub qid_mask: u32,
}

impl Default for WqConfig {
    fn default() -> Self {
        Self {
            sq: SqConfig::default(),
            rq: RqConfig::default(),
            qid_mask: u32::MAX,
        }
    }
}

impl WqConfig {
    /// Check ring sizes against adapter limits.
    pub fn validate(&self) -> Result<()> {
        check_size("sq", self.sq.size, T4_MAX_SQ_SIZE)?;
        check_size("rq", self.rq.size, T4_MAX_RQ_SIZE)?;
        Ok(())
    }
}

/// Completion queue configuration.
#[derive(Debug, Clone)]
pub struct CqConfig {
    /// Ingress queue id.
    pub cqid: u32,
    /// Number of hardware CQEs, excluding the trailing status page.
    pub size: u16,
    /// Mask folding the cqid into the bits the GTS register expects.
    pub qid_mask: u32,
    /// Holdoff timer selector written on every arm (3 bits).
    pub timer_reg: u8,
}

impl Default for CqConfig {
    fn default() -> Self {
        Self {
            cqid: 0,
            size: 256,
            qid_mask: u32::MAX,
            timer_reg: T4_DEFAULT_TIMER_REG,
        }
    }
}

impl CqConfig {
    /// Check ring size and timer selector against adapter limits.
    pub fn validate(&self) -> Result<()> {
        check_size("cq", self.size, T4_MAX_CQ_DEPTH)?;
        if self.timer_reg > 7 {
            return Err(Error::InvalidConfig(format!(
                "timer_reg {} does not fit in 3 bits",
                self.timer_reg
            )));
        }
        Ok(())
    }
}

pub(crate) fn check_size(name: &str, size: u16, max: u16) -> Result<()> {
    if size < 2 {
        return Err(Error::InvalidConfig(format!(
            "{} size {} is below the minimum of 2",
            name, size
        )));
    }
    if size > max {
        return Err(Error::InvalidConfig(format!(
            "{} size {} exceeds the adapter maximum of {}",
            name, size, max
        )));
    }
    Ok(())
}
