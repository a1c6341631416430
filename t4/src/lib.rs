//! # t4 - User-space data plane for Chelsio T4 RDMA adapters
//!
//! This crate owns the rings a T4 queue pair and completion queue share with
//! the adapter once the kernel driver has created and mapped them. It does
//! not create queues itself: ids, sizes and mapped memory are handed in.
//!
//! ## Queues
//!
//! - **Send Queue (SQ)**: 256-byte descriptors (four 64-byte slots)
//! - **Receive Queue (RQ)**: 128-byte descriptors (two slots)
//! - **Completion Queue (CQ)**: 32-byte CQEs validated by a generation bit,
//!   plus a software ring for completions synthesized by the verbs layer
//!
//! Every ring is followed by a status page carrying the sticky `qp_err` and
//! `db_off` flags.
//!
//! ## Posting
//!
//! ```ignore
//! let sq = wq.sq_mut();
//! let idx = sq.pidx();
//! sq.pending_wqe().init_header(idx, WrOpcode::Send, WrFlags::COMPLETION, len16);
//! sq.sw_sqe_mut(idx).wr_id = wr_id;
//! wq.sq_produce()?;
//! wq.try_ring_sq_db(1)?;
//! ```
//!
//! ## Polling
//!
//! ```ignore
//! while let Some(polled) = cq.next_cqe()? {
//!     handle(&polled.cqe);
//!     cq.consume(polled.source)?;
//! }
//! cq.arm(false);
//! ```
//!
//! ## Module Overview
//!
//! - [`wq`]: SQ/RQ rings, shadows and doorbells
//! - [`cq`]: CQ polling, overflow detection and arming
//! - [`cqe`]: CQE layout and decoding
//! - [`wqe`]: Work request header and descriptor slots
//! - [`status`]: Status page flags
//! - [`doorbell`]: Doorbell and GTS register encoding

#[macro_use]
mod barrier;

pub mod config;
pub mod cq;
pub mod cqe;
pub mod doorbell;
pub mod error;
pub mod ring;
pub mod status;
pub mod wq;
pub mod wqe;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use config::{CqConfig, RqConfig, SqConfig, WqConfig};
pub use cq::{Cq, CqeSource, PolledCqe};
pub use cqe::{Cqe, CqeHeader, CqePayload, CqeStatus, CqeTrailer, CqeType, RiOpcode};
pub use doorbell::{Doorbell, UserDoorbell};
pub use error::{Error, QueueName, Result};
pub use status::Sentinel;
pub use wq::{Rq, Sq, SwRqe, SwSqe, Wq};
pub use wqe::{RqWqe, SqWqe, WrFlags, WrOpcode};
