//! Common helpers for t4 integration tests.

#![allow(dead_code)]

use t4::cq::{Cq, PolledCqe};
use t4::cqe::{Cqe, CqeHeader, CqeStatus, CqeTrailer, CqeType, RiOpcode};
use t4::doorbell::Doorbell;
use t4::wq::Wq;
use t4::wqe::{len16, WrFlags, WrOpcode};

pub use t4::test_utils::{QueueMem, RecordingDoorbell, TestCq, TestWq};

/// Adapter-written SQ completion for the descriptor at `cidx`.
pub fn send_cqe(qpid: u32, cidx: u16, status: CqeStatus, gen: u8, ts: u64) -> Cqe {
    Cqe::new(CqeHeader {
        qpid,
        sw: false,
        status: status as u8,
        ty: CqeType::Send,
        opcode: RiOpcode::Send as u8,
    })
    .with_send_cidx(cidx)
    .with_trailer(CqeTrailer {
        gen,
        timestamp: ts,
        ..Default::default()
    })
}

/// Adapter-written RQ completion.
pub fn recv_cqe(qpid: u32, len: u32, msn: u32, gen: u8, ts: u64) -> Cqe {
    Cqe::new(CqeHeader {
        qpid,
        sw: false,
        status: CqeStatus::Success as u8,
        ty: CqeType::Recv,
        opcode: RiOpcode::Send as u8,
    })
    .with_len(len)
    .with_recv_info(0, msn)
    .with_trailer(CqeTrailer {
        gen,
        timestamp: ts,
        ..Default::default()
    })
}

/// Flush completion the verbs layer would synthesize for a dead QP.
pub fn flush_cqe(qpid: u32, ty: CqeType) -> Cqe {
    Cqe::new(CqeHeader {
        qpid,
        sw: true,
        status: CqeStatus::SwFlush as u8,
        ty,
        opcode: RiOpcode::Send as u8,
    })
}

/// Post one signaled SEND descriptor and return its ring index.
pub fn post_send<D: Doorbell>(wq: &mut Wq<D>, wr_id: u64, payload: usize) -> u16 {
    let sq = wq.sq_mut();
    let idx = sq.pidx();
    sq.pending_wqe()
        .init_header(idx, WrOpcode::Send, WrFlags::COMPLETION, len16(16 + payload));
    let shadow = sq.sw_sqe_mut(idx);
    shadow.wr_id = wr_id;
    shadow.opcode = RiOpcode::Send;
    shadow.signaled = true;
    shadow.complete = false;
    shadow.idx = idx;
    wq.sq_produce().expect("sq full");
    idx
}

/// Post one receive descriptor and return its ring index.
pub fn post_recv<D: Doorbell>(wq: &mut Wq<D>, wr_id: u64) -> u16 {
    let rq = wq.rq_mut();
    let idx = rq.pidx();
    rq.pending_wqe()
        .init_header(idx, WrOpcode::Recv, WrFlags::empty(), len16(32));
    rq.sw_rqe_mut(idx).wr_id = wr_id;
    wq.rq_produce().expect("rq full");
    idx
}

/// Drain every available CQE, retiring each one.
pub fn drain<D: Doorbell>(cq: &mut Cq<D>) -> Vec<PolledCqe> {
    let mut out = Vec::new();
    while let Some(polled) = cq.next_cqe().expect("cq poll") {
        cq.consume(polled.source).expect("cq consume");
        out.push(polled);
    }
    out
}
