//! In-process transport: one receive worker per rank over a shared fabric.
//!
//! This backend models the shape of an RDMA tag-matching transport inside a
//! single process, with OS threads playing the ranks:
//!
//! - every rank owns a **receive worker** holding its queued envelopes and
//!   posted receives, guarded by a re-entrant lock (a completion callback
//!   may post a further receive from the owning thread);
//! - the **send side is per-thread and keeps no shared state**: a send goes
//!   straight into the destination worker, which is the "network";
//! - matching uses the 64-bit key `(tag << 32) | source_rank`;
//! - if a post finds its match already present, the payload is delivered on
//!   the spot and the returned future is born ready (early completion);
//! - a send stays in the destination inbox until a matching receive
//!   consumes it, so an unmatched send can still be cancelled.
//!
//! The fabric lives in a [`ThreadContext`] whose lifetime the application
//! manages; there are no process globals.

use crate::halo_error::HaloExchangeError;
use crate::transport::communicator::{make_key, CommFuture, Communicator, Rank, Tag};
use parking_lot::ReentrantMutex;
use std::cell::RefCell;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};

/// Completion state of one posted operation. Freshly allocated state is
/// all-zero; it is completed or cancelled exactly once.
#[derive(Default)]
struct OpState {
    done: bool,
    data: Option<Vec<u8>>,
    truncated: Option<(usize, usize)>,
}

#[derive(Default)]
struct OpShared {
    m: Mutex<OpState>,
    cv: Condvar,
}

impl OpShared {
    fn complete(&self) {
        let mut st = self.m.lock().expect("op state poisoned");
        st.done = true;
        drop(st);
        self.cv.notify_all();
    }

    /// A cancelled operation completes with no payload; waiters still get
    /// released so the request can be reaped.
    fn cancel(&self) {
        self.complete();
    }

    /// Deliver `payload` into a receive posted for `want` bytes, clamping
    /// and recording a diagnostic when the sender shipped more.
    fn deliver(&self, mut payload: Vec<u8>, want: usize) {
        let sent = payload.len();
        let truncated = if sent > want {
            payload.truncate(want);
            Some((sent, want))
        } else {
            None
        };
        #[cfg(debug_assertions)]
        if let Some((sent, want)) = truncated {
            eprintln!("[thread transport] truncated message: {sent} bytes into a {want}-byte receive");
        }
        let mut st = self.m.lock().expect("op state poisoned");
        st.data = Some(payload);
        st.truncated = truncated;
        st.done = true;
        drop(st);
        self.cv.notify_all();
    }

    fn is_done(&self) -> bool {
        self.m.lock().expect("op state poisoned").done
    }

    fn wait_done(&self) -> OpState {
        let mut st = self.m.lock().expect("op state poisoned");
        while !st.done {
            st = self.cv.wait(st).expect("op state poisoned");
        }
        std::mem::take(&mut *st)
    }
}

/// A send sitting in a destination inbox, not yet matched.
struct Envelope {
    key: u64,
    seq: u64,
    src: Rank,
    tag: Tag,
    payload: Vec<u8>,
    op: Arc<OpShared>,
}

/// A receive posted on the owning worker, not yet matched.
struct PendingRecv {
    key: u64,
    seq: u64,
    len: usize,
    op: Arc<OpShared>,
}

#[derive(Default)]
struct WorkerState {
    inbox: VecDeque<Envelope>,
    posted: Vec<PendingRecv>,
}

#[derive(Default)]
struct Worker {
    state: ReentrantMutex<RefCell<WorkerState>>,
}

#[derive(Default)]
struct EpochBarrier {
    m: Mutex<BarrierState>,
    cv: Condvar,
}

#[derive(Default)]
struct BarrierState {
    arrived: usize,
    epoch: u64,
}

impl EpochBarrier {
    fn wait(&self, parties: usize) {
        let mut st = self.m.lock().expect("barrier poisoned");
        let epoch = st.epoch;
        st.arrived += 1;
        if st.arrived == parties {
            st.arrived = 0;
            st.epoch += 1;
            self.cv.notify_all();
        } else {
            while st.epoch == epoch {
                st = self.cv.wait(st).expect("barrier poisoned");
            }
        }
    }
}

/// Shared fabric for a fixed-size world of in-process ranks.
pub struct ThreadContext {
    workers: Vec<Worker>,
    seq: AtomicU64,
    barrier: EpochBarrier,
}

impl ThreadContext {
    pub fn new(size: usize) -> Arc<Self> {
        Arc::new(Self {
            workers: (0..size).map(|_| Worker::default()).collect(),
            seq: AtomicU64::new(0),
            barrier: EpochBarrier::default(),
        })
    }

    #[inline]
    pub fn size(&self) -> usize {
        self.workers.len()
    }

    /// Create the communicator instance for `rank`; one per hosting thread.
    pub fn communicator(self: &Arc<Self>, rank: Rank) -> ThreadComm {
        assert!(rank < self.workers.len(), "rank {rank} out of range");
        ThreadComm {
            ctx: Arc::clone(self),
            rank,
        }
    }

    fn next_seq(&self) -> u64 {
        self.seq.fetch_add(1, Ordering::Relaxed)
    }

    /// Full-world barrier; used by the setup communicator.
    pub(crate) fn barrier_wait(&self) {
        self.barrier.wait(self.workers.len());
    }
}

/// Transport instance for one rank of a [`ThreadContext`].
#[derive(Clone)]
pub struct ThreadComm {
    ctx: Arc<ThreadContext>,
    rank: Rank,
}

impl ThreadComm {
    #[inline]
    pub fn context(&self) -> &Arc<ThreadContext> {
        &self.ctx
    }

    fn check_peer(&self, peer: Rank) -> Result<(), HaloExchangeError> {
        if peer >= self.ctx.workers.len() {
            return Err(HaloExchangeError::PeerOutOfRange {
                peer,
                size: self.ctx.workers.len(),
            });
        }
        Ok(())
    }
}

impl Communicator for ThreadComm {
    type SendFuture = ThreadSendFuture;
    type RecvFuture = ThreadRecvFuture;

    fn isend(
        &self,
        peer: Rank,
        tag: Tag,
        buf: &[u8],
    ) -> Result<Self::SendFuture, HaloExchangeError> {
        self.check_peer(peer)?;
        let key = make_key(tag, self.rank);
        let seq = self.ctx.next_seq();
        let op = Arc::new(OpShared::default());
        {
            let guard = self.ctx.workers[peer].state.lock();
            let mut st = guard.borrow_mut();
            if let Some(i) = st.posted.iter().position(|p| p.key == key) {
                // a matching receive is waiting: deliver now
                let posted = st.posted.remove(i);
                posted.op.deliver(buf.to_vec(), posted.len);
                op.complete();
            } else {
                st.inbox.push_back(Envelope {
                    key,
                    seq,
                    src: self.rank,
                    tag,
                    payload: buf.to_vec(),
                    op: Arc::clone(&op),
                });
            }
        }
        Ok(ThreadSendFuture {
            ctx: Arc::clone(&self.ctx),
            peer,
            seq,
            op,
        })
    }

    fn irecv(
        &self,
        peer: Rank,
        tag: Tag,
        len: usize,
    ) -> Result<Self::RecvFuture, HaloExchangeError> {
        self.check_peer(peer)?;
        let key = make_key(tag, peer);
        let seq = self.ctx.next_seq();
        let op = Arc::new(OpShared::default());
        {
            let guard = self.ctx.workers[self.rank].state.lock();
            let mut st = guard.borrow_mut();
            if let Some(i) = st.inbox.iter().position(|e| e.key == key) {
                // the message is already here: complete on the spot
                let env = st.inbox.remove(i).expect("indexed envelope vanished");
                op.deliver(env.payload, len);
                env.op.complete();
            } else {
                st.posted.push(PendingRecv {
                    key,
                    seq,
                    len,
                    op: Arc::clone(&op),
                });
            }
        }
        Ok(ThreadRecvFuture {
            ctx: Arc::clone(&self.ctx),
            owner: self.rank,
            seq,
            op,
        })
    }

    #[inline]
    fn rank(&self) -> Rank {
        self.rank
    }

    #[inline]
    fn size(&self) -> usize {
        self.ctx.workers.len()
    }

    fn probe_any(&self) -> Option<(Rank, Tag, Vec<u8>)> {
        let guard = self.ctx.workers[self.rank].state.lock();
        let mut st = guard.borrow_mut();
        let env = st.inbox.pop_front()?;
        env.op.complete();
        Some((env.src, env.tag, env.payload))
    }
}

/// Future for a send posted on a [`ThreadComm`].
pub struct ThreadSendFuture {
    ctx: Arc<ThreadContext>,
    peer: Rank,
    seq: u64,
    op: Arc<OpShared>,
}

impl CommFuture for ThreadSendFuture {
    fn wait(self) -> Result<Option<Vec<u8>>, HaloExchangeError> {
        self.op.wait_done();
        Ok(None)
    }

    fn ready(&mut self) -> bool {
        self.op.is_done()
    }

    fn cancel(&mut self) -> bool {
        let guard = self.ctx.workers[self.peer].state.lock();
        let mut st = guard.borrow_mut();
        if let Some(i) = st.inbox.iter().position(|e| e.seq == self.seq) {
            let env = st.inbox.remove(i).expect("indexed envelope vanished");
            env.op.cancel();
            true
        } else {
            false
        }
    }
}

/// Future for a receive posted on a [`ThreadComm`].
pub struct ThreadRecvFuture {
    ctx: Arc<ThreadContext>,
    owner: Rank,
    seq: u64,
    op: Arc<OpShared>,
}

impl ThreadRecvFuture {
    /// `(sent, posted)` byte counts when the sender shipped more bytes
    /// than this receive was posted for.
    pub fn truncated(&self) -> Option<(usize, usize)> {
        self.op.m.lock().expect("op state poisoned").truncated
    }
}

impl CommFuture for ThreadRecvFuture {
    fn wait(self) -> Result<Option<Vec<u8>>, HaloExchangeError> {
        let mut st = self.op.wait_done();
        Ok(st.data.take())
    }

    fn ready(&mut self) -> bool {
        self.op.is_done()
    }

    fn cancel(&mut self) -> bool {
        let guard = self.ctx.workers[self.owner].state.lock();
        let mut st = guard.borrow_mut();
        if let Some(i) = st.posted.iter().position(|p| p.seq == self.seq) {
            let posted = st.posted.remove(i);
            posted.op.cancel();
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_between_threads() {
        let ctx = ThreadContext::new(2);
        let c0 = ctx.communicator(0);
        let c1 = ctx.communicator(1);
        let t = std::thread::spawn(move || {
            let fut = c1.irecv(0, 5, 3).unwrap();
            fut.wait().unwrap().unwrap()
        });
        c0.isend(1, 5, &[1, 2, 3]).unwrap().wait().unwrap();
        assert_eq!(t.join().unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn early_completion_on_recv() {
        let ctx = ThreadContext::new(1);
        let c = ctx.communicator(0);
        let mut s = c.isend(0, 1, &[7, 8]).unwrap();
        assert!(!s.ready());
        let mut r = c.irecv(0, 1, 2).unwrap();
        assert!(r.ready());
        assert!(s.ready());
        assert_eq!(r.wait().unwrap().unwrap(), vec![7, 8]);
    }

    #[test]
    fn early_completion_on_send() {
        let ctx = ThreadContext::new(1);
        let c = ctx.communicator(0);
        let r = c.irecv(0, 2, 1).unwrap();
        let mut s = c.isend(0, 2, &[9]).unwrap();
        assert!(s.ready());
        assert_eq!(r.wait().unwrap().unwrap(), vec![9]);
    }

    #[test]
    fn fifo_within_one_tag() {
        let ctx = ThreadContext::new(1);
        let c = ctx.communicator(0);
        for i in 0..10u8 {
            let _ = c.isend(0, 3, &[i]).unwrap();
        }
        for i in 0..10u8 {
            let got = c.irecv(0, 3, 1).unwrap().wait().unwrap().unwrap();
            assert_eq!(got, vec![i]);
        }
    }

    #[test]
    fn distinct_tags_do_not_match() {
        let ctx = ThreadContext::new(1);
        let c = ctx.communicator(0);
        let _s = c.isend(0, 84, &[1]).unwrap();
        let mut r = c.irecv(0, 42, 1).unwrap();
        assert!(!r.ready());
        assert!(r.cancel());
        assert!(r.wait().unwrap().is_none());
        let mut s2 = c.irecv(0, 84, 1).unwrap();
        assert!(s2.ready());
        let _ = s2.wait().unwrap();
    }

    #[test]
    fn cancel_unmatched_send() {
        let ctx = ThreadContext::new(2);
        let c0 = ctx.communicator(0);
        let mut s = c0.isend(1, 7, &[1, 2]).unwrap();
        assert!(s.cancel());
        // a second cancel finds nothing in flight
        assert!(!s.cancel());
        assert!(s.wait().unwrap().is_none());
    }

    #[test]
    fn cancel_after_completion_fails() {
        let ctx = ThreadContext::new(1);
        let c = ctx.communicator(0);
        let _s = c.isend(0, 4, &[1]).unwrap();
        let mut r = c.irecv(0, 4, 1).unwrap();
        assert!(r.ready());
        assert!(!r.cancel());
    }

    #[test]
    fn truncation_is_reported() {
        let ctx = ThreadContext::new(1);
        let c = ctx.communicator(0);
        let _s = c.isend(0, 6, &[1, 2, 3, 4, 5, 6]).unwrap();
        let r = c.irecv(0, 6, 4).unwrap();
        assert_eq!(r.truncated(), Some((6, 4)));
        assert_eq!(r.wait().unwrap().unwrap(), vec![1, 2, 3, 4]);
    }

    #[test]
    fn probe_finds_unmatched_message() {
        let ctx = ThreadContext::new(2);
        let c0 = ctx.communicator(0);
        let c1 = ctx.communicator(1);
        assert!(c1.probe_any().is_none());
        let mut s = c0.isend(1, 99, &[5, 5]).unwrap();
        let (src, tag, data) = c1.probe_any().expect("queued envelope");
        assert_eq!((src, tag), (0, 99));
        assert_eq!(data, vec![5, 5]);
        assert!(s.ready());
    }

    #[test]
    fn peer_out_of_range_is_an_error() {
        let ctx = ThreadContext::new(2);
        let c = ctx.communicator(0);
        assert!(c.isend(2, 0, &[]).is_err());
        assert!(c.irecv(5, 0, 1).is_err());
    }
}
