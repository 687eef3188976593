//! Callback-based completion layered above a [`Communicator`].
//!
//! The dispatcher owns a queue of pending records per direction and fires
//! the registered callback exactly once when `progress()` observes the
//! completion, unless the record is cancelled or detached first. Handles
//! clone cheaply and share the queues, so a completion callback can repost
//! through its own captured handle. An instance is single-threaded.
//!
//! Dropping the last handle while records are still pending is a
//! programming error and aborts the process: drain with `progress()` or
//! `cancel_all()` before teardown.

use crate::buffer::SharedMessage;
use crate::halo_error::HaloExchangeError;
use crate::transport::communicator::{CommFuture, Communicator, Rank, Tag};
use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

type Callback = Box<dyn FnOnce(Rank, Tag, SharedMessage)>;

struct Record<F> {
    cb: Callback,
    rank: Rank,
    tag: Tag,
    fut: F,
    msg: SharedMessage,
}

struct Inner<C: Communicator> {
    comm: C,
    sends: RefCell<VecDeque<Record<C::SendFuture>>>,
    recvs: RefCell<VecDeque<Record<C::RecvFuture>>>,
}

impl<C: Communicator> Drop for Inner<C> {
    fn drop(&mut self) {
        let pending = self.sends.borrow().len() + self.recvs.borrow().len();
        if pending != 0 {
            eprintln!("callback dispatcher dropped with {pending} pending operations");
            std::process::abort();
        }
    }
}

/// Dispatcher for send/recv operations with completion callbacks.
pub struct CallbackDispatcher<C: Communicator> {
    inner: Rc<Inner<C>>,
}

impl<C: Communicator> Clone for CallbackDispatcher<C> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<C: Communicator> CallbackDispatcher<C> {
    pub fn new(comm: C) -> Self {
        Self {
            inner: Rc::new(Inner {
                comm,
                sends: RefCell::new(VecDeque::new()),
                recvs: RefCell::new(VecDeque::new()),
            }),
        }
    }

    #[inline]
    pub fn comm(&self) -> &C {
        &self.inner.comm
    }

    pub fn pending_sends(&self) -> usize {
        self.inner.sends.borrow().len()
    }

    pub fn pending_recvs(&self) -> usize {
        self.inner.recvs.borrow().len()
    }

    /// Post a send of `msg` to `dst` and register `cb` for its completion.
    /// The dispatcher keeps a handle on the message until the callback
    /// fires, so the caller may drop theirs immediately.
    pub fn send(
        &self,
        msg: &SharedMessage,
        dst: Rank,
        tag: Tag,
        cb: impl FnOnce(Rank, Tag, SharedMessage) + 'static,
    ) -> Result<(), HaloExchangeError> {
        let mut fut = {
            let data = msg.data();
            self.inner.comm.isend(dst, tag, &data)?
        };
        if fut.ready() {
            // completed at post time: fire synchronously, keep no record
            fut.wait()?;
            cb(dst, tag, msg.clone());
            return Ok(());
        }
        self.inner.sends.borrow_mut().push_back(Record {
            cb: Box::new(cb),
            rank: dst,
            tag,
            fut,
            msg: msg.clone(),
        });
        Ok(())
    }

    /// Post a receive into `msg` (its current size is the expected byte
    /// count) and register `cb` for its completion.
    pub fn recv(
        &self,
        msg: &SharedMessage,
        src: Rank,
        tag: Tag,
        cb: impl FnOnce(Rank, Tag, SharedMessage) + 'static,
    ) -> Result<(), HaloExchangeError> {
        let mut fut = self.inner.comm.irecv(src, tag, msg.size())?;
        if fut.ready() {
            if let Some(data) = fut.wait()? {
                copy_into(msg, &data);
            }
            cb(src, tag, msg.clone());
            return Ok(());
        }
        self.inner.recvs.borrow_mut().push_back(Record {
            cb: Box::new(cb),
            rank: src,
            tag,
            fut,
            msg: msg.clone(),
        });
        Ok(())
    }

    /// Fan one shared payload out to every destination in `dsts` with the
    /// same tag; `cb` is invoked once per completed destination.
    pub fn send_multi<I>(
        &self,
        msg: &SharedMessage,
        dsts: I,
        tag: Tag,
        cb: impl FnMut(Rank, Tag, SharedMessage) + 'static,
    ) -> Result<(), HaloExchangeError>
    where
        I: IntoIterator<Item = Rank>,
    {
        let shared = Rc::new(RefCell::new(cb));
        for dst in dsts {
            let cb = Rc::clone(&shared);
            self.send(msg, dst, tag, move |r, t, m| (&mut *cb.borrow_mut())(r, t, m))?;
        }
        Ok(())
    }

    /// One sweep over the pending records: for each direction, fire the
    /// callback of at most one completed record (bounding callback depth;
    /// repeated sweeps drain everything). Returns true while records
    /// remain.
    pub fn progress(&self) -> Result<bool, HaloExchangeError> {
        let sends_done = self.run_sends()?;
        let recvs_done = self.run_recvs()?;
        Ok(!(sends_done && recvs_done))
    }

    /// Like [`progress`](Self::progress), but once everything registered
    /// has completed, probe for one unmatched incoming message, receive it
    /// into a fresh [`SharedMessage`] and hand it to `unexpected_cb`.
    pub fn progress_unexpected(
        &self,
        unexpected_cb: impl FnOnce(Rank, Tag, SharedMessage),
    ) -> Result<bool, HaloExchangeError> {
        let pending = self.progress()?;
        if !pending {
            if let Some((src, tag, data)) = self.inner.comm.probe_any() {
                let msg = SharedMessage::with_size(data.len());
                msg.data_mut().copy_from_slice(&data);
                unexpected_cb(src, tag, msg);
            }
        }
        Ok(pending)
    }

    fn run_sends(&self) -> Result<bool, HaloExchangeError> {
        let len = self.inner.sends.borrow().len();
        for _ in 0..len {
            let rec = self.inner.sends.borrow_mut().pop_front();
            let Some(mut rec) = rec else { break };
            if rec.fut.ready() {
                let Record { fut, cb, rank, tag, msg } = rec;
                fut.wait()?;
                cb(rank, tag, msg);
                break;
            }
            self.inner.sends.borrow_mut().push_back(rec);
        }
        Ok(self.inner.sends.borrow().is_empty())
    }

    fn run_recvs(&self) -> Result<bool, HaloExchangeError> {
        let len = self.inner.recvs.borrow().len();
        for _ in 0..len {
            let rec = self.inner.recvs.borrow_mut().pop_front();
            let Some(mut rec) = rec else { break };
            if rec.fut.ready() {
                let Record { fut, cb, rank, tag, msg } = rec;
                if let Some(data) = fut.wait()? {
                    copy_into(&msg, &data);
                }
                cb(rank, tag, msg);
                break;
            }
            self.inner.recvs.borrow_mut().push_back(rec);
        }
        Ok(self.inner.recvs.borrow().is_empty())
    }

    /// Deregister the pending send matching `(dst, tag)`, discarding its
    /// callback; the in-flight future and the message come back to the
    /// caller. Asking for an unregistered operation is an error.
    pub fn detach_send(
        &self,
        dst: Rank,
        tag: Tag,
    ) -> Result<(C::SendFuture, SharedMessage), HaloExchangeError> {
        detach(&mut self.inner.sends.borrow_mut(), dst, tag, "send")
    }

    /// Deregister the pending receive matching `(src, tag)`.
    pub fn detach_recv(
        &self,
        src: Rank,
        tag: Tag,
    ) -> Result<(C::RecvFuture, SharedMessage), HaloExchangeError> {
        detach(&mut self.inner.recvs.borrow_mut(), src, tag, "recv")
    }

    /// Register an existing in-flight send for callback-based completion.
    /// A live record with the same `(dst, tag)` is a conflict.
    pub fn attach_send(
        &self,
        fut: C::SendFuture,
        msg: SharedMessage,
        dst: Rank,
        tag: Tag,
        cb: impl FnOnce(Rank, Tag, SharedMessage) + 'static,
    ) -> Result<(), HaloExchangeError> {
        attach(&mut self.inner.sends.borrow_mut(), fut, msg, dst, tag, cb, "send")
    }

    /// Register an existing in-flight receive for callback-based completion.
    pub fn attach_recv(
        &self,
        fut: C::RecvFuture,
        msg: SharedMessage,
        src: Rank,
        tag: Tag,
        cb: impl FnOnce(Rank, Tag, SharedMessage) + 'static,
    ) -> Result<(), HaloExchangeError> {
        attach(&mut self.inner.recvs.borrow_mut(), fut, msg, src, tag, cb, "recv")
    }

    /// Cancel and drain every pending record. Cancelled records never fire
    /// their callback; records that had already completed are reaped and
    /// dropped likewise. Returns true iff every cancellation attempt on an
    /// in-flight record succeeded.
    pub fn cancel_all(&self) -> Result<bool, HaloExchangeError> {
        let s = self.cancel_sends()?;
        let r = self.cancel_recvs()?;
        Ok(s && r)
    }

    pub fn cancel_sends(&self) -> Result<bool, HaloExchangeError> {
        cancel_queue(&mut self.inner.sends.borrow_mut())
    }

    pub fn cancel_recvs(&self) -> Result<bool, HaloExchangeError> {
        cancel_queue(&mut self.inner.recvs.borrow_mut())
    }
}

fn copy_into(msg: &SharedMessage, data: &[u8]) {
    let mut dst = msg.data_mut();
    let n = data.len().min(dst.len());
    dst[..n].copy_from_slice(&data[..n]);
}

fn detach<F>(
    queue: &mut VecDeque<Record<F>>,
    peer: Rank,
    tag: Tag,
    direction: &'static str,
) -> Result<(F, SharedMessage), HaloExchangeError> {
    let i = queue
        .iter()
        .position(|r| r.rank == peer && r.tag == tag)
        .ok_or(HaloExchangeError::DetachMiss {
            direction,
            peer,
            tag,
        })?;
    let rec = queue.remove(i).expect("indexed record vanished");
    Ok((rec.fut, rec.msg))
}

#[allow(clippy::too_many_arguments)]
fn attach<F>(
    queue: &mut VecDeque<Record<F>>,
    fut: F,
    msg: SharedMessage,
    peer: Rank,
    tag: Tag,
    cb: impl FnOnce(Rank, Tag, SharedMessage) + 'static,
    direction: &'static str,
) -> Result<(), HaloExchangeError> {
    if queue.iter().any(|r| r.rank == peer && r.tag == tag) {
        return Err(HaloExchangeError::AttachConflict {
            direction,
            peer,
            tag,
        });
    }
    queue.push_back(Record {
        cb: Box::new(cb),
        rank: peer,
        tag,
        fut,
        msg,
    });
    Ok(())
}

fn cancel_queue<F: CommFuture>(queue: &mut VecDeque<Record<F>>) -> Result<bool, HaloExchangeError> {
    let mut ok = true;
    while let Some(rec) = queue.pop_front() {
        // the callback and message drop without the callback ever firing
        let Record { mut fut, .. } = rec;
        if !fut.ready() {
            ok = ok && fut.cancel();
        }
        fut.wait()?;
    }
    Ok(ok)
}
