//! MPI transport backend (feature `mpi-support`).
//!
//! Byte messages over MPI point-to-point with the native tag field; the
//! 64-bit match key is not needed here. Requests are posted against boxed
//! heap slices so the transfer buffer outlives the caller's borrow, and
//! reaped on wait/test.
//!
//! rsmpi exposes no `MPI_Cancel`, so `cancel()` on these futures reports
//! `false`: an attempt that cannot cancel is a failed attempt. The thread
//! transport implements real cancellation.

use crate::halo_error::HaloExchangeError;
use crate::transport::communicator::{CommFuture, Communicator, Rank, Tag};
use core::ptr::NonNull;
use mpi::collective::CommunicatorCollectives;
use mpi::environment::Universe;
use mpi::point_to_point::{Destination, Source};
use mpi::request::StaticScope;
use mpi::topology::{Communicator as _, SimpleCommunicator};

type ByteRequest = mpi::request::Request<'static, [u8], StaticScope>;

/// Transport over the MPI world communicator.
pub struct MpiComm {
    _universe: Universe,
    pub world: SimpleCommunicator,
    rank: Rank,
    size: usize,
}

unsafe impl Send for MpiComm {}
unsafe impl Sync for MpiComm {}

impl Default for MpiComm {
    fn default() -> Self {
        let universe = mpi::initialize().expect("MPI already initialized");
        let world = universe.world();
        let rank = world.rank() as Rank;
        let size = world.size() as usize;
        Self {
            _universe: universe,
            world,
            rank,
            size,
        }
    }
}

impl MpiComm {
    fn check_peer(&self, peer: Rank) -> Result<(), HaloExchangeError> {
        if peer >= self.size {
            return Err(HaloExchangeError::PeerOutOfRange {
                peer,
                size: self.size,
            });
        }
        Ok(())
    }
}

impl Communicator for MpiComm {
    type SendFuture = MpiSendFuture;
    type RecvFuture = MpiRecvFuture;

    fn isend(
        &self,
        peer: Rank,
        tag: Tag,
        buf: &[u8],
    ) -> Result<Self::SendFuture, HaloExchangeError> {
        self.check_peer(peer)?;
        let boxed = buf.to_vec().into_boxed_slice();
        let raw: *mut [u8] = Box::into_raw(boxed);
        let slice: &'static [u8] = unsafe { &*raw };
        let req = self
            .world
            .process_at_rank(peer as i32)
            .immediate_send_with_tag(StaticScope, slice, tag as i32);
        Ok(MpiSendFuture {
            req: Some(req),
            buf: Some(unsafe { NonNull::new_unchecked(raw) }),
        })
    }

    fn irecv(
        &self,
        peer: Rank,
        tag: Tag,
        len: usize,
    ) -> Result<Self::RecvFuture, HaloExchangeError> {
        self.check_peer(peer)?;
        let boxed = vec![0u8; len].into_boxed_slice();
        let raw: *mut [u8] = Box::into_raw(boxed);
        let slice: &'static mut [u8] = unsafe { &mut *raw };
        let req = self
            .world
            .process_at_rank(peer as i32)
            .immediate_receive_into_with_tag(StaticScope, slice, tag as i32);
        Ok(MpiRecvFuture {
            req: Some(req),
            buf: Some(unsafe { NonNull::new_unchecked(raw) }),
            len,
        })
    }

    fn rank(&self) -> Rank {
        self.rank
    }

    fn size(&self) -> usize {
        self.size
    }
}

pub struct MpiSendFuture {
    req: Option<ByteRequest>,
    buf: Option<NonNull<[u8]>>,
}

impl CommFuture for MpiSendFuture {
    fn wait(mut self) -> Result<Option<Vec<u8>>, HaloExchangeError> {
        if let Some(r) = self.req.take() {
            let _ = r.wait();
        }
        if let Some(ptr) = self.buf.take() {
            unsafe { drop(Box::from_raw(ptr.as_ptr())) };
        }
        Ok(None)
    }

    fn ready(&mut self) -> bool {
        match self.req.take() {
            None => true,
            Some(r) => match r.test() {
                Ok(_) => true,
                Err(r) => {
                    self.req = Some(r);
                    false
                }
            },
        }
    }

    fn cancel(&mut self) -> bool {
        false
    }
}

impl Drop for MpiSendFuture {
    fn drop(&mut self) {
        if let Some(r) = self.req.take() {
            let _ = r.wait();
        }
        if let Some(ptr) = self.buf.take() {
            unsafe { drop(Box::from_raw(ptr.as_ptr())) };
        }
    }
}

pub struct MpiRecvFuture {
    req: Option<ByteRequest>,
    buf: Option<NonNull<[u8]>>,
    len: usize,
}

impl CommFuture for MpiRecvFuture {
    fn wait(mut self) -> Result<Option<Vec<u8>>, HaloExchangeError> {
        if let Some(r) = self.req.take() {
            let _ = r.wait();
        }
        let ptr = self.buf.take().ok_or(HaloExchangeError::Transport {
            call: "MPI_Wait",
            detail: "receive buffer already reaped".into(),
        })?;
        let boxed: Box<[u8]> = unsafe { Box::from_raw(ptr.as_ptr()) };
        let mut v = Vec::from(boxed);
        v.truncate(self.len);
        Ok(Some(v))
    }

    fn ready(&mut self) -> bool {
        match self.req.take() {
            None => true,
            Some(r) => match r.test() {
                Ok(_) => true,
                Err(r) => {
                    self.req = Some(r);
                    false
                }
            },
        }
    }

    fn cancel(&mut self) -> bool {
        false
    }
}

impl Drop for MpiRecvFuture {
    fn drop(&mut self) {
        if let Some(r) = self.req.take() {
            let _ = r.wait();
        }
        if let Some(ptr) = self.buf.take() {
            unsafe { drop(Box::from_raw(ptr.as_ptr())) };
        }
    }
}
