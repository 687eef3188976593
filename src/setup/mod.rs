//! Blocking collectives for the pattern-setup phase.
//!
//! The pattern builder negotiates over a [`SetupComm`]: typed blocking
//! point-to-point plus broadcast and all-gather. Payloads are
//! `bytemuck::Pod` records cast to bytes on the wire (LE fixed-width, the
//! same convention the wire structs in the builder use).
//!
//! [`ThreadSetupComm`] runs over the in-process fabric; `MpiSetupComm`
//! (feature `mpi-support`) over a duplicated MPI communicator.

use crate::halo_error::HaloExchangeError;
use crate::transport::communicator::{CommFuture, Communicator, Rank, Tag};
use crate::transport::thread::ThreadComm;
use bytemuck::{cast_slice, cast_slice_mut, Pod};

/// Tag window reserved for setup traffic on the shared transport.
const SETUP_TAG: Tag = 0xffff_0000;

/// Blocking collective communicator used during pattern setup.
pub trait SetupComm {
    fn rank(&self) -> Rank;
    fn size(&self) -> usize;
    fn barrier(&self);

    /// Blocking typed send of `values` to `dest`.
    fn send_slice<T: Pod>(&self, dest: Rank, values: &[T]) -> Result<(), HaloExchangeError>;

    /// Blocking typed receive of exactly `count` values from `source`.
    fn recv_vec<T: Pod>(&self, source: Rank, count: usize)
        -> Result<Vec<T>, HaloExchangeError>;

    /// In-place broadcast of `values` from `root`; every rank passes a
    /// slice of the same length.
    fn broadcast<T: Pod>(&self, values: &mut [T], root: Rank) -> Result<(), HaloExchangeError>;

    /// Gather one value from every rank, in rank order.
    fn all_gather<T: Pod>(&self, value: T) -> Result<Vec<T>, HaloExchangeError>;

    /// Jagged all-gather: every rank contributes `payload` and knows the
    /// per-rank element counts up front.
    fn all_gather_v<T: Pod>(
        &self,
        payload: &[T],
        counts: &[usize],
    ) -> Result<Vec<Vec<T>>, HaloExchangeError>;
}

fn decode_exact<T: Pod>(data: &[u8], count: usize) -> Result<Vec<T>, HaloExchangeError> {
    let expected = count * std::mem::size_of::<T>();
    if data.len() != expected {
        return Err(HaloExchangeError::SizeMismatch {
            expected,
            got: data.len(),
        });
    }
    let mut v = vec![T::zeroed(); count];
    cast_slice_mut(&mut v).copy_from_slice(data);
    Ok(v)
}

/// Setup communicator over a [`ThreadComm`] of the in-process fabric.
///
/// Collectives are built from the transport's own tagged point-to-point:
/// FIFO delivery within one `(peer, tag)` pair keeps back-to-back
/// collectives from interleaving, so one reserved tag suffices.
pub struct ThreadSetupComm {
    comm: ThreadComm,
}

impl ThreadSetupComm {
    pub fn new(comm: ThreadComm) -> Self {
        Self { comm }
    }
}

impl SetupComm for ThreadSetupComm {
    fn rank(&self) -> Rank {
        self.comm.rank()
    }

    fn size(&self) -> usize {
        self.comm.size()
    }

    fn barrier(&self) {
        self.comm.context().barrier_wait();
    }

    fn send_slice<T: Pod>(&self, dest: Rank, values: &[T]) -> Result<(), HaloExchangeError> {
        self.comm.isend(dest, SETUP_TAG, cast_slice(values))?.wait()?;
        Ok(())
    }

    fn recv_vec<T: Pod>(
        &self,
        source: Rank,
        count: usize,
    ) -> Result<Vec<T>, HaloExchangeError> {
        let nbytes = count * std::mem::size_of::<T>();
        let data = self
            .comm
            .irecv(source, SETUP_TAG, nbytes)?
            .wait()?
            .unwrap_or_default();
        decode_exact(&data, count)
    }

    fn broadcast<T: Pod>(&self, values: &mut [T], root: Rank) -> Result<(), HaloExchangeError> {
        if self.rank() == root {
            let bytes = cast_slice(values);
            let mut pending = Vec::with_capacity(self.size().saturating_sub(1));
            for r in 0..self.size() {
                if r != root {
                    pending.push(self.comm.isend(r, SETUP_TAG, bytes)?);
                }
            }
            for s in pending {
                s.wait()?;
            }
        } else {
            let nbytes = std::mem::size_of_val(values);
            let data = self
                .comm
                .irecv(root, SETUP_TAG, nbytes)?
                .wait()?
                .unwrap_or_default();
            if data.len() != nbytes {
                return Err(HaloExchangeError::SizeMismatch {
                    expected: nbytes,
                    got: data.len(),
                });
            }
            cast_slice_mut(values).copy_from_slice(&data);
        }
        Ok(())
    }

    fn all_gather<T: Pod>(&self, value: T) -> Result<Vec<T>, HaloExchangeError> {
        let me = self.rank();
        let bytes = bytemuck::bytes_of(&value);
        let mut pending = Vec::with_capacity(self.size().saturating_sub(1));
        for r in 0..self.size() {
            if r != me {
                pending.push(self.comm.isend(r, SETUP_TAG, bytes)?);
            }
        }
        let mut out = vec![T::zeroed(); self.size()];
        for (r, slot) in out.iter_mut().enumerate() {
            if r == me {
                *slot = value;
            } else {
                let data = self
                    .comm
                    .irecv(r, SETUP_TAG, bytes.len())?
                    .wait()?
                    .unwrap_or_default();
                *slot = decode_exact::<T>(&data, 1)?[0];
            }
        }
        for s in pending {
            s.wait()?;
        }
        Ok(out)
    }

    fn all_gather_v<T: Pod>(
        &self,
        payload: &[T],
        counts: &[usize],
    ) -> Result<Vec<Vec<T>>, HaloExchangeError> {
        let me = self.rank();
        let bytes = cast_slice(payload);
        let mut pending = Vec::with_capacity(self.size().saturating_sub(1));
        for r in 0..self.size() {
            if r != me {
                pending.push(self.comm.isend(r, SETUP_TAG, bytes)?);
            }
        }
        let mut out = Vec::with_capacity(self.size());
        for (r, &count) in counts.iter().enumerate().take(self.size()) {
            if r == me {
                out.push(payload.to_vec());
            } else {
                let nbytes = count * std::mem::size_of::<T>();
                let data = self
                    .comm
                    .irecv(r, SETUP_TAG, nbytes)?
                    .wait()?
                    .unwrap_or_default();
                out.push(decode_exact(&data, count)?);
            }
        }
        for s in pending {
            s.wait()?;
        }
        Ok(out)
    }
}

#[cfg(feature = "mpi-support")]
mod mpi_setup {
    use super::*;
    use crate::transport::mpi::MpiComm;
    use mpi::collective::{CommunicatorCollectives, Root};
    use mpi::point_to_point::{Destination, Source};
    use mpi::topology::{Communicator as _, SimpleCommunicator};

    const SETUP_MPI_TAG: i32 = 0;

    /// Setup communicator over a duplicate of the MPI world.
    pub struct MpiSetupComm {
        world: SimpleCommunicator,
    }

    impl MpiSetupComm {
        pub fn new(comm: &MpiComm) -> Self {
            Self {
                world: comm.world.duplicate(),
            }
        }
    }

    impl SetupComm for MpiSetupComm {
        fn rank(&self) -> Rank {
            self.world.rank() as Rank
        }

        fn size(&self) -> usize {
            self.world.size() as usize
        }

        fn barrier(&self) {
            self.world.barrier();
        }

        fn send_slice<T: Pod>(&self, dest: Rank, values: &[T]) -> Result<(), HaloExchangeError> {
            self.world
                .process_at_rank(dest as i32)
                .send_with_tag(cast_slice(values), SETUP_MPI_TAG);
            Ok(())
        }

        fn recv_vec<T: Pod>(
            &self,
            source: Rank,
            count: usize,
        ) -> Result<Vec<T>, HaloExchangeError> {
            let mut v = vec![T::zeroed(); count];
            self.world
                .process_at_rank(source as i32)
                .receive_into_with_tag(cast_slice_mut(&mut v), SETUP_MPI_TAG);
            Ok(v)
        }

        fn broadcast<T: Pod>(
            &self,
            values: &mut [T],
            root: Rank,
        ) -> Result<(), HaloExchangeError> {
            self.world
                .process_at_rank(root as i32)
                .broadcast_into(cast_slice_mut(values));
            Ok(())
        }

        fn all_gather<T: Pod>(&self, value: T) -> Result<Vec<T>, HaloExchangeError> {
            let mut out = vec![T::zeroed(); self.size()];
            self.world
                .all_gather_into(bytemuck::bytes_of(&value), cast_slice_mut(&mut out));
            Ok(out)
        }

        fn all_gather_v<T: Pod>(
            &self,
            payload: &[T],
            counts: &[usize],
        ) -> Result<Vec<Vec<T>>, HaloExchangeError> {
            // jagged gather from counts + one broadcast per root; avoids
            // displacement bookkeeping for the handful of setup rounds
            let me = self.rank();
            let mut out = Vec::with_capacity(self.size());
            for (r, &count) in counts.iter().enumerate().take(self.size()) {
                let mut buf = if r == me {
                    payload.to_vec()
                } else {
                    vec![T::zeroed(); count]
                };
                self.world
                    .process_at_rank(r as i32)
                    .broadcast_into(cast_slice_mut(&mut buf));
                out.push(buf);
            }
            Ok(out)
        }
    }
}

#[cfg(feature = "mpi-support")]
pub use mpi_setup::MpiSetupComm;
