//! The communication object: executes one halo exchange per call.

use crate::buffer::{Buffer, PersistentAlloc};
use crate::halo_error::HaloExchangeError;
use crate::pattern::iteration::IterationSpacePair;
use crate::pattern::pattern::{ExtendedDomainId, Pattern};
use crate::transport::communicator::{CommFuture, Communicator};
use super::field::FieldDescriptor;

/// Halo key ordered by `(element count, domain id)`: posting buffers in
/// length-increasing order lets the smallest messages contend for the
/// network first.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
struct SizedDomainId {
    size: usize,
    id: ExtendedDomainId,
}

impl Ord for SizedDomainId {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.size.cmp(&other.size).then(self.id.cmp(&other.id))
    }
}

impl PartialOrd for SizedDomainId {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

type OrderedHalos<const D: usize> = Vec<(SizedDomainId, Vec<IterationSpacePair<D>>)>;

/// Drives halo exchanges for fields sharing one pattern.
///
/// The object owns one packed send and one receive buffer per halo for its
/// whole lifetime; the buffers draw from a shared caching allocator, so
/// after the first exchange reaching steady-state size, repacking costs no
/// further allocation.
pub struct CommunicationObject<'a, C: Communicator, const D: usize> {
    comm: &'a C,
    ordered_sends: OrderedHalos<D>,
    ordered_recvs: OrderedHalos<D>,
    send_buffers: Vec<Buffer<PersistentAlloc>>,
    recv_buffers: Vec<Buffer<PersistentAlloc>>,
}

fn order_halos<const D: usize>(
    halos: &crate::pattern::pattern::HaloMap<D>,
) -> OrderedHalos<D> {
    let mut out: OrderedHalos<D> = halos
        .iter()
        .map(|(id, spaces)| {
            (
                SizedDomainId {
                    size: Pattern::num_elements(spaces),
                    id: *id,
                },
                spaces.clone(),
            )
        })
        .collect();
    out.sort_by_key(|(k, _)| *k);
    out
}

fn buffer_size<const D: usize>(
    spaces: &[IterationSpacePair<D>],
    fields: &[&mut dyn FieldDescriptor<D>],
) -> usize {
    let elements = Pattern::num_elements(spaces);
    fields
        .iter()
        .map(|f| elements * f.data_type_size())
        .sum()
}

impl<'a, C: Communicator, const D: usize> CommunicationObject<'a, C, D> {
    pub fn new(pattern: &Pattern<D>, comm: &'a C) -> Self {
        let alloc = PersistentAlloc::default();
        let ordered_sends = order_halos(pattern.send_halos());
        let ordered_recvs = order_halos(pattern.recv_halos());
        let send_buffers = (0..ordered_sends.len())
            .map(|_| Buffer::new(alloc.clone()))
            .collect();
        let recv_buffers = (0..ordered_recvs.len())
            .map(|_| Buffer::new(alloc.clone()))
            .collect();
        Self {
            comm,
            ordered_sends,
            ordered_recvs,
            send_buffers,
            recv_buffers,
        }
    }

    /// Execute one exchange for `fields`:
    /// post all receives, pack and post all sends, wait for the sends, and
    /// return a handle that waits for the receives and unpacks.
    ///
    /// Packing is fields-outer / iteration-spaces-inner, which keeps the
    /// data of one field contiguous in the packed buffer; unpacking
    /// mirrors this exactly.
    pub fn exchange<'f>(
        &'f mut self,
        fields: Vec<&'f mut dyn FieldDescriptor<D>>,
    ) -> Result<ExchangeHandle<'f, 'a, C, D>, HaloExchangeError> {
        let comm = self.comm;
        let mut requests = Vec::with_capacity(self.ordered_recvs.len());
        for (i, (sid, spaces)) in self.ordered_recvs.iter().enumerate() {
            let nbytes = buffer_size(spaces, &fields);
            self.recv_buffers[i].resize(nbytes);
            requests.push((i, comm.irecv(sid.id.address, sid.id.tag, nbytes)?));
        }

        let mut send_requests = Vec::with_capacity(self.ordered_sends.len());
        for (i, (sid, spaces)) in self.ordered_sends.iter().enumerate() {
            let nbytes = buffer_size(spaces, &fields);
            self.send_buffers[i].resize(nbytes);
            let mut cursor = 0;
            let buf = self.send_buffers[i].data_mut();
            for f in &fields {
                let esz = f.data_type_size();
                for is in spaces {
                    let n = is.size() * esz;
                    f.get(&is.local, &mut buf[cursor..cursor + n]);
                    cursor += n;
                }
            }
            send_requests.push(comm.isend(
                sid.id.address,
                sid.id.tag,
                self.send_buffers[i].data(),
            )?);
        }

        for s in send_requests {
            s.wait()?;
        }

        Ok(ExchangeHandle {
            co: self,
            requests,
            fields,
        })
    }
}

/// Handle returned by [`CommunicationObject::exchange`]; waiting on it
/// completes the receives and scatters the data back into the fields.
pub struct ExchangeHandle<'f, 'a, C: Communicator, const D: usize> {
    co: &'f mut CommunicationObject<'a, C, D>,
    requests: Vec<(usize, C::RecvFuture)>,
    fields: Vec<&'f mut dyn FieldDescriptor<D>>,
}

impl<C: Communicator, const D: usize> ExchangeHandle<'_, '_, C, D> {
    /// Wait for every receive in posting order, unpacking each buffer into
    /// the fields before moving to the next.
    pub fn wait(self) -> Result<(), HaloExchangeError> {
        let ExchangeHandle {
            co,
            requests,
            mut fields,
        } = self;
        for (idx, fut) in requests {
            if let Some(data) = fut.wait()? {
                let dst = co.recv_buffers[idx].data_mut();
                let n = data.len().min(dst.len());
                dst[..n].copy_from_slice(&data[..n]);
            }
            let spaces = &co.ordered_recvs[idx].1;
            let buffer = co.recv_buffers[idx].data();
            let mut cursor = 0;
            for f in fields.iter_mut() {
                let esz = f.data_type_size();
                for is in spaces {
                    let n = is.size() * esz;
                    f.set(&is.local, &buffer[cursor..cursor + n]);
                    cursor += n;
                }
            }
        }
        Ok(())
    }
}
