//! Completion-order iteration over a set of futures.

use crate::halo_error::HaloExchangeError;
use crate::transport::communicator::CommFuture;

/// Drain `futures` in completion order: repeatedly scan the set, and every
/// future found ready is removed (swap-with-tail) and its result fed to
/// `cont`. Returns when the set is empty.
///
/// This gives completion-order processing without registering per-future
/// callbacks; the scan spins, so it is meant for ranges that are already
/// in flight.
pub fn await_futures<F, G>(mut futures: Vec<F>, mut cont: G) -> Result<(), HaloExchangeError>
where
    F: CommFuture,
    G: FnMut(Option<Vec<u8>>),
{
    while !futures.is_empty() {
        let mut i = 0;
        while i < futures.len() {
            if futures[i].ready() {
                let fut = futures.swap_remove(i);
                cont(fut.wait()?);
            } else {
                i += 1;
            }
        }
    }
    Ok(())
}
