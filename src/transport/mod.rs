//! Tag-matched message-passing transports.
//!
//! The [`Communicator`](communicator::Communicator) trait is the seam: it
//! provides non-blocking byte sends and receives returning waitable,
//! testable, cancellable futures. [`ThreadComm`](thread::ThreadComm) runs
//! over an in-process fabric with one receive worker per rank (the shape of
//! an RDMA tag-matching transport); `MpiComm` (feature `mpi-support`) runs
//! over MPI point-to-point. [`CallbackDispatcher`](callback::CallbackDispatcher)
//! layers callback-based completion, fan-out sends and a progress engine on
//! top of any communicator.

pub mod await_futures;
pub mod callback;
pub mod communicator;
#[cfg(feature = "mpi-support")]
pub mod mpi;
pub mod thread;

pub use await_futures::await_futures;
pub use callback::CallbackDispatcher;
pub use communicator::{CommFuture, Communicator, Rank, Tag};
#[cfg(feature = "mpi-support")]
pub use mpi::MpiComm;
pub use thread::{ThreadComm, ThreadContext};
