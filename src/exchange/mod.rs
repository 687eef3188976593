//! Halo-exchange driver: packing, posting, waiting, unpacking.
//!
//! A [`CommunicationObject`](object::CommunicationObject) binds one pattern
//! to a transport and executes exchanges for any set of fields sharing that
//! pattern. Fields plug in through the
//! [`FieldDescriptor`](field::FieldDescriptor) contract;
//! [`SimpleField`](field::SimpleField) wraps a contiguous row-major array.

pub mod field;
pub mod object;

pub use field::{FieldDescriptor, SimpleField};
pub use object::{CommunicationObject, ExchangeHandle};
