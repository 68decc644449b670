//! Concrete [`SourceReader`](super::store::SourceReader) and
//! [`DestinationStore`](super::store::DestinationStore) implementations.

pub mod filesystem;
pub mod http;
pub mod memory;
