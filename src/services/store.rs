//! Capability traits the replication engine talks to.
//!
//! Concrete stores (in-memory, filesystem, HTTP) implement these so the
//! engine never sees SDK or transport details. Every method classifies its
//! failures into [`ReplicationError`] at the point of occurrence.

use async_trait::async_trait;
use bytes::Bytes;
use std::collections::BTreeMap;

use crate::{
    errors::ReplicationResult,
    models::{chunk::Chunk, identity::ObjectIdentity},
};

/// Metadata key under which writers record the source fingerprint.
pub const SOURCE_FINGERPRINT_KEY: &str = "source_fingerprint";

/// What the source reports about an object when it is opened.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SourceDescriptor {
    /// Total length in bytes, `None` for unbounded sources.
    pub size: Option<u64>,
    /// Stable content identifier (etag, version id) if the store has one.
    pub fingerprint: Option<String>,
}

/// Result of checking the destination before copying.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProbeOutcome {
    Absent,
    PresentMatching,
    PresentDiffering,
}

/// Decide whether a stored destination object already matches the source.
///
/// A match needs the recorded source fingerprint to equal the current one
/// and the sizes to agree when both are known. No fingerprint, no match.
pub fn compare_with_source(
    expected: &SourceDescriptor,
    stored_size: u64,
    stored_fingerprint: Option<&str>,
) -> ProbeOutcome {
    let fingerprint_matches = match (expected.fingerprint.as_deref(), stored_fingerprint) {
        (Some(want), Some(have)) => want == have,
        _ => false,
    };
    let size_matches = expected.size.is_none_or(|size| size == stored_size);
    if fingerprint_matches && size_matches {
        ProbeOutcome::PresentMatching
    } else {
        ProbeOutcome::PresentDiffering
    }
}

/// User metadata attached to a replicated object.
pub type WriteMetadata = BTreeMap<String, String>;

/// An open, readable object.
#[async_trait]
pub trait SourceStream: Send {
    fn descriptor(&self) -> &SourceDescriptor;

    /// Whether a failed read can be retried at the same offset.
    fn is_resumable(&self) -> bool;

    /// Read up to `max_len` bytes starting at `offset`. An empty result means
    /// end of data. Non-resumable streams only accept the offset right after
    /// the previous successful read.
    async fn read_chunk(&mut self, offset: u64, max_len: usize) -> ReplicationResult<Bytes>;
}

#[async_trait]
pub trait SourceReader: Send + Sync {
    /// Open `id` for reading. Fails with `NotFound` if it does not exist.
    async fn open(&self, id: &ObjectIdentity) -> ReplicationResult<Box<dyn SourceStream>>;

    /// Cheap reachability check used by the health endpoint.
    async fn ping(&self) -> ReplicationResult<()>;
}

/// An in-progress destination write.
///
/// Nothing becomes visible at the destination identity until
/// [`finalize`](WriteHandle::finalize) succeeds; [`abort`](WriteHandle::abort)
/// discards everything written so far.
#[async_trait]
pub trait WriteHandle: Send {
    /// Store `chunk` at its offset. Rewriting the same chunk is harmless.
    async fn write_chunk(&mut self, chunk: Chunk) -> ReplicationResult<()>;

    /// Commit the assembled object and return its size.
    async fn finalize(&mut self) -> ReplicationResult<u64>;

    async fn abort(&mut self) -> ReplicationResult<()>;
}

#[async_trait]
pub trait DestinationStore: Send + Sync {
    /// Compare whatever exists at `id` with what copying the source would produce.
    async fn exists(
        &self,
        id: &ObjectIdentity,
        expected: &SourceDescriptor,
    ) -> ReplicationResult<ProbeOutcome>;

    /// Start a new write for `id`. The previous object, if any, stays
    /// visible until the handle is finalized.
    async fn begin(
        &self,
        id: &ObjectIdentity,
        metadata: WriteMetadata,
    ) -> ReplicationResult<Box<dyn WriteHandle>>;

    async fn ping(&self) -> ReplicationResult<()>;
}
