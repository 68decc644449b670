//! Process-local object store.
//!
//! Serves as the `memory` backend for development and as the fake store in
//! tests: every operation is counted, faults can be injected per operation,
//! and reads can be paused to hold jobs mid-stream.

use async_trait::async_trait;
use bytes::Bytes;
use std::{
    collections::HashMap,
    sync::{
        Arc, Mutex, MutexGuard, PoisonError,
        atomic::{AtomicUsize, Ordering},
    },
};
use tokio::sync::watch;
use uuid::Uuid;

use crate::{
    errors::{ReplicationError, ReplicationResult},
    models::{chunk::Chunk, identity::ObjectIdentity},
    services::store::{
        DestinationStore, ProbeOutcome, SOURCE_FINGERPRINT_KEY, SourceDescriptor, SourceReader,
        SourceStream, WriteHandle, WriteMetadata, compare_with_source,
    },
};

/// Operations the memory store counts and can fail.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum StoreOp {
    Open,
    Read,
    Probe,
    Begin,
    Write,
    Finalize,
    Abort,
}

/// Failure injected into an operation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Fault {
    Transient,
    NotFound,
    AccessDenied,
}

#[derive(Debug)]
struct FaultRule {
    op: StoreOp,
    from_call: usize,
    remaining: usize,
    fault: Fault,
}

#[derive(Clone, Debug)]
struct StoredObject {
    data: Bytes,
    etag: String,
    metadata: WriteMetadata,
}

#[derive(Debug)]
struct State {
    objects: HashMap<(String, String), StoredObject>,
    uploads: HashMap<Uuid, Vec<u8>>,
    calls: HashMap<StoreOp, usize>,
    faults: Vec<FaultRule>,
    read_sizes: Vec<usize>,
    resumable: bool,
    report_size: bool,
    reachable: bool,
}

impl Default for State {
    fn default() -> Self {
        Self {
            objects: HashMap::new(),
            uploads: HashMap::new(),
            calls: HashMap::new(),
            faults: Vec::new(),
            read_sizes: Vec::new(),
            resumable: true,
            report_size: true,
            reachable: true,
        }
    }
}

struct Inner {
    state: Mutex<State>,
    read_limit: watch::Sender<Option<usize>>,
    reads_started: watch::Sender<usize>,
    active_streams: AtomicUsize,
    peak_streams: AtomicUsize,
}

#[derive(Clone)]
pub struct MemoryStore {
    inner: Arc<Inner>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn object_key(id: &ObjectIdentity) -> (String, String) {
    (id.bucket().to_string(), id.key().to_string())
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(State::default()),
                read_limit: watch::Sender::new(None),
                reads_started: watch::Sender::new(0),
                active_streams: AtomicUsize::new(0),
                peak_streams: AtomicUsize::new(0),
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Store `data` at `id` directly, with an md5 etag as its fingerprint.
    pub fn put(&self, id: &ObjectIdentity, data: &[u8]) {
        let data = Bytes::copy_from_slice(data);
        let etag = format!("{:x}", md5::compute(&data));
        self.state().objects.insert(
            object_key(id),
            StoredObject {
                data,
                etag,
                metadata: WriteMetadata::new(),
            },
        );
    }

    pub fn get(&self, id: &ObjectIdentity) -> Option<Bytes> {
        self.state()
            .objects
            .get(&object_key(id))
            .map(|obj| obj.data.clone())
    }

    pub fn metadata(&self, id: &ObjectIdentity) -> Option<WriteMetadata> {
        self.state()
            .objects
            .get(&object_key(id))
            .map(|obj| obj.metadata.clone())
    }

    pub fn etag(&self, id: &ObjectIdentity) -> Option<String> {
        self.state()
            .objects
            .get(&object_key(id))
            .map(|obj| obj.etag.clone())
    }

    /// Number of times `op` has been invoked, failed calls included.
    pub fn calls(&self, op: StoreOp) -> usize {
        self.state().calls.get(&op).copied().unwrap_or(0)
    }

    /// Length of every successful chunk read, in order.
    pub fn read_sizes(&self) -> Vec<usize> {
        self.state().read_sizes.clone()
    }

    pub fn pending_uploads(&self) -> usize {
        self.state().uploads.len()
    }

    /// Fail `times` consecutive calls of `op`, starting with call number
    /// `from_call` (1-based).
    pub fn fail_at(&self, op: StoreOp, from_call: usize, times: usize, fault: Fault) {
        self.state().faults.push(FaultRule {
            op,
            from_call,
            remaining: times,
            fault,
        });
    }

    /// Fail the next `times` calls of `op`.
    pub fn fail_next(&self, op: StoreOp, times: usize, fault: Fault) {
        let next = self.calls(op) + 1;
        self.fail_at(op, next, times, fault);
    }

    pub fn set_resumable(&self, resumable: bool) {
        self.state().resumable = resumable;
    }

    /// Hide object sizes from readers, as an unbounded source would.
    pub fn set_report_size(&self, report: bool) {
        self.state().report_size = report;
    }

    pub fn set_reachable(&self, reachable: bool) {
        self.state().reachable = reachable;
    }

    /// Block every chunk read that has not started yet until
    /// [`resume_reads`](Self::resume_reads).
    pub fn pause_reads(&self) {
        let started = *self.inner.reads_started.borrow();
        self.pause_reads_after(started);
    }

    /// Let the first `n` chunk reads (counted since creation) through and
    /// block the rest.
    pub fn pause_reads_after(&self, n: usize) {
        self.inner.read_limit.send_replace(Some(n));
    }

    pub fn resume_reads(&self) {
        self.inner.read_limit.send_replace(None);
    }

    /// Wait until at least `n` chunk reads have started.
    pub async fn wait_for_reads(&self, n: usize) {
        let mut rx = self.inner.reads_started.subscribe();
        let _ = rx.wait_for(|started| *started >= n).await;
    }

    /// Source streams currently open.
    pub fn active_streams(&self) -> usize {
        self.inner.active_streams.load(Ordering::SeqCst)
    }

    /// Highest number of source streams ever open at once.
    pub fn peak_streams(&self) -> usize {
        self.inner.peak_streams.load(Ordering::SeqCst)
    }

    /// Count a call to `op` and apply any matching fault.
    fn enter(&self, op: StoreOp, target: &str) -> ReplicationResult<()> {
        let mut state = self.state();
        let call = {
            let count = state.calls.entry(op).or_insert(0);
            *count += 1;
            *count
        };
        let fault = state
            .faults
            .iter_mut()
            .find(|rule| rule.op == op && call >= rule.from_call && rule.remaining > 0)
            .map(|rule| {
                rule.remaining -= 1;
                rule.fault
            });
        match fault {
            None => Ok(()),
            Some(Fault::Transient) => Err(ReplicationError::transient(format!(
                "injected {op:?} failure on `{target}`"
            ))),
            Some(Fault::NotFound) => Err(ReplicationError::NotFound(target.to_string())),
            Some(Fault::AccessDenied) => Err(ReplicationError::access_denied(
                target,
                format!("injected {op:?} denial"),
            )),
        }
    }

    fn reachable(&self) -> ReplicationResult<()> {
        if self.state().reachable {
            Ok(())
        } else {
            Err(ReplicationError::transient("memory store marked unreachable"))
        }
    }
}

struct MemoryStream {
    store: MemoryStore,
    target: String,
    data: Bytes,
    descriptor: SourceDescriptor,
    resumable: bool,
    position: u64,
}

impl Drop for MemoryStream {
    fn drop(&mut self) {
        self.store
            .inner
            .active_streams
            .fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl SourceStream for MemoryStream {
    fn descriptor(&self) -> &SourceDescriptor {
        &self.descriptor
    }

    fn is_resumable(&self) -> bool {
        self.resumable
    }

    async fn read_chunk(&mut self, offset: u64, max_len: usize) -> ReplicationResult<Bytes> {
        let mut seq = 0;
        self.store.inner.reads_started.send_modify(|started| {
            *started += 1;
            seq = *started;
        });
        let mut limit = self.store.inner.read_limit.subscribe();
        let _ = limit
            .wait_for(|limit| limit.is_none_or(|limit| seq <= limit))
            .await;

        self.store.enter(StoreOp::Read, &self.target)?;
        if !self.resumable && offset != self.position {
            return Err(ReplicationError::NonResumableStream {
                offset,
                reason: format!("stream is positioned at {}", self.position),
            });
        }

        let len = self.data.len() as u64;
        let start = offset.min(len) as usize;
        let end = (offset.saturating_add(max_len as u64)).min(len) as usize;
        let bytes = self.data.slice(start..end);
        self.position = end as u64;
        self.store.state().read_sizes.push(bytes.len());
        Ok(bytes)
    }
}

#[async_trait]
impl SourceReader for MemoryStore {
    async fn open(&self, id: &ObjectIdentity) -> ReplicationResult<Box<dyn SourceStream>> {
        let target = id.to_string();
        self.enter(StoreOp::Open, &target)?;
        let (object, resumable, report_size) = {
            let state = self.state();
            let object = state
                .objects
                .get(&object_key(id))
                .cloned()
                .ok_or_else(|| ReplicationError::NotFound(target.clone()))?;
            (object, state.resumable, state.report_size)
        };

        let active = self.inner.active_streams.fetch_add(1, Ordering::SeqCst) + 1;
        self.inner.peak_streams.fetch_max(active, Ordering::SeqCst);

        Ok(Box::new(MemoryStream {
            store: self.clone(),
            target,
            descriptor: SourceDescriptor {
                size: report_size.then_some(object.data.len() as u64),
                fingerprint: Some(object.etag),
            },
            data: object.data,
            resumable,
            position: 0,
        }))
    }

    async fn ping(&self) -> ReplicationResult<()> {
        self.reachable()
    }
}

struct MemoryUpload {
    store: MemoryStore,
    upload_id: Uuid,
    key: (String, String),
    target: String,
    metadata: WriteMetadata,
}

#[async_trait]
impl WriteHandle for MemoryUpload {
    async fn write_chunk(&mut self, chunk: Chunk) -> ReplicationResult<()> {
        self.store.enter(StoreOp::Write, &self.target)?;
        let mut state = self.store.state();
        let buffer = state.uploads.get_mut(&self.upload_id).ok_or_else(|| {
            ReplicationError::Internal(format!("upload {} no longer exists", self.upload_id))
        })?;
        let start = chunk.offset as usize;
        let end = start + chunk.len();
        if buffer.len() < end {
            buffer.resize(end, 0);
        }
        buffer[start..end].copy_from_slice(&chunk.bytes);
        Ok(())
    }

    async fn finalize(&mut self) -> ReplicationResult<u64> {
        self.store.enter(StoreOp::Finalize, &self.target)?;
        let mut state = self.store.state();
        let buffer = state.uploads.remove(&self.upload_id).ok_or_else(|| {
            ReplicationError::Internal(format!("upload {} no longer exists", self.upload_id))
        })?;
        let data = Bytes::from(buffer);
        let size = data.len() as u64;
        let etag = format!("{:x}", md5::compute(&data));
        state.objects.insert(
            self.key.clone(),
            StoredObject {
                data,
                etag,
                metadata: self.metadata.clone(),
            },
        );
        Ok(size)
    }

    async fn abort(&mut self) -> ReplicationResult<()> {
        self.store.enter(StoreOp::Abort, &self.target)?;
        self.store.state().uploads.remove(&self.upload_id);
        Ok(())
    }
}

impl Drop for MemoryUpload {
    fn drop(&mut self) {
        self.store.state().uploads.remove(&self.upload_id);
    }
}

#[async_trait]
impl DestinationStore for MemoryStore {
    async fn exists(
        &self,
        id: &ObjectIdentity,
        expected: &SourceDescriptor,
    ) -> ReplicationResult<ProbeOutcome> {
        self.enter(StoreOp::Probe, &id.to_string())?;
        let state = self.state();
        Ok(match state.objects.get(&object_key(id)) {
            None => ProbeOutcome::Absent,
            Some(obj) => compare_with_source(
                expected,
                obj.data.len() as u64,
                obj.metadata.get(SOURCE_FINGERPRINT_KEY).map(String::as_str),
            ),
        })
    }

    async fn begin(
        &self,
        id: &ObjectIdentity,
        metadata: WriteMetadata,
    ) -> ReplicationResult<Box<dyn WriteHandle>> {
        let target = id.to_string();
        self.enter(StoreOp::Begin, &target)?;
        let upload_id = Uuid::new_v4();
        self.state().uploads.insert(upload_id, Vec::new());
        Ok(Box::new(MemoryUpload {
            store: self.clone(),
            upload_id,
            key: object_key(id),
            target,
            metadata,
        }))
    }

    async fn ping(&self) -> ReplicationResult<()> {
        self.reachable()
    }
}
