//! Chunked, bounded-memory copy from a source stream into a destination write.

use std::time::Duration;
use tracing::{debug, warn};

use crate::{
    errors::{ReplicationError, ReplicationResult},
    models::{
        chunk::Chunk,
        job::{Operation, ReplicationJob},
    },
    services::{
        context::JobContext,
        store::{SourceStream, WriteHandle},
    },
};

/// Default number of bytes moved per chunk.
pub const DEFAULT_CHUNK_SIZE: usize = 8192;

/// Upper bound on how long discarding a failed write may take.
const ABORT_TIMEOUT: Duration = Duration::from_secs(30);

/// Moves an object one chunk at a time.
///
/// Only the chunk currently in flight is held in memory. Each read and each
/// write is retried on its own, so a transient failure on chunk N never
/// re-sends chunks before it.
pub struct ChunkedTransfer<'a> {
    chunk_size: usize,
    ctx: &'a JobContext,
}

impl<'a> ChunkedTransfer<'a> {
    pub fn new(chunk_size: usize, ctx: &'a JobContext) -> Self {
        Self {
            chunk_size: chunk_size.max(1),
            ctx,
        }
    }

    /// Copy everything from `source` into `sink` and finalize it.
    ///
    /// On any failure the write is aborted before the error is returned, so
    /// a partial object never becomes visible. Progress is recorded on `job`.
    pub async fn copy(
        &self,
        source: &mut Box<dyn SourceStream>,
        sink: &mut Box<dyn WriteHandle>,
        job: &mut ReplicationJob,
    ) -> ReplicationResult<u64> {
        let result = match self.stream_chunks(source, sink, job).await {
            Ok(()) => self.finalize(sink, job).await,
            Err(err) => Err(err),
        };
        if let Err(err) = &result {
            discard(sink, job, err).await;
        }
        result
    }

    async fn stream_chunks(
        &self,
        source: &mut Box<dyn SourceStream>,
        sink: &mut Box<dyn WriteHandle>,
        job: &mut ReplicationJob,
    ) -> ReplicationResult<()> {
        let total = source.descriptor().size;
        let mut offset = 0u64;
        loop {
            let want = match total {
                Some(total) if offset >= total => break,
                Some(total) => (total - offset).min(self.chunk_size as u64) as usize,
                None => self.chunk_size,
            };

            let bytes = self.read(source, offset, want, job).await?;
            if bytes.is_empty() {
                if let Some(total) = total {
                    return Err(ReplicationError::Internal(format!(
                        "source ended at byte {offset} of {total}"
                    )));
                }
                break;
            }

            let is_final = total.is_some_and(|total| offset + bytes.len() as u64 >= total);
            let chunk = Chunk::new(offset, bytes, is_final);
            debug!(job_id = %job.id, offset, len = chunk.len(), is_final, "writing chunk");
            self.ctx
                .call_on(&mut job.attempts, Operation::WriteChunk, sink, |handle| {
                    handle.write_chunk(chunk.clone())
                })
                .await?;

            offset = chunk.end();
            job.chunks += 1;
            job.bytes_transferred = offset;
        }
        Ok(())
    }

    /// Read the chunk at `offset`.
    ///
    /// Resumable sources are retried in place. A non-resumable source gets a
    /// single attempt: once it breaks there is no safe way to continue.
    async fn read(
        &self,
        source: &mut Box<dyn SourceStream>,
        offset: u64,
        len: usize,
        job: &mut ReplicationJob,
    ) -> ReplicationResult<bytes::Bytes> {
        if source.is_resumable() {
            return self
                .ctx
                .call_on(&mut job.attempts, Operation::ReadChunk, source, |stream| {
                    stream.read_chunk(offset, len)
                })
                .await;
        }

        job.attempts.record(Operation::ReadChunk, 1);
        match self.ctx.guard(source.read_chunk(offset, len)).await {
            Err(err) if err.is_retryable() => Err(ReplicationError::NonResumableStream {
                offset,
                reason: err.to_string(),
            }),
            other => other,
        }
    }

    async fn finalize(
        &self,
        sink: &mut Box<dyn WriteHandle>,
        job: &mut ReplicationJob,
    ) -> ReplicationResult<u64> {
        let size = self
            .ctx
            .call_on(&mut job.attempts, Operation::Finalize, sink, |handle| {
                handle.finalize()
            })
            .await?;
        if size != job.bytes_transferred {
            warn!(
                job_id = %job.id,
                committed = size,
                streamed = job.bytes_transferred,
                "destination size differs from streamed bytes"
            );
        }
        Ok(size)
    }
}

/// Abort `sink` after `cause`. Runs even when the job was cancelled.
async fn discard(sink: &mut Box<dyn WriteHandle>, job: &ReplicationJob, cause: &ReplicationError) {
    debug!(job_id = %job.id, error = %cause, "discarding partial destination write");
    match tokio::time::timeout(ABORT_TIMEOUT, sink.abort()).await {
        Ok(Ok(())) => {}
        Ok(Err(err)) => {
            warn!(job_id = %job.id, error = %err, "failed to abort destination write")
        }
        Err(_) => warn!(job_id = %job.id, "timed out aborting destination write"),
    }
}
