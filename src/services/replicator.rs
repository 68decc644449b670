//! Replication orchestrator.
//!
//! Composes the source reader, destination prober/writer, chunked transfer
//! and retry controller into one job per request, and enforces the global
//! concurrency ceiling with a counting semaphore: a permit is acquired on
//! admission and released when the job reaches a terminal state.

use std::{str::FromStr, sync::Arc, time::Duration};
use thiserror::Error;
use tokio::sync::{OwnedSemaphorePermit, Semaphore, TryAcquireError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    errors::{ReplicationError, ReplicationResult},
    models::{
        identity::{ObjectIdentity, ReplicationRequest},
        job::{InvalidTransition, JobReport, JobStatus, Operation, ReplicationJob},
    },
    services::{
        context::JobContext,
        retry::{RetryController, RetryPolicy},
        store::{
            DestinationStore, ProbeOutcome, SOURCE_FINGERPRINT_KEY, SourceDescriptor,
            SourceReader, WriteMetadata,
        },
        transfer::{ChunkedTransfer, DEFAULT_CHUNK_SIZE},
    },
};

pub const DEFAULT_CONCURRENCY_CEILING: usize = 4;
pub const DEFAULT_JOB_TIMEOUT: Duration = Duration::from_secs(300);

/// What to do with a request when every slot is taken.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum AdmissionPolicy {
    /// Wait for a slot.
    #[default]
    Queue,
    /// Refuse immediately with [`AdmissionError::Busy`].
    Reject,
}

impl FromStr for AdmissionPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "queue" => Ok(AdmissionPolicy::Queue),
            "reject" => Ok(AdmissionPolicy::Reject),
            other => Err(format!(
                "unknown admission policy `{other}` (expected `queue` or `reject`)"
            )),
        }
    }
}

/// Engine configuration, passed in explicitly at construction.
#[derive(Clone, Debug)]
pub struct ReplicatorSettings {
    pub chunk_size: usize,
    pub retry: RetryPolicy,
    pub concurrency_ceiling: usize,
    pub admission: AdmissionPolicy,
    pub job_timeout: Duration,
}

impl Default for ReplicatorSettings {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            retry: RetryPolicy::default(),
            concurrency_ceiling: DEFAULT_CONCURRENCY_CEILING,
            admission: AdmissionPolicy::Queue,
            job_timeout: DEFAULT_JOB_TIMEOUT,
        }
    }
}

/// Why a request never became a job.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AdmissionError {
    #[error("all {ceiling} replication slots are busy, retry later")]
    Busy { ceiling: usize },
    #[error("replicator is shutting down")]
    ShuttingDown,
    #[error("request was cancelled while waiting for a replication slot")]
    Cancelled,
}

impl From<InvalidTransition> for ReplicationError {
    fn from(err: InvalidTransition) -> Self {
        ReplicationError::Internal(err.to_string())
    }
}

struct Inner {
    source: Arc<dyn SourceReader>,
    destination: Arc<dyn DestinationStore>,
    settings: ReplicatorSettings,
    gate: Arc<Semaphore>,
    shutdown: CancellationToken,
}

/// Cheaply cloneable handle to the replication engine.
#[derive(Clone)]
pub struct Replicator {
    inner: Arc<Inner>,
}

impl Replicator {
    pub fn new(
        source: Arc<dyn SourceReader>,
        destination: Arc<dyn DestinationStore>,
        settings: ReplicatorSettings,
    ) -> Self {
        let ceiling = settings.concurrency_ceiling.max(1);
        Self {
            inner: Arc::new(Inner {
                source,
                destination,
                gate: Arc::new(Semaphore::new(ceiling)),
                settings: ReplicatorSettings {
                    concurrency_ceiling: ceiling,
                    ..settings
                },
                shutdown: CancellationToken::new(),
            }),
        }
    }

    pub fn settings(&self) -> &ReplicatorSettings {
        &self.inner.settings
    }

    pub fn source(&self) -> &Arc<dyn SourceReader> {
        &self.inner.source
    }

    pub fn destination(&self) -> &Arc<dyn DestinationStore> {
        &self.inner.destination
    }

    /// Jobs currently holding a slot.
    pub fn in_flight(&self) -> usize {
        self.inner.settings.concurrency_ceiling - self.available_slots()
    }

    pub fn available_slots(&self) -> usize {
        self.inner.gate.available_permits()
    }

    pub fn is_shutting_down(&self) -> bool {
        self.inner.shutdown.is_cancelled()
    }

    /// Token for a new job. Cancelled on shutdown; callers may cancel it
    /// themselves, e.g. when the client disconnects.
    pub fn job_token(&self) -> CancellationToken {
        self.inner.shutdown.child_token()
    }

    /// Stop admitting jobs and cancel the ones in flight.
    pub fn shutdown(&self) {
        info!(in_flight = self.in_flight(), "replicator shutting down");
        self.inner.gate.close();
        self.inner.shutdown.cancel();
    }

    pub async fn replicate(&self, request: ReplicationRequest) -> Result<JobReport, AdmissionError> {
        self.replicate_with(request, self.job_token()).await
    }

    /// Admit `request` and run it to a terminal state.
    ///
    /// The job runs on its own task so that dropping this future (a client
    /// disconnect) cancels the job instead of abandoning it half-written:
    /// the task still aborts its destination write and frees its slot.
    pub async fn replicate_with(
        &self,
        request: ReplicationRequest,
        cancel: CancellationToken,
    ) -> Result<JobReport, AdmissionError> {
        let permit = self.admit(&cancel).await?;
        let guard = cancel.clone().drop_guard();

        let this = self.clone();
        let task = tokio::spawn(async move {
            let report = this.run_job(request, cancel).await;
            drop(permit);
            report
        });

        match task.await {
            Ok(report) => {
                guard.disarm();
                Ok(report)
            }
            Err(err) if err.is_panic() => std::panic::resume_unwind(err.into_panic()),
            Err(_) => Err(AdmissionError::ShuttingDown),
        }
    }

    async fn admit(
        &self,
        cancel: &CancellationToken,
    ) -> Result<OwnedSemaphorePermit, AdmissionError> {
        let gate = self.inner.gate.clone();
        let ceiling = self.inner.settings.concurrency_ceiling;
        match self.inner.settings.admission {
            AdmissionPolicy::Reject => match gate.try_acquire_owned() {
                Ok(permit) => Ok(permit),
                Err(TryAcquireError::NoPermits) => {
                    debug!(ceiling, "rejecting replication request, no free slot");
                    Err(AdmissionError::Busy { ceiling })
                }
                Err(TryAcquireError::Closed) => Err(AdmissionError::ShuttingDown),
            },
            AdmissionPolicy::Queue => {
                if gate.available_permits() == 0 {
                    debug!(ceiling, "all slots busy, queueing replication request");
                }
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => Err(if self.is_shutting_down() {
                        AdmissionError::ShuttingDown
                    } else {
                        AdmissionError::Cancelled
                    }),
                    permit = gate.acquire_owned() => permit.map_err(|_| AdmissionError::ShuttingDown),
                }
            }
        }
    }

    async fn run_job(&self, request: ReplicationRequest, cancel: CancellationToken) -> JobReport {
        let settings = &self.inner.settings;
        let policy = request
            .retry_policy
            .clone()
            .unwrap_or_else(|| settings.retry.clone());
        let ctx = JobContext::new(cancel, settings.job_timeout, RetryController::new(policy));

        let mut job = ReplicationJob::new(request);
        info!(
            job_id = %job.id,
            source = %job.request().source,
            destination = %job.request().destination,
            "replication started"
        );

        let outcome = self.drive(&mut job, &ctx).await;
        let report = job.finish(outcome.as_ref().err());
        match &report.error {
            None => info!(
                job_id = %report.job_id,
                status = %report.status,
                bytes = report.bytes_transferred,
                chunks = report.chunks,
                elapsed_ms = report.duration.as_millis() as u64,
                "replication finished"
            ),
            Some(err) => warn!(
                job_id = %report.job_id,
                status = %report.status,
                kind = ?err.kind,
                error = %err.message,
                bytes = report.bytes_transferred,
                "replication failed"
            ),
        }
        report
    }

    /// probe -> (skip | stream) -> finalize
    async fn drive(&self, job: &mut ReplicationJob, ctx: &JobContext) -> ReplicationResult<()> {
        let source = self.inner.source.clone();
        let destination = self.inner.destination.clone();
        let source_id = job.request().source.clone();
        let destination_id = job.request().destination.clone();

        job.advance(JobStatus::Probing)?;
        let mut stream = ctx
            .call(&mut job.attempts, Operation::Open, || source.open(&source_id))
            .await?;
        let descriptor = stream.descriptor().clone();

        let outcome = ctx
            .call(&mut job.attempts, Operation::Probe, || {
                destination.exists(&destination_id, &descriptor)
            })
            .await?;
        debug!(job_id = %job.id, ?outcome, "destination probed");
        match outcome {
            ProbeOutcome::PresentMatching => {
                info!(
                    job_id = %job.id,
                    destination = %destination_id,
                    "destination already up to date, skipping"
                );
                job.advance(JobStatus::Skipped)?;
                return Ok(());
            }
            ProbeOutcome::PresentDiffering => {
                info!(
                    job_id = %job.id,
                    destination = %destination_id,
                    "destination differs from source, overwriting"
                );
            }
            ProbeOutcome::Absent => {}
        }

        job.advance(JobStatus::Streaming)?;
        let resumable = stream.is_resumable();
        info!(
            job_id = %job.id,
            resumable,
            size = ?descriptor.size,
            chunk_size = self.inner.settings.chunk_size,
            "streaming with {} reads",
            if resumable { "per-chunk retried" } else { "single-attempt (non-resumable)" }
        );

        let metadata = replication_metadata(&source_id, &descriptor);
        let mut handle = ctx
            .call(&mut job.attempts, Operation::Begin, || {
                destination.begin(&destination_id, metadata.clone())
            })
            .await?;

        ChunkedTransfer::new(self.inner.settings.chunk_size, ctx)
            .copy(&mut stream, &mut handle, job)
            .await?;

        job.advance(JobStatus::Succeeded)?;
        Ok(())
    }
}

/// Metadata recorded on every replicated object.
fn replication_metadata(source: &ObjectIdentity, descriptor: &SourceDescriptor) -> WriteMetadata {
    let mut metadata = WriteMetadata::new();
    metadata.insert("source_bucket".into(), source.bucket().to_string());
    metadata.insert("source_key".into(), source.key().to_string());
    metadata.insert(
        "replication_timestamp".into(),
        chrono::Utc::now().timestamp().to_string(),
    );
    metadata.insert(
        "replicator_version".into(),
        env!("CARGO_PKG_VERSION").to_string(),
    );
    if let Some(fingerprint) = &descriptor.fingerprint {
        metadata.insert(SOURCE_FINGERPRINT_KEY.into(), fingerprint.clone());
    }
    metadata
}
