//! Replication job state machine and the report it produces.

use serde::Serialize;
use std::{fmt, time::Duration};
use thiserror::Error;
use tokio::time::Instant;
use uuid::Uuid;

use crate::{
    errors::{ErrorKind, ReplicationError},
    models::identity::ReplicationRequest,
};

/// Lifecycle of a job: `Pending -> Probing -> {Skipped | Streaming} -> {Succeeded | Failed}`.
#[derive(Serialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Probing,
    Streaming,
    Skipped,
    Succeeded,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Skipped | JobStatus::Succeeded | JobStatus::Failed
        )
    }

    fn can_advance_to(&self, next: JobStatus) -> bool {
        use JobStatus::*;
        matches!(
            (self, next),
            (Pending, Probing)
                | (Probing, Skipped)
                | (Probing, Streaming)
                | (Probing, Failed)
                | (Streaming, Succeeded)
                | (Streaming, Failed)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Probing => "probing",
            JobStatus::Streaming => "streaming",
            JobStatus::Skipped => "skipped",
            JobStatus::Succeeded => "succeeded",
            JobStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("illegal job transition {from} -> {to}")]
pub struct InvalidTransition {
    pub from: JobStatus,
    pub to: JobStatus,
}

/// Remote operations a job performs, each retried independently.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Operation {
    Open,
    Probe,
    Begin,
    ReadChunk,
    WriteChunk,
    Finalize,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Open => "open",
            Operation::Probe => "probe",
            Operation::Begin => "begin",
            Operation::ReadChunk => "read_chunk",
            Operation::WriteChunk => "write_chunk",
            Operation::Finalize => "finalize",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Total attempts issued per operation over the life of a job.
#[derive(Serialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct AttemptCounters {
    pub open: u32,
    pub probe: u32,
    pub begin: u32,
    pub read_chunk: u32,
    pub write_chunk: u32,
    pub finalize: u32,
}

impl AttemptCounters {
    pub fn record(&mut self, op: Operation, attempts: u32) {
        *self.slot(op) += attempts;
    }

    pub fn get(&self, op: Operation) -> u32 {
        match op {
            Operation::Open => self.open,
            Operation::Probe => self.probe,
            Operation::Begin => self.begin,
            Operation::ReadChunk => self.read_chunk,
            Operation::WriteChunk => self.write_chunk,
            Operation::Finalize => self.finalize,
        }
    }

    fn slot(&mut self, op: Operation) -> &mut u32 {
        match op {
            Operation::Open => &mut self.open,
            Operation::Probe => &mut self.probe,
            Operation::Begin => &mut self.begin,
            Operation::ReadChunk => &mut self.read_chunk,
            Operation::WriteChunk => &mut self.write_chunk,
            Operation::Finalize => &mut self.finalize,
        }
    }
}

/// Error information carried on a failed report.
#[derive(Serialize, Clone, Debug, PartialEq, Eq)]
pub struct ErrorDetail {
    pub kind: ErrorKind,
    pub message: String,
}

impl From<&ReplicationError> for ErrorDetail {
    fn from(err: &ReplicationError) -> Self {
        Self {
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

/// A single in-flight replication.
///
/// Created once the job holds a concurrency slot and consumed by
/// [`ReplicationJob::finish`], so a job can only ever report one terminal
/// status.
#[derive(Debug)]
pub struct ReplicationJob {
    pub id: Uuid,
    request: ReplicationRequest,
    status: JobStatus,
    pub attempts: AttemptCounters,
    pub bytes_transferred: u64,
    pub chunks: u64,
    started: Instant,
}

impl ReplicationJob {
    pub fn new(request: ReplicationRequest) -> Self {
        Self {
            id: Uuid::new_v4(),
            request,
            status: JobStatus::Pending,
            attempts: AttemptCounters::default(),
            bytes_transferred: 0,
            chunks: 0,
            started: Instant::now(),
        }
    }

    pub fn request(&self) -> &ReplicationRequest {
        &self.request
    }

    pub fn status(&self) -> JobStatus {
        self.status
    }

    pub fn advance(&mut self, next: JobStatus) -> Result<(), InvalidTransition> {
        if !self.status.can_advance_to(next) {
            return Err(InvalidTransition {
                from: self.status,
                to: next,
            });
        }
        tracing::debug!(job_id = %self.id, from = %self.status, to = %next, "job transition");
        self.status = next;
        Ok(())
    }

    /// Close out the job. A job that is not yet terminal is marked failed.
    pub fn finish(mut self, error: Option<&ReplicationError>) -> JobReport {
        if !self.status.is_terminal() {
            self.status = JobStatus::Failed;
        }
        JobReport {
            job_id: self.id,
            status: self.status,
            source: self.request.source.to_string(),
            destination: self.request.destination.to_string(),
            bytes_transferred: self.bytes_transferred,
            chunks: self.chunks,
            duration: self.started.elapsed(),
            attempts: self.attempts,
            error: error.map(ErrorDetail::from),
        }
    }
}

/// Terminal outcome of one job.
#[derive(Clone, Debug)]
pub struct JobReport {
    pub job_id: Uuid,
    pub status: JobStatus,
    pub source: String,
    pub destination: String,
    pub bytes_transferred: u64,
    pub chunks: u64,
    pub duration: Duration,
    pub attempts: AttemptCounters,
    pub error: Option<ErrorDetail>,
}
