//! `POST /v1/replicate`: copy one object from the source store into the
//! configured target bucket.
//!
//! The job runs to completion before the response is sent. A completed job
//! always answers 200 and carries its outcome in `status`; admission failures
//! (busy, shutting down) map to 429/503 through [`AppError`].

use crate::{
    errors::AppError,
    handlers::AppState,
    models::{
        identity::{ObjectIdentity, ReplicationRequest, sanitize_destination_key},
        job::{AttemptCounters, ErrorDetail, JobReport, JobStatus},
    },
};
use axum::{
    Json,
    extract::{State, rejection::JsonRejection},
    http::StatusCode,
};
use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

#[derive(Debug, Deserialize)]
pub struct ReplicateBody {
    pub s3_bucket: Option<String>,
    pub s3_key: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ReplicateResponse {
    pub job_id: Uuid,
    pub status: JobStatus,
    pub bytes_transferred: u64,
    pub chunks: u64,
    pub duration_seconds: f64,
    pub source: String,
    pub destination: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorDetail>,
    pub attempts: AttemptCounters,
    pub timestamp: String,
}

impl From<JobReport> for ReplicateResponse {
    fn from(report: JobReport) -> Self {
        Self {
            job_id: report.job_id,
            reason: (report.status == JobStatus::Skipped).then_some("already_replicated"),
            status: report.status,
            bytes_transferred: report.bytes_transferred,
            chunks: report.chunks,
            duration_seconds: report.duration.as_secs_f64(),
            source: report.source,
            destination: report.destination,
            error: report.error,
            attempts: report.attempts,
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
        }
    }
}

fn required(value: Option<String>, field: &str) -> Result<String, AppError> {
    match value.as_deref().map(str::trim) {
        Some(v) if !v.is_empty() => Ok(v.to_string()),
        _ => Err(AppError::validation(format!(
            "`{field}` is required and must be a non-empty string"
        ))),
    }
}

fn reject_payload(rejection: JsonRejection) -> AppError {
    match rejection {
        JsonRejection::MissingJsonContentType(_) => AppError::new(
            StatusCode::BAD_REQUEST,
            "invalid_content_type",
            "request body must be JSON (Content-Type: application/json)",
        ),
        other => AppError::validation(other.body_text()),
    }
}

/// Replicate `s3_bucket/s3_key` into the target bucket.
pub async fn replicate(
    State(state): State<AppState>,
    payload: Result<Json<ReplicateBody>, JsonRejection>,
) -> Result<Json<ReplicateResponse>, AppError> {
    let Json(body) = payload.map_err(reject_payload)?;
    let bucket = required(body.s3_bucket, "s3_bucket")?;
    let key = required(body.s3_key, "s3_key")?;

    let destination_key = sanitize_destination_key(&key).to_string();
    if destination_key.is_empty() {
        return Err(AppError::validation("`s3_key` must name an object"));
    }

    let request = ReplicationRequest::new(
        ObjectIdentity::new(state.source_kind, bucket, key),
        ObjectIdentity::new(
            state.destination_kind,
            state.target_bucket.clone(),
            destination_key,
        ),
    );
    info!(
        source = %request.source,
        destination = %request.destination,
        "replication requested"
    );

    let report = state.replicator.replicate(request).await?;
    Ok(Json(ReplicateResponse::from(report)))
}
