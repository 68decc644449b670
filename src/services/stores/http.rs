//! Read-only source that fetches objects over HTTP with ranged GETs.
//!
//! `{base_url}/{bucket}/{key}` answers a HEAD request with size and etag and
//! is then read one `Range: bytes=a-b` request per chunk. Every chunk request is
//! independent, so the stream is resumable at any offset.

use anyhow::Context;
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use reqwest::{
    Client, Response, StatusCode, Url,
    header::{CONTENT_LENGTH, ETAG, HeaderMap, LAST_MODIFIED, RANGE},
};
use std::time::Duration;
use tracing::debug;

use crate::{
    errors::{ReplicationError, ReplicationResult},
    models::identity::ObjectIdentity,
    services::store::{SourceDescriptor, SourceReader, SourceStream},
};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Clone, Debug)]
pub struct HttpSource {
    base_url: Url,
    http: Client,
}

impl HttpSource {
    pub fn new(base_url: &str) -> anyhow::Result<Self> {
        let base_url =
            Url::parse(base_url).with_context(|| format!("invalid source URL `{base_url}`"))?;
        let http = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self { base_url, http })
    }

    fn object_url(&self, id: &ObjectIdentity) -> ReplicationResult<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| {
                ReplicationError::InvalidRequest(format!(
                    "{} cannot be used as a base URL",
                    self.base_url
                ))
            })?
            .pop_if_empty()
            .push(id.bucket())
            .extend(id.key().split('/'));
        Ok(url)
    }
}

/// Classify a non-success HTTP status.
fn classify_status(status: StatusCode, target: &str) -> ReplicationError {
    match status {
        StatusCode::NOT_FOUND | StatusCode::GONE => ReplicationError::NotFound(target.to_string()),
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            ReplicationError::access_denied(target, status)
        }
        StatusCode::REQUEST_TIMEOUT | StatusCode::TOO_MANY_REQUESTS => {
            ReplicationError::transient(format!("{target}: {status}"))
        }
        s if s.is_server_error() => ReplicationError::transient(format!("{target}: {status}")),
        _ => ReplicationError::InvalidRequest(format!("{target}: unexpected status {status}")),
    }
}

/// Classify a transport failure. Anything short of a malformed request is
/// worth another attempt.
fn classify_transport(err: reqwest::Error, target: &str) -> ReplicationError {
    if err.is_builder() {
        ReplicationError::InvalidRequest(format!("{target}: {err}"))
    } else {
        ReplicationError::transient(format!("{target}: {err}"))
    }
}

fn describe(headers: &HeaderMap) -> SourceDescriptor {
    let size = headers
        .get(CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok());
    let fingerprint = headers
        .get(ETAG)
        .or_else(|| headers.get(LAST_MODIFIED))
        .and_then(|v| v.to_str().ok())
        .map(|v| v.trim_matches('"').to_string())
        .filter(|v| !v.is_empty());
    SourceDescriptor { size, fingerprint }
}

struct HttpStream {
    url: Url,
    http: Client,
    target: String,
    descriptor: SourceDescriptor,
}

#[async_trait]
impl SourceStream for HttpStream {
    fn descriptor(&self) -> &SourceDescriptor {
        &self.descriptor
    }

    fn is_resumable(&self) -> bool {
        true
    }

    async fn read_chunk(&mut self, offset: u64, max_len: usize) -> ReplicationResult<Bytes> {
        if max_len == 0 {
            return Ok(Bytes::new());
        }
        let last = offset + max_len as u64 - 1;
        let resp = self
            .http
            .get(self.url.clone())
            .header(RANGE, format!("bytes={offset}-{last}"))
            .send()
            .await
            .map_err(|err| classify_transport(err, &self.target))?;

        match resp.status() {
            StatusCode::PARTIAL_CONTENT => read_bounded(resp, max_len, &self.target)
                .await?
                .ok_or_else(|| {
                    ReplicationError::InvalidRequest(format!(
                        "{} returned more than the requested range",
                        self.target
                    ))
                }),
            StatusCode::RANGE_NOT_SATISFIABLE => Ok(Bytes::new()),
            StatusCode::OK => {
                // server ignored the range; only usable when the whole body fits
                let unranged = || {
                    ReplicationError::InvalidRequest(format!(
                        "{} does not honour range requests",
                        self.target
                    ))
                };
                let too_big = |len: u64| len > max_len as u64;
                if offset != 0
                    || resp.content_length().is_some_and(too_big)
                    || self.descriptor.size.is_some_and(too_big)
                {
                    return Err(unranged());
                }
                read_bounded(resp, max_len, &self.target)
                    .await?
                    .ok_or_else(unranged)
            }
            status => Err(classify_status(status, &self.target)),
        }
    }
}

/// Read a response body of at most `limit` bytes, or `None` as soon as it
/// turns out to be longer.
async fn read_bounded(
    mut resp: Response,
    limit: usize,
    target: &str,
) -> ReplicationResult<Option<Bytes>> {
    let expected = resp.content_length().unwrap_or(0);
    if expected > limit as u64 {
        return Ok(None);
    }
    let mut body = BytesMut::with_capacity(expected as usize);
    while let Some(part) = resp
        .chunk()
        .await
        .map_err(|err| classify_transport(err, target))?
    {
        if body.len() + part.len() > limit {
            return Ok(None);
        }
        body.extend_from_slice(&part);
    }
    Ok(Some(body.freeze()))
}

#[async_trait]
impl SourceReader for HttpSource {
    async fn open(&self, id: &ObjectIdentity) -> ReplicationResult<Box<dyn SourceStream>> {
        let target = id.to_string();
        let url = self.object_url(id)?;
        let resp = self
            .http
            .head(url.clone())
            .send()
            .await
            .map_err(|err| classify_transport(err, &target))?;
        if !resp.status().is_success() {
            return Err(classify_status(resp.status(), &target));
        }

        let descriptor = describe(resp.headers());
        debug!(
            "opened {} (size {:?}, fingerprint {:?})",
            url, descriptor.size, descriptor.fingerprint
        );
        Ok(Box::new(HttpStream {
            url,
            http: self.http.clone(),
            target,
            descriptor,
        }))
    }

    async fn ping(&self) -> ReplicationResult<()> {
        let target = self.base_url.to_string();
        let resp = self
            .http
            .head(self.base_url.clone())
            .send()
            .await
            .map_err(|err| classify_transport(err, &target))?;
        if resp.status().is_server_error() {
            return Err(classify_status(resp.status(), &target));
        }
        Ok(())
    }
}
