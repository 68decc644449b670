//! Addressing for objects on either side of a replication.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::services::retry::RetryPolicy;

/// Which kind of object store an identity lives in.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum StoreKind {
    /// Process-local store, used for development and tests.
    Memory,
    /// Directory-backed store on local disk.
    Filesystem,
    /// Read-only HTTP endpoint speaking path-style `/{bucket}/{key}`.
    Http,
}

impl StoreKind {
    /// URI scheme used when rendering identities in logs and responses.
    pub fn scheme(&self) -> &'static str {
        match self {
            StoreKind::Memory => "mem",
            StoreKind::Filesystem => "file",
            StoreKind::Http => "http",
        }
    }
}

/// Uniquely addresses an object within a store.
///
/// Fields are private so an identity cannot be changed once built.
#[derive(Serialize, Clone, Debug, PartialEq, Eq, Hash)]
pub struct ObjectIdentity {
    store_kind: StoreKind,
    bucket: String,
    key: String,
}

impl ObjectIdentity {
    pub fn new(store_kind: StoreKind, bucket: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            store_kind,
            bucket: bucket.into(),
            key: key.into(),
        }
    }

    pub fn store_kind(&self) -> StoreKind {
        self.store_kind
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    pub fn key(&self) -> &str {
        &self.key
    }
}

impl fmt::Display for ObjectIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}/{}", self.store_kind.scheme(), self.bucket, self.key)
    }
}

/// Normalise a source key for use at the destination.
///
/// Destination stores reject keys with a leading `/`, so those are stripped.
pub fn sanitize_destination_key(key: &str) -> &str {
    key.trim_start_matches('/')
}

/// One replication to perform: copy `source` to `destination`.
#[derive(Clone, Debug)]
pub struct ReplicationRequest {
    pub source: ObjectIdentity,
    pub destination: ObjectIdentity,
    /// Per-request override of the process-wide retry policy.
    pub retry_policy: Option<RetryPolicy>,
}

impl ReplicationRequest {
    pub fn new(source: ObjectIdentity, destination: ObjectIdentity) -> Self {
        Self {
            source,
            destination,
            retry_policy: None,
        }
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = Some(policy);
        self
    }
}
