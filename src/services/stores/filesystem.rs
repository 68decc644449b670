//! Directory-backed object store.
//!
//! Objects live at `base_path/{bucket}/{key}`. Writes go to a temporary file
//! beside the target and are renamed into place on finalize, so readers never
//! see a partial object. Replication metadata (etag, size, source
//! fingerprint) is kept in a JSON sidecar under `base_path/.meta/{bucket}/{key}.json`.

use async_trait::async_trait;
use bytes::Bytes;
use md5::Context;
use serde::{Deserialize, Serialize};
use std::{
    io::{self, ErrorKind, SeekFrom},
    path::{Path, PathBuf},
    time::UNIX_EPOCH,
};
use tokio::{
    fs::{self, File},
    io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt},
};
use tracing::debug;
use uuid::Uuid;

use crate::{
    errors::{ReplicationError, ReplicationResult},
    models::{chunk::Chunk, identity::ObjectIdentity},
    services::store::{
        DestinationStore, ProbeOutcome, SOURCE_FINGERPRINT_KEY, SourceDescriptor, SourceReader,
        SourceStream, WriteHandle, WriteMetadata, compare_with_source,
    },
};

const MAX_OBJECT_KEY_LEN: usize = 1024;
const BUCKET_NAME_MIN_LEN: usize = 3;
const BUCKET_NAME_MAX_LEN: usize = 63;
const META_DIR: &str = ".meta";

/// Sidecar record written next to every object this store commits.
#[derive(Serialize, Deserialize, Clone, Debug)]
struct Sidecar {
    etag: String,
    size: u64,
    metadata: WriteMetadata,
}

#[derive(Clone, Debug)]
pub struct FsStore {
    /// Root directory holding one sub-directory per bucket.
    pub base_path: PathBuf,
}

impl FsStore {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
        }
    }

    /// Reject keys that could escape the bucket directory.
    fn ensure_key_safe(&self, key: &str) -> ReplicationResult<()> {
        let invalid = |reason: &str| {
            Err(ReplicationError::InvalidRequest(format!(
                "object key `{key}` {reason}"
            )))
        };
        if key.is_empty() {
            return invalid("is empty");
        }
        if key.len() > MAX_OBJECT_KEY_LEN {
            return invalid("is longer than 1024 bytes");
        }
        if key.starts_with('/') || key.split('/').any(|part| part == "..") {
            return invalid("must be relative and must not contain `..` segments");
        }
        if key
            .bytes()
            .any(|b| b.is_ascii_control() || b == b'\\' || b == b'\0')
        {
            return invalid("contains control characters or backslashes");
        }
        Ok(())
    }

    /// S3-style bucket naming: 3-63 chars of lowercase letters, digits, dots
    /// and hyphens, starting and ending with a letter or digit, and not
    /// shaped like an IPv4 address.
    fn ensure_bucket_name_safe(&self, name: &str) -> ReplicationResult<()> {
        let invalid = |reason: &str| {
            Err(ReplicationError::InvalidRequest(format!(
                "bucket `{name}` invalid: {reason}"
            )))
        };

        let len = name.len();
        if !(BUCKET_NAME_MIN_LEN..=BUCKET_NAME_MAX_LEN).contains(&len) {
            return invalid("must be between 3 and 63 characters");
        }
        if !name
            .chars()
            .all(|c| matches!(c, 'a'..='z' | '0'..='9' | '.' | '-'))
        {
            return invalid("allowed characters are lowercase letters, digits, dots, and hyphens");
        }
        if name.starts_with(['.', '-']) || name.ends_with(['.', '-']) {
            return invalid("must start and end with a lowercase letter or digit");
        }
        if name.contains("..") || name.contains("-.") || name.contains(".-") {
            return invalid("cannot contain consecutive dots or dot-hyphen combinations");
        }
        if is_ipv4_like(name) {
            return invalid("must not be formatted like an IP address");
        }
        Ok(())
    }

    fn bucket_root(&self, bucket: &str) -> PathBuf {
        self.base_path.join(bucket)
    }

    fn object_path(&self, id: &ObjectIdentity) -> ReplicationResult<PathBuf> {
        self.ensure_bucket_name_safe(id.bucket())?;
        self.ensure_key_safe(id.key())?;
        Ok(self.bucket_root(id.bucket()).join(id.key()))
    }

    fn sidecar_path(&self, id: &ObjectIdentity) -> PathBuf {
        self.base_path
            .join(META_DIR)
            .join(id.bucket())
            .join(format!("{}.json", id.key()))
    }

    async fn read_sidecar(&self, id: &ObjectIdentity) -> ReplicationResult<Option<Sidecar>> {
        let path = self.sidecar_path(id);
        match fs::read(&path).await {
            Ok(raw) => match serde_json::from_slice(&raw) {
                Ok(sidecar) => Ok(Some(sidecar)),
                Err(err) => {
                    debug!("ignoring unreadable sidecar {}: {}", path.display(), err);
                    Ok(None)
                }
            },
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(classify_io(err, &id.to_string())),
        }
    }
}

/// Map an I/O failure onto the engine's error taxonomy.
fn classify_io(err: io::Error, target: &str) -> ReplicationError {
    match err.kind() {
        ErrorKind::NotFound => ReplicationError::NotFound(target.to_string()),
        ErrorKind::PermissionDenied => ReplicationError::access_denied(target, err),
        ErrorKind::InvalidInput => {
            ReplicationError::InvalidRequest(format!("{target}: {err}"))
        }
        _ => ReplicationError::transient(format!("{target}: {err}")),
    }
}

/// Fingerprint for an object on disk: the recorded etag when the sidecar
/// still describes this file, otherwise a weak size+mtime tag.
fn fingerprint_for(meta: &std::fs::Metadata, sidecar: Option<Sidecar>) -> String {
    if let Some(sidecar) = sidecar.filter(|s| s.size == meta.len()) {
        return sidecar.etag;
    }
    let mtime = meta
        .modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_nanos())
        .unwrap_or_default();
    format!("W/{:x}-{:x}", meta.len(), mtime)
}

struct FsStream {
    file: File,
    target: String,
    descriptor: SourceDescriptor,
}

#[async_trait]
impl SourceStream for FsStream {
    fn descriptor(&self) -> &SourceDescriptor {
        &self.descriptor
    }

    fn is_resumable(&self) -> bool {
        true
    }

    async fn read_chunk(&mut self, offset: u64, max_len: usize) -> ReplicationResult<Bytes> {
        let target = &self.target;
        self.file
            .seek(SeekFrom::Start(offset))
            .await
            .map_err(|err| classify_io(err, target))?;

        let mut buf = vec![0u8; max_len];
        let mut filled = 0;
        while filled < max_len {
            let n = self
                .file
                .read(&mut buf[filled..])
                .await
                .map_err(|err| classify_io(err, target))?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        buf.truncate(filled);
        Ok(Bytes::from(buf))
    }
}

#[async_trait]
impl SourceReader for FsStore {
    async fn open(&self, id: &ObjectIdentity) -> ReplicationResult<Box<dyn SourceStream>> {
        let target = id.to_string();
        let path = self.object_path(id)?;
        let file = File::open(&path)
            .await
            .map_err(|err| classify_io(err, &target))?;
        let meta = file
            .metadata()
            .await
            .map_err(|err| classify_io(err, &target))?;
        if !meta.is_file() {
            return Err(ReplicationError::NotFound(target));
        }
        let sidecar = self.read_sidecar(id).await?;

        Ok(Box::new(FsStream {
            file,
            descriptor: SourceDescriptor {
                size: Some(meta.len()),
                fingerprint: Some(fingerprint_for(&meta, sidecar)),
            },
            target,
        }))
    }

    async fn ping(&self) -> ReplicationResult<()> {
        let target = self.base_path.display().to_string();
        let meta = fs::metadata(&self.base_path)
            .await
            .map_err(|err| classify_io(err, &target))?;
        if meta.is_dir() {
            Ok(())
        } else {
            Err(ReplicationError::InvalidRequest(format!(
                "{target} is not a directory"
            )))
        }
    }
}

/// How far a finalize got. Each step is done at most once, so a failed
/// finalize can be called again and resumes after the last completed step.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
enum CommitStage {
    Writing,
    Synced,
    Renamed,
    Committed,
}

struct FsUpload {
    stage: CommitStage,
    file: Option<File>,
    tmp_path: PathBuf,
    final_path: PathBuf,
    sidecar_path: PathBuf,
    bucket_root: PathBuf,
    target: String,
    metadata: WriteMetadata,
    digest: Context,
    digested: u64,
    etag: Option<String>,
}

impl FsUpload {
    fn file(&mut self) -> ReplicationResult<&mut File> {
        self.file.as_mut().ok_or_else(|| {
            ReplicationError::Internal(format!("write to `{}` already closed", self.target))
        })
    }

    async fn write_sidecar(&self, sidecar: &Sidecar) -> io::Result<()> {
        if let Some(parent) = self.sidecar_path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let raw = serde_json::to_vec_pretty(sidecar).map_err(io::Error::other)?;
        let tmp = self.sidecar_path.with_extension(format!("tmp-{}", Uuid::new_v4()));
        fs::write(&tmp, raw).await?;
        fs::rename(&tmp, &self.sidecar_path).await
    }
}

impl Drop for FsUpload {
    fn drop(&mut self) {
        // handle dropped before the rename (e.g. task torn down)
        if self.file.take().is_some() && self.stage < CommitStage::Renamed {
            let _ = std::fs::remove_file(&self.tmp_path);
        }
    }
}

#[async_trait]
impl WriteHandle for FsUpload {
    async fn write_chunk(&mut self, chunk: Chunk) -> ReplicationResult<()> {
        if self.stage != CommitStage::Writing {
            return Err(ReplicationError::Internal(format!(
                "write to `{}` is already being finalized",
                self.target
            )));
        }
        if chunk.offset > self.digested {
            return Err(ReplicationError::Internal(format!(
                "chunk at {} leaves a gap after byte {}",
                chunk.offset, self.digested
            )));
        }
        let target = self.target.clone();
        let file = self.file()?;
        file.seek(SeekFrom::Start(chunk.offset))
            .await
            .map_err(|err| classify_io(err, &target))?;
        file.write_all(&chunk.bytes)
            .await
            .map_err(|err| classify_io(err, &target))?;

        // a rewrite of bytes already hashed leaves the digest alone
        if chunk.offset == self.digested {
            self.digest.consume(&chunk.bytes);
            self.digested = chunk.end();
        }
        Ok(())
    }

    async fn finalize(&mut self) -> ReplicationResult<u64> {
        let target = self.target.clone();
        let io_err = |err| classify_io(err, &target);

        if self.stage == CommitStage::Writing {
            let file = self.file()?;
            file.flush().await.map_err(io_err)?;
            file.sync_all().await.map_err(io_err)?;
            self.stage = CommitStage::Synced;
        }

        if self.stage == CommitStage::Synced {
            // drop the old sidecar first so a stale record never vouches for new bytes
            match fs::remove_file(&self.sidecar_path).await {
                Ok(()) => {}
                Err(err) if err.kind() == ErrorKind::NotFound => {}
                Err(err) => return Err(io_err(err)),
            }
            // the temp file stays in place until the rename lands
            if let Err(err) = fs::rename(&self.tmp_path, &self.final_path).await {
                if err.kind() != ErrorKind::AlreadyExists {
                    return Err(io_err(err));
                }
                fs::remove_file(&self.final_path).await.map_err(io_err)?;
                fs::rename(&self.tmp_path, &self.final_path)
                    .await
                    .map_err(io_err)?;
            }
            self.file = None;
            self.stage = CommitStage::Renamed;
        }

        if self.stage == CommitStage::Renamed {
            let etag = self
                .etag
                .get_or_insert_with(|| format!("{:x}", self.digest.clone().compute()))
                .clone();
            let sidecar = Sidecar {
                etag,
                size: self.digested,
                metadata: self.metadata.clone(),
            };
            self.write_sidecar(&sidecar).await.map_err(io_err)?;
            self.stage = CommitStage::Committed;
            debug!(
                "committed {} ({} bytes, etag {})",
                self.final_path.display(),
                sidecar.size,
                sidecar.etag
            );
        }
        Ok(self.digested)
    }

    async fn abort(&mut self) -> ReplicationResult<()> {
        self.file = None;
        if self.stage >= CommitStage::Renamed {
            // the object is in place without a sidecar; the next job replaces it
            return Ok(());
        }
        match fs::remove_file(&self.tmp_path).await {
            Ok(()) => debug!("discarded {}", self.tmp_path.display()),
            Err(err) if err.kind() == ErrorKind::NotFound => {}
            Err(err) => return Err(classify_io(err, &self.target)),
        }
        if let Some(parent) = self.tmp_path.parent() {
            prune_empty_dirs(parent, &self.bucket_root).await;
        }
        Ok(())
    }
}

#[async_trait]
impl DestinationStore for FsStore {
    async fn exists(
        &self,
        id: &ObjectIdentity,
        expected: &SourceDescriptor,
    ) -> ReplicationResult<ProbeOutcome> {
        let path = self.object_path(id)?;
        let meta = match fs::metadata(&path).await {
            Ok(meta) if meta.is_file() => meta,
            Ok(_) => return Ok(ProbeOutcome::Absent),
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(ProbeOutcome::Absent),
            Err(err) => return Err(classify_io(err, &id.to_string())),
        };
        let sidecar = self.read_sidecar(id).await?;
        let recorded = sidecar
            .as_ref()
            .and_then(|s| s.metadata.get(SOURCE_FINGERPRINT_KEY))
            .map(String::as_str);
        Ok(compare_with_source(expected, meta.len(), recorded))
    }

    async fn begin(
        &self,
        id: &ObjectIdentity,
        metadata: WriteMetadata,
    ) -> ReplicationResult<Box<dyn WriteHandle>> {
        let target = id.to_string();
        let final_path = self.object_path(id)?;
        let parent = final_path.parent().map(Path::to_path_buf).ok_or_else(|| {
            ReplicationError::InvalidRequest(format!("{target} has no parent directory"))
        })?;
        fs::create_dir_all(&parent)
            .await
            .map_err(|err| classify_io(err, &target))?;
        let tmp_path = parent.join(format!(".tmp-{}", Uuid::new_v4()));
        let file = File::create(&tmp_path)
            .await
            .map_err(|err| classify_io(err, &target))?;

        Ok(Box::new(FsUpload {
            stage: CommitStage::Writing,
            file: Some(file),
            tmp_path,
            final_path,
            sidecar_path: self.sidecar_path(id),
            bucket_root: self.bucket_root(id.bucket()),
            target,
            metadata,
            digest: Context::new(),
            digested: 0,
            etag: None,
        }))
    }

    /// Write, read back and delete a marker file under `base_path`.
    async fn ping(&self) -> ReplicationResult<()> {
        let target = self.base_path.display().to_string();
        let marker = self.base_path.join(format!(".health-{}", Uuid::new_v4()));
        fs::write(&marker, b"health")
            .await
            .map_err(|err| classify_io(err, &target))?;
        let read = fs::read(&marker).await;
        let _ = fs::remove_file(&marker).await;
        match read {
            Ok(bytes) if bytes == b"health" => Ok(()),
            Ok(_) => Err(ReplicationError::transient(format!(
                "{target}: marker file content mismatch"
            ))),
            Err(err) => Err(classify_io(err, &target)),
        }
    }
}

/// Remove empty directories from `start` up to (not including) `stop`.
async fn prune_empty_dirs(start: &Path, stop: &Path) {
    let mut current = start.to_path_buf();
    while current.starts_with(stop) && current != stop {
        match fs::remove_dir(&current).await {
            Ok(_) => match current.parent() {
                Some(parent) => current = parent.to_path_buf(),
                None => break,
            },
            Err(err) if err.kind() == ErrorKind::NotFound => break,
            Err(err) if err.kind() == ErrorKind::DirectoryNotEmpty => break,
            Err(err) => {
                debug!("failed to prune directory {}: {}", current.display(), err);
                break;
            }
        }
    }
}

/// Check if a string matches IPv4-like dotted decimal form.
fn is_ipv4_like(name: &str) -> bool {
    let parts: Vec<&str> = name.split('.').collect();
    parts.len() == 4
        && parts.iter().all(|segment| {
            !segment.is_empty()
                && segment.len() <= 3
                && segment.chars().all(|c| c.is_ascii_digit())
                && segment.parse::<u8>().is_ok()
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::identity::StoreKind;

    fn id(bucket: &str, key: &str) -> ObjectIdentity {
        ObjectIdentity::new(StoreKind::Filesystem, bucket, key)
    }

    fn descriptor(size: u64, fingerprint: &str) -> SourceDescriptor {
        SourceDescriptor {
            size: Some(size),
            fingerprint: Some(fingerprint.to_string()),
        }
    }

    async fn write_object(store: &FsStore, target: &ObjectIdentity, data: &[u8], fp: &str) {
        let mut metadata = WriteMetadata::new();
        metadata.insert(SOURCE_FINGERPRINT_KEY.into(), fp.into());
        let mut handle = store.begin(target, metadata).await.unwrap();
        for (i, part) in data.chunks(4).enumerate() {
            let offset = (i * 4) as u64;
            handle
                .write_chunk(Chunk::new(offset, Bytes::copy_from_slice(part), false))
                .await
                .unwrap();
        }
        handle.finalize().await.unwrap();
    }

    #[tokio::test]
    async fn committed_object_is_readable_in_chunks() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsStore::new(dir.path());
        let target = id("reports", "2025/q1.csv");
        write_object(&store, &target, b"Hello, World!", "abc").await;

        let mut stream = store.open(&target).await.unwrap();
        assert_eq!(stream.descriptor().size, Some(13));
        assert_eq!(
            stream.descriptor().fingerprint.as_deref(),
            Some(format!("{:x}", md5::compute(b"Hello, World!")).as_str())
        );
        assert_eq!(stream.read_chunk(0, 8).await.unwrap().as_ref(), b"Hello, W");
        assert_eq!(stream.read_chunk(8, 8).await.unwrap().as_ref(), b"orld!");
        assert!(stream.read_chunk(13, 8).await.unwrap().is_empty());
        // resumable: an earlier offset can be read again
        assert_eq!(stream.read_chunk(7, 5).await.unwrap().as_ref(), b"World");
    }

    #[tokio::test]
    async fn existence_check_compares_recorded_source_fingerprint() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsStore::new(dir.path());
        let target = id("reports", "a.txt");

        assert_eq!(
            store.exists(&target, &descriptor(5, "v1")).await.unwrap(),
            ProbeOutcome::Absent
        );
        write_object(&store, &target, b"hello", "v1").await;
        assert_eq!(
            store.exists(&target, &descriptor(5, "v1")).await.unwrap(),
            ProbeOutcome::PresentMatching
        );
        assert_eq!(
            store.exists(&target, &descriptor(5, "v2")).await.unwrap(),
            ProbeOutcome::PresentDiffering
        );
    }

    #[tokio::test]
    async fn aborted_write_leaves_no_trace() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsStore::new(dir.path());
        let target = id("reports", "nested/deep/a.txt");

        let mut handle = store.begin(&target, WriteMetadata::new()).await.unwrap();
        handle
            .write_chunk(Chunk::new(0, Bytes::from_static(b"partial"), false))
            .await
            .unwrap();
        handle.abort().await.unwrap();

        assert!(!dir.path().join("reports/nested/deep/a.txt").exists());
        assert!(!dir.path().join("reports/nested").exists());
        assert_eq!(
            store.exists(&target, &descriptor(7, "x")).await.unwrap(),
            ProbeOutcome::Absent
        );
    }

    #[tokio::test]
    async fn unfinished_write_keeps_previous_object() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsStore::new(dir.path());
        let target = id("reports", "a.txt");
        write_object(&store, &target, b"old data", "v1").await;

        let mut handle = store.begin(&target, WriteMetadata::new()).await.unwrap();
        handle
            .write_chunk(Chunk::new(0, Bytes::from_static(b"new"), false))
            .await
            .unwrap();
        assert_eq!(
            std::fs::read(dir.path().join("reports/a.txt")).unwrap(),
            b"old data"
        );
        drop(handle);
        assert_eq!(
            std::fs::read_dir(dir.path().join("reports")).unwrap().count(),
            1
        );
    }

    #[tokio::test]
    async fn rewritten_chunk_keeps_etag_consistent() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsStore::new(dir.path());
        let target = id("reports", "a.txt");

        let mut handle = store.begin(&target, WriteMetadata::new()).await.unwrap();
        let first = Chunk::new(0, Bytes::from_static(b"Hello, W"), false);
        handle.write_chunk(first.clone()).await.unwrap();
        handle.write_chunk(first).await.unwrap();
        handle
            .write_chunk(Chunk::new(8, Bytes::from_static(b"orld!"), true))
            .await
            .unwrap();
        assert_eq!(handle.finalize().await.unwrap(), 13);

        let stream = store.open(&target).await.unwrap();
        assert_eq!(
            stream.descriptor().fingerprint.as_deref(),
            Some(format!("{:x}", md5::compute(b"Hello, World!")).as_str())
        );
    }

    #[tokio::test]
    async fn failed_finalize_can_be_retried() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsStore::new(dir.path());
        let target = id("reports", "a.txt");
        write_object(&store, &target, b"old data", "v1").await;

        // a directory where the sidecar lives makes the commit fail
        let obstruction = dir.path().join(".meta/reports/a.txt.json");
        std::fs::remove_file(&obstruction).unwrap();
        std::fs::create_dir_all(obstruction.join("blocker")).unwrap();

        let mut metadata = WriteMetadata::new();
        metadata.insert(SOURCE_FINGERPRINT_KEY.into(), "v2".into());
        let mut handle = store.begin(&target, metadata).await.unwrap();
        handle
            .write_chunk(Chunk::new(0, Bytes::from_static(b"new data!"), true))
            .await
            .unwrap();

        let err = handle.finalize().await.unwrap_err();
        assert!(err.is_retryable(), "{err:?}");
        assert_eq!(
            std::fs::read(dir.path().join("reports/a.txt")).unwrap(),
            b"old data"
        );

        std::fs::remove_dir_all(&obstruction).unwrap();
        assert_eq!(handle.finalize().await.unwrap(), 9);
        drop(handle);

        assert_eq!(
            std::fs::read(dir.path().join("reports/a.txt")).unwrap(),
            b"new data!"
        );
        assert_eq!(
            std::fs::read_dir(dir.path().join("reports")).unwrap().count(),
            1
        );
        let stream = store.open(&target).await.unwrap();
        assert_eq!(
            stream.descriptor().fingerprint.as_deref(),
            Some(format!("{:x}", md5::compute(b"new data!")).as_str())
        );
        assert_eq!(
            store.exists(&target, &descriptor(9, "v2")).await.unwrap(),
            ProbeOutcome::PresentMatching
        );
    }

    #[tokio::test]
    async fn missing_object_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsStore::new(dir.path());
        let err = store.open(&id("reports", "nope.txt")).await.err().unwrap();
        assert_eq!(
            err,
            ReplicationError::NotFound("file://reports/nope.txt".into())
        );
    }

    #[tokio::test]
    async fn unsafe_names_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsStore::new(dir.path());
        for target in [
            id("reports", "../escape"),
            id("reports", "/abs"),
            id("Bad_Bucket", "a.txt"),
            id("192.168.1.1", "a.txt"),
        ] {
            let err = store.open(&target).await.err().unwrap();
            assert!(matches!(err, ReplicationError::InvalidRequest(_)), "{target}");
        }
    }

    #[tokio::test]
    async fn ping_checks_the_directory() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsStore::new(dir.path());
        assert!(SourceReader::ping(&store).await.is_ok());
        assert!(DestinationStore::ping(&store).await.is_ok());

        let missing = FsStore::new(dir.path().join("missing"));
        assert!(SourceReader::ping(&missing).await.is_err());
        assert!(DestinationStore::ping(&missing).await.is_err());
    }

    #[test]
    fn ipv4_shapes() {
        assert!(is_ipv4_like("10.0.0.1"));
        assert!(!is_ipv4_like("10.0.0"));
        assert!(!is_ipv4_like("my.bucket.name.x"));
        assert!(!is_ipv4_like("300.1.1.1"));
    }
}
