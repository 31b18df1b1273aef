//! In-memory reference backend.
//!
//! Behaves like a small object store: first-level directories are volumes
//! (buckets) with a region, objects may be versioned with delete markers,
//! multipart uploads are assembled on completion, and copies are server side.
//! Every capability of [`CapabilityKind`](super::CapabilityKind) except
//! `Bulk` is implemented natively.
//!
//! Tests can inject one-shot part failures and failing paths, and inspect
//! what was written through [`MemoryBackend::stats`].

use std::collections::{BTreeMap, HashMap, HashSet};
use std::io;
use std::sync::{Arc, Weak};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::SystemTime;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures::StreamExt;
use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::error::{Result, StorageError};
use crate::path::{Attributes, ByteRange, Path, PathTypes};
use crate::transfer::TransferStatus;

use super::{
    ByteStream, Capability, CapabilityTable, CopyFeature, DeleteFeature, DirectoryFeature,
    FindFeature, ListFeature, LocationFeature, MultipartFeature, MultipartPart, MultipartUpload,
    ReadFeature, TouchFeature, WriteFeature, WriteSink,
};

/// Size of the pieces a read stream is delivered in.
const READ_PIECE_SIZE: usize = 8 * 1024;

pub const DEFAULT_REGION: &str = "us-east-1";

#[derive(Debug, Clone)]
pub struct MemoryConfig {
    /// Keep every object generation and record delete markers.
    pub versioning: bool,
    /// Treat first-level directories as buckets with S3 naming rules.
    pub buckets: bool,
    pub default_region: String,
    pub multipart: bool,
    pub native_copy: bool,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            versioning: false,
            buckets: false,
            default_region: DEFAULT_REGION.to_string(),
            multipart: true,
            native_copy: true,
        }
    }
}

/// Counters of backend activity.
#[derive(Debug, Default)]
pub struct MemoryStats {
    part_uploads: AtomicUsize,
    completed_uploads: AtomicUsize,
    copies: AtomicUsize,
    written: Mutex<Vec<String>>,
}

impl MemoryStats {
    pub fn part_uploads(&self) -> usize {
        self.part_uploads.load(Ordering::SeqCst)
    }

    pub fn completed_uploads(&self) -> usize {
        self.completed_uploads.load(Ordering::SeqCst)
    }

    pub fn copies(&self) -> usize {
        self.copies.load(Ordering::SeqCst)
    }

    /// Paths of every object stored by a write, touch or copy, in order.
    pub fn written(&self) -> Vec<String> {
        self.written.lock().clone()
    }

    pub fn writes_matching(&self, predicate: impl Fn(&str) -> bool) -> usize {
        self.written.lock().iter().filter(|p| predicate(p)).count()
    }

    pub fn reset(&self) {
        self.part_uploads.store(0, Ordering::SeqCst);
        self.completed_uploads.store(0, Ordering::SeqCst);
        self.copies.store(0, Ordering::SeqCst);
        self.written.lock().clear();
    }
}

#[derive(Debug, Clone)]
struct ObjectVersion {
    id: String,
    /// `None` is a delete marker.
    data: Option<Bytes>,
    etag: String,
    modified: SystemTime,
}

#[derive(Debug, Clone)]
struct DirectoryEntry {
    modified: SystemTime,
    region: Option<String>,
    /// Created by `mkdir`, not implied by a descendant.
    placeholder: bool,
}

impl DirectoryEntry {
    fn implicit() -> Self {
        Self {
            modified: SystemTime::now(),
            region: None,
            placeholder: false,
        }
    }
}

#[derive(Debug)]
struct PendingUpload {
    path: Path,
    created: SystemTime,
    sequence: u64,
    parts: BTreeMap<u32, (Bytes, MultipartPart)>,
}

#[derive(Debug, Default)]
struct State {
    directories: BTreeMap<String, DirectoryEntry>,
    objects: BTreeMap<String, Vec<ObjectVersion>>,
    uploads: HashMap<String, PendingUpload>,
}

fn parent_name(name: &str) -> Option<&str> {
    if name == "/" {
        return None;
    }
    match name.rfind('/') {
        Some(0) => Some("/"),
        Some(i) => Some(&name[..i]),
        None => None,
    }
}

fn etag_of(data: &[u8]) -> String {
    hex::encode(md5::compute(data).0)
}

fn s3_multipart_etag(parts: &[MultipartPart]) -> String {
    let mut digests = Vec::with_capacity(parts.len() * 16);
    for part in parts {
        match hex::decode(&part.etag).ok() {
            Some(raw) => digests.extend_from_slice(&raw),
            None => digests.extend_from_slice(part.etag.as_bytes()),
        }
    }
    format!("{:x}-{}", md5::compute(&digests), parts.len())
}

/// Validate a bucket name against S3 naming rules.
pub fn validate_bucket_name(name: &str) -> std::result::Result<(), String> {
    if !(3..=63).contains(&name.len()) {
        return Err(format!("length {} outside 3..=63", name.len()));
    }
    if !name
        .bytes()
        .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'.' || b == b'-')
    {
        return Err("only lowercase letters, digits, '.' and '-' are allowed".to_string());
    }
    let edge_ok = |b: Option<u8>| b.is_some_and(|b| b.is_ascii_lowercase() || b.is_ascii_digit());
    if !edge_ok(name.bytes().next()) || !edge_ok(name.bytes().last()) {
        return Err("must start and end with a letter or digit".to_string());
    }
    if name.contains("..") {
        return Err("must not contain adjacent periods".to_string());
    }
    let octets: Vec<&str> = name.split('.').collect();
    if octets.len() == 4 && octets.iter().all(|o| o.parse::<u8>().is_ok()) {
        return Err("must not be formatted as an IP address".to_string());
    }
    Ok(())
}

/// Object store held in process memory.
#[derive(Debug)]
pub struct MemoryBackend {
    host: String,
    config: MemoryConfig,
    state: Mutex<State>,
    stats: MemoryStats,
    failing_parts: Mutex<HashSet<u32>>,
    failing_paths: Mutex<HashSet<String>>,
    sequence: AtomicU64,
    /// Sinks outlive the `&self` borrow of `write` and hold a strong handle.
    this: Weak<MemoryBackend>,
}

impl MemoryBackend {
    pub fn new(host: impl Into<String>) -> Arc<Self> {
        Self::with_config(host, MemoryConfig::default())
    }

    pub fn with_config(host: impl Into<String>, config: MemoryConfig) -> Arc<Self> {
        let mut state = State::default();
        state.directories.insert("/".to_string(), DirectoryEntry::implicit());
        Arc::new_cyclic(|this| Self {
            this: this.clone(),
            host: host.into(),
            config,
            state: Mutex::new(state),
            stats: MemoryStats::default(),
            failing_parts: Mutex::new(HashSet::new()),
            failing_paths: Mutex::new(HashSet::new()),
            sequence: AtomicU64::new(1),
        })
    }

    /// S3-like store: versioned buckets with regions.
    pub fn s3(host: impl Into<String>) -> Arc<Self> {
        Self::with_config(
            host,
            MemoryConfig {
                versioning: true,
                buckets: true,
                ..MemoryConfig::default()
            },
        )
    }

    /// Native capability table for this backend.
    pub fn capabilities(self: &Arc<Self>) -> CapabilityTable {
        let mut table = CapabilityTable::new(self.host.clone())
            .with(Capability::Read(self.clone()))
            .with(Capability::Write(self.clone()))
            .with(Capability::Directory(self.clone()))
            .with(Capability::Delete(self.clone()))
            .with(Capability::Find(self.clone()))
            .with(Capability::Touch(self.clone()))
            .with(Capability::List(self.clone()))
            .with(Capability::Location(self.clone()));
        if self.config.native_copy {
            table.insert(Capability::Copy(self.clone()));
        }
        if self.config.multipart {
            table.insert(Capability::Multipart(self.clone()));
        }
        table
    }

    #[inline]
    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn stats(&self) -> &MemoryStats {
        &self.stats
    }

    /// Fail the next upload of part `number` with a transient error.
    pub fn fail_part_once(&self, number: u32) {
        self.failing_parts.lock().insert(number);
    }

    /// Fail every read and write of `path` with a transient error.
    pub fn fail_path(&self, path: &str) {
        self.failing_paths.lock().insert(path.to_string());
    }

    /// Raw bytes of the current generation, bypassing capabilities.
    pub fn object(&self, path: &str) -> Option<Bytes> {
        let state = self.state.lock();
        state.objects.get(path)?.last()?.data.clone()
    }

    /// Every stored object name with a live current generation.
    pub fn object_names(&self) -> Vec<String> {
        let state = self.state.lock();
        state
            .objects
            .iter()
            .filter(|(_, versions)| versions.last().is_some_and(|v| v.data.is_some()))
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// Every generation of the object at `path`, newest first, each pinned
    /// to its version id. Delete markers carry [`PathTypes::DELETE_MARKER`].
    pub fn versions(&self, path: &Path) -> Result<Vec<Path>> {
        let state = self.state.lock();
        let versions = state
            .objects
            .get(path.as_str())
            .ok_or_else(|| StorageError::not_found(path))?;
        Ok(versions
            .iter()
            .rev()
            .map(|version| {
                let mut types = PathTypes::FILE;
                if version.data.is_none() {
                    types.insert(PathTypes::DELETE_MARKER);
                }
                Path::new(path.as_str(), types)
                    .with_attributes(self.attributes_of(version))
                    .with_version(version.id.clone())
            })
            .collect())
    }

    /// Number of in-progress multipart uploads.
    pub fn pending_uploads(&self) -> usize {
        self.state.lock().uploads.len()
    }

    fn next_sequence(&self) -> u64 {
        self.sequence.fetch_add(1, Ordering::SeqCst)
    }

    fn check_failing(&self, path: &Path) -> Result<()> {
        if self.failing_paths.lock().contains(path.as_str()) {
            return Err(StorageError::transient(
                path,
                io::Error::new(io::ErrorKind::ConnectionReset, "injected failure"),
            ));
        }
        Ok(())
    }

    /// Create missing ancestors of `name`. In bucket mode the volume itself
    /// must already exist.
    fn ensure_parents(&self, state: &mut State, name: &str) -> Result<()> {
        let mut missing = Vec::new();
        let mut current = parent_name(name);
        while let Some(dir) = current {
            if state.directories.contains_key(dir) {
                break;
            }
            missing.push(dir.to_string());
            current = parent_name(dir);
        }
        for dir in missing.into_iter().rev() {
            if self.config.buckets && parent_name(&dir) == Some("/") {
                return Err(StorageError::not_found(dir));
            }
            state.directories.insert(dir, DirectoryEntry::implicit());
        }
        Ok(())
    }

    fn store(&self, path: &Path, data: Bytes) -> Result<Attributes> {
        let mut state = self.state.lock();
        if state.directories.contains_key(path.as_str()) {
            return Err(StorageError::interoperability(
                "write",
                path,
                "a directory exists at this path",
            ));
        }
        self.ensure_parents(&mut state, path.as_str())?;

        let version = ObjectVersion {
            id: if self.config.versioning {
                format!("v{}", self.next_sequence())
            } else {
                "null".to_string()
            },
            etag: etag_of(&data),
            modified: SystemTime::now(),
            data: Some(data),
        };
        let attributes = self.attributes_of(&version);
        let versions = state.objects.entry(path.as_str().to_string()).or_default();
        if !self.config.versioning {
            versions.clear();
        }
        versions.push(version);
        drop(state);

        self.stats.written.lock().push(path.as_str().to_string());
        trace!(path = %path, size = ?attributes.size, "Stored object");
        Ok(attributes)
    }

    fn attributes_of(&self, version: &ObjectVersion) -> Attributes {
        Attributes {
            size: version.data.as_ref().map(|d| d.len() as u64),
            modified: Some(version.modified),
            region: None,
            version_id: self.config.versioning.then(|| version.id.clone()),
            checksum: Some(version.etag.clone()),
        }
    }

    /// Generation addressed by `path`: the pinned version, or the current one.
    fn lookup<'a>(&self, state: &'a State, path: &Path) -> Option<&'a ObjectVersion> {
        let versions = state.objects.get(path.as_str())?;
        match path.version_id() {
            Some(id) => versions.iter().find(|v| v.id == id),
            None => versions.last(),
        }
    }

    fn live_data(&self, path: &Path) -> Result<Bytes> {
        let state = self.state.lock();
        self.lookup(&state, path)
            .and_then(|v| v.data.clone())
            .ok_or_else(|| StorageError::not_found(path))
    }

    fn has_live_children(state: &State, dir: &str) -> bool {
        let is_child = |name: &str| parent_name(name) == Some(dir);
        state.directories.keys().any(|d| is_child(d))
            || state
                .objects
                .iter()
                .any(|(name, versions)| is_child(name) && versions.last().is_some_and(|v| v.data.is_some()))
    }
}

// ============================================================================
// Capabilities
// ============================================================================

#[async_trait]
impl ReadFeature for MemoryBackend {
    async fn read(&self, path: &Path, range: ByteRange) -> Result<ByteStream> {
        self.check_failing(path)?;
        let data = self.live_data(path)?;
        let end = range.end(data.len() as u64) as usize;
        let start = (range.offset as usize).min(end);
        let body = data.slice(start..end);

        let pieces: Vec<Result<Bytes>> = (0..body.len())
            .step_by(READ_PIECE_SIZE)
            .map(|i| Ok(body.slice(i..(i + READ_PIECE_SIZE).min(body.len()))))
            .collect();
        Ok(futures::stream::iter(pieces).boxed())
    }
}

struct MemorySink {
    backend: Arc<MemoryBackend>,
    path: Path,
    buffer: BytesMut,
}

#[async_trait]
impl WriteSink for MemorySink {
    async fn write(&mut self, data: Bytes) -> Result<()> {
        self.buffer.extend_from_slice(&data);
        Ok(())
    }

    async fn close(self: Box<Self>) -> Result<Attributes> {
        let MemorySink { backend, path, buffer } = *self;
        backend.store(&path, buffer.freeze())
    }
}

#[async_trait]
impl WriteFeature for MemoryBackend {
    async fn write(&self, path: &Path, status: &TransferStatus) -> Result<Box<dyn WriteSink>> {
        self.check_failing(path)?;
        let backend = self
            .this
            .upgrade()
            .ok_or_else(|| StorageError::interoperability("write", path, "backend was dropped"))?;
        Ok(Box::new(MemorySink {
            backend,
            path: path.clone(),
            buffer: BytesMut::with_capacity(status.length as usize),
        }))
    }
}

#[async_trait]
impl DirectoryFeature for MemoryBackend {
    async fn mkdir(&self, path: &Path, status: &TransferStatus) -> Result<Path> {
        let mut state = self.state.lock();
        if state.directories.contains_key(path.as_str()) {
            return Err(StorageError::AlreadyExists { path: path.to_string() });
        }
        if self.lookup(&state, path).is_some_and(|v| v.data.is_some()) {
            return Err(StorageError::AlreadyExists { path: path.to_string() });
        }

        let is_volume = path.depth() == 1;
        let region = if is_volume && self.config.buckets {
            validate_bucket_name(path.name())
                .map_err(|reason| StorageError::interoperability("mkdir", path, reason))?;
            Some(
                status
                    .region
                    .clone()
                    .unwrap_or_else(|| self.config.default_region.clone()),
            )
        } else {
            self.ensure_parents(&mut state, path.as_str())?;
            None
        };

        state.directories.insert(
            path.as_str().to_string(),
            DirectoryEntry {
                modified: SystemTime::now(),
                region: region.clone(),
                placeholder: true,
            },
        );
        debug!(path = %path, ?region, "Created directory");

        let mut types = PathTypes::DIRECTORY | PathTypes::PLACEHOLDER;
        if is_volume {
            types.insert(PathTypes::VOLUME);
        }
        Ok(Path::new(path.as_str(), types).with_attributes(Attributes {
            region,
            modified: Some(SystemTime::now()),
            ..Attributes::default()
        }))
    }
}

#[async_trait]
impl DeleteFeature for MemoryBackend {
    async fn delete(&self, paths: &[Path]) -> Result<()> {
        let mut state = self.state.lock();
        for path in paths {
            let name = path.as_str();
            if path.version_id().is_none() && state.directories.contains_key(name) {
                if path.is_root() {
                    return Err(StorageError::interoperability("delete", path, "cannot delete the root"));
                }
                if Self::has_live_children(&state, name) {
                    return Err(StorageError::interoperability("delete", path, "directory not empty"));
                }
                state.directories.remove(name);
                trace!(path = %path, "Deleted directory");
                continue;
            }

            let versions = state
                .objects
                .get_mut(name)
                .ok_or_else(|| StorageError::not_found(path))?;
            match path.version_id() {
                Some(id) => {
                    let before = versions.len();
                    versions.retain(|v| v.id != id);
                    if versions.len() == before {
                        return Err(StorageError::not_found(path));
                    }
                    if versions.is_empty() {
                        state.objects.remove(name);
                    }
                    trace!(path = %path, "Purged version");
                }
                None => {
                    if versions.last().is_none_or(|v| v.data.is_none()) {
                        return Err(StorageError::not_found(path));
                    }
                    if self.config.versioning {
                        versions.push(ObjectVersion {
                            id: format!("v{}", self.next_sequence()),
                            data: None,
                            etag: String::new(),
                            modified: SystemTime::now(),
                        });
                        trace!(path = %path, "Recorded delete marker");
                    } else {
                        state.objects.remove(name);
                        trace!(path = %path, "Deleted object");
                    }
                }
            }
        }
        Ok(())
    }
}

#[async_trait]
impl FindFeature for MemoryBackend {
    async fn exists(&self, path: &Path) -> Result<bool> {
        let state = self.state.lock();
        if path.version_id().is_none() && state.directories.contains_key(path.as_str()) {
            return Ok(!path.is_file() || path.is_directory());
        }
        Ok(self.lookup(&state, path).is_some_and(|v| v.data.is_some()))
    }
}

#[async_trait]
impl LocationFeature for MemoryBackend {
    async fn locate(&self, container: &Path) -> Result<Option<String>> {
        if !self.config.buckets {
            return Ok(None);
        }
        let state = self.state.lock();
        state
            .directories
            .get(container.container().as_str())
            .map(|entry| entry.region.clone())
            .ok_or_else(|| StorageError::not_found(container))
    }
}

#[async_trait]
impl TouchFeature for MemoryBackend {
    async fn touch(&self, path: &Path, _status: &TransferStatus) -> Result<Path> {
        self.check_failing(path)?;
        let attributes = self.store(path, Bytes::new())?;
        Ok(Path::file(path.as_str()).with_attributes(attributes))
    }
}

#[async_trait]
impl CopyFeature for MemoryBackend {
    async fn copy(&self, source: &Path, target: &Path, _status: &TransferStatus) -> Result<Path> {
        self.check_failing(source)?;
        self.check_failing(target)?;
        let data = self.live_data(source)?;
        let attributes = self.store(target, data)?;
        self.stats.copies.fetch_add(1, Ordering::SeqCst);
        debug!(source = %source, target = %target, "Server-side copy");
        Ok(Path::file(target.as_str()).with_attributes(attributes))
    }
}

#[async_trait]
impl ListFeature for MemoryBackend {
    async fn list(&self, directory: &Path) -> Result<Vec<Path>> {
        let state = self.state.lock();
        let dir = directory.as_str();
        if !state.directories.contains_key(dir) {
            return Err(StorageError::not_found(directory));
        }

        let mut children = Vec::new();
        for (name, entry) in &state.directories {
            if parent_name(name) == Some(dir) {
                let mut types = PathTypes::DIRECTORY;
                if parent_name(name) == Some("/") {
                    types.insert(PathTypes::VOLUME);
                }
                if entry.placeholder {
                    types.insert(PathTypes::PLACEHOLDER);
                }
                children.push(Path::new(name, types).with_attributes(Attributes {
                    modified: Some(entry.modified),
                    region: entry.region.clone(),
                    ..Attributes::default()
                }));
            }
        }
        for (name, versions) in &state.objects {
            if parent_name(name) != Some(dir) {
                continue;
            }
            if let Some(current) = versions.last().filter(|v| v.data.is_some()) {
                children.push(Path::file(name).with_attributes(self.attributes_of(current)));
            }
        }
        Ok(children)
    }
}

#[async_trait]
impl MultipartFeature for MemoryBackend {
    async fn find(&self, path: &Path, _status: &TransferStatus) -> Result<Option<MultipartUpload>> {
        let state = self.state.lock();
        Ok(state
            .uploads
            .iter()
            .filter(|(_, upload)| upload.path.eq_ignoring_version(path))
            .max_by_key(|(_, upload)| upload.sequence)
            .map(|(id, upload)| MultipartUpload {
                id: id.clone(),
                path: upload.path.clone(),
                created: upload.created,
            }))
    }

    async fn start(&self, path: &Path, _status: &TransferStatus) -> Result<MultipartUpload> {
        let mut state = self.state.lock();
        self.ensure_parents(&mut state, path.as_str())?;
        let sequence = self.next_sequence();
        let id = format!("upload-{sequence}");
        let created = SystemTime::now();
        state.uploads.insert(
            id.clone(),
            PendingUpload {
                path: path.clone(),
                created,
                sequence,
                parts: BTreeMap::new(),
            },
        );
        debug!(path = %path, upload = %id, "Started multipart upload");
        Ok(MultipartUpload {
            id,
            path: path.clone(),
            created,
        })
    }

    async fn list_parts(&self, upload: &MultipartUpload) -> Result<Vec<MultipartPart>> {
        let state = self.state.lock();
        let pending = state
            .uploads
            .get(&upload.id)
            .ok_or_else(|| StorageError::not_found(format!("upload {}", upload.id)))?;
        Ok(pending.parts.values().map(|(_, part)| part.clone()).collect())
    }

    async fn upload_part(
        &self,
        upload: &MultipartUpload,
        number: u32,
        _offset: u64,
        data: Bytes,
        _status: &TransferStatus,
    ) -> Result<MultipartPart> {
        if self.failing_parts.lock().remove(&number) {
            return Err(StorageError::transient(
                &upload.path,
                io::Error::new(io::ErrorKind::ConnectionReset, format!("injected failure of part {number}")),
            ));
        }
        tokio::task::yield_now().await;

        let part = MultipartPart {
            number,
            etag: etag_of(&data),
            length: data.len() as u64,
            last_modified: SystemTime::now(),
        };
        let mut state = self.state.lock();
        let pending = state
            .uploads
            .get_mut(&upload.id)
            .ok_or_else(|| StorageError::not_found(format!("upload {}", upload.id)))?;
        pending.parts.insert(number, (data, part.clone()));
        drop(state);

        self.stats.part_uploads.fetch_add(1, Ordering::SeqCst);
        trace!(upload = %upload.id, number, "Uploaded part");
        Ok(part)
    }

    async fn complete(
        &self,
        upload: &MultipartUpload,
        parts: &[MultipartPart],
        _status: &TransferStatus,
    ) -> Result<Attributes> {
        let body = {
            let state = self.state.lock();
            let pending = state
                .uploads
                .get(&upload.id)
                .ok_or_else(|| StorageError::not_found(format!("upload {}", upload.id)))?;

            let mut body = BytesMut::new();
            for (expected, part) in (1u32..).zip(parts) {
                if part.number != expected {
                    return Err(StorageError::interoperability(
                        "complete multipart upload",
                        &upload.path,
                        format!("part {} listed where part {expected} was expected", part.number),
                    ));
                }
                match pending.parts.get(&part.number) {
                    Some((data, stored)) if stored.etag == part.etag => body.extend_from_slice(data),
                    _ => {
                        return Err(StorageError::interoperability(
                            "complete multipart upload",
                            &upload.path,
                            format!("part {} was not uploaded", part.number),
                        ));
                    }
                }
            }
            body.freeze()
        };

        let mut attributes = self.store(&upload.path, body)?;
        attributes.checksum = Some(s3_multipart_etag(parts));
        if let Some(versions) = self.state.lock().objects.get_mut(upload.path.as_str())
            && let Some(current) = versions.last_mut()
        {
            current.etag = s3_multipart_etag(parts);
        }
        self.state.lock().uploads.remove(&upload.id);
        self.stats.completed_uploads.fetch_add(1, Ordering::SeqCst);
        debug!(upload = %upload.id, parts = parts.len(), "Completed multipart upload");
        Ok(attributes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::read_to_end;

    #[test]
    fn test_bucket_name_rules() {
        assert!(validate_bucket_name("my-bucket.data").is_ok());
        assert!(validate_bucket_name("ab").is_err());
        assert!(validate_bucket_name("Invalid_Name").is_err());
        assert!(validate_bucket_name("-leading").is_err());
        assert!(validate_bucket_name("a..b").is_err());
        assert!(validate_bucket_name("192.168.5.4").is_err());
    }

    #[tokio::test]
    async fn test_write_read_range() {
        let backend = MemoryBackend::new("mem");
        let path = Path::file("/dir/file.bin");
        let status = TransferStatus::new().with_length(20_000);
        let mut sink = WriteFeature::write(backend.as_ref(), &path, &status).await.unwrap();
        sink.write(Bytes::from(vec![3u8; 20_000])).await.unwrap();
        let attributes = sink.close().await.unwrap();
        assert_eq!(attributes.size, Some(20_000));

        let stream = backend.read(&path, ByteRange::new(100, 50)).await.unwrap();
        assert_eq!(read_to_end(stream).await.unwrap(), vec![3u8; 50]);
        assert!(backend.exists(&Path::directory("/dir")).await.unwrap());
    }

    #[tokio::test]
    async fn test_delete_non_empty_directory_rejected() {
        let backend = MemoryBackend::new("mem");
        backend.touch(&Path::file("/d/f"), &TransferStatus::new()).await.unwrap();
        let err = backend.delete(&[Path::directory("/d")]).await.unwrap_err();
        assert!(matches!(err, StorageError::Interoperability { .. }));
        backend
            .delete(&[Path::file("/d/f"), Path::directory("/d")])
            .await
            .unwrap();
        assert!(!backend.exists(&Path::directory("/d")).await.unwrap());
    }

    #[tokio::test]
    async fn test_multipart_etag_is_md5_of_part_digests() {
        let backend = MemoryBackend::new("mem");
        let status = TransferStatus::new();
        let upload = backend.start(&Path::file("/o"), &status).await.unwrap();
        let p1 = backend.upload_part(&upload, 1, 0, Bytes::from_static(b"ab"), &status).await.unwrap();
        let p2 = backend.upload_part(&upload, 2, 2, Bytes::from_static(b"cd"), &status).await.unwrap();
        assert_eq!(p1.etag, hex::encode(md5::compute(b"ab").0));

        let attributes = backend.complete(&upload, &[p1, p2], &status).await.unwrap();
        let mut digests = md5::compute(b"ab").0.to_vec();
        digests.extend_from_slice(&md5::compute(b"cd").0);
        let expected = format!("{}-2", hex::encode(md5::compute(&digests).0));
        assert_eq!(attributes.checksum.as_deref(), Some(expected.as_str()));
    }

    #[tokio::test]
    async fn test_complete_rejects_gaps() {
        let backend = MemoryBackend::new("mem");
        let status = TransferStatus::new();
        let upload = backend.start(&Path::file("/o"), &status).await.unwrap();
        let p1 = backend.upload_part(&upload, 1, 0, Bytes::from_static(b"a"), &status).await.unwrap();
        let _p2 = backend.upload_part(&upload, 2, 1, Bytes::from_static(b"b"), &status).await.unwrap();
        let p3 = backend.upload_part(&upload, 3, 2, Bytes::from_static(b"c"), &status).await.unwrap();
        let err = backend.complete(&upload, &[p1, p3], &status).await.unwrap_err();
        assert!(matches!(err, StorageError::Interoperability { .. }));
        assert_eq!(backend.pending_uploads(), 1);
    }
}
