//! Recursive copy between sessions, across vault boundaries.
//!
//! Source and target capabilities are resolved per item, so a copy from a
//! plain directory into a vault encrypts, a copy out of a vault decrypts, and
//! a copy inside one vault (or between plain paths of one host) is done
//! server side when the backend can.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use futures::future::BoxFuture;
use futures::{FutureExt, StreamExt};
use tracing::{debug, info, instrument, trace, warn};

use crate::backend::{
    CapabilityKind, Domain, ReadFeature, ResolvedCapabilities, Session, mkdir_if_missing, read_to_end,
};
use crate::config::{MultipartPreferences, Preferences};
use crate::error::{Result, StorageError};
use crate::path::{ByteRange, Path, PathTypes};

use super::cache::ListingCache;
use super::listener::{ConnectionCallback, ProgressListener};
use super::local::LocalSource;
use super::multipart::MultipartUploader;
use super::pool::SessionPool;
use super::report::{CopyMethod, FailurePolicy, ItemOutcome, TransferReport};
use super::status::{Interrupt, TransferStatus};

/// Life cycle of one copied item, logged as it advances.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ItemState {
    Pending,
    ResolvingCapabilities,
    NativeCopy,
    StreamCopy,
    Verified,
    Done,
    Failed,
}

impl fmt::Display for ItemState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Ranged reads of a remote file, used as a multipart upload body.
struct RemoteSource {
    read: Arc<dyn ReadFeature>,
    path: Path,
    length: u64,
}

#[async_trait]
impl LocalSource for RemoteSource {
    async fn len(&self) -> Result<u64> {
        Ok(self.length)
    }

    async fn read_range(&self, offset: u64, length: u64) -> Result<Bytes> {
        let body = read_to_end(self.read.read(&self.path, ByteRange::new(offset, length)).await?).await?;
        if body.len() as u64 != length {
            return Err(StorageError::interoperability(
                "read range",
                &self.path,
                format!("expected {length} bytes at {offset}, got {}", body.len()),
            ));
        }
        Ok(Bytes::from(body))
    }
}

pub struct CopyWorker {
    pairs: Vec<(Path, Path)>,
    pool: Arc<SessionPool>,
    cache: Arc<ListingCache>,
    listener: Arc<dyn ProgressListener>,
    callback: Arc<dyn ConnectionCallback>,
    policy: FailurePolicy,
    interrupt: Interrupt,
    multipart: MultipartPreferences,
}

impl CopyWorker {
    /// Copy each `(source, target)` pair; targets are written through
    /// sessions borrowed from `pool`.
    pub fn new(
        pairs: Vec<(Path, Path)>,
        pool: Arc<SessionPool>,
        cache: Arc<ListingCache>,
        listener: Arc<dyn ProgressListener>,
        callback: Arc<dyn ConnectionCallback>,
    ) -> Self {
        Self {
            pairs,
            pool,
            cache,
            listener,
            callback,
            policy: FailurePolicy::default(),
            interrupt: Interrupt::new(),
            multipart: MultipartPreferences::default(),
        }
    }

    #[must_use]
    pub fn with_policy(mut self, policy: FailurePolicy) -> Self {
        self.policy = policy;
        self
    }

    #[must_use]
    pub fn with_interrupt(mut self, interrupt: Interrupt) -> Self {
        self.interrupt = interrupt;
        self
    }

    #[must_use]
    pub fn with_preferences(mut self, preferences: &Preferences) -> Self {
        self.multipart = preferences.multipart.clone();
        self.policy = preferences.transfer.failure_policy;
        self
    }

    #[instrument(level = "info", skip(self, source), fields(items = self.pairs.len(), host = source.host()))]
    pub async fn run(&self, source: &Session) -> Result<TransferReport> {
        let mut items = futures::stream::iter(self.pairs.iter())
            .map(|(from, to)| self.copy_top_level(source, from, to))
            .buffer_unordered(self.pool.capacity());

        let mut report = TransferReport::default();
        while let Some(result) = items.next().await {
            report.extend(result?);
        }
        info!(
            outcomes = report.outcomes.len(),
            failures = report.failures().count(),
            "Copy finished"
        );
        Ok(report)
    }

    async fn copy_top_level(&self, source: &Session, from: &Path, to: &Path) -> Result<TransferReport> {
        let target = self.pool.borrow(Some(&self.interrupt)).await?;
        let mut report = TransferReport::default();
        self.copy_item(source, &target, from, to, false, &mut report).await?;
        Ok(report)
    }

    /// Copy one item. Failures are either recorded (`Continue`) or returned.
    fn copy_item<'a>(
        &'a self,
        source: &'a Session,
        target: &'a Session,
        from: &'a Path,
        to: &'a Path,
        raw: bool,
        report: &'a mut TransferReport,
    ) -> BoxFuture<'a, Result<()>> {
        async move {
            trace!(source = %from, target = %to, state = %ItemState::Pending);
            self.listener.item_started(from);

            let result = if from.is_directory() {
                self.copy_directory(source, target, from, to, raw, report).await
            } else {
                self.copy_file(source, target, from, to, raw).await.map(|method| {
                    report.push(ItemOutcome::Copied {
                        source: from.clone(),
                        target: to.clone(),
                        method,
                    });
                })
            };
            self.cache.invalidate_subtree(to);
            self.listener.item_finished(from, &result);

            match result {
                Ok(()) => {
                    trace!(source = %from, target = %to, state = %ItemState::Done);
                    Ok(())
                }
                Err(error) => {
                    warn!(source = %from, target = %to, state = %ItemState::Failed, %error, "Copy failed");
                    if error.is_canceled() || self.policy == FailurePolicy::Abort {
                        return Err(error);
                    }
                    report.push(ItemOutcome::Failed {
                        path: from.clone(),
                        error,
                    });
                    Ok(())
                }
            }
        }
        .boxed()
    }

    async fn resolve_source(&self, source: &Session, path: &Path, raw: bool) -> Result<ResolvedCapabilities> {
        if raw {
            return Ok(ResolvedCapabilities {
                domain: Domain::Plain,
                table: source.native().clone(),
            });
        }
        source.resolve(path).await
    }

    async fn copy_directory(
        &self,
        source: &Session,
        target: &Session,
        from: &Path,
        to: &Path,
        raw: bool,
        report: &mut TransferReport,
    ) -> Result<()> {
        self.interrupt.check()?;
        if source.host() == target.host() && (to.starts_with(from) || from.starts_with(to)) {
            return Err(StorageError::interoperability(
                "copy directory",
                to,
                format!("{to} and {from} overlap"),
            ));
        }
        trace!(source = %from, state = %ItemState::ResolvingCapabilities);
        // Below a vault root seen from outside, only ciphertext is copied.
        let raw = raw || source.vaults().find_root(from).is_some();
        let src = self.resolve_source(source, from, raw).await?;
        let dst = target.resolve(to).await?;

        let status = TransferStatus::new().with_interrupt(self.interrupt.clone());
        mkdir_if_missing(dst.table.directory()?.as_ref(), to, &status).await?;
        let children = self
            .cache
            .list(&src.domain.namespace(), src.table.list()?.as_ref(), from)
            .await?;
        debug!(source = %from, children = children.len(), "Copying directory");

        let targets: Vec<Path> = children
            .iter()
            .map(|child| to.child(child.name(), child.types()))
            .collect();
        if dst.table.supports(CapabilityKind::Bulk) {
            let files: Vec<Path> = targets.iter().filter(|t| t.is_file()).cloned().collect();
            dst.table.bulk()?.pre(&files).await?;
        }
        for (child, child_target) in children.iter().zip(&targets) {
            self.copy_item(source, target, child, child_target, raw, report).await?;
        }
        report.push(ItemOutcome::Copied {
            source: from.clone(),
            target: to.clone(),
            method: CopyMethod::Directory,
        });
        Ok(())
    }

    async fn copy_file(
        &self,
        source: &Session,
        target: &Session,
        from: &Path,
        to: &Path,
        raw: bool,
    ) -> Result<CopyMethod> {
        self.interrupt.check()?;
        trace!(source = %from, state = %ItemState::ResolvingCapabilities);
        let src = self.resolve_source(source, from, raw).await?;
        let dst = target.resolve(to).await?;

        let exists = dst.table.find()?.exists(to).await?;
        if exists {
            self.callback
                .warn(to, &format!("{to} exists and will be overwritten"))
                .await?;
        }
        let status = TransferStatus::new()
            .with_interrupt(self.interrupt.clone())
            .with_exists(exists);

        let native = source.host() == target.host()
            && src.domain.same_as(&dst.domain)
            && dst.table.supports(CapabilityKind::Copy);
        let method = if native {
            trace!(source = %from, state = %ItemState::NativeCopy);
            dst.table.copy()?.copy(from, to, &status).await?;
            CopyMethod::Native
        } else {
            trace!(source = %from, state = %ItemState::StreamCopy);
            self.stream_copy(&src, &dst, from, to, status).await?
        };

        if !dst.table.find()?.exists(&to.clone().with_types(PathTypes::FILE)).await? {
            return Err(StorageError::interoperability("copy", to, "target missing after copy"));
        }
        trace!(target = %to, state = %ItemState::Verified);
        debug!(source = %from, target = %to, ?method, "Copied file");
        Ok(method)
    }

    /// Size of `path`, from its attributes or from the cached parent listing.
    async fn source_size(&self, src: &ResolvedCapabilities, path: &Path) -> Result<Option<u64>> {
        if let Some(size) = path.attributes().size {
            return Ok(Some(size));
        }
        let Some(parent) = path.parent() else {
            return Ok(None);
        };
        let siblings = self
            .cache
            .list(&src.domain.namespace(), src.table.list()?.as_ref(), &parent)
            .await?;
        Ok(siblings
            .iter()
            .find(|sibling| sibling.eq_ignoring_version(path))
            .and_then(|sibling| sibling.attributes().size))
    }

    async fn stream_copy(
        &self,
        src: &ResolvedCapabilities,
        dst: &ResolvedCapabilities,
        from: &Path,
        to: &Path,
        status: TransferStatus,
    ) -> Result<CopyMethod> {
        let size = self.source_size(src, from).await?;
        let read = src.table.read()?;

        if let Some(length) = size
            && length >= self.multipart.threshold
            && dst.table.supports(CapabilityKind::Multipart)
        {
            let body = Arc::new(RemoteSource {
                read,
                path: from.clone(),
                length,
            });
            MultipartUploader::new(dst.table.clone(), &self.multipart)
                .upload(to, body, &status.with_length(length))
                .await?;
            self.listener.bytes_transferred(from, length);
            return Ok(CopyMethod::Multipart);
        }

        let status = status.with_length(size.unwrap_or_default());
        let mut body = read.read(from, ByteRange::all()).await?;
        let mut sink = dst.table.write()?.write(to, &status).await?;
        while let Some(piece) = body.next().await {
            self.interrupt.check()?;
            let piece = piece?;
            status.add_transferred(piece.len() as u64);
            self.listener.bytes_transferred(from, piece.len() as u64);
            sink.write(piece).await?;
        }
        sink.close().await?;
        Ok(CopyMethod::Stream)
    }
}
