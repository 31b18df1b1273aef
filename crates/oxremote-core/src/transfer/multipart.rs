//! Multipart upload orchestration.
//!
//! A body is cut into parts of equal size (the last one shorter), parts are
//! uploaded concurrently up to a ceiling, and the upload is completed with
//! the part list in ascending order. With `status.append`, an in-progress
//! upload for the same target is resumed: parts whose numbers the backend
//! already lists are skipped.
//!
//! A failed or interrupted upload is left in place on the backend so a later
//! run can resume it.

use std::collections::BTreeMap;
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::Semaphore;
use tokio::task::{JoinError, JoinSet};
use tracing::{Instrument, debug, info, instrument, trace, warn};

use crate::backend::{CapabilityTable, MultipartPart, write_all};
use crate::config::MultipartPreferences;
use crate::error::{Result, StorageError};
use crate::path::Path;

use super::local::LocalSource;
use super::status::TransferStatus;

/// Most parts a single upload may have.
pub const MAXIMUM_UPLOAD_PARTS: u64 = 10_000;

/// Part size for a body of `length` bytes.
///
/// At least `configured`, large enough to stay within
/// [`MAXIMUM_UPLOAD_PARTS`], and rounded up to a multiple of `alignment`.
pub fn part_size_for(length: u64, configured: u64, alignment: u64) -> u64 {
    let alignment = alignment.max(1);
    let size = length.div_ceil(MAXIMUM_UPLOAD_PARTS).max(configured).max(1);
    size.div_ceil(alignment) * alignment
}

pub struct MultipartUploader {
    table: CapabilityTable,
    part_size: u64,
    concurrency: usize,
}

impl MultipartUploader {
    /// Uploader using the Multipart capability of `table`, which may be a
    /// vault's decorated table.
    pub fn new(table: CapabilityTable, preferences: &MultipartPreferences) -> Self {
        Self {
            table,
            part_size: preferences.part_size,
            concurrency: preferences.concurrency.max(1),
        }
    }

    #[must_use]
    pub fn with_part_size(mut self, part_size: u64) -> Self {
        self.part_size = part_size.max(1);
        self
    }

    #[must_use]
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Upload `source` to `path` and return the checksum of the stored object.
    ///
    /// The checksum is also recorded on `status`.
    #[instrument(level = "info", skip(self, source, status), fields(path = %path))]
    pub async fn upload(
        &self,
        path: &Path,
        source: Arc<dyn LocalSource>,
        status: &TransferStatus,
    ) -> Result<String> {
        let interrupt = status.interrupt().clone();
        interrupt.check()?;
        let length = source.len().await?;
        let status = status.clone().with_length(length);

        if length == 0 {
            let attributes = write_all(self.table.write()?.as_ref(), path, Bytes::new(), &status).await?;
            let checksum = attributes.checksum.unwrap_or_default();
            status.set_checksum(checksum.clone());
            debug!(path = %path, "Wrote empty object without multipart");
            return Ok(checksum);
        }

        let multipart = self.table.multipart()?;
        let mut completed: BTreeMap<u32, MultipartPart> = BTreeMap::new();
        let existing = if status.append {
            multipart.find(path, &status).await?
        } else {
            None
        };
        let upload = match existing {
            Some(upload) => {
                for part in multipart.list_parts(&upload).await? {
                    completed.insert(part.number, part);
                }
                info!(upload = %upload.id, parts = completed.len(), "Resuming multipart upload");
                upload
            }
            None => multipart.start(path, &status).await?,
        };

        let part_size = part_size_for(length, self.part_size, multipart.part_alignment());
        let planned = u32::try_from(length.div_ceil(part_size)).map_err(|_| {
            StorageError::interoperability("plan multipart upload", path, "too many parts")
        })?;
        completed.retain(|number, _| *number <= planned);
        debug!(length, part_size, planned, skipped = completed.len(), "Planned multipart upload");

        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let mut tasks: JoinSet<Result<MultipartPart>> = JoinSet::new();
        let mut offset = 0u64;
        for number in 1..=planned {
            let len = part_size.min(length - offset);
            let part_offset = offset;
            offset += len;

            if completed.contains_key(&number) {
                trace!(number, "Skipping uploaded part");
                status.add_transferred(len);
                continue;
            }

            let permit = tokio::select! {
                biased;
                () = interrupt.interrupted() => return Err(StorageError::Canceled),
                permit = semaphore.clone().acquire_owned() => permit.map_err(|e| StorageError::TaskFailed {
                    reason: e.to_string(),
                })?,
            };
            while let Some(joined) = tasks.try_join_next() {
                let part = flatten(joined)?;
                completed.insert(part.number, part);
            }

            let multipart = multipart.clone();
            let upload = upload.clone();
            let source = source.clone();
            let status = status.clone();
            let span = tracing::debug_span!("upload_part", number, offset = part_offset, len);
            tasks.spawn(
                async move {
                    let _permit = permit;
                    status.interrupt().check()?;
                    let data = source.read_range(part_offset, len).await?;
                    let part = multipart
                        .upload_part(&upload, number, part_offset, data, &status)
                        .await?;
                    status.add_transferred(len);
                    trace!(etag = %part.etag, "Uploaded part");
                    Ok(part)
                }
                .instrument(span),
            );
        }

        loop {
            let joined = tokio::select! {
                biased;
                () = interrupt.interrupted() => {
                    tasks.abort_all();
                    warn!(upload = %upload.id, "Multipart upload interrupted");
                    return Err(StorageError::Canceled);
                }
                joined = tasks.join_next() => joined,
            };
            match joined {
                Some(joined) => {
                    let part = flatten(joined)?;
                    completed.insert(part.number, part);
                }
                None => break,
            }
        }

        let parts: Vec<MultipartPart> = completed.into_values().collect();
        for (expected, part) in (1u32..).zip(&parts) {
            if part.number != expected {
                return Err(StorageError::interoperability(
                    "complete multipart upload",
                    path,
                    format!("part {expected} missing before part {}", part.number),
                ));
            }
        }
        if parts.len() != planned as usize {
            return Err(StorageError::interoperability(
                "complete multipart upload",
                path,
                format!("{} of {planned} parts uploaded", parts.len()),
            ));
        }

        let attributes = multipart.complete(&upload, &parts, &status).await?;
        let checksum = attributes.checksum.ok_or_else(|| {
            StorageError::interoperability("complete multipart upload", path, "backend returned no checksum")
        })?;
        status.set_checksum(checksum.clone());
        info!(upload = %upload.id, parts = parts.len(), checksum = %checksum, "Completed multipart upload");
        Ok(checksum)
    }
}

fn flatten(joined: std::result::Result<Result<MultipartPart>, JoinError>) -> Result<MultipartPart> {
    match joined {
        Ok(result) => result,
        Err(e) if e.is_cancelled() => Err(StorageError::Canceled),
        Err(e) => Err(StorageError::TaskFailed { reason: e.to_string() }),
    }
}
