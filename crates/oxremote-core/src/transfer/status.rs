//! Per-file transfer state and cooperative interruption.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::error::{Result, StorageError};
use crate::fs::content::ChunkedEncryptor;
use crate::path::ByteRange;

/// Cancellation handle shared by everything working on one transfer.
///
/// Clones observe the same flag.
#[derive(Clone, Default)]
pub struct Interrupt {
    inner: Arc<InterruptInner>,
}

#[derive(Default)]
struct InterruptInner {
    flag: AtomicBool,
    notify: Notify,
}

impl Interrupt {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn interrupt(&self) {
        self.inner.flag.store(true, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
    }

    #[inline]
    pub fn is_interrupted(&self) -> bool {
        self.inner.flag.load(Ordering::SeqCst)
    }

    /// Resolves once [`interrupt`](Self::interrupt) has been called.
    pub async fn interrupted(&self) {
        loop {
            let notified = self.inner.notify.notified();
            if self.is_interrupted() {
                return;
            }
            notified.await;
        }
    }

    /// `Err(Canceled)` once interrupted.
    pub fn check(&self) -> Result<()> {
        if self.is_interrupted() {
            Err(StorageError::Canceled)
        } else {
            Ok(())
        }
    }
}

impl fmt::Debug for Interrupt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Interrupt")
            .field("interrupted", &self.is_interrupted())
            .finish()
    }
}

/// State of one file transfer.
///
/// Plain fields describe the request. The transferred counter, the content
/// encryptor and the resulting checksum are shared by all clones, so a
/// retried or resumed upload that reuses the status keeps the same file
/// header and chunk bookkeeping.
#[derive(Clone, Default)]
pub struct TransferStatus {
    /// Cleartext length of the body.
    pub length: u64,
    /// Resume an in-progress upload instead of starting over.
    pub append: bool,
    pub range: ByteRange,
    /// Region for a new volume.
    pub region: Option<String>,
    /// The target already exists and will be replaced.
    pub exists: bool,
    interrupt: Interrupt,
    transferred: Arc<AtomicU64>,
    encryptor: Arc<Mutex<Option<Arc<ChunkedEncryptor>>>>,
    checksum: Arc<Mutex<Option<String>>>,
}

impl TransferStatus {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_length(mut self, length: u64) -> Self {
        self.length = length;
        self
    }

    #[must_use]
    pub fn with_append(mut self, append: bool) -> Self {
        self.append = append;
        self
    }

    #[must_use]
    pub fn with_range(mut self, range: ByteRange) -> Self {
        self.range = range;
        self
    }

    #[must_use]
    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.region = Some(region.into());
        self
    }

    #[must_use]
    pub fn with_exists(mut self, exists: bool) -> Self {
        self.exists = exists;
        self
    }

    #[must_use]
    pub fn with_interrupt(mut self, interrupt: Interrupt) -> Self {
        self.interrupt = interrupt;
        self
    }

    #[inline]
    pub fn interrupt(&self) -> &Interrupt {
        &self.interrupt
    }

    pub fn add_transferred(&self, bytes: u64) {
        self.transferred.fetch_add(bytes, Ordering::SeqCst);
    }

    pub fn transferred(&self) -> u64 {
        self.transferred.load(Ordering::SeqCst)
    }

    pub fn encryptor(&self) -> Option<Arc<ChunkedEncryptor>> {
        self.encryptor.lock().clone()
    }

    /// The shared encryptor, created by `init` on first use.
    pub fn encryptor_or_try_insert<E>(
        &self,
        init: impl FnOnce() -> std::result::Result<ChunkedEncryptor, E>,
    ) -> std::result::Result<Arc<ChunkedEncryptor>, E> {
        let mut slot = self.encryptor.lock();
        if let Some(existing) = slot.as_ref() {
            return Ok(existing.clone());
        }
        let created = Arc::new(init()?);
        *slot = Some(created.clone());
        Ok(created)
    }

    pub fn set_checksum(&self, checksum: impl Into<String>) {
        *self.checksum.lock() = Some(checksum.into());
    }

    pub fn checksum(&self) -> Option<String> {
        self.checksum.lock().clone()
    }
}

impl fmt::Debug for TransferStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransferStatus")
            .field("length", &self.length)
            .field("append", &self.append)
            .field("range", &self.range)
            .field("region", &self.region)
            .field("transferred", &self.transferred())
            .field("encrypted", &self.encryptor.lock().is_some())
            .finish_non_exhaustive()
    }
}
