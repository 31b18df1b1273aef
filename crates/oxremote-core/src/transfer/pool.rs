//! Bounded pool of sessions to one backend host.

use std::fmt;
use std::ops::Deref;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::{OwnedSemaphorePermit, Semaphore, TryAcquireError};
use tracing::{debug, trace};

use crate::backend::Session;
use crate::config::PoolPreferences;
use crate::error::{Result, StorageError};

use super::status::Interrupt;

/// Opens new sessions to one host.
#[async_trait]
pub trait SessionFactory: Send + Sync {
    /// Host identity of the sessions this factory creates.
    fn target(&self) -> &str;

    async fn connect(&self) -> Result<Session>;
}

/// Factory handing out clones of one session.
struct SharedSession(Session);

#[async_trait]
impl SessionFactory for SharedSession {
    fn target(&self) -> &str {
        self.0.host()
    }

    async fn connect(&self) -> Result<Session> {
        Ok(self.0.clone())
    }
}

/// At most `capacity` sessions are checked out at once. Sessions are created
/// lazily and reused after check-in.
pub struct SessionPool {
    factory: Arc<dyn SessionFactory>,
    capacity: usize,
    permits: Arc<Semaphore>,
    idle: Arc<Mutex<Vec<Session>>>,
}

impl SessionPool {
    pub fn new(factory: Arc<dyn SessionFactory>, capacity: usize) -> Arc<Self> {
        let capacity = capacity.max(1);
        Arc::new(Self {
            factory,
            capacity,
            permits: Arc::new(Semaphore::new(capacity)),
            idle: Arc::new(Mutex::new(Vec::new())),
        })
    }

    /// Pool sized by the `[pool]` preferences.
    pub fn from_preferences(factory: Arc<dyn SessionFactory>, preferences: &PoolPreferences) -> Arc<Self> {
        debug!(host = factory.target(), capacity = preferences.capacity, "Creating session pool");
        Self::new(factory, preferences.capacity)
    }

    /// Pool of capacity one around an existing session.
    pub fn single(session: Session) -> Arc<Self> {
        Self::new(Arc::new(SharedSession(session)), 1)
    }

    /// Pool over clones of `session`, allowing `capacity` concurrent borrowers.
    pub fn shared(session: Session, capacity: usize) -> Arc<Self> {
        Self::new(Arc::new(SharedSession(session)), capacity)
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Sessions that can be borrowed without waiting.
    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }

    pub fn target(&self) -> &str {
        self.factory.target()
    }

    /// Check out a session, waiting for one to be returned when the pool is
    /// at capacity. Fails with `Canceled` if `interrupt` fires first.
    pub async fn borrow(&self, interrupt: Option<&Interrupt>) -> Result<PooledSession> {
        let acquire = self.permits.clone().acquire_owned();
        let permit = match interrupt {
            Some(interrupt) => tokio::select! {
                biased;
                () = interrupt.interrupted() => return Err(StorageError::Canceled),
                permit = acquire => permit,
            },
            None => acquire.await,
        }
        .map_err(|e| StorageError::TaskFailed { reason: e.to_string() })?;
        self.checkout(permit).await
    }

    /// Check out a session without waiting.
    pub async fn try_borrow(&self) -> Result<PooledSession> {
        let permit = self.permits.clone().try_acquire_owned().map_err(|e| match e {
            TryAcquireError::NoPermits => StorageError::PoolExhausted {
                host: self.target().to_string(),
                capacity: self.capacity,
            },
            TryAcquireError::Closed => StorageError::TaskFailed { reason: e.to_string() },
        })?;
        self.checkout(permit).await
    }

    async fn checkout(&self, permit: OwnedSemaphorePermit) -> Result<PooledSession> {
        let idle = self.idle.lock().pop();
        let session = match idle {
            Some(session) => {
                trace!(host = self.target(), "Reusing pooled session");
                session
            }
            None => {
                debug!(host = self.target(), "Opening pooled session");
                self.factory.connect().await?
            }
        };
        Ok(PooledSession {
            session: Some(session),
            idle: self.idle.clone(),
            _permit: permit,
        })
    }
}

impl fmt::Debug for SessionPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionPool")
            .field("target", &self.target())
            .field("capacity", &self.capacity)
            .field("available", &self.available())
            .finish()
    }
}

/// A checked-out session. Returns to the pool on drop.
pub struct PooledSession {
    session: Option<Session>,
    idle: Arc<Mutex<Vec<Session>>>,
    // Released after the session is back in the idle list.
    _permit: OwnedSemaphorePermit,
}

impl Deref for PooledSession {
    type Target = Session;

    fn deref(&self) -> &Session {
        // Only taken in `drop`.
        self.session.as_ref().unwrap_or_else(|| unreachable!())
    }
}

impl Drop for PooledSession {
    fn drop(&mut self) {
        if let Some(session) = self.session.take() {
            self.idle.lock().push(session);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::memory::MemoryBackend;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct CountingFactory {
        connects: AtomicUsize,
    }

    #[async_trait]
    impl SessionFactory for CountingFactory {
        fn target(&self) -> &str {
            "mem"
        }

        async fn connect(&self) -> Result<Session> {
            self.connects.fetch_add(1, Ordering::SeqCst);
            Ok(Session::new(MemoryBackend::new("mem").capabilities()))
        }
    }

    #[tokio::test]
    async fn test_sessions_are_reused() {
        let factory = Arc::new(CountingFactory { connects: AtomicUsize::new(0) });
        let pool = SessionPool::new(factory.clone(), 2);
        drop(pool.borrow(None).await.unwrap());
        drop(pool.borrow(None).await.unwrap());
        assert_eq!(factory.connects.load(Ordering::SeqCst), 1);

        let a = pool.borrow(None).await.unwrap();
        let b = pool.borrow(None).await.unwrap();
        assert_eq!(factory.connects.load(Ordering::SeqCst), 2);
        assert_eq!(pool.available(), 0);
        drop((a, b));
        assert_eq!(pool.available(), 2);
    }

    #[tokio::test]
    async fn test_capacity_from_preferences() {
        let preferences = crate::config::Preferences::from_toml_str("[pool]\ncapacity = 3\n").unwrap();
        let factory = Arc::new(CountingFactory { connects: AtomicUsize::new(0) });
        let pool = SessionPool::from_preferences(factory, &preferences.pool);
        assert_eq!(pool.capacity(), 3);

        let held: Vec<_> = futures::future::try_join_all((0..3).map(|_| pool.borrow(None)))
            .await
            .unwrap();
        assert_eq!(pool.available(), 0);
        assert!(matches!(
            pool.try_borrow().await,
            Err(StorageError::PoolExhausted { capacity: 3, .. })
        ));
        drop(held);
        assert_eq!(pool.available(), 3);
    }

    #[tokio::test]
    async fn test_try_borrow_fails_fast_at_capacity() {
        let pool = SessionPool::single(Session::new(MemoryBackend::new("mem").capabilities()));
        let held = pool.try_borrow().await.unwrap();
        assert!(matches!(
            pool.try_borrow().await,
            Err(StorageError::PoolExhausted { capacity: 1, .. })
        ));
        drop(held);
        assert!(pool.try_borrow().await.is_ok());
    }

    #[tokio::test]
    async fn test_borrow_waits_and_can_be_interrupted() {
        let pool = SessionPool::single(Session::new(MemoryBackend::new("mem").capabilities()));
        let held = pool.borrow(None).await.unwrap();

        let interrupt = Interrupt::new();
        let waiter = {
            let pool = pool.clone();
            let interrupt = interrupt.clone();
            tokio::spawn(async move { pool.borrow(Some(&interrupt)).await.map(|_| ()) })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!waiter.is_finished());
        interrupt.interrupt();
        assert!(waiter.await.unwrap().unwrap_err().is_canceled());
        drop(held);
    }
}
