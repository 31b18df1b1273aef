//! Recursive delete, children before parents.

use std::sync::Arc;

use futures::FutureExt;
use futures::future::BoxFuture;
use tracing::{debug, info, instrument, warn};

use crate::backend::{Domain, ResolvedCapabilities, Session};
use crate::error::Result;
use crate::path::Path;

use super::cache::ListingCache;
use super::listener::{LoginCallback, ProgressListener};
use super::report::{FailurePolicy, ItemOutcome, TransferReport};
use super::status::Interrupt;

/// One path to delete. `raw` entries lie below a vault root being deleted as
/// a whole and are removed as ciphertext.
struct Doomed {
    path: Path,
    raw: bool,
}

pub struct DeleteWorker {
    login: Arc<dyn LoginCallback>,
    paths: Vec<Path>,
    cache: Arc<ListingCache>,
    listener: Arc<dyn ProgressListener>,
    policy: FailurePolicy,
    interrupt: Interrupt,
}

impl DeleteWorker {
    pub fn new(
        login: Arc<dyn LoginCallback>,
        paths: Vec<Path>,
        cache: Arc<ListingCache>,
        listener: Arc<dyn ProgressListener>,
    ) -> Self {
        Self {
            login,
            paths,
            cache,
            listener,
            policy: FailurePolicy::default(),
            interrupt: Interrupt::new(),
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

    #[instrument(level = "info", skip(self, session), fields(paths = self.paths.len(), host = session.host()))]
    pub async fn run(&self, session: &Session) -> Result<TransferReport> {
        let mut report = TransferReport::default();
        for path in &self.paths {
            self.interrupt.check()?;

            let vaults = session.vaults().roots_within(path);
            for vault in &vaults {
                self.login
                    .warn(vault.root(), &format!("Vault {} and all its contents will be deleted", vault.root()))
                    .await?;
            }

            let mut doomed = Vec::new();
            if let Err(error) = self.compile(session, path, false, &mut doomed).await {
                warn!(path = %path, %error, "Listing for delete failed");
                if error.is_canceled() || self.policy == FailurePolicy::Abort {
                    return Err(error);
                }
                report.push(ItemOutcome::Failed {
                    path: path.clone(),
                    error,
                });
                continue;
            }
            debug!(path = %path, items = doomed.len(), "Compiled delete list");

            for item in &doomed {
                self.interrupt.check()?;
                self.listener.item_started(&item.path);
                let result = self.delete_one(session, item).await;
                self.listener.item_finished(&item.path, &result);
                match result {
                    Ok(()) => report.push(ItemOutcome::Deleted { path: item.path.clone() }),
                    Err(error) => {
                        warn!(path = %item.path, %error, "Delete failed");
                        if error.is_canceled() || self.policy == FailurePolicy::Abort {
                            self.cache.invalidate_subtree(path);
                            return Err(error);
                        }
                        report.push(ItemOutcome::Failed {
                            path: item.path.clone(),
                            error,
                        });
                    }
                }
            }
            self.cache.invalidate_subtree(path);

            for vault in vaults {
                session.vaults().remove(vault.root());
                vault.lock();
                info!(root = %vault.root(), "Deleted vault");
            }
        }
        Ok(report)
    }

    async fn capabilities(&self, session: &Session, path: &Path, raw: bool) -> Result<ResolvedCapabilities> {
        if raw {
            Ok(ResolvedCapabilities {
                domain: Domain::Plain,
                table: session.native().clone(),
            })
        } else {
            session.resolve(path).await
        }
    }

    /// Append `path` and everything below it to `out`, children first.
    fn compile<'a>(
        &'a self,
        session: &'a Session,
        path: &'a Path,
        raw: bool,
        out: &'a mut Vec<Doomed>,
    ) -> BoxFuture<'a, Result<()>> {
        async move {
            if path.is_directory() {
                let caps = self.capabilities(session, path, raw).await?;
                let children = self
                    .cache
                    .list(&caps.domain.namespace(), caps.table.list()?.as_ref(), path)
                    .await?;
                let raw_children = raw || session.vaults().find_root(path).is_some();
                for child in &children {
                    self.compile(session, child, raw_children, out).await?;
                }
            }
            out.push(Doomed {
                path: path.clone(),
                raw,
            });
            Ok(())
        }
        .boxed()
    }

    async fn delete_one(&self, session: &Session, item: &Doomed) -> Result<()> {
        let caps = self.capabilities(session, &item.path, item.raw).await?;
        caps.table.delete()?.delete(std::slice::from_ref(&item.path)).await
    }
}
