//! Directory listing cache shared by workers.
//!
//! Keys carry the encryption domain so a vault's cleartext listing and the
//! ciphertext listing of the same backend path never collide.

use dashmap::DashMap;
use tracing::trace;

use crate::backend::ListFeature;
use crate::error::Result;
use crate::path::Path;

type ListingKey = (String, String);

#[derive(Debug, Default)]
pub struct ListingCache {
    listings: DashMap<ListingKey, Vec<Path>>,
}

impl ListingCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, namespace: &str, directory: &Path) -> Option<Vec<Path>> {
        self.listings
            .get(&(namespace.to_string(), directory.as_str().to_string()))
            .map(|children| children.clone())
    }

    pub fn put(&self, namespace: &str, directory: &Path, children: Vec<Path>) {
        self.listings
            .insert((namespace.to_string(), directory.as_str().to_string()), children);
    }

    /// Forget the listing of `directory` in every namespace.
    pub fn invalidate(&self, directory: &Path) {
        self.listings.retain(|(_, dir), _| dir != directory.as_str());
    }

    /// Forget listings of `path`, its descendants and its parent, in every
    /// namespace.
    pub fn invalidate_subtree(&self, path: &Path) {
        let prefix = format!("{}/", path.as_str().trim_end_matches('/'));
        let parent = path.parent();
        self.listings.retain(|(_, dir), _| {
            let affected = dir == path.as_str()
                || (!path.is_root() && dir.starts_with(&prefix))
                || path.is_root()
                || parent.as_ref().is_some_and(|p| p.as_str() == dir);
            !affected
        });
        trace!(path = %path, "Invalidated cached listings");
    }

    /// Listing of `directory` from the cache, or from `feature` on a miss.
    pub async fn list(&self, namespace: &str, feature: &dyn ListFeature, directory: &Path) -> Result<Vec<Path>> {
        if let Some(hit) = self.get(namespace, directory) {
            trace!(directory = %directory, "Listing cache hit");
            return Ok(hit);
        }
        let children = feature.list(directory).await?;
        self.put(namespace, directory, children.clone());
        Ok(children)
    }

    pub fn len(&self) -> usize {
        self.listings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.listings.is_empty()
    }
}
