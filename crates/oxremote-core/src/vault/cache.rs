//! Caches of deterministic vault computations.
//!
//! Encrypted names never change for a given (directory id, name) pair, so
//! they are cached without invalidation. Directory ids are cached by
//! cleartext path and must be evicted when a subtree is deleted.

use dashmap::DashMap;

use super::path::DirId;

type EncryptedNameKey = (String, String);

#[derive(Debug, Default)]
pub struct VaultCache {
    encrypted_names: DashMap<EncryptedNameKey, String>,
    dir_ids: DashMap<String, DirId>,
}

impl VaultCache {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn get_encrypted_name(&self, dir_id: &DirId, name: &str) -> Option<String> {
        let key = (dir_id.as_str().to_string(), name.to_string());
        self.encrypted_names.get(&key).map(|v| v.clone())
    }

    #[inline]
    pub fn insert_encrypted_name(&self, dir_id: &DirId, name: &str, encrypted: String) {
        let key = (dir_id.as_str().to_string(), name.to_string());
        self.encrypted_names.insert(key, encrypted);
    }

    #[inline]
    pub fn get_dir_id(&self, path: &str) -> Option<DirId> {
        self.dir_ids.get(path).map(|v| v.clone())
    }

    #[inline]
    pub fn insert_dir_id(&self, path: &str, dir_id: DirId) {
        self.dir_ids.insert(path.to_string(), dir_id);
    }

    /// Forget the ids of `path` and everything below it.
    pub fn evict_subtree(&self, path: &str) {
        let prefix = format!("{}/", path.trim_end_matches('/'));
        self.dir_ids
            .retain(|cached, _| cached != path && !cached.starts_with(&prefix));
    }

    pub fn clear(&self) {
        self.encrypted_names.clear();
        self.dir_ids.clear();
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            encrypted_name_entries: self.encrypted_names.len(),
            dir_id_entries: self.dir_ids.len(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    pub encrypted_name_entries: usize,
    pub dir_id_entries: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encrypted_name_cache() {
        let cache = VaultCache::new();
        let dir = DirId::from_raw("dir1");
        assert_eq!(cache.get_encrypted_name(&dir, "file.txt"), None);
        cache.insert_encrypted_name(&dir, "file.txt", "enc".to_string());
        assert_eq!(cache.get_encrypted_name(&dir, "file.txt").as_deref(), Some("enc"));
        assert_eq!(cache.get_encrypted_name(&DirId::root(), "file.txt"), None);
    }

    #[test]
    fn test_evict_subtree_spares_siblings() {
        let cache = VaultCache::new();
        cache.insert_dir_id("/v/a", DirId::from_raw("1"));
        cache.insert_dir_id("/v/a/b", DirId::from_raw("2"));
        cache.insert_dir_id("/v/ab", DirId::from_raw("3"));

        cache.evict_subtree("/v/a");
        assert_eq!(cache.get_dir_id("/v/a"), None);
        assert_eq!(cache.get_dir_id("/v/a/b"), None);
        assert_eq!(cache.get_dir_id("/v/ab"), Some(DirId::from_raw("3")));
        assert_eq!(cache.stats().dir_id_entries, 1);
    }
}
