use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::error::{Result, StorageError};

use super::{
    BulkFeature, CopyFeature, DeleteFeature, DirectoryFeature, FindFeature, ListFeature,
    LocationFeature, MultipartFeature, ReadFeature, TouchFeature, WriteFeature,
};

/// Closed set of capability tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum CapabilityKind {
    Read,
    Write,
    Directory,
    Delete,
    Find,
    Touch,
    Copy,
    List,
    Location,
    Bulk,
    Multipart,
}

impl fmt::Display for CapabilityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// A capability implementation tagged with its kind.
#[derive(Clone)]
pub enum Capability {
    Read(Arc<dyn ReadFeature>),
    Write(Arc<dyn WriteFeature>),
    Directory(Arc<dyn DirectoryFeature>),
    Delete(Arc<dyn DeleteFeature>),
    Find(Arc<dyn FindFeature>),
    Touch(Arc<dyn TouchFeature>),
    Copy(Arc<dyn CopyFeature>),
    List(Arc<dyn ListFeature>),
    Location(Arc<dyn LocationFeature>),
    Bulk(Arc<dyn BulkFeature>),
    Multipart(Arc<dyn MultipartFeature>),
}

impl Capability {
    pub fn kind(&self) -> CapabilityKind {
        match self {
            Capability::Read(_) => CapabilityKind::Read,
            Capability::Write(_) => CapabilityKind::Write,
            Capability::Directory(_) => CapabilityKind::Directory,
            Capability::Delete(_) => CapabilityKind::Delete,
            Capability::Find(_) => CapabilityKind::Find,
            Capability::Touch(_) => CapabilityKind::Touch,
            Capability::Copy(_) => CapabilityKind::Copy,
            Capability::List(_) => CapabilityKind::List,
            Capability::Location(_) => CapabilityKind::Location,
            Capability::Bulk(_) => CapabilityKind::Bulk,
            Capability::Multipart(_) => CapabilityKind::Multipart,
        }
    }
}

/// Capabilities of one session (or of one vault on top of it).
///
/// Lookups of a tag the table does not carry fail with
/// [`StorageError::Unsupported`] instead of probing the implementation.
#[derive(Clone)]
pub struct CapabilityTable {
    host: String,
    entries: HashMap<CapabilityKind, Capability>,
}

macro_rules! typed_lookup {
    ($(#[$doc:meta])* $name:ident, $variant:ident, $feature:ident) => {
        $(#[$doc])*
        pub fn $name(&self) -> Result<Arc<dyn $feature>> {
            match self.entries.get(&CapabilityKind::$variant) {
                Some(Capability::$variant(feature)) => Ok(Arc::clone(feature)),
                _ => Err(self.unsupported(CapabilityKind::$variant)),
            }
        }
    };
}

impl CapabilityTable {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            entries: HashMap::new(),
        }
    }

    #[must_use]
    pub fn with(mut self, capability: Capability) -> Self {
        self.insert(capability);
        self
    }

    /// Register `capability`, replacing any previous entry of the same kind.
    pub fn insert(&mut self, capability: Capability) {
        self.entries.insert(capability.kind(), capability);
    }

    pub fn remove(&mut self, kind: CapabilityKind) -> Option<Capability> {
        self.entries.remove(&kind)
    }

    #[inline]
    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn supports(&self, kind: CapabilityKind) -> bool {
        self.entries.contains_key(&kind)
    }

    pub fn get(&self, kind: CapabilityKind) -> Option<&Capability> {
        self.entries.get(&kind)
    }

    pub fn kinds(&self) -> impl Iterator<Item = CapabilityKind> + '_ {
        self.entries.keys().copied()
    }

    fn unsupported(&self, capability: CapabilityKind) -> StorageError {
        StorageError::Unsupported {
            capability,
            host: self.host.clone(),
        }
    }

    typed_lookup!(read, Read, ReadFeature);
    typed_lookup!(write, Write, WriteFeature);
    typed_lookup!(directory, Directory, DirectoryFeature);
    typed_lookup!(delete, Delete, DeleteFeature);
    typed_lookup!(find, Find, FindFeature);
    typed_lookup!(touch, Touch, TouchFeature);
    typed_lookup!(copy, Copy, CopyFeature);
    typed_lookup!(list, List, ListFeature);
    typed_lookup!(location, Location, LocationFeature);
    typed_lookup!(bulk, Bulk, BulkFeature);
    typed_lookup!(multipart, Multipart, MultipartFeature);
}

impl fmt::Debug for CapabilityTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut kinds: Vec<_> = self.kinds().collect();
        kinds.sort();
        f.debug_struct("CapabilityTable")
            .field("host", &self.host)
            .field("kinds", &kinds)
            .finish()
    }
}
