//! Remote path model.
//!
//! A [`Path`] names a node in a remote hierarchy. Names are normalized to an
//! absolute, `/`-separated form without a trailing slash; the root is `/`.
//! Equality compares the normalized name and the pinned version id, while
//! [`Path::eq_ignoring_version`] compares names only.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::ops::{BitOr, BitOrAssign};
use std::time::SystemTime;

/// Type flags of a remote node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct PathTypes(u8);

impl PathTypes {
    pub const FILE: Self = Self(1);
    pub const DIRECTORY: Self = Self(1 << 1);
    /// Bucket or share root.
    pub const VOLUME: Self = Self(1 << 2);
    /// Directory created explicitly rather than implied by its children.
    pub const PLACEHOLDER: Self = Self(1 << 3);
    /// Version recording a deletion; carries no content.
    pub const DELETE_MARKER: Self = Self(1 << 4);

    #[inline]
    pub const fn empty() -> Self {
        Self(0)
    }

    #[inline]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    #[inline]
    pub fn insert(&mut self, other: Self) {
        self.0 |= other.0;
    }

    #[inline]
    pub fn remove(&mut self, other: Self) {
        self.0 &= !other.0;
    }
}

impl BitOr for PathTypes {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for PathTypes {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

/// Mutable metadata carried alongside a path.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Attributes {
    pub size: Option<u64>,
    pub modified: Option<SystemTime>,
    /// Region of the enclosing volume, when the backend is region aware.
    pub region: Option<String>,
    /// Pins the path to one object generation in a versioned backend.
    pub version_id: Option<String>,
    /// Checksum or ETag reported by the backend.
    pub checksum: Option<String>,
}

impl Attributes {
    #[must_use]
    pub fn with_size(mut self, size: u64) -> Self {
        self.size = Some(size);
        self
    }

    #[must_use]
    pub fn with_version_id(mut self, version_id: impl Into<String>) -> Self {
        self.version_id = Some(version_id.into());
        self
    }

    #[must_use]
    pub fn with_checksum(mut self, checksum: impl Into<String>) -> Self {
        self.checksum = Some(checksum.into());
        self
    }
}

/// A node in a remote hierarchy.
#[derive(Debug, Clone)]
pub struct Path {
    name: String,
    types: PathTypes,
    attributes: Attributes,
}

impl Path {
    pub fn new(name: impl AsRef<str>, types: PathTypes) -> Self {
        Self {
            name: normalize(name.as_ref()),
            types,
            attributes: Attributes::default(),
        }
    }

    pub fn file(name: impl AsRef<str>) -> Self {
        Self::new(name, PathTypes::FILE)
    }

    pub fn directory(name: impl AsRef<str>) -> Self {
        let mut path = Self::new(name, PathTypes::DIRECTORY);
        if path.depth() == 1 {
            path.types.insert(PathTypes::VOLUME);
        }
        path
    }

    pub fn root() -> Self {
        Self::new("/", PathTypes::DIRECTORY | PathTypes::VOLUME)
    }

    #[inline]
    pub fn as_str(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn is_root(&self) -> bool {
        self.name == "/"
    }

    /// Last segment, empty for the root.
    pub fn name(&self) -> &str {
        self.name.rsplit('/').next().unwrap_or_default()
    }

    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.name.split('/').filter(|s| !s.is_empty())
    }

    pub fn depth(&self) -> usize {
        self.segments().count()
    }

    pub fn parent(&self) -> Option<Path> {
        if self.is_root() {
            return None;
        }
        let cut = self.name.rfind('/').unwrap_or(0);
        Some(Path::directory(&self.name[..cut.max(1)]))
    }

    /// The volume (first segment) this path lives in.
    pub fn container(&self) -> Path {
        match self.segments().next() {
            Some(first) => Path::directory(first),
            None => Path::root(),
        }
    }

    pub fn child(&self, name: &str, types: PathTypes) -> Path {
        let joined = if self.is_root() {
            format!("/{name}")
        } else {
            format!("{}/{name}", self.name)
        };
        Path::new(joined, types)
    }

    /// Strictly below `ancestor`.
    pub fn is_child_of(&self, ancestor: &Path) -> bool {
        if ancestor.is_root() {
            return !self.is_root();
        }
        self.name.len() > ancestor.name.len()
            && self.name.starts_with(&ancestor.name)
            && self.name.as_bytes()[ancestor.name.len()] == b'/'
    }

    /// Equal to or below `ancestor`.
    pub fn starts_with(&self, ancestor: &Path) -> bool {
        self.name == ancestor.name || self.is_child_of(ancestor)
    }

    /// Segments below `ancestor`, or `None` when not below it.
    pub fn relative_to<'a>(&'a self, ancestor: &Path) -> Option<Vec<&'a str>> {
        if self.name == ancestor.name {
            return Some(Vec::new());
        }
        if !self.is_child_of(ancestor) {
            return None;
        }
        Some(self.segments().skip(ancestor.depth()).collect())
    }

    #[inline]
    pub fn types(&self) -> PathTypes {
        self.types
    }

    pub fn is_file(&self) -> bool {
        self.types.contains(PathTypes::FILE)
    }

    pub fn is_directory(&self) -> bool {
        self.types.contains(PathTypes::DIRECTORY)
    }

    pub fn is_volume(&self) -> bool {
        self.types.contains(PathTypes::VOLUME)
    }

    pub fn is_placeholder(&self) -> bool {
        self.types.contains(PathTypes::PLACEHOLDER)
    }

    pub fn is_delete_marker(&self) -> bool {
        self.types.contains(PathTypes::DELETE_MARKER)
    }

    #[inline]
    pub fn attributes(&self) -> &Attributes {
        &self.attributes
    }

    pub fn attributes_mut(&mut self) -> &mut Attributes {
        &mut self.attributes
    }

    #[must_use]
    pub fn with_attributes(mut self, attributes: Attributes) -> Self {
        self.attributes = attributes;
        self
    }

    #[must_use]
    pub fn with_types(mut self, types: PathTypes) -> Self {
        self.types = types;
        self
    }

    #[must_use]
    pub fn with_size(mut self, size: u64) -> Self {
        self.attributes.size = Some(size);
        self
    }

    #[must_use]
    pub fn with_version(mut self, version_id: impl Into<String>) -> Self {
        self.attributes.version_id = Some(version_id.into());
        self
    }

    /// Same node with the version pin dropped.
    #[must_use]
    pub fn without_version(mut self) -> Self {
        self.attributes.version_id = None;
        self
    }

    pub fn version_id(&self) -> Option<&str> {
        self.attributes.version_id.as_deref()
    }

    pub fn eq_ignoring_version(&self, other: &Path) -> bool {
        self.name == other.name
    }
}

impl PartialEq for Path {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name && self.attributes.version_id == other.attributes.version_id
    }
}

impl Eq for Path {}

impl Hash for Path {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.name.hash(state);
        self.attributes.version_id.hash(state);
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.attributes.version_id {
            Some(version) => write!(f, "{} (version {version})", self.name),
            None => f.write_str(&self.name),
        }
    }
}

fn normalize(raw: &str) -> String {
    let mut segments: Vec<&str> = Vec::new();
    for segment in raw.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            other => segments.push(other),
        }
    }
    format!("/{}", segments.join("/"))
}

/// A byte window of a file. `length == None` reads to the end.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ByteRange {
    pub offset: u64,
    pub length: Option<u64>,
}

impl ByteRange {
    pub const fn all() -> Self {
        Self { offset: 0, length: None }
    }

    pub const fn new(offset: u64, length: u64) -> Self {
        Self { offset, length: Some(length) }
    }

    pub fn is_all(&self) -> bool {
        self.offset == 0 && self.length.is_none()
    }

    /// Exclusive end of the window, clamped to `total`.
    pub fn end(&self, total: u64) -> u64 {
        match self.length {
            Some(length) => self.offset.saturating_add(length).min(total),
            None => total,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalization() {
        assert_eq!(Path::file("a/b//c/").as_str(), "/a/b/c");
        assert_eq!(Path::file("/a/./b/../c").as_str(), "/a/c");
        assert_eq!(Path::directory("").as_str(), "/");
        assert!(Path::directory("/").is_root());
    }

    #[test]
    fn test_equality_includes_version() {
        let current = Path::file("/bucket/key");
        let pinned = Path::file("/bucket/key").with_version("v1");
        assert_ne!(current, pinned);
        assert!(current.eq_ignoring_version(&pinned));
        assert_eq!(pinned, Path::directory("/bucket/key").with_version("v1"));
    }

    #[test]
    fn test_parent_and_name() {
        let path = Path::file("/bucket/dir/file.txt");
        assert_eq!(path.name(), "file.txt");
        let parent = path.parent().unwrap();
        assert_eq!(parent.as_str(), "/bucket/dir");
        assert!(parent.is_directory());
        assert_eq!(parent.parent().unwrap().as_str(), "/bucket");
        assert!(parent.parent().unwrap().is_volume());
        assert_eq!(Path::file("/top").parent().unwrap(), Path::root());
        assert!(Path::root().parent().is_none());
    }

    #[test]
    fn test_child_relations() {
        let vault = Path::directory("/bucket/vault");
        let inside = Path::file("/bucket/vault/a/b");
        assert!(inside.is_child_of(&vault));
        assert!(!vault.is_child_of(&vault));
        assert!(vault.starts_with(&vault));
        assert!(!Path::file("/bucket/vaulted").is_child_of(&vault));
        assert_eq!(inside.relative_to(&vault).unwrap(), vec!["a", "b"]);
        assert!(Path::file("/other").relative_to(&vault).is_none());
        assert_eq!(vault.child("x", PathTypes::FILE).as_str(), "/bucket/vault/x");
        assert_eq!(Path::root().child("x", PathTypes::FILE).as_str(), "/x");
    }

    #[test]
    fn test_types_bitset() {
        let mut types = PathTypes::FILE | PathTypes::PLACEHOLDER;
        assert!(types.contains(PathTypes::FILE));
        assert!(!types.contains(PathTypes::DIRECTORY));
        types.remove(PathTypes::PLACEHOLDER);
        assert_eq!(types, PathTypes::FILE);
    }

    #[test]
    fn test_byte_range_end() {
        assert_eq!(ByteRange::all().end(100), 100);
        assert_eq!(ByteRange::new(10, 20).end(100), 30);
        assert_eq!(ByteRange::new(90, 20).end(100), 100);
    }
}
