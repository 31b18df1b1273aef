//! Directory identifiers.

use std::fmt;

/// Longest directory id a marker may hold (a hyphenated UUID).
pub const MAX_DIR_ID_LEN: usize = 36;

/// Opaque directory identifier stored in `dir.c9r` markers.
///
/// Names inside a directory are encrypted with its id as associated data, and
/// the id alone determines the directory's data dir. The root id is empty.
///
/// ```
/// use oxremote_core::vault::DirId;
///
/// assert!(DirId::root().is_root());
/// let id = DirId::generate();
/// assert_eq!(id.as_str().len(), 36);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DirId(String);

impl DirId {
    #[inline]
    pub fn root() -> Self {
        DirId(String::new())
    }

    /// Wrap an id read from vault storage without checking it.
    #[inline]
    pub fn from_raw(id: impl Into<String>) -> Self {
        DirId(id.into())
    }

    /// Fresh random id for a new directory.
    pub fn generate() -> Self {
        DirId(uuid::Uuid::new_v4().to_string())
    }

    /// Parse the contents of a `dir.c9r` marker.
    ///
    /// The marker of a non-root directory is never empty; anything that is
    /// not short UTF-8 is rejected with the reason.
    pub fn parse_marker(bytes: &[u8]) -> Result<Self, String> {
        if bytes.is_empty() {
            return Err("directory marker is empty".to_string());
        }
        if bytes.len() > MAX_DIR_ID_LEN {
            return Err(format!(
                "directory marker holds {} bytes, at most {MAX_DIR_ID_LEN} allowed",
                bytes.len()
            ));
        }
        let id = std::str::from_utf8(bytes).map_err(|e| format!("directory marker is not UTF-8: {e}"))?;
        if id.trim() != id || id.contains('/') {
            return Err("directory marker is not a directory id".to_string());
        }
        Ok(DirId(id.to_string()))
    }

    #[inline]
    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for DirId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DirId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_root() {
            write!(f, "<root>")
        } else {
            write!(f, "{}", self.0)
        }
    }
}
