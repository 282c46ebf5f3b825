//! Virtual paths.
//!
//! A [`VirtualPath`] is a path inside the mount, parsed once into normalized
//! segments. The dispatcher authorizes on those segments and the backend
//! derives the backing path from the very same segments, so the path that
//! was checked is the path that is used.

use std::fmt;
use std::path::{Path, PathBuf};

use rbacfs_policy::path::normalize;

use crate::error::{FsError, FsResult};

/// A normalized path inside the mount, `/` being the mount root.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct VirtualPath {
    segments: Vec<String>,
}

impl VirtualPath {
    /// The mount root.
    pub fn root() -> Self {
        Self::default()
    }

    /// Parse and normalize a virtual path.
    ///
    /// # Errors
    ///
    /// `FsError::InvalidPath` for `..` segments or NUL bytes.
    ///
    /// # Example
    ///
    /// ```
    /// use rbacfs_vfs::VirtualPath;
    ///
    /// let p = VirtualPath::parse("//docs/./readme.txt").unwrap();
    /// assert_eq!(p.to_string(), "/docs/readme.txt");
    /// assert!(VirtualPath::parse("/docs/../etc").is_err());
    /// ```
    pub fn parse(path: &str) -> FsResult<Self> {
        let segments = normalize(path).ok_or_else(|| FsError::invalid_path(path))?;
        Ok(Self {
            segments: segments.into_iter().map(str::to_string).collect(),
        })
    }

    /// Append one directory entry name.
    ///
    /// # Errors
    ///
    /// `FsError::InvalidPath` unless `name` is a single real entry name.
    pub fn join(&self, name: &str) -> FsResult<Self> {
        if name.is_empty() || name == "." || name == ".." || name.contains('/') || name.contains('\0') {
            return Err(FsError::invalid_path(format!("{self}/{name}")));
        }
        let mut segments = Vec::with_capacity(self.segments.len() + 1);
        segments.extend(self.segments.iter().cloned());
        segments.push(name.to_string());
        Ok(Self { segments })
    }

    /// Get the segments.
    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// Segments of the parent directory. The root is its own parent.
    pub fn parent_segments(&self) -> &[String] {
        match self.segments.split_last() {
            Some((_, parent)) => parent,
            None => &[],
        }
    }

    /// The parent directory. The root is its own parent.
    pub fn parent(&self) -> VirtualPath {
        Self {
            segments: self.parent_segments().to_vec(),
        }
    }

    /// The final segment, `None` for the root.
    pub fn file_name(&self) -> Option<&str> {
        self.segments.last().map(String::as_str)
    }

    /// Returns true for the mount root.
    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }

    /// Number of segments.
    pub fn depth(&self) -> usize {
        self.segments.len()
    }

    /// Check if `prefix` is this path or one of its ancestors.
    pub fn starts_with(&self, prefix: &VirtualPath) -> bool {
        self.segments.starts_with(&prefix.segments)
    }

    /// Replace the leading `from` with `to`.
    ///
    /// Returns `None` if this path is not beneath `from`.
    pub fn rebase(&self, from: &VirtualPath, to: &VirtualPath) -> Option<VirtualPath> {
        let rest = self.segments.strip_prefix(from.segments.as_slice())?;
        let mut segments = to.segments.clone();
        segments.extend(rest.iter().cloned());
        Some(Self { segments })
    }

    /// The backing path of this virtual path beneath `root`.
    pub fn backing_path(&self, root: &Path) -> PathBuf {
        let mut path = root.to_path_buf();
        path.extend(&self.segments);
        path
    }
}

impl fmt::Display for VirtualPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.segments.is_empty() {
            return f.write_str("/");
        }
        for segment in &self.segments {
            write!(f, "/{segment}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_and_display() {
        assert!(VirtualPath::parse("/").unwrap().is_root());
        assert_eq!(VirtualPath::parse("").unwrap(), VirtualPath::root());
        assert_eq!(VirtualPath::root().to_string(), "/");
        let p = VirtualPath::parse("/a/b/").unwrap();
        assert_eq!(p.segments(), ["a", "b"]);
        assert_eq!(p.to_string(), "/a/b");
        assert_eq!(p.depth(), 2);
    }

    #[test]
    fn test_parse_rejects_traversal() {
        assert!(matches!(VirtualPath::parse("/a/../../etc"), Err(FsError::InvalidPath(_))));
        assert!(VirtualPath::parse("/a\0b").is_err());
    }

    #[test]
    fn test_parent_and_name() {
        let p = VirtualPath::parse("/docs/readme.txt").unwrap();
        assert_eq!(p.parent_segments(), ["docs"]);
        assert_eq!(p.parent().to_string(), "/docs");
        assert_eq!(p.file_name(), Some("readme.txt"));

        let root = VirtualPath::root();
        assert!(root.parent().is_root());
        assert!(root.parent_segments().is_empty());
        assert_eq!(root.file_name(), None);
    }

    #[test]
    fn test_join() {
        let docs = VirtualPath::parse("/docs").unwrap();
        assert_eq!(docs.join("a.txt").unwrap().to_string(), "/docs/a.txt");
        assert_eq!(VirtualPath::root().join("x").unwrap().to_string(), "/x");
        for bad in ["", ".", "..", "a/b", "a\0"] {
            assert!(docs.join(bad).is_err(), "{bad:?}");
        }
    }

    #[test]
    fn test_rebase() {
        let p = VirtualPath::parse("/a/b/c").unwrap();
        let a = VirtualPath::parse("/a").unwrap();
        let x = VirtualPath::parse("/x/y").unwrap();
        assert!(p.starts_with(&a));
        assert!(p.starts_with(&VirtualPath::root()));
        assert!(!a.starts_with(&p));
        assert!(!VirtualPath::parse("/ab").unwrap().starts_with(&a));
        assert_eq!(p.rebase(&a, &x).unwrap().to_string(), "/x/y/b/c");
        assert_eq!(a.rebase(&a, &x).unwrap(), x);
        assert!(x.rebase(&a, &p).is_none());
    }

    #[test]
    fn test_backing_path() {
        let p = VirtualPath::parse("/docs/readme.txt").unwrap();
        assert_eq!(p.backing_path(Path::new("/srv/data")), Path::new("/srv/data/docs/readme.txt"));
        assert_eq!(VirtualPath::root().backing_path(Path::new("/srv/data")), Path::new("/srv/data"));
    }
}
