//! The mountpath registry: one filesystem root per participating disk.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use ahash::HashSet;
use parking_lot::RwLock;

use crate::content;

// ----------------------------------------------------------------------------

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum FsError {
    #[error("mountpath {0:?} must be absolute")]
    Relative(PathBuf),

    #[error("mountpath {0:?} is already registered")]
    DuplicateMountpath(PathBuf),

    #[error("mountpath {new:?} nests with registered {registered:?}")]
    NestedMountpaths { new: PathBuf, registered: PathBuf },

    #[error("mountpath {0:?} is not registered")]
    UnknownMountpath(PathBuf),

    #[error("content kind {0:?} must be exactly two lowercase ascii chars")]
    BadContentTag(String),

    #[error("content kind {0:?} is already registered")]
    DuplicateContentTag(String),

    #[error("fqn {0:?} does not match any registered mountpath")]
    FqnNoMountpath(String),

    #[error("fqn {0:?} names a mountpath, not a content unit")]
    FqnBareMountpath(String),

    #[error("fqn {0:?}: missing or unknown provider")]
    FqnProvider(String),

    #[error("fqn {0:?}: invalid namespace")]
    FqnNamespace(String),

    #[error("fqn {fqn:?}: missing or unregistered content kind {kind:?}")]
    FqnContentKind { fqn: String, kind: String },

    #[error("fqn {0:?}: empty bucket name")]
    FqnBucket(String),

    #[error("fqn {0:?}: empty object name")]
    FqnObject(String),
}

// ----------------------------------------------------------------------------

/// One filesystem root participating in the storage pool.
#[derive(Debug)]
pub struct Mountpath {
    path: PathBuf,
    avail: AtomicBool,
}

impl Mountpath {
    fn new(path: PathBuf) -> Self {
        Self {
            path,
            avail: AtomicBool::new(true),
        }
    }

    #[inline]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// An unavailable mountpath stays registered (its FQNs still parse)
    /// but is skipped by walkers and housekeeping.
    #[inline]
    pub fn is_avail(&self) -> bool {
        self.avail.load(Ordering::Relaxed)
    }

    pub fn set_avail(&self, avail: bool) {
        self.avail.store(avail, Ordering::Relaxed);
    }
}

impl PartialEq for Mountpath {
    fn eq(&self, other: &Self) -> bool {
        self.path == other.path
    }
}

impl std::fmt::Display for Mountpath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "mp[{}]", self.path.display())
    }
}

// ----------------------------------------------------------------------------

/// The mounted filesystem view: registered mountpaths plus the
/// content-kind registry. Constructed once per target at startup.
pub struct MountedFs {
    mountpaths: RwLock<Vec<Arc<Mountpath>>>,
    content_kinds: RwLock<HashSet<String>>,
}

impl Default for MountedFs {
    fn default() -> Self {
        Self::new()
    }
}

impl MountedFs {
    /// A registry pre-seeded with the standard content kinds.
    pub fn new() -> Self {
        let mfs = Self {
            mountpaths: RwLock::new(Vec::new()),
            content_kinds: RwLock::new(HashSet::default()),
        };
        for kind in content::CONTENT_KINDS {
            mfs.register_content_kind(kind)
                .unwrap_or_else(|err| unreachable!("{err}"));
        }
        mfs
    }

    pub fn register_content_kind(&self, tag: &str) -> Result<(), FsError> {
        if !content::is_valid_tag(tag) {
            return Err(FsError::BadContentTag(tag.to_owned()));
        }
        let mut kinds = self.content_kinds.write();
        if !kinds.insert(tag.to_owned()) {
            return Err(FsError::DuplicateContentTag(tag.to_owned()));
        }
        Ok(())
    }

    pub fn is_content_kind(&self, tag: &str) -> bool {
        self.content_kinds.read().contains(tag)
    }

    /// Register a mountpath, rejecting duplicates and nesting in either
    /// direction.
    pub fn add_mountpath(&self, path: impl Into<PathBuf>) -> Result<Arc<Mountpath>, FsError> {
        let path = path.into();
        if !path.is_absolute() {
            return Err(FsError::Relative(path));
        }
        let mut mps = self.mountpaths.write();
        for mp in mps.iter() {
            if mp.path == path {
                return Err(FsError::DuplicateMountpath(path));
            }
            if path.starts_with(&mp.path) || mp.path.starts_with(&path) {
                return Err(FsError::NestedMountpaths {
                    new: path,
                    registered: mp.path.clone(),
                });
            }
        }
        let mp = Arc::new(Mountpath::new(path));
        mps.push(Arc::clone(&mp));
        Ok(mp)
    }

    pub fn remove_mountpath(&self, path: &Path) -> Result<Arc<Mountpath>, FsError> {
        let mut mps = self.mountpaths.write();
        let idx = mps
            .iter()
            .position(|mp| mp.path == path)
            .ok_or_else(|| FsError::UnknownMountpath(path.to_owned()))?;
        Ok(mps.remove(idx))
    }

    /// All available mountpaths.
    pub fn get_avail(&self) -> Vec<Arc<Mountpath>> {
        self.mountpaths
            .read()
            .iter()
            .filter(|mp| mp.is_avail())
            .cloned()
            .collect()
    }

    pub fn num_avail(&self) -> usize {
        self.mountpaths
            .read()
            .iter()
            .filter(|mp| mp.is_avail())
            .count()
    }

    pub(crate) fn resolve_mountpath(&self, fqn: &Path) -> Option<Arc<Mountpath>> {
        // Registration keeps mountpaths prefix-free, so at most one matches.
        self.mountpaths
            .read()
            .iter()
            .find(|mp| fqn.starts_with(&mp.path))
            .cloned()
    }
}

// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_nesting_both_ways() {
        let mfs = MountedFs::new();
        mfs.add_mountpath("/data/mp1").unwrap();
        assert_eq!(
            mfs.add_mountpath("/data/mp1/deeper").unwrap_err(),
            FsError::NestedMountpaths {
                new: "/data/mp1/deeper".into(),
                registered: "/data/mp1".into(),
            }
        );
        assert!(matches!(
            mfs.add_mountpath("/data").unwrap_err(),
            FsError::NestedMountpaths { .. }
        ));
        // Sibling with a shared string prefix is fine: nesting is
        // component-wise, not byte-wise.
        mfs.add_mountpath("/data/mp10").unwrap();
    }

    #[test]
    fn duplicate_and_relative() {
        let mfs = MountedFs::new();
        mfs.add_mountpath("/data/mp1").unwrap();
        assert_eq!(
            mfs.add_mountpath("/data/mp1").unwrap_err(),
            FsError::DuplicateMountpath("/data/mp1".into())
        );
        assert_eq!(
            mfs.add_mountpath("data/mp2").unwrap_err(),
            FsError::Relative("data/mp2".into())
        );
    }

    #[test]
    fn availability_filtering() {
        let mfs = MountedFs::new();
        let mp1 = mfs.add_mountpath("/data/mp1").unwrap();
        mfs.add_mountpath("/data/mp2").unwrap();
        assert_eq!(mfs.num_avail(), 2);
        mp1.set_avail(false);
        assert_eq!(mfs.num_avail(), 1);
        assert_eq!(mfs.get_avail()[0].path(), Path::new("/data/mp2"));
    }

    #[test]
    fn content_kind_registry() {
        let mfs = MountedFs::new();
        assert!(mfs.is_content_kind("ob"));
        assert!(!mfs.is_content_kind("xx"));
        mfs.register_content_kind("xx").unwrap();
        assert!(mfs.is_content_kind("xx"));
        assert_eq!(
            mfs.register_content_kind("xx").unwrap_err(),
            FsError::DuplicateContentTag("xx".into())
        );
        assert_eq!(
            mfs.register_content_kind("abc").unwrap_err(),
            FsError::BadContentTag("abc".into())
        );
    }
}
