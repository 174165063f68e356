//! LOM and CT: handles to one object (or content unit) on one mountpath.

use std::io;
use std::path::Path;
use std::sync::Arc;

use reef_fs::{MountedFs, Mountpath, ParsedFqn, attrs};
use reef_types::{Bck, ObjAttrs};

use crate::err::CoreError;
use crate::lcache::{lcache_idx, uname_digest};
use crate::lmeta::Lmeta;

/// Local Object Metadata: the in-memory handle to one object replica.
#[derive(Debug)]
pub struct Lom {
    bck: Bck,
    obj_name: String,
    uname: Arc<str>,
    mountpath: Arc<Mountpath>,
    fqn: String,
    pub md: Lmeta,
}

impl Lom {
    /// Resolve the object onto its home mountpath (rendezvous placement
    /// over the available ones).
    pub fn init(bck: Bck, obj_name: impl Into<String>, mfs: &MountedFs) -> Result<Self, CoreError> {
        let obj_name = obj_name.into();
        let uname: Arc<str> = bck.make_uname(&obj_name).into();

        let mountpath = mfs
            .get_avail()
            .into_iter()
            .max_by_key(|mp| uname_digest(&format!("{}|{uname}", mp.path().display())))
            .ok_or_else(|| CoreError::NoMountpaths(uname.to_string()))?;

        let fqn = mfs.make_fqn(&mountpath, &bck, reef_fs::OBJECT, &obj_name);
        Ok(Self {
            bck,
            obj_name,
            uname,
            mountpath,
            fqn,
            md: Lmeta::default(),
        })
    }

    /// Adopt an already-parsed object FQN (the jogger path).
    pub fn from_parsed(parsed: ParsedFqn, fqn: impl Into<String>) -> Self {
        debug_assert_eq!(parsed.content_kind, reef_fs::OBJECT);
        let uname: Arc<str> = parsed.bck.make_uname(&parsed.obj_name).into();
        Self {
            bck: parsed.bck,
            obj_name: parsed.obj_name,
            uname,
            mountpath: parsed.mountpath,
            fqn: fqn.into(),
            md: Lmeta::default(),
        }
    }

    #[inline]
    pub fn bck(&self) -> &Bck {
        &self.bck
    }

    #[inline]
    pub fn obj_name(&self) -> &str {
        &self.obj_name
    }

    #[inline]
    pub fn uname(&self) -> &Arc<str> {
        &self.uname
    }

    #[inline]
    pub fn fqn(&self) -> &str {
        &self.fqn
    }

    #[inline]
    pub fn mountpath(&self) -> &Arc<Mountpath> {
        &self.mountpath
    }

    /// Shard this object's cache entry lives in.
    #[inline]
    pub fn cache_idx(&self) -> usize {
        lcache_idx(uname_digest(&self.uname))
    }

    #[inline]
    pub fn lsize(&self) -> i64 {
        self.md.size
    }

    #[inline]
    pub fn atime(&self) -> i64 {
        self.md.atime_abs()
    }

    /// Read metadata back from disk: the persisted record when present,
    /// otherwise whatever the filesystem knows about the file.
    pub fn load(&mut self) -> Result<(), CoreError> {
        match attrs::get_attr(Path::new(&self.fqn), attrs::LOM_ATTR)? {
            Some(bytes) => {
                let mut md = Lmeta::from_bytes(&bytes)?;
                md.uname = Some(Arc::clone(&self.uname));
                self.md = md;
                Ok(())
            }
            None => {
                let meta = std::fs::metadata(&self.fqn).map_err(|err| {
                    if err.kind() == io::ErrorKind::NotFound {
                        CoreError::NotFound(self.fqn.clone())
                    } else {
                        CoreError::Io(err)
                    }
                })?;
                let atime = meta
                    .modified()
                    .ok()
                    .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
                    .map_or(0, |d| d.as_nanos() as i64);
                self.md = Lmeta {
                    uname: Some(Arc::clone(&self.uname)),
                    atime,
                    atimefs: atime as u64,
                    size: meta.len() as i64,
                    ..Default::default()
                };
                Ok(())
            }
        }
    }

    /// Write the packed record and the atime attribute.
    pub fn persist(&self) -> io::Result<()> {
        let fqn = Path::new(&self.fqn);
        attrs::set_attr(fqn, attrs::LOM_ATTR, &self.md.to_bytes())?;
        attrs::set_attr(fqn, attrs::ATIME_ATTR, &self.md.atime.to_be_bytes())
    }

    pub fn flush_atime(&self, atime_ns: i64) -> io::Result<()> {
        attrs::set_attr(
            Path::new(&self.fqn),
            attrs::ATIME_ATTR,
            &atime_ns.to_be_bytes(),
        )
    }

    /// Take over attributes received from a peer. `skip_cksum` keeps the
    /// locally computed checksum (the payload is not re-verified here).
    pub fn copy_attrs(&mut self, attrs: &ObjAttrs, skip_cksum: bool) {
        self.md.size = attrs.size;
        self.md.atime = attrs.atime;
        if !skip_cksum {
            self.md.cksum = attrs.cksum.clone();
        }
        self.md.dirty = true;
    }

    pub fn set_atime(&mut self, atime_ns: i64) {
        self.md.atime = atime_ns;
    }
}

impl std::fmt::Display for Lom {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "o[{}/{}]", self.bck, self.obj_name)
    }
}

// ----------------------------------------------------------------------------

/// A non-object content unit: an EC slice, EC metadata, or a workfile.
#[derive(Debug)]
pub struct Ct {
    bck: Bck,
    obj_name: String,
    content_kind: String,
    mountpath: Arc<Mountpath>,
    fqn: String,
}

impl Ct {
    pub fn from_parsed(parsed: ParsedFqn, fqn: impl Into<String>) -> Self {
        Self {
            bck: parsed.bck,
            obj_name: parsed.obj_name,
            content_kind: parsed.content_kind,
            mountpath: parsed.mountpath,
            fqn: fqn.into(),
        }
    }

    /// Place a content unit of `kind` for `(bck, obj_name)` the same way
    /// the object itself is placed.
    pub fn for_object(
        bck: Bck,
        obj_name: impl Into<String>,
        kind: &str,
        mfs: &MountedFs,
    ) -> Result<Self, CoreError> {
        let obj_name = obj_name.into();
        let uname = bck.make_uname(&obj_name);
        let mountpath = mfs
            .get_avail()
            .into_iter()
            .max_by_key(|mp| uname_digest(&format!("{}|{uname}", mp.path().display())))
            .ok_or_else(|| CoreError::NoMountpaths(uname.clone()))?;
        let fqn = mfs.make_fqn(&mountpath, &bck, kind, &obj_name);
        Ok(Self {
            bck,
            obj_name,
            content_kind: kind.to_owned(),
            mountpath,
            fqn,
        })
    }

    #[inline]
    pub fn bck(&self) -> &Bck {
        &self.bck
    }

    #[inline]
    pub fn obj_name(&self) -> &str {
        &self.obj_name
    }

    #[inline]
    pub fn content_kind(&self) -> &str {
        &self.content_kind
    }

    #[inline]
    pub fn mountpath(&self) -> &Arc<Mountpath> {
        &self.mountpath
    }

    #[inline]
    pub fn fqn(&self) -> &str {
        &self.fqn
    }
}

impl std::fmt::Display for Ct {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ct[%{} {}/{}]", self.content_kind, self.bck, self.obj_name)
    }
}

// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use reef_types::Provider;

    #[test]
    fn placement_is_stable() {
        let mfs = MountedFs::new();
        for mp in ["/data/mp1", "/data/mp2", "/data/mp3"] {
            mfs.add_mountpath(mp).unwrap();
        }
        let bck = Bck::new("bkt", Provider::Reef);
        let a = Lom::init(bck.clone(), "x/y", &mfs).unwrap();
        let b = Lom::init(bck.clone(), "x/y", &mfs).unwrap();
        assert_eq!(a.mountpath().path(), b.mountpath().path());
        assert_eq!(a.fqn(), b.fqn());

        // the slice and its object land together
        let ct = Ct::for_object(bck, "x/y", reef_fs::EC_SLICE, &mfs).unwrap();
        assert_eq!(ct.mountpath().path(), a.mountpath().path());
    }

    #[test]
    fn no_mountpaths() {
        let mfs = MountedFs::new();
        let bck = Bck::new("bkt", Provider::Reef);
        assert!(matches!(
            Lom::init(bck, "o", &mfs).unwrap_err(),
            CoreError::NoMountpaths(_)
        ));
    }

    #[test]
    fn load_falls_back_to_file_metadata() {
        let dir = tempfile::tempdir().unwrap();
        let mfs = MountedFs::new();
        mfs.add_mountpath(dir.path()).unwrap();

        let bck = Bck::new("bkt", Provider::Reef);
        let mut lom = Lom::init(bck, "obj", &mfs).unwrap();
        std::fs::create_dir_all(Path::new(lom.fqn()).parent().unwrap()).unwrap();
        std::fs::write(lom.fqn(), vec![0u8; 1024]).unwrap();

        lom.load().unwrap();
        assert_eq!(lom.lsize(), 1024);
        assert!(!lom.md.needs_flush());

        // persisted metadata wins over fs metadata
        lom.md.size = 2048;
        lom.persist().unwrap();
        let mut again = Lom::init(lom.bck().clone(), "obj", &mfs).unwrap();
        again.load().unwrap();
        assert_eq!(again.lsize(), 2048);
    }

    #[test]
    fn load_missing_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let mfs = MountedFs::new();
        mfs.add_mountpath(dir.path()).unwrap();
        let mut lom = Lom::init(Bck::new("b", Provider::Reef), "nope", &mfs).unwrap();
        assert!(matches!(lom.load().unwrap_err(), CoreError::NotFound(_)));
    }
}
