//! FQN codec: `(mountpath, bucket, content-kind, object-name) ↔ path`.

use std::path::Path;
use std::sync::Arc;

use reef_types::{Bck, Ns, Provider};

use crate::mountpath::{FsError, MountedFs, Mountpath};

/// The four coordinates of a content unit, recovered from its path.
#[derive(Debug)]
pub struct ParsedFqn {
    pub mountpath: Arc<Mountpath>,
    pub bck: Bck,
    pub content_kind: String,
    pub obj_name: String,
}

impl MountedFs {
    /// Build the FQN of one content unit.
    ///
    /// The inverse of [`Self::parse_fqn`]: `parse_fqn(make_fqn(x)) == x`
    /// for every registered mountpath and content kind.
    pub fn make_fqn(&self, mountpath: &Mountpath, bck: &Bck, kind: &str, obj_name: &str) -> String {
        debug_assert!(self.is_content_kind(kind), "unregistered kind {kind:?}");

        let ns_part = if bck.ns.is_global() {
            String::new()
        } else {
            format!("{}/", bck.ns.uname())
        };
        format!(
            "{}/@{}/{}{}/%{}/{}",
            mountpath.path().display(),
            bck.provider.as_str(),
            ns_part,
            bck.name,
            kind,
            obj_name
        )
    }

    /// Root directory of one `(bucket, content-kind)` family on one
    /// mountpath; every FQN of that family lives underneath it.
    pub fn content_dir(
        &self,
        mountpath: &Mountpath,
        bck: &Bck,
        kind: &str,
    ) -> std::path::PathBuf {
        debug_assert!(self.is_content_kind(kind), "unregistered kind {kind:?}");

        let ns_part = if bck.ns.is_global() {
            String::new()
        } else {
            format!("{}/", bck.ns.uname())
        };
        std::path::PathBuf::from(format!(
            "{}/@{}/{}{}/%{}",
            mountpath.path().display(),
            bck.provider.as_str(),
            ns_part,
            bck.name,
            kind
        ))
    }

    pub fn parse_fqn(&self, fqn: &str) -> Result<ParsedFqn, FsError> {
        let path = Path::new(fqn);
        let mountpath = self
            .resolve_mountpath(path)
            .ok_or_else(|| FsError::FqnNoMountpath(fqn.to_owned()))?;

        let rel = path
            .strip_prefix(mountpath.path())
            .unwrap_or_else(|_| unreachable!("resolve_mountpath returned a non-prefix"));
        let comps: Vec<&str> = rel
            .iter()
            .map(|c| c.to_str().unwrap_or(""))
            .filter(|c| !c.is_empty())
            .collect();
        if comps.is_empty() {
            return Err(FsError::FqnBareMountpath(fqn.to_owned()));
        }

        // @provider
        let provider: Provider = comps[0]
            .strip_prefix('@')
            .and_then(|tag| tag.parse().ok())
            .ok_or_else(|| FsError::FqnProvider(fqn.to_owned()))?;

        // optional [@uuid]#ns
        let mut idx = 1;
        let ns = if comps.len() > idx && (comps[idx].starts_with('@') || comps[idx].starts_with('#'))
        {
            let ns = Ns::parse_uname(comps[idx])
                .ok_or_else(|| FsError::FqnNamespace(fqn.to_owned()))?;
            idx += 1;
            ns
        } else {
            Ns::GLOBAL
        };

        let bucket = *comps
            .get(idx)
            .ok_or_else(|| FsError::FqnBucket(fqn.to_owned()))?;
        idx += 1;

        let kind_seg = *comps.get(idx).ok_or_else(|| FsError::FqnContentKind {
            fqn: fqn.to_owned(),
            kind: String::new(),
        })?;
        idx += 1;
        let kind = kind_seg
            .strip_prefix('%')
            .filter(|kind| self.is_content_kind(kind))
            .ok_or_else(|| FsError::FqnContentKind {
                fqn: fqn.to_owned(),
                kind: kind_seg.to_owned(),
            })?;

        let obj_name = comps[idx..].join("/");
        if obj_name.is_empty() {
            return Err(FsError::FqnObject(fqn.to_owned()));
        }

        Ok(ParsedFqn {
            mountpath,
            bck: Bck::with_ns(bucket, provider, ns),
            content_kind: kind.to_owned(),
            obj_name,
        })
    }
}

// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content;

    fn mfs(mountpaths: &[&str]) -> MountedFs {
        let mfs = MountedFs::new();
        for mp in mountpaths {
            mfs.add_mountpath(*mp).unwrap();
        }
        mfs
    }

    #[test]
    fn parse_smoke() {
        let mfs = mfs(&["/tmp/mp"]);
        let parsed = mfs.parse_fqn("/tmp/mp/@reef/#ns/bkt/%ob/a/b").unwrap();
        assert_eq!(parsed.mountpath.path(), Path::new("/tmp/mp"));
        assert_eq!(
            parsed.bck,
            Bck::with_ns("bkt", Provider::Reef, Ns::named("ns"))
        );
        assert_eq!(parsed.content_kind, "ob");
        assert_eq!(parsed.obj_name, "a/b");
    }

    #[test]
    fn parse_global_ns_and_cloud() {
        let mfs = mfs(&["/tmp/mp"]);
        let parsed = mfs.parse_fqn("/tmp/mp/@aws/bucket/%wk/objname").unwrap();
        assert_eq!(parsed.bck, Bck::new("bucket", Provider::Amazon));
        assert_eq!(parsed.content_kind, "wk");
        assert_eq!(parsed.obj_name, "objname");
    }

    #[test]
    fn parse_remote_cluster_ns() {
        let mfs = mfs(&["/tmp/mp"]);
        let parsed = mfs
            .parse_fqn("/tmp/mp/@reef/@uuid#namespace/bucket/%ob/objname")
            .unwrap();
        assert_eq!(parsed.bck.ns.uuid, "uuid");
        assert_eq!(parsed.bck.ns.name, "namespace");
    }

    #[test]
    fn parse_long_mountpath_wins() {
        let mfs = mfs(&["/tmp/mp/super/long"]);
        let parsed = mfs
            .parse_fqn("/tmp/mp/super/long/@aws/bucket/%ob/folder/objname")
            .unwrap();
        assert_eq!(parsed.mountpath.path(), Path::new("/tmp/mp/super/long"));
        assert_eq!(parsed.obj_name, "folder/objname");
    }

    #[test]
    fn parse_errors() {
        let mfs = mfs(&["/tmp/mp"]);

        // no registered mountpath
        assert!(matches!(
            mfs.parse_fqn("/elsewhere/@reef/bkt/%ob/a").unwrap_err(),
            FsError::FqnNoMountpath(_)
        ));
        // the mountpath itself
        assert!(matches!(
            mfs.parse_fqn("/tmp/mp").unwrap_err(),
            FsError::FqnBareMountpath(_)
        ));
        // missing provider
        assert!(matches!(
            mfs.parse_fqn("/tmp/mp/bucket/objname").unwrap_err(),
            FsError::FqnProvider(_)
        ));
        // unknown provider
        assert!(matches!(
            mfs.parse_fqn("/tmp/mp/@s3/bkt/%ob/a").unwrap_err(),
            FsError::FqnProvider(_)
        ));
        // content kind not %-prefixed
        assert!(matches!(
            mfs.parse_fqn("/tmp/mp/@reef/bkt/ob/a").unwrap_err(),
            FsError::FqnContentKind { .. }
        ));
        // unregistered content kind
        assert!(matches!(
            mfs.parse_fqn("/tmp/mp/@reef/bkt/%zz/a").unwrap_err(),
            FsError::FqnContentKind { .. }
        ));
        // missing object
        assert!(matches!(
            mfs.parse_fqn("/tmp/mp/@reef/bkt/%ob").unwrap_err(),
            FsError::FqnObject(_)
        ));
        // missing everything after the provider
        assert!(matches!(
            mfs.parse_fqn("/tmp/mp/@reef").unwrap_err(),
            FsError::FqnBucket(_)
        ));
    }

    #[test]
    fn make_parse_roundtrip() {
        let mfs = mfs(&["/tmp/mp1", "/tmp/mp2"]);
        let mountpaths = mfs.get_avail();
        let bcks = [
            Bck::new("bkt", Provider::Reef),
            Bck::new("cloudy", Provider::Google),
            Bck::with_ns("b", Provider::Reef, Ns::named("ns1")),
            Bck::with_ns(
                "b",
                Provider::Amazon,
                Ns {
                    uuid: "u".into(),
                    name: "n".into(),
                },
            ),
        ];
        for mp in &mountpaths {
            for bck in &bcks {
                for kind in content::CONTENT_KINDS {
                    for obj in ["o", "dir/o", "a/b/c.bin"] {
                        let fqn = mfs.make_fqn(mp, bck, kind, obj);
                        let parsed = mfs.parse_fqn(&fqn).unwrap_or_else(|err| {
                            panic!("{fqn}: {err}");
                        });
                        assert_eq!(parsed.mountpath.path(), mp.path(), "{fqn}");
                        assert_eq!(&parsed.bck, bck, "{fqn}");
                        assert_eq!(parsed.content_kind, kind, "{fqn}");
                        assert_eq!(parsed.obj_name, obj, "{fqn}");
                    }
                }
            }
        }
    }
}
