//! Per-mountpath jogger group: parallel walks over the content of one
//! bucket.
//!
//! One worker per available mountpath, each iterating the declared
//! content kinds. The first error any worker hits stops the whole group
//! (cooperative, via a shared flag); [`JoggerGroup::stop`] drains the
//! workers and returns that first error.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crossbeam::channel::{Receiver, bounded};
use parking_lot::Mutex;

use reef_fs::{MountedFs, Mountpath, ParsedFqn, attrs};
use reef_types::Bck;

use crate::err::CoreError;
use crate::lom::{Ct, Lom};
use crate::pool::BufPool;

pub type VisitObj = Arc<dyn Fn(&mut Lom, &mut Vec<u8>) -> Result<(), CoreError> + Send + Sync>;
pub type VisitCt = Arc<dyn Fn(&Ct, &mut Vec<u8>) -> Result<(), CoreError> + Send + Sync>;

#[derive(Clone)]
pub struct JgroupOpts {
    pub bck: Bck,

    /// Content kinds to walk, in order.
    pub cts: Vec<String>,

    /// Load LOM metadata before each [`JgroupOpts::visit_obj`] call.
    pub do_load: bool,

    pub visit_obj: Option<VisitObj>,
    pub visit_ct: Option<VisitCt>,
}

pub struct JoggerGroup {
    stop: Arc<AtomicBool>,
    err: Arc<Mutex<Option<CoreError>>>,
    finished_rx: Receiver<()>,
    handles: Vec<std::thread::JoinHandle<()>>,
}

impl JoggerGroup {
    /// Spawn one worker per available mountpath.
    pub fn run(opts: JgroupOpts, mfs: &Arc<MountedFs>, pool: &Arc<BufPool>) -> Self {
        let stop = Arc::new(AtomicBool::new(false));
        let err = Arc::new(Mutex::new(None));
        let (finished_tx, finished_rx) = bounded::<()>(0);

        let mut handles = Vec::new();
        for mountpath in mfs.get_avail() {
            let worker = Jogger {
                opts: opts.clone(),
                mfs: Arc::clone(mfs),
                pool: Arc::clone(pool),
                mountpath,
                stop: Arc::clone(&stop),
                err: Arc::clone(&err),
                _finished: finished_tx.clone(),
            };
            let name = format!("jogger-{}", worker.mountpath.path().display());
            handles.push(
                std::thread::Builder::new()
                    .name(name)
                    .spawn(move || worker.jog())
                    .expect("failed to spawn jogger"),
            );
        }
        // workers hold the only senders; the channel disconnects when the
        // last worker exits
        drop(finished_tx);

        Self {
            stop,
            err,
            finished_rx,
            handles,
        }
    }

    /// A one-shot signal: `recv()` returns (disconnected) once every
    /// worker has exited.
    pub fn listen_finished(&self) -> Receiver<()> {
        self.finished_rx.clone()
    }

    /// Signal stop, wait for the workers to drain, and return the first
    /// error observed (if any).
    pub fn stop(mut self) -> Option<CoreError> {
        self.stop.store(true, Ordering::Release);
        for handle in self.handles.drain(..) {
            let _ = handle.join();
        }
        self.err.lock().take()
    }
}

// ----------------------------------------------------------------------------

struct Jogger {
    opts: JgroupOpts,
    mfs: Arc<MountedFs>,
    pool: Arc<BufPool>,
    mountpath: Arc<Mountpath>,
    stop: Arc<AtomicBool>,
    err: Arc<Mutex<Option<CoreError>>>,
    _finished: crossbeam::channel::Sender<()>,
}

impl Jogger {
    fn jog(&self) {
        let mut buf = self.pool.alloc();
        let result = self.jog_content(&mut buf);
        self.pool.free(buf);

        if let Err(err) = result {
            // first error wins; everyone else is told to wind down
            let mut slot = self.err.lock();
            if slot.is_none() {
                reef_log::warn!("{}: jogger error: {err}", self.mountpath);
                *slot = Some(err);
            }
            self.stop.store(true, Ordering::Release);
        }
    }

    fn jog_content(&self, buf: &mut Vec<u8>) -> Result<(), CoreError> {
        for kind in &self.opts.cts {
            let root = self.mfs.content_dir(&self.mountpath, &self.opts.bck, kind);
            if !root.is_dir() {
                continue;
            }
            self.walk(&root, &root, kind, buf)?;
        }
        Ok(())
    }

    fn walk(
        &self,
        root: &Path,
        dir: &Path,
        kind: &str,
        buf: &mut Vec<u8>,
    ) -> Result<(), CoreError> {
        let mut subdirs: Vec<PathBuf> = Vec::new();
        for entry in std::fs::read_dir(dir)? {
            if self.stopped() {
                return Ok(());
            }
            let entry = entry?;
            let path = entry.path();
            let file_type = entry.file_type()?;
            if file_type.is_dir() {
                subdirs.push(path);
                continue;
            }
            let name = entry.file_name();
            if attrs::is_sidecar(&name.to_string_lossy()) {
                continue;
            }
            self.visit(root, &path, kind, buf)?;
        }
        for subdir in subdirs {
            if self.stopped() {
                return Ok(());
            }
            self.walk(root, &subdir, kind, buf)?;
        }
        Ok(())
    }

    fn visit(
        &self,
        root: &Path,
        path: &Path,
        kind: &str,
        buf: &mut Vec<u8>,
    ) -> Result<(), CoreError> {
        let obj_name = path
            .strip_prefix(root)
            .unwrap_or_else(|_| unreachable!("walked outside the content root"))
            .to_string_lossy()
            .into_owned();
        let fqn = path.to_string_lossy().into_owned();
        let parsed = ParsedFqn {
            mountpath: Arc::clone(&self.mountpath),
            bck: self.opts.bck.clone(),
            content_kind: kind.to_owned(),
            obj_name,
        };

        if kind == reef_fs::OBJECT {
            let Some(visit_obj) = &self.opts.visit_obj else {
                return Ok(());
            };
            let mut lom = Lom::from_parsed(parsed, fqn);
            if self.opts.do_load {
                lom.load()?;
            }
            visit_obj(&mut lom, buf)
        } else {
            let Some(visit_ct) = &self.opts.visit_ct else {
                return Ok(());
            };
            let ct = Ct::from_parsed(parsed, fqn);
            visit_ct(&ct, buf)
        }
    }

    #[inline]
    fn stopped(&self) -> bool {
        self.stop.load(Ordering::Acquire)
    }
}

// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use reef_types::Provider;
    use std::sync::atomic::AtomicI32;

    struct Fixture {
        _dir: tempfile::TempDir,
        mfs: Arc<MountedFs>,
        pool: Arc<BufPool>,
        bck: Bck,
    }

    /// `objects` objects (plus `workfiles` workfiles) spread over
    /// `mpaths` mountpaths.
    fn prepare(mpaths: usize, objects: usize, workfiles: usize) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let mfs = Arc::new(MountedFs::new());
        for i in 0..mpaths {
            mfs.add_mountpath(dir.path().join(format!("mp{i}"))).unwrap();
        }
        let bck = Bck::new("bkt", Provider::Reef);
        let avail = mfs.get_avail();
        for i in 0..objects {
            let mp = &avail[i % avail.len()];
            let fqn = mfs.make_fqn(mp, &bck, reef_fs::OBJECT, &format!("dir{}/o{i}", i % 3));
            std::fs::create_dir_all(Path::new(&fqn).parent().unwrap()).unwrap();
            std::fs::write(&fqn, vec![0u8; 512]).unwrap();
        }
        for i in 0..workfiles {
            let mp = &avail[i % avail.len()];
            let fqn = mfs.make_fqn(mp, &bck, reef_fs::WORKFILE, &format!("w{i}"));
            std::fs::create_dir_all(Path::new(&fqn).parent().unwrap()).unwrap();
            std::fs::write(&fqn, b"w").unwrap();
        }
        Fixture {
            _dir: dir,
            mfs,
            pool: Arc::new(BufPool::default()),
            bck,
        }
    }

    #[test]
    fn visits_every_object_once() {
        let fx = prepare(4, 100, 10);
        let counter = Arc::new(AtomicI32::new(0));
        let c = Arc::clone(&counter);
        let opts = JgroupOpts {
            bck: fx.bck.clone(),
            cts: vec![reef_fs::OBJECT.to_owned()],
            do_load: false,
            visit_obj: Some(Arc::new(move |_lom, _buf| {
                c.fetch_add(1, Ordering::Relaxed);
                Ok(())
            })),
            visit_ct: None,
        };
        let jg = JoggerGroup::run(opts, &fx.mfs, &fx.pool);
        let _ = jg.listen_finished().recv();
        assert!(jg.stop().is_none());
        assert_eq!(counter.load(Ordering::Relaxed), 100);
    }

    #[test]
    fn do_load_populates_metadata() {
        let fx = prepare(2, 20, 0);
        let opts = JgroupOpts {
            bck: fx.bck.clone(),
            cts: vec![reef_fs::OBJECT.to_owned()],
            do_load: true,
            visit_obj: Some(Arc::new(|lom, _buf| {
                if lom.lsize() != 512 {
                    return Err(CoreError::other("lom not loaded"));
                }
                Ok(())
            })),
            visit_ct: None,
        };
        let jg = JoggerGroup::run(opts, &fx.mfs, &fx.pool);
        let _ = jg.listen_finished().recv();
        assert!(jg.stop().is_none());
    }

    #[test]
    fn first_error_stops_all_workers() {
        let fx = prepare(4, 200, 0);
        let counter = Arc::new(AtomicI32::new(0));
        let c = Arc::clone(&counter);
        let opts = JgroupOpts {
            bck: fx.bck.clone(),
            cts: vec![reef_fs::OBJECT.to_owned()],
            do_load: false,
            visit_obj: Some(Arc::new(move |_lom, _buf| {
                c.fetch_add(1, Ordering::Relaxed);
                Err(CoreError::other("oops"))
            })),
            visit_ct: None,
        };
        let jg = JoggerGroup::run(opts, &fx.mfs, &fx.pool);
        let _ = jg.listen_finished().recv();
        let err = jg.stop().expect("expected an error");
        assert!(err.to_string().contains("oops"));
        // each worker fails on its first visit
        assert!(counter.load(Ordering::Relaxed) <= 4);
    }

    #[test]
    fn multiple_content_kinds_dispatch() {
        let fx = prepare(3, 30, 12);
        let objs = Arc::new(AtomicI32::new(0));
        let cts = Arc::new(AtomicI32::new(0));
        let (o, w) = (Arc::clone(&objs), Arc::clone(&cts));
        let opts = JgroupOpts {
            bck: fx.bck.clone(),
            cts: vec![reef_fs::OBJECT.to_owned(), reef_fs::WORKFILE.to_owned()],
            do_load: false,
            visit_obj: Some(Arc::new(move |_lom, _buf| {
                o.fetch_add(1, Ordering::Relaxed);
                Ok(())
            })),
            visit_ct: Some(Arc::new(move |ct, _buf| {
                assert_eq!(ct.content_kind(), reef_fs::WORKFILE);
                w.fetch_add(1, Ordering::Relaxed);
                Ok(())
            })),
        };
        let jg = JoggerGroup::run(opts, &fx.mfs, &fx.pool);
        let _ = jg.listen_finished().recv();
        assert!(jg.stop().is_none());
        assert_eq!(objs.load(Ordering::Relaxed), 30);
        assert_eq!(cts.load(Ordering::Relaxed), 12);
    }

    #[test]
    fn sidecars_are_skipped() {
        let fx = prepare(1, 5, 0);
        let mp = &fx.mfs.get_avail()[0];
        let fqn = fx.mfs.make_fqn(mp, &fx.bck, reef_fs::OBJECT, "dir0/o0");
        attrs::set_attr(Path::new(&fqn), attrs::LOM_ATTR, b"md").unwrap();

        let counter = Arc::new(AtomicI32::new(0));
        let c = Arc::clone(&counter);
        let opts = JgroupOpts {
            bck: fx.bck.clone(),
            cts: vec![reef_fs::OBJECT.to_owned()],
            do_load: false,
            visit_obj: Some(Arc::new(move |_lom, _buf| {
                c.fetch_add(1, Ordering::Relaxed);
                Ok(())
            })),
            visit_ct: None,
        };
        let jg = JoggerGroup::run(opts, &fx.mfs, &fx.pool);
        let _ = jg.listen_finished().recv();
        assert!(jg.stop().is_none());
        assert_eq!(counter.load(Ordering::Relaxed), 5);
    }
}
