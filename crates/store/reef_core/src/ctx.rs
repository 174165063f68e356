//! The process-wide core context.
//!
//! Constructed once at startup, torn down with [`CoreCtx::term`]; there
//! are no hidden module-level singletons.

use std::io;
use std::path::Path;
use std::sync::Arc;

use ahash::HashMap;
use crossbeam::channel::{Sender, bounded};
use parking_lot::{Mutex, RwLock};

use reef_fs::{MountedFs, attrs};
use reef_types::{Bck, BckProps, Config};

use crate::err::CoreError;
use crate::lcache::{CacheEnv, LomCache, uname_digest};
use crate::lom::Lom;
use crate::pool::BufPool;
use crate::target::{PutParams, Target};

pub struct CoreCtx {
    sid: String,
    pub mfs: Arc<MountedFs>,
    pub cache: Arc<LomCache>,

    /// Shared scratch buffers for packing and copying.
    pub smm: Arc<BufPool>,

    config: RwLock<Arc<Config>>,
    bprops: RwLock<HashMap<Bck, BckProps>>,

    hk: Mutex<Option<(Sender<()>, std::thread::JoinHandle<()>)>>,
}

impl CoreCtx {
    pub fn init(
        sid: impl Into<String>,
        config: Config,
        mfs: Arc<MountedFs>,
        env: Arc<dyn CacheEnv>,
    ) -> Arc<Self> {
        let cache = Arc::new(LomCache::new(
            Arc::clone(&mfs),
            env,
            config.timeout.object_md,
        ));
        Arc::new(Self {
            sid: sid.into(),
            mfs,
            cache,
            smm: Arc::new(BufPool::default()),
            config: RwLock::new(Arc::new(config)),
            bprops: RwLock::new(HashMap::default()),
            hk: Mutex::new(None),
        })
    }

    pub fn config(&self) -> Arc<Config> {
        Arc::clone(&self.config.read())
    }

    pub fn update_config(&self, config: Config) {
        self.cache.set_timeout(config.timeout.object_md);
        *self.config.write() = Arc::new(config);
    }

    pub fn set_bck_props(&self, bck: Bck, props: BckProps) {
        self.bprops.write().insert(bck, props);
    }

    /// Start the cache housekeeper on its own timer thread.
    pub fn run_housekeeper(self: &Arc<Self>) {
        let mut hk = self.hk.lock();
        if hk.is_some() {
            return;
        }
        let (stop_tx, stop_rx) = bounded::<()>(0);
        let ctx = Arc::clone(self);
        let handle = std::thread::Builder::new()
            .name("lcache-hk".to_owned())
            .spawn(move || {
                let mut next = ctx.config().timeout.object_md;
                loop {
                    match stop_rx.recv_timeout(next) {
                        Ok(()) | Err(crossbeam::channel::RecvTimeoutError::Disconnected) => return,
                        Err(crossbeam::channel::RecvTimeoutError::Timeout) => {
                            next = ctx.cache.housekeep();
                        }
                    }
                }
            })
            .expect("failed to spawn lcache housekeeper");
        *hk = Some((stop_tx, handle));
    }

    /// Flush pending metadata and stop background work. Idempotent.
    pub fn term(&self) {
        if let Some((stop_tx, handle)) = self.hk.lock().take() {
            drop(stop_tx);
            let _ = handle.join();
        }
        self.cache.terminate();
    }
}

impl Target for CoreCtx {
    fn sid(&self) -> &str {
        &self.sid
    }

    fn bck_props(&self, bck: &Bck) -> BckProps {
        self.bprops.read().get(bck).cloned().unwrap_or_default()
    }

    fn put_object(&self, lom: &mut Lom, mut params: PutParams<'_>) -> Result<(), CoreError> {
        let work_name = format!("{}.{:x}", params.work_tag, uname_digest(lom.uname()));
        let work_fqn =
            self.mfs
                .make_fqn(lom.mountpath(), lom.bck(), reef_fs::WORKFILE, &work_name);

        std::fs::create_dir_all(Path::new(&work_fqn).parent().expect("workfile has a dir"))?;
        let written = {
            let mut file = std::fs::File::create(&work_fqn)?;
            io::copy(&mut params.reader, &mut file)?
        };
        if params.size >= 0 && written != params.size as u64 {
            let _ = std::fs::remove_file(&work_fqn);
            return Err(CoreError::other(format!(
                "{lom}: short write ({written} vs {})",
                params.size
            )));
        }

        std::fs::create_dir_all(Path::new(lom.fqn()).parent().expect("object has a dir"))?;
        std::fs::rename(&work_fqn, lom.fqn())?;

        lom.md.uname = Some(Arc::clone(lom.uname()));
        lom.md.size = written as i64;
        lom.md.atime = params.atime;
        if lom.md.cksum.is_none() {
            lom.md.cksum = params.cksum;
        }
        lom.persist()?;
        lom.md.mark_flushed(lom.md.atime);
        self.cache.insert(lom.mountpath(), lom.md.clone());

        reef_log::debug!("{}: put {lom} [{}]", self.sid, params.owt);
        Ok(())
    }

    fn evict_object(&self, lom: &Lom) -> Result<(), CoreError> {
        for copy_fqn in lom.md.copies.iter().flatten() {
            if copy_fqn == lom.fqn() {
                continue;
            }
            let _ = std::fs::remove_file(copy_fqn);
            let _ = attrs::remove_attr(Path::new(copy_fqn), attrs::LOM_ATTR);
        }
        let fqn = Path::new(lom.fqn());
        attrs::remove_attr(fqn, attrs::LOM_ATTR)?;
        attrs::remove_attr(fqn, attrs::ATIME_ATTR)?;
        match std::fs::remove_file(fqn) {
            Ok(()) => {}
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => return Err(err.into()),
        }
        self.cache.remove(lom.mountpath(), lom.uname());
        Ok(())
    }
}

// ----------------------------------------------------------------------------
