//! The sharded per-mountpath LOM cache and its flush-and-evict
//! housekeeping.
//!
//! Every mountpath owns [`MULTI_HASH_MAP_COUNT`] independently locked
//! shards; an object routes to shard `digest & (count - 1)` of its
//! unique-name digest. The housekeeper never contends with disruptive
//! operations (bucket uncache, termination): those bump a reference
//! counter, and the housekeeper refuses to start — and bails out of its
//! shard scans — whenever the counter is above zero.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicI64, Ordering};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use ahash::{HashMap, RandomState};
use parking_lot::{Mutex, RwLock};

use reef_fs::{MountedFs, Mountpath, attrs};
use reef_memory::Pressure;
use reef_types::{Bck, WritePolicy};

use crate::lmeta::Lmeta;

// ----------------------------------------------------------------------------

/// Shards per mountpath; a power of two.
pub const MULTI_HASH_MAP_COUNT: usize = 64;
const MULTI_HASH_MAP_MASK: u64 = (MULTI_HASH_MAP_COUNT - 1) as u64;

// throttle tunables
const THROTTLE_BATCH: usize = 16;
const THROTTLE_10MS: Duration = Duration::from_millis(10);

const SKIP_EVICT_THRESHOLD: i64 = 20; // likely not running when above
const MAX_EVICT_THRESHOLD: i64 = 60; // never running when above

const MAX_TIME_WITH_NO_EVICTIONS: Duration = Duration::from_secs(16 * 60 * 60);

const HOUR: Duration = Duration::from_secs(60 * 60);

// Shard routing and rendezvous placement both need a digest that is
// stable for the life of the process; the seeds are arbitrary.
const DIGEST_STATE: RandomState = RandomState::with_seeds(
    0x243f_6a88_85a3_08d3,
    0x1319_8a2e_0370_7344,
    0xa409_3822_299f_31d0,
    0x082e_fa98_ec4e_6c89,
);

#[inline]
pub fn uname_digest(uname: &str) -> u64 {
    use std::hash::BuildHasher as _;
    DIGEST_STATE.hash_one(uname)
}

#[inline]
pub fn lcache_idx(digest: u64) -> usize {
    (digest & MULTI_HASH_MAP_MASK) as usize
}

// ----------------------------------------------------------------------------

type Shard = RwLock<HashMap<u64, Lmeta>>;

/// The shard array of one mountpath.
pub struct LomCaches {
    shards: Vec<Shard>,
}

impl Default for LomCaches {
    fn default() -> Self {
        Self {
            shards: (0..MULTI_HASH_MAP_COUNT)
                .map(|_| RwLock::new(HashMap::default()))
                .collect(),
        }
    }
}

impl LomCaches {
    #[inline]
    pub fn shard(&self, idx: usize) -> &Shard {
        &self.shards[idx]
    }

    pub fn len(&self) -> usize {
        self.shards.iter().map(|s| s.read().len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.shards.iter().all(|s| s.read().is_empty())
    }

    fn clear(&self) {
        for shard in &self.shards {
            shard.write().clear();
        }
    }
}

// ----------------------------------------------------------------------------

/// What the cache needs to know about the world around it.
pub trait CacheEnv: Send + Sync {
    fn write_policy(&self, bck: &Bck) -> WritePolicy;

    fn mem_pressure(&self) -> Pressure;

    /// `(max device utilization %, 1-minute load average)`.
    fn max_util_load(&self) -> (i64, f64);

    fn num_cpus(&self) -> usize {
        std::thread::available_parallelism().map_or(1, |n| n.get())
    }
}

/// Production probe: host memory and load, write-back always on.
#[derive(Default)]
pub struct HostEnv(reef_memory::HostLoad);

impl CacheEnv for HostEnv {
    fn write_policy(&self, _bck: &Bck) -> WritePolicy {
        WritePolicy::Immediate
    }

    fn mem_pressure(&self) -> Pressure {
        reef_memory::pressure()
    }

    fn max_util_load(&self) -> (i64, f64) {
        use reef_memory::SysLoad as _;
        self.0.max_util_load()
    }
}

// ----------------------------------------------------------------------------

#[derive(Default)]
pub struct CacheStats {
    /// Entries visited by eviction scans.
    pub total: AtomicI64,
    pub evicted: AtomicI64,
    pub flushed_cold: AtomicI64,
    pub errors: AtomicI64,
}

impl CacheStats {
    #[inline]
    fn inc(counter: &AtomicI64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

// ----------------------------------------------------------------------------

struct RcGuard<'a>(&'a AtomicI32);

impl<'a> RcGuard<'a> {
    fn enter(rc: &'a AtomicI32) -> Self {
        rc.fetch_add(1, Ordering::AcqRel);
        Self(rc)
    }
}

impl Drop for RcGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

// ----------------------------------------------------------------------------

/// The per-target LOM cache.
pub struct LomCache {
    mfs: Arc<MountedFs>,
    env: Arc<dyn CacheEnv>,
    per_mountpath: RwLock<HashMap<PathBuf, Arc<LomCaches>>>,

    timeout: Mutex<Duration>,
    last: Mutex<Instant>,
    rc: AtomicI32,
    running: AtomicBool,
    stats: CacheStats,
}

impl LomCache {
    pub fn new(mfs: Arc<MountedFs>, env: Arc<dyn CacheEnv>, timeout: Duration) -> Self {
        Self {
            mfs,
            env,
            per_mountpath: RwLock::new(HashMap::default()),
            timeout: Mutex::new(timeout),
            last: Mutex::new(Instant::now()),
            rc: AtomicI32::new(0),
            running: AtomicBool::new(false),
            stats: CacheStats::default(),
        }
    }

    /// Housekeeping period and entry age threshold (`ObjectMD.timeout`).
    pub fn set_timeout(&self, timeout: Duration) {
        *self.timeout.lock() = timeout;
    }

    pub fn stats(&self) -> &CacheStats {
        &self.stats
    }

    pub fn caches_for(&self, mountpath: &Mountpath) -> Arc<LomCaches> {
        if let Some(caches) = self.per_mountpath.read().get(mountpath.path()) {
            return Arc::clone(caches);
        }
        let mut per_mp = self.per_mountpath.write();
        Arc::clone(
            per_mp
                .entry(mountpath.path().to_owned())
                .or_insert_with(|| Arc::new(LomCaches::default())),
        )
    }

    // -- the plain cache API ----------------------------------------------

    pub fn lookup(&self, mountpath: &Mountpath, uname: &str) -> Option<Lmeta> {
        let digest = uname_digest(uname);
        let caches = self.caches_for(mountpath);
        let shard = caches.shard(lcache_idx(digest));
        let entries = shard.read();
        let md = entries.get(&digest)?;
        (!md.is_tombstone()).then(|| md.clone())
    }

    pub fn insert(&self, mountpath: &Mountpath, md: Lmeta) {
        let uname = md.uname.as_deref().unwrap_or_default();
        debug_assert!(!uname.is_empty(), "inserting a tombstone");
        let digest = uname_digest(uname);
        let caches = self.caches_for(mountpath);
        caches
            .shard(lcache_idx(digest))
            .write()
            .insert(digest, md);
    }

    pub fn remove(&self, mountpath: &Mountpath, uname: &str) {
        let digest = uname_digest(uname);
        let caches = self.caches_for(mountpath);
        caches.shard(lcache_idx(digest)).write().remove(&digest);
    }

    // -- housekeeping ------------------------------------------------------

    /// One timer firing. Returns the interval until the next one.
    pub fn housekeep(&self) -> Duration {
        let timeout = *self.timeout.lock();

        // concurrent term, uncache-bck, etc.
        let rc = self.rc.load(Ordering::Acquire);
        if rc > 0 {
            reef_log::warn!("lcache: (not) running now, rc: {rc}");
            return timeout;
        }

        if self.memp_drop_all() {
            return timeout;
        }

        // load, utilization
        let pct = self.throttle_pct();
        if pct > MAX_EVICT_THRESHOLD {
            reef_log::warn!(
                "lcache: not running: throttle [{pct} greater than max {MAX_EVICT_THRESHOLD}]"
            );
            return (timeout / 2).min(HOUR);
        }
        let now = Instant::now();
        if pct > SKIP_EVICT_THRESHOLD {
            let no_evict_cap = MAX_TIME_WITH_NO_EVICTIONS.min(timeout.max(HOUR) * 8);
            if now.duration_since(*self.last.lock()) < no_evict_cap {
                reef_log::warn!(
                    "lcache: not running: throttle [{pct} greater than {SKIP_EVICT_THRESHOLD}]"
                );
                return (timeout / 2).min(HOUR);
            }
        }

        // still running?
        if self
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            reef_log::warn!("lcache: (not) running now");
            return timeout;
        }

        reef_log::info!("lcache: hk begin");
        *self.last.lock() = now;
        let evicted0 = self.stats.evicted.load(Ordering::Relaxed);
        self.evict(timeout, pct);
        self.running.store(false, Ordering::Release);
        reef_log::info!(
            "lcache: hk done: scanned {}, evicted {}",
            self.stats.total.load(Ordering::Relaxed),
            self.stats.evicted.load(Ordering::Relaxed) - evicted0,
        );

        timeout
    }

    /// On extreme memory pressure drop every cache on every mountpath.
    fn memp_drop_all(&self) -> bool {
        let p = self.env.mem_pressure();
        match p {
            Pressure::Oom | Pressure::Extreme => {
                reef_log::error!("lcache: [{p}] - dropping all caches");
                for mp in self.mfs.get_avail() {
                    self.uncache_mountpath(&mp);
                }
                *self.last.lock() = Instant::now();
                true
            }
            Pressure::High => {
                reef_log::warn!("lcache: high memory pressure");
                false
            }
            Pressure::Moderate | Pressure::Low => false,
        }
    }

    fn throttle_pct(&self) -> i64 {
        let (util, lavg) = self.env.max_util_load();
        reef_memory::throttle_pct(util, lavg, self.env.num_cpus())
    }

    fn evict(&self, timeout: Duration, pct: i64) {
        let avail = self.mfs.get_avail();
        let now_ns = unix_now_ns();
        self.stats.total.store(0, Ordering::Relaxed);
        std::thread::scope(|s| {
            for mp in &avail {
                let caches = self.caches_for(mp);
                s.spawn(move || self.evict_mountpath(mp, &caches, timeout, now_ns, pct));
            }
        });
    }

    fn evict_mountpath(
        &self,
        mountpath: &Mountpath,
        caches: &LomCaches,
        timeout: Duration,
        now_ns: i64,
        pct: i64,
    ) {
        for idx in 0..MULTI_HASH_MAP_COUNT {
            if !mountpath.is_avail() {
                return;
            }
            self.evict_shard(mountpath, caches.shard(idx), timeout, now_ns, pct);
            if self.rc.load(Ordering::Acquire) > 0 {
                break;
            }
        }
    }

    fn evict_shard(
        &self,
        mountpath: &Mountpath,
        shard: &Shard,
        timeout: Duration,
        now_ns: i64,
        pct: i64,
    ) {
        // Collect the expired entries under the read lock; flush happens
        // outside any lock, removal re-checks under the write lock.
        let expired: Vec<(u64, Lmeta)> = {
            let entries = shard.read();
            entries
                .iter()
                .filter(|(_, md)| {
                    CacheStats::inc(&self.stats.total);
                    !md.is_tombstone() && entry_age(md, now_ns) >= timeout
                })
                .map(|(digest, md)| (*digest, md.clone()))
                .collect()
        };

        let mut done = 0;
        for (digest, md) in expired {
            if self.rc.load(Ordering::Acquire) > 0 {
                return;
            }
            if md.needs_flush() {
                self.flush(mountpath, &md);
            }
            {
                let mut entries = shard.write();
                // a racing access may have refreshed the entry in the meantime
                if entries.get(&digest).is_some_and(|cur| cur.atime == md.atime) {
                    entries.remove(&digest);
                    CacheStats::inc(&self.stats.evicted);
                }
            }
            done += 1;
            if done % THROTTLE_BATCH == 0 {
                throttle(pct);
            }
        }
    }

    /// Flush pending atime, and the full record when dirty. Counted once
    /// per flushed entry; errors are counted, logged, and swallowed.
    fn flush(&self, mountpath: &Mountpath, md: &Lmeta) {
        let Some(uname) = md.uname.as_deref() else {
            return;
        };
        let Ok((bck, obj_name)) = Bck::parse_uname(uname) else {
            return;
        };
        if self.env.write_policy(&bck) == WritePolicy::Never {
            return;
        }
        let fqn = self.mfs.make_fqn(mountpath, &bck, reef_fs::OBJECT, &obj_name);
        let atime = md.atime_abs();
        if let Err(err) = attrs::set_attr(Path::new(&fqn), attrs::ATIME_ATTR, &atime.to_be_bytes())
        {
            CacheStats::inc(&self.stats.errors);
            reef_log::warn!("lcache: flush-atime [{fqn} {err}]");
            return;
        }
        CacheStats::inc(&self.stats.flushed_cold);

        if !md.dirty {
            return;
        }

        // dirty: clear and write back the full record, copies included
        let mut clean = md.clone();
        clean.mark_flushed(atime);
        let buf = clean.to_bytes();
        if let Err(err) = attrs::set_attr(Path::new(&fqn), attrs::LOM_ATTR, &buf) {
            CacheStats::inc(&self.stats.errors);
            reef_log::error!("lcache: set-attr [{fqn} {err}]");
            return;
        }
        for copy_fqn in clean.copies.iter().flatten() {
            if *copy_fqn == fqn {
                continue;
            }
            if let Err(err) = attrs::set_attr(Path::new(copy_fqn), attrs::LOM_ATTR, &buf) {
                CacheStats::inc(&self.stats.errors);
                reef_log::error!("lcache: set-attr [{copy_fqn} {err}]");
                break;
            }
        }
    }

    // -- disruptive operations --------------------------------------------

    /// Drop all entries of the given buckets, on every mountpath.
    ///
    /// Returns true when extreme memory pressure already dropped every
    /// cache wholesale (nothing left to do).
    pub fn uncache_buckets(&self, bcks: &[Bck]) -> bool {
        let _rc = RcGuard::enter(&self.rc);

        if self.memp_drop_all() {
            return true;
        }

        let pct = self.throttle_pct();
        reef_log::info!("lcache: uncache {} bucket(s), throttle: {pct}", bcks.len());
        if pct > MAX_EVICT_THRESHOLD {
            reef_log::warn!("lcache: high utilization and/or load average: {pct}");
        }

        let avail = self.mfs.get_avail();
        std::thread::scope(|s| {
            for mp in &avail {
                let caches = self.caches_for(mp);
                s.spawn(move || self.uncache_bcks_mountpath(mp, &caches, bcks, pct));
            }
        });
        false
    }

    fn uncache_bcks_mountpath(
        &self,
        mountpath: &Mountpath,
        caches: &LomCaches,
        bcks: &[Bck],
        pct: i64,
    ) {
        let mut removed = 0;
        for idx in 0..MULTI_HASH_MAP_COUNT {
            if !mountpath.is_avail() {
                return;
            }
            let shard = caches.shard(idx);
            let victims: Vec<u64> = {
                let entries = shard.read();
                entries
                    .iter()
                    .filter(|(_, md)| {
                        md.uname
                            .as_deref()
                            .and_then(|uname| Bck::parse_uname(uname).ok())
                            .is_some_and(|(bck, _)| bcks.contains(&bck))
                    })
                    .map(|(digest, _)| *digest)
                    .collect()
            };
            for digest in victims {
                shard.write().remove(&digest);
                removed += 1;
                if removed % THROTTLE_BATCH == 0 {
                    if pct >= MAX_EVICT_THRESHOLD {
                        std::thread::sleep(THROTTLE_10MS);
                    } else {
                        std::thread::yield_now();
                    }
                }
            }
        }
    }

    /// Clear every shard of one mountpath (detachment path).
    pub fn uncache_mountpath(&self, mountpath: &Mountpath) {
        if let Some(caches) = self.per_mountpath.read().get(mountpath.path()) {
            caches.clear();
        }
    }

    /// Flush everything pending; entries stay (the process is ending).
    pub fn terminate(&self) {
        let _rc = RcGuard::enter(&self.rc);
        let avail = self.mfs.get_avail();
        std::thread::scope(|s| {
            for mp in &avail {
                let caches = self.caches_for(mp);
                s.spawn(move || {
                    for idx in 0..MULTI_HASH_MAP_COUNT {
                        let entries: Vec<Lmeta> = {
                            let shard = caches.shard(idx).read();
                            shard.values().cloned().collect()
                        };
                        for md in &entries {
                            if md.is_tombstone() {
                                continue;
                            }
                            if md.is_prefetched() || md.needs_flush() {
                                self.flush(mp, md);
                            }
                        }
                    }
                });
            }
        });
    }
}

// ----------------------------------------------------------------------------

fn unix_now_ns() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_nanos() as i64)
}

fn entry_age(md: &Lmeta, now_ns: i64) -> Duration {
    let elapsed = now_ns.saturating_sub(md.atime_abs());
    Duration::from_nanos(elapsed.max(0) as u64)
}

fn throttle(pct: i64) {
    if pct < 10 {
        std::thread::yield_now();
    } else {
        std::thread::sleep(Duration::from_millis(pct as u64));
    }
}

// ----------------------------------------------------------------------------
