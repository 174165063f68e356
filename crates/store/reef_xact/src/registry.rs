//! The activity registry: per-bucket tables plus a registry-wide by-id
//! index.

use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

use ahash::HashMap;
use parking_lot::RwLock;

use reef_types::Bck;

use crate::base::{Xact, XactError};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RenewRes {
    /// The previous activity is still good; no new one is started.
    Keep,
    Replace,
}

/// One registrable activity description.
///
/// `start` is called with the registry-issued id once the renew protocol
/// has decided a new activity is needed.
pub trait BckEntry: Send + Sync {
    fn kind(&self) -> &'static str;

    fn start(&self, id: i64, bck: Option<&Bck>) -> Result<Arc<Xact>, XactError>;

    /// Called with a previous, still-unfinished activity of the same
    /// kind. The default keeps an on-demand activity alive by renewing
    /// its idle timer; everything else is replaced.
    fn pre_renew(&self, prev: &Arc<Xact>) -> RenewRes {
        if prev.is_on_demand() {
            prev.renew_idle();
            RenewRes::Keep
        } else {
            RenewRes::Replace
        }
    }

    fn post_renew(&self, _prev: &Arc<Xact>) {}

    fn is_global(&self) -> bool {
        false
    }

    fn is_task(&self) -> bool {
        false
    }
}

struct Slot {
    entry: Arc<dyn BckEntry>,
    xact: Arc<Xact>,
}

type Table = Arc<RwLock<HashMap<&'static str, Slot>>>;

// ----------------------------------------------------------------------------

/// The per-target registry.
pub struct Registry {
    next_id: AtomicI64,
    buckets: RwLock<HashMap<Bck, Table>>,

    /// Non-bucket (global) activities: rebalance, resilver, election…
    global: Table,

    by_id: RwLock<HashMap<i64, Arc<Xact>>>,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl Registry {
    pub fn new() -> Self {
        Self {
            next_id: AtomicI64::new(1),
            buckets: RwLock::new(HashMap::default()),
            global: Arc::new(RwLock::new(HashMap::default())),
            by_id: RwLock::new(HashMap::default()),
        }
    }

    fn unique_id(&self) -> i64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    fn bucket_table(&self, bck: &Bck) -> Table {
        if let Some(table) = self.buckets.read().get(bck) {
            return Arc::clone(table);
        }
        let mut buckets = self.buckets.write();
        Arc::clone(buckets.entry(bck.clone()).or_default())
    }

    /// Renew (or adopt) the `(bucket, kind)` activity.
    ///
    /// Double-checked: the fast path only takes the read lock; the write
    /// lock re-examines before starting anything.
    pub fn renew_bck_xact(
        &self,
        bck: &Bck,
        entry: Arc<dyn BckEntry>,
    ) -> Result<Arc<Xact>, XactError> {
        let table = self.bucket_table(bck);
        self.renew_in(&table, Some(bck), entry)
    }

    /// Same protocol for non-bucket activities.
    pub fn renew_global_xact(&self, entry: Arc<dyn BckEntry>) -> Result<Arc<Xact>, XactError> {
        let table = Arc::clone(&self.global);
        self.renew_in(&table, None, entry)
    }

    fn renew_in(
        &self,
        table: &Table,
        bck: Option<&Bck>,
        entry: Arc<dyn BckEntry>,
    ) -> Result<Arc<Xact>, XactError> {
        let kind = entry.kind();
        {
            let slots = table.read();
            if let Some(prev) = slots.get(kind) {
                if !prev.xact.finished() && entry.pre_renew(&prev.xact) == RenewRes::Keep {
                    return Ok(Arc::clone(&prev.xact));
                }
            }
        }

        let mut slots = table.write();
        if let Some(prev) = slots.get(kind) {
            if !prev.xact.finished() && entry.pre_renew(&prev.xact) == RenewRes::Keep {
                return Ok(Arc::clone(&prev.xact));
            }
        }

        let id = self.unique_id();
        let xact = entry.start(id, bck)?;
        debug_assert_eq!(xact.kind(), kind);
        debug_assert_eq!(xact.id(), id);

        self.by_id.write().insert(id, Arc::clone(&xact));
        let prev = slots.insert(
            kind,
            Slot {
                entry: Arc::clone(&entry),
                xact: Arc::clone(&xact),
            },
        );
        if let Some(prev) = prev {
            if !prev.xact.finished() {
                entry.post_renew(&prev.xact);
            }
        }
        reef_log::debug!("xreg: started {xact}");
        Ok(xact)
    }

    pub fn get(&self, bck: &Bck, kind: &str) -> Option<Arc<Xact>> {
        let table = self.buckets.read().get(bck)?.clone();
        let slots = table.read();
        slots.get(kind).map(|slot| Arc::clone(&slot.xact))
    }

    pub fn get_global(&self, kind: &str) -> Option<Arc<Xact>> {
        let slots = self.global.read();
        slots.get(kind).map(|slot| Arc::clone(&slot.xact))
    }

    pub fn by_id(&self, id: i64) -> Option<Arc<Xact>> {
        self.by_id.read().get(&id).cloned()
    }

    /// Stats snapshots of every activity ever registered for the bucket
    /// (finished ones stay queryable).
    pub fn stats(&self, bck: &Bck) -> Vec<crate::base::XactSnap> {
        let Some(table) = self.buckets.read().get(bck).cloned() else {
            return Vec::new();
        };
        let slots = table.read();
        slots.values().map(|slot| slot.xact.snap()).collect()
    }

    /// Abort every unfinished activity of the bucket, concurrently, and
    /// wait. Returns true iff at least one was still running (callers use
    /// this to decide on a post-abort grace sleep).
    pub fn abort_all(&self, bck: &Bck, err: &str) -> bool {
        let Some(table) = self.buckets.read().get(bck).cloned() else {
            return false;
        };
        let running: Vec<Arc<Xact>> = {
            let slots = table.read();
            slots
                .values()
                .filter(|slot| !slot.xact.finished())
                .map(|slot| Arc::clone(&slot.xact))
                .collect()
        };
        if running.is_empty() {
            return false;
        }
        std::thread::scope(|s| {
            for xact in &running {
                s.spawn(move || {
                    xact.abort(err);
                });
            }
        });
        true
    }
}

// ----------------------------------------------------------------------------
