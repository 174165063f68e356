//! The per-target rebalance engine.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};

use ahash::HashMap;
use parking_lot::{Mutex, RwLock};

use reef_core::{CoreError, Lom, MULTI_HASH_MAP_COUNT, Target};
use reef_pack::PackError;
use reef_transport::{Bus, ObjHdr, TransportError};
use reef_types::{Config, Smap, tname};

use crate::msg::{REB_MSG_NTFN, StageNtfn};
use crate::stage::{Stage, Stages};

#[derive(thiserror::Error, Debug)]
pub enum RebError {
    #[error("timed out waiting for a usable cluster map")]
    SmapTimeout,

    #[error("decode: {0}")]
    Pack(#[from] PackError),

    #[error(transparent)]
    Core(#[from] CoreError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("abort stage notification from {from} ({stage})")]
    PeerAborted { from: String, stage: Stage },

    #[error("{0}")]
    Other(String),
}

impl RebError {
    pub fn other(msg: impl std::fmt::Display) -> Self {
        Self::Other(msg.to_string())
    }
}

/// Per-generation inputs the quiescence predicate needs.
#[derive(Clone)]
pub struct RebArgs {
    pub config: Arc<Config>,
    pub smap: Arc<Smap>,
}

/// A transmitted object awaiting its ACK.
pub struct PendingLom {
    pub lom: Lom,
    pub reb_id: i64,
}

/// Monotonic nanoseconds since process start; 0 is reserved for "never".
pub(crate) fn mono_ns() -> i64 {
    static EPOCH: OnceLock<Instant> = OnceLock::new();
    EPOCH.get_or_init(Instant::now).elapsed().as_nanos() as i64 + 1
}

// ----------------------------------------------------------------------------

pub struct Reb {
    pub(crate) target: Arc<dyn Target>,
    pub(crate) bus: Arc<dyn Bus>,
    pub(crate) mfs: Arc<reef_fs::MountedFs>,
    config: RwLock<Arc<Config>>,

    reb_id: AtomicI64,
    smap: RwLock<Option<Arc<Smap>>>,
    pub stages: Stages,
    xreb: RwLock<Option<Arc<reef_xact::Xact>>>,

    /// Monotonic time of the last receive on any stream.
    pub(crate) lastrx: AtomicI64,

    // local-queue invariant: quiescent iff both are zero (and the
    // xaction is done)
    in_queue: AtomicI64,
    on_air: AtomicI64,

    pub(crate) ec_in_flight: AtomicI64,

    /// Sent objects awaiting ACKs, sharded like the LOM cache.
    lomacks: Vec<Mutex<HashMap<Arc<str>, PendingLom>>>,
}

impl Reb {
    pub fn new(
        target: Arc<dyn Target>,
        bus: Arc<dyn Bus>,
        mfs: Arc<reef_fs::MountedFs>,
        config: Arc<Config>,
    ) -> Arc<Self> {
        Arc::new(Self {
            target,
            bus,
            mfs,
            config: RwLock::new(config),
            reb_id: AtomicI64::new(0),
            smap: RwLock::new(None),
            stages: Stages::default(),
            xreb: RwLock::new(None),
            lastrx: AtomicI64::new(0),
            in_queue: AtomicI64::new(0),
            on_air: AtomicI64::new(0),
            ec_in_flight: AtomicI64::new(0),
            lomacks: (0..MULTI_HASH_MAP_COUNT)
                .map(|_| Mutex::new(HashMap::default()))
                .collect(),
        })
    }

    #[inline]
    pub fn reb_id(&self) -> i64 {
        self.reb_id.load(Ordering::Acquire)
    }

    pub fn config(&self) -> Arc<Config> {
        Arc::clone(&self.config.read())
    }

    pub fn set_config(&self, config: Arc<Config>) {
        *self.config.write() = config;
    }

    pub fn xctn(&self) -> Option<Arc<reef_xact::Xact>> {
        self.xreb.read().clone()
    }

    pub fn smap(&self) -> Option<Arc<Smap>> {
        self.smap.read().clone()
    }

    pub fn set_smap(&self, smap: Arc<Smap>) {
        *self.smap.write() = Some(smap);
    }

    /// Begin one rebalance generation. `reb_id` must be greater than any
    /// previous generation's.
    pub fn start_generation(&self, reb_id: i64, smap: Arc<Smap>, xreb: Arc<reef_xact::Xact>) {
        let prev = self.reb_id.swap(reb_id, Ordering::AcqRel);
        debug_assert!(reb_id > prev, "non-monotonic reb_id {reb_id} (prev {prev})");
        *self.smap.write() = Some(smap);
        *self.xreb.write() = Some(xreb);
        self.stages.reset();
        self.stages.set_local(Stage::Init);
        reef_log::info!("{}: begin", self.log_hdr());
    }

    /// Final drain back to `Inactive`.
    pub fn fin_generation(&self) {
        self.stages.set_local(Stage::Inactive);
        if let Some(xreb) = self.xctn() {
            xreb.finish();
        }
        reef_log::info!("{}: done", self.log_hdr());
    }

    // -- formatting --------------------------------------------------------

    /// `t[<sid>][g<rebID>,v<smap-version>,<stage>]`
    pub fn log_hdr(&self) -> String {
        let version = self
            .smap()
            .map_or_else(|| "<???>".to_owned(), |smap| smap.version.to_string());
        format!(
            "t[{}][g{},v{version},{}]",
            self.target.sid(),
            self.reb_id(),
            self.stages.local()
        )
    }

    pub(crate) fn warn_id(&self, remote_id: i64, tid: &str) -> String {
        let local = self.reb_id();
        let relation = if local < remote_id { "newer" } else { "older" };
        format!(
            "{} runs {relation} g[{remote_id}] (local g[{local}])",
            tname(tid)
        )
    }

    // -- cluster-map wait --------------------------------------------------

    /// Bounded wait for a usable cluster map:
    /// `min(rebalance.dest_retry_time, timeout.send_file / 3)`.
    pub fn wait_for_smap(&self) -> Result<Arc<Smap>, RebError> {
        if let Some(smap) = self.smap() {
            return Ok(smap);
        }
        let config = self.config();
        let maxwt = config
            .rebalance
            .dest_retry_time
            .min(config.timeout.send_file / 3);
        let sleep = Duration::from_millis(10);
        let mut curwt = Duration::ZERO;
        reef_log::warn!("{}: waiting to start...", tname(self.target.sid()));
        while curwt < maxwt {
            std::thread::sleep(sleep);
            curwt += sleep;
            if let Some(smap) = self.smap() {
                return Ok(smap);
            }
        }
        Err(RebError::SmapTimeout)
    }

    // -- stage transitions and abort propagation ---------------------------

    /// Move to the next stage and notify every other target.
    pub fn change_stage(&self, new_stage: Stage) {
        self.stages.set_local(new_stage);
        let ntfn = StageNtfn {
            reb_id: self.reb_id(),
            stage: new_stage,
            daemon_id: self.target.sid().to_owned(),
            ..Default::default()
        };
        let hdr = ObjHdr {
            sid: self.target.sid().to_owned(),
            opaque: ntfn.new_pack(REB_MSG_NTFN),
            ..Default::default()
        };
        if let Err(err) = self.bus.push(hdr, None) {
            reef_log::warn!(
                "failed to push new-stage notif: [{} {new_stage} {err}]",
                ntfn.reb_id
            );
        }
    }

    /// Abort the local xaction and tell everyone.
    pub fn abort_and_broadcast(&self, err: impl std::fmt::Display) {
        let Some(xreb) = self.xctn() else {
            return;
        };
        if !xreb.abort(&err) {
            return;
        }
        reef_log::info!("{} abort-and-bcast: {err}", xreb.name());
        self.change_stage(Stage::Abort);
    }

    /// Abort only if the cluster map hasn't moved past `older_smap_v`
    /// (limited usage; compare with [`Self::abort_and_broadcast`]).
    pub fn abort_local(&self, older_smap_v: i64, err: impl std::fmt::Display) {
        let Some(xreb) = self.xctn() else {
            return;
        };
        let Some(smap) = self.smap() else {
            return;
        };
        if smap.version == older_smap_v && xreb.abort(&err) {
            reef_log::warn!("{err} - aborted");
            self.stages.set_local(Stage::Abort);
        }
    }

    // -- local queue -------------------------------------------------------

    pub fn in_queue_inc(&self) {
        self.in_queue.fetch_add(1, Ordering::AcqRel);
    }

    pub fn in_queue_dec(&self) {
        self.in_queue.fetch_sub(1, Ordering::AcqRel);
    }

    pub fn on_air_inc(&self) {
        self.on_air.fetch_add(1, Ordering::AcqRel);
    }

    pub fn on_air_dec(&self) {
        self.on_air.fetch_sub(1, Ordering::AcqRel);
    }

    /// Quiescent iff the transport queues are empty and the xaction has
    /// aborted or finished.
    pub fn is_quiescent(&self) -> bool {
        match self.xctn() {
            None => true,
            Some(xreb) if xreb.is_aborted() || xreb.finished() => true,
            Some(_) => {
                self.in_queue.load(Ordering::Acquire) == 0
                    && self.on_air.load(Ordering::Acquire) == 0
            }
        }
    }

    // -- LOM-ACK tracking --------------------------------------------------

    /// Ship one local object to `to`, tracking it until the ACK arrives.
    pub fn send_obj(&self, lom: Lom, to: &str) -> Result<(), RebError> {
        let file = std::fs::File::open(lom.fqn()).map_err(CoreError::Io)?;
        let ack = crate::msg::RegularAck {
            reb_id: self.reb_id(),
            daemon_id: self.target.sid().to_owned(),
        };
        let mut hdr = ObjHdr {
            bck: lom.bck().clone(),
            obj_name: lom.obj_name().to_owned(),
            opaque: ack.new_pack(),
            sid: self.target.sid().to_owned(),
            ..Default::default()
        };
        hdr.obj_attrs.size = lom.lsize();
        hdr.obj_attrs.atime = lom.atime();
        hdr.obj_attrs.cksum = lom.md.cksum.clone();

        self.add_lom_ack(lom);
        self.on_air_inc();
        let res = self.bus.send(hdr, Box::new(file), to);
        self.on_air_dec();
        res.map_err(Into::into)
    }

    /// Track a sent object until the matching ACK arrives.
    pub fn add_lom_ack(&self, lom: Lom) {
        let idx = lom.cache_idx();
        let uname = Arc::clone(lom.uname());
        self.lomacks[idx].lock().insert(
            uname,
            PendingLom {
                lom,
                reb_id: self.reb_id(),
            },
        );
    }

    /// Remove and return the pending slot, if the generation still
    /// matches (`reb_id == 0` matches any).
    pub fn del_lom_ack(&self, uname: &str, reb_id: i64) -> Option<PendingLom> {
        if reb_id != 0 && reb_id != self.reb_id() {
            return None;
        }
        let idx = reef_core::lcache_idx(reef_core::uname_digest(uname));
        let mut shard = self.lomacks[idx].lock();
        shard.remove(uname)
    }

    pub fn num_pending_acks(&self) -> usize {
        self.lomacks.iter().map(|shard| shard.lock().len()).sum()
    }
}

// ----------------------------------------------------------------------------
