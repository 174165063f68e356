//! Per-target core of the storage plane.
//!
//! Owns the in-memory object metadata ([`Lmeta`], [`Lom`]), the sharded
//! per-mountpath LOM cache with its flush-and-evict housekeeping, the
//! packing-buffer pool, and the per-mountpath jogger group. Everything is
//! reached through a [`CoreCtx`] constructed once at startup and torn
//! down with [`CoreCtx::term`].

mod ctx;
mod err;
mod jogger;
mod lcache;
mod lmeta;
mod lom;
mod lombid;
mod pool;
mod target;

pub use ctx::CoreCtx;
pub use err::CoreError;
pub use jogger::{JgroupOpts, JoggerGroup, VisitCt, VisitObj};
pub use lcache::{
    CacheEnv, CacheStats, HostEnv, LomCache, LomCaches, MULTI_HASH_MAP_COUNT, lcache_idx,
    uname_digest,
};
pub use lmeta::Lmeta;
pub use lom::{Ct, Lom};
pub use lombid::{LomBid, NATIVE_BID};
pub use pool::BufPool;
pub use target::{Owt, PutParams, Target};
