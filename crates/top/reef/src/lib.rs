//! reef: a horizontally scalable object-storage cluster.
//!
//! This meta-crate re-exports the per-concern crates of the storage
//! plane under one roof:
//!
//! * [`types`] — buckets, properties, cluster map, list-objects messages
//! * [`fs`] — mountpaths, content kinds, the FQN naming scheme
//! * [`core`] — LOM metadata, the sharded cache, joggers, the target
//!   context
//! * [`xact`] — activities and their registry
//! * [`transport`] — the streaming-bus contract
//! * [`reb`] — global rebalance
//! * [`etl`] — transformation-pod watching
//! * [`api`] — the client-side API (paged listing and friends)

pub use reef_api as api;
pub use reef_core as core;
pub use reef_etl as etl;
pub use reef_fs as fs;
pub use reef_log as log;
pub use reef_memory as memory;
pub use reef_pack as pack;
pub use reef_reb as reb;
pub use reef_transport as transport;
pub use reef_types as types;
pub use reef_xact as xact;
