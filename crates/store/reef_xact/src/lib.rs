//! Long-running activities ("xactions") and their per-bucket registry.
//!
//! An xaction is anything with a start/abort/stats lifecycle: erasure
//! coding, n-way mirroring, listing, rebalance… The registry enforces
//! at-most-one unfinished activity per `(bucket, kind)` via a
//! double-checked renew protocol, and issues monotonic ids from a single
//! counter.

mod base;
mod entries;
mod registry;

pub use base::{Xact, XactError, XactSnap};
pub use entries::{
    BasicEntry, EcGetEntry, EcPutEntry, EcRespondEntry, ListObjectsEntry, LoadLomCacheEntry,
    MakeNCopiesEntry, PutCopiesEntry, RebalanceEntry, ResilverEntry,
};
pub use registry::{BckEntry, Registry, RenewRes};
