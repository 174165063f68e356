//! The shared types of the reef storage cluster.
//!
//! Everything here is plain data: buckets and their properties, the
//! cluster map, list-objects request/response messages, object attributes,
//! and the cluster configuration consumed by the storage plane.

pub mod apc;
mod bck;
mod config;
mod lso;
mod objattrs;
mod props;
mod smap;

pub use bck::{Bck, Ns, ParseUnameError, Provider, UnknownProvider};
pub use config::{
    Config, EcConf, LcacheConf, MirrorConf, RebalanceConf, TimeoutConf, feat,
};
pub use lso::{
    ENTRY_IN_ARCH, ENTRY_IS_CACHED, ENTRY_IS_DIR, ENTRY_STATUS_MASK, EntryStatus, LsoEnt,
    LsoEntries, LsoMsg, LsoRes,
};
pub use objattrs::{Cksum, CksumType, ObjAttrs};
pub use props::{
    BckProps, MAX_DATA_SLICES, MAX_PARITY_SLICES, PropsDelta, ValidationError, WritePolicy,
};
pub use smap::{Smap, Tsi, tname};
