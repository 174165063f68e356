//! Global cluster-wide rebalance.
//!
//! When the cluster map version increments, every target runs one
//! rebalance generation identified by a monotonic `reb_id`. Targets
//! exchange three kinds of packed messages over the streaming bus —
//! regular ACKs, EC ACKs, and stage notifications (the latter doubling
//! as EC metadata updates) — and quiesce before closing their streams.

mod engine;
mod msg;
mod qui;
mod recv;
mod stage;

#[cfg(test)]
mod testlib;

pub use engine::{PendingLom, Reb, RebArgs, RebError};
pub use msg::{
    EC_ACT_MOVE_CT, EC_ACT_REB_CT, EC_ACT_UPDATE_MD, EcAck, EcMetadata, REB_MSG_EC,
    REB_MSG_KIND_SIZE, REB_MSG_NTFN, REB_MSG_REGULAR, RegularAck, StageNtfn,
};
pub use qui::QuiRes;
pub use stage::{Stage, Stages};
