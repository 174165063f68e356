//! Rebalance stages, local and as last observed per peer.

use std::sync::atomic::{AtomicU32, Ordering};

use ahash::HashMap;
use parking_lot::RwLock;

/// Ordered stages of one rebalance generation. `Abort` is absorbing:
/// reachable from anywhere, left only by draining back to `Inactive`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u32)]
pub enum Stage {
    Inactive = 0,
    Init,
    Traverse,
    EcNamespace,
    EcDetect,
    EcGlobRepair,
    EcBatch,
    EcCleanup,
    WaitAck,
    FinStreams,
    Fin,
    Abort,
}

impl Stage {
    pub fn from_u32(v: u32) -> Option<Self> {
        use Stage::*;
        Some(match v {
            0 => Inactive,
            1 => Init,
            2 => Traverse,
            3 => EcNamespace,
            4 => EcDetect,
            5 => EcGlobRepair,
            6 => EcBatch,
            7 => EcCleanup,
            8 => WaitAck,
            9 => FinStreams,
            10 => Fin,
            11 => Abort,
            _ => return None,
        })
    }

    pub fn as_str(&self) -> &'static str {
        use Stage::*;
        match self {
            Inactive => "<inactive>",
            Init => "init",
            Traverse => "traverse",
            EcNamespace => "ec-namespace",
            EcDetect => "ec-detect",
            EcGlobRepair => "ec-glob-repair",
            EcBatch => "ec-batch",
            EcCleanup => "ec-cleanup",
            WaitAck => "wait-ack",
            FinStreams => "fin-streams",
            Fin => "fin",
            Abort => "<abort>",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ----------------------------------------------------------------------------

/// Local stage plus the last-observed stage of every peer.
#[derive(Default)]
pub struct Stages {
    local: AtomicU32,
    peers: RwLock<HashMap<String, Stage>>,
}

impl Stages {
    pub fn local(&self) -> Stage {
        Stage::from_u32(self.local.load(Ordering::Acquire)).unwrap_or(Stage::Inactive)
    }

    pub fn set_local(&self, stage: Stage) {
        self.local.store(stage as u32, Ordering::Release);
    }

    pub fn peer(&self, daemon_id: &str) -> Option<Stage> {
        self.peers.read().get(daemon_id).copied()
    }

    pub fn set_peer(&self, daemon_id: &str, stage: Stage) {
        self.peers.write().insert(daemon_id.to_owned(), stage);
    }

    /// Peers believed to still be sending: observed past `Init` and not
    /// yet at `stage`.
    pub fn peers_below(&self, stage: Stage) -> Vec<(String, Stage)> {
        self.peers
            .read()
            .iter()
            .filter(|(_, s)| **s > Stage::Inactive && **s < stage && **s != Stage::Abort)
            .map(|(id, s)| (id.clone(), *s))
            .collect()
    }

    /// New generation: everything back to square one.
    pub fn reset(&self) {
        self.set_local(Stage::Inactive);
        self.peers.write().clear();
    }
}

// ----------------------------------------------------------------------------
