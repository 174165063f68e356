//! Quiescence prior to closing streams (fin-streams stage).

use std::sync::atomic::Ordering;
use std::time::Duration;

use crate::engine::{Reb, RebArgs, mono_ns};
use crate::stage::Stage;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum QuiRes {
    /// Still receiving.
    Active,

    /// Radio silence locally, but some remote target is still sending.
    ActiveDontBump,

    Inactive,
}

const QUI_FLOOR: Duration = Duration::from_secs(8);

impl Reb {
    /// The quiescence predicate the fin-streams stage polls.
    pub fn qui_predicate(&self, args: &RebArgs) -> QuiRes {
        let Some(xctn) = self.xctn() else {
            return QuiRes::Inactive;
        };
        if xctn.is_aborted() || xctn.finished() {
            return QuiRes::Inactive;
        }

        // a) at least 2*max-keepalive of receive silence, floor 8s
        let lastrx = self.lastrx.load(Ordering::Acquire);
        let silence = (args.config.timeout.max_keepalive * 2).max(QUI_FLOOR);
        if lastrx != 0 {
            let since_ns = mono_ns().saturating_sub(lastrx).max(0) as u64;
            if Duration::from_nanos(since_ns) < silence {
                return QuiRes::Active;
            }
        }

        // b) secondly and separately, every other target must be done
        // sending
        for (peer_id, peer_stage) in self.stages.peers_below(Stage::Fin) {
            if args.smap.get_target(&peer_id).is_some() {
                reef_log::info!(
                    "{}: waiting for: {} ({peer_stage})",
                    self.log_hdr(),
                    reef_types::tname(&peer_id)
                );
                return QuiRes::ActiveDontBump;
            }
        }

        QuiRes::Inactive
    }

    /// Poll the predicate with exponential backoff; returns `Inactive`
    /// when it is safe to close the streams, or the last observed state
    /// once `max_total` is spent.
    pub fn quiesce(&self, args: &RebArgs, max_total: Duration) -> QuiRes {
        let mut backoff = Duration::from_millis(10);
        let mut total = Duration::ZERO;
        loop {
            let res = self.qui_predicate(args);
            if res == QuiRes::Inactive || total >= max_total {
                return res;
            }
            std::thread::sleep(backoff);
            total += backoff;
            backoff = (backoff * 2).min(Duration::from_secs(1));
        }
    }
}

// ----------------------------------------------------------------------------
