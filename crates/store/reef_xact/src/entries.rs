//! The kind catalogue: concrete registrable entries.

use std::sync::Arc;
use std::time::Duration;

use reef_types::{Bck, Config, apc};

use crate::base::{Xact, XactError};
use crate::registry::{BckEntry, Registry};

/// How long an on-demand activity lingers idle between requests.
const ON_DEMAND_IDLE: Duration = Duration::from_secs(30);

// ----------------------------------------------------------------------------

/// Catch-all entry for kinds that need no extra parameters.
pub struct BasicEntry {
    kind: &'static str,
    on_demand: bool,
    global: bool,
    task: bool,
}

impl BasicEntry {
    pub fn new(kind: &'static str) -> Self {
        Self {
            kind,
            on_demand: false,
            global: false,
            task: false,
        }
    }

    pub fn on_demand(kind: &'static str) -> Self {
        Self {
            on_demand: true,
            ..Self::new(kind)
        }
    }

    pub fn global(kind: &'static str) -> Self {
        Self {
            global: true,
            ..Self::new(kind)
        }
    }

    pub fn task(kind: &'static str) -> Self {
        Self {
            task: true,
            ..Self::new(kind)
        }
    }

    fn make(&self, id: i64, bck: Option<&Bck>) -> Arc<Xact> {
        if self.on_demand {
            Arc::new(Xact::on_demand(id, self.kind, bck.cloned(), ON_DEMAND_IDLE))
        } else {
            Arc::new(Xact::new(id, self.kind, bck.cloned()))
        }
    }
}

impl BckEntry for BasicEntry {
    fn kind(&self) -> &'static str {
        self.kind
    }

    fn start(&self, id: i64, bck: Option<&Bck>) -> Result<Arc<Xact>, XactError> {
        Ok(self.make(id, bck))
    }

    fn is_global(&self) -> bool {
        self.global
    }

    fn is_task(&self) -> bool {
        self.task
    }
}

// ----------------------------------------------------------------------------
// erasure coding: all three are on-demand (linger between requests)

pub struct EcGetEntry;

impl BckEntry for EcGetEntry {
    fn kind(&self) -> &'static str {
        apc::ACT_EC_GET
    }

    fn start(&self, id: i64, bck: Option<&Bck>) -> Result<Arc<Xact>, XactError> {
        Ok(Arc::new(Xact::on_demand(
            id,
            apc::ACT_EC_GET,
            bck.cloned(),
            ON_DEMAND_IDLE,
        )))
    }
}

pub struct EcPutEntry;

impl BckEntry for EcPutEntry {
    fn kind(&self) -> &'static str {
        apc::ACT_EC_PUT
    }

    fn start(&self, id: i64, bck: Option<&Bck>) -> Result<Arc<Xact>, XactError> {
        Ok(Arc::new(Xact::on_demand(
            id,
            apc::ACT_EC_PUT,
            bck.cloned(),
            ON_DEMAND_IDLE,
        )))
    }
}

pub struct EcRespondEntry;

impl BckEntry for EcRespondEntry {
    fn kind(&self) -> &'static str {
        apc::ACT_EC_RESPOND
    }

    fn start(&self, id: i64, bck: Option<&Bck>) -> Result<Arc<Xact>, XactError> {
        Ok(Arc::new(Xact::on_demand(
            id,
            apc::ACT_EC_RESPOND,
            bck.cloned(),
            ON_DEMAND_IDLE,
        )))
    }
}

// ----------------------------------------------------------------------------
// mirroring

pub struct MakeNCopiesEntry {
    pub copies: usize,
}

impl BckEntry for MakeNCopiesEntry {
    fn kind(&self) -> &'static str {
        apc::ACT_MAKE_N_COPIES
    }

    fn start(&self, id: i64, bck: Option<&Bck>) -> Result<Arc<Xact>, XactError> {
        if self.copies < 2 {
            return Err(XactError::Start {
                kind: self.kind(),
                reason: format!("invalid number of copies {}", self.copies),
            });
        }
        Ok(Arc::new(Xact::new(
            id,
            apc::ACT_MAKE_N_COPIES,
            bck.cloned(),
        )))
    }
}

pub struct PutCopiesEntry;

impl BckEntry for PutCopiesEntry {
    fn kind(&self) -> &'static str {
        apc::ACT_PUT_COPIES
    }

    fn start(&self, id: i64, bck: Option<&Bck>) -> Result<Arc<Xact>, XactError> {
        Ok(Arc::new(Xact::on_demand(
            id,
            apc::ACT_PUT_COPIES,
            bck.cloned(),
            ON_DEMAND_IDLE,
        )))
    }
}

// ----------------------------------------------------------------------------
// metadata cache warm-up

pub struct LoadLomCacheEntry;

impl BckEntry for LoadLomCacheEntry {
    fn kind(&self) -> &'static str {
        apc::ACT_LOAD_LOM_CACHE
    }

    fn start(&self, id: i64, bck: Option<&Bck>) -> Result<Arc<Xact>, XactError> {
        Ok(Arc::new(Xact::new(
            id,
            apc::ACT_LOAD_LOM_CACHE,
            bck.cloned(),
        )))
    }
}

// ----------------------------------------------------------------------------
// listing

pub struct ListObjectsEntry;

impl BckEntry for ListObjectsEntry {
    fn kind(&self) -> &'static str {
        apc::ACT_LIST
    }

    fn start(&self, id: i64, bck: Option<&Bck>) -> Result<Arc<Xact>, XactError> {
        Ok(Arc::new(Xact::on_demand(
            id,
            apc::ACT_LIST,
            bck.cloned(),
            ON_DEMAND_IDLE,
        )))
    }

    fn is_task(&self) -> bool {
        true
    }
}

// ----------------------------------------------------------------------------
// global (non-bucket)

pub struct RebalanceEntry;

impl BckEntry for RebalanceEntry {
    fn kind(&self) -> &'static str {
        apc::ACT_REBALANCE
    }

    fn start(&self, id: i64, _bck: Option<&Bck>) -> Result<Arc<Xact>, XactError> {
        Ok(Arc::new(Xact::new(id, apc::ACT_REBALANCE, None)))
    }

    fn is_global(&self) -> bool {
        true
    }
}

pub struct ResilverEntry;

impl BckEntry for ResilverEntry {
    fn kind(&self) -> &'static str {
        apc::ACT_RESILVER
    }

    fn start(&self, id: i64, _bck: Option<&Bck>) -> Result<Arc<Xact>, XactError> {
        Ok(Arc::new(Xact::new(id, apc::ACT_RESILVER, None)))
    }

    fn is_global(&self) -> bool {
        true
    }
}

// ----------------------------------------------------------------------------

impl Registry {
    pub fn renew_ec_get(&self, bck: &Bck) -> Result<Arc<Xact>, XactError> {
        self.renew_bck_xact(bck, Arc::new(EcGetEntry))
    }

    pub fn renew_ec_put(&self, bck: &Bck) -> Result<Arc<Xact>, XactError> {
        self.renew_bck_xact(bck, Arc::new(EcPutEntry))
    }

    pub fn renew_ec_respond(&self, bck: &Bck) -> Result<Arc<Xact>, XactError> {
        self.renew_bck_xact(bck, Arc::new(EcRespondEntry))
    }

    pub fn renew_make_n_copies(&self, bck: &Bck, copies: usize) -> Result<Arc<Xact>, XactError> {
        self.renew_bck_xact(bck, Arc::new(MakeNCopiesEntry { copies }))
    }

    pub fn renew_put_copies(&self, bck: &Bck) -> Result<Arc<Xact>, XactError> {
        self.renew_bck_xact(bck, Arc::new(PutCopiesEntry))
    }

    /// Gated by configuration: warm-up runs only when
    /// `lcache.load_enabled` says so.
    pub fn renew_load_lom_cache(
        &self,
        bck: &Bck,
        config: &Config,
    ) -> Result<Option<Arc<Xact>>, XactError> {
        if !config.lcache.load_enabled {
            return Ok(None);
        }
        self.renew_bck_xact(bck, Arc::new(LoadLomCacheEntry)).map(Some)
    }

    pub fn renew_rebalance(&self) -> Result<Arc<Xact>, XactError> {
        self.renew_global_xact(Arc::new(RebalanceEntry))
    }
}

// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use reef_types::Provider;

    #[test]
    fn invalid_copies_fail_start() {
        let reg = Registry::new();
        let bck = Bck::new("b", Provider::Reef);
        assert!(matches!(
            reg.renew_make_n_copies(&bck, 1).unwrap_err(),
            XactError::Start { .. }
        ));
        // nothing was registered
        assert!(reg.get(&bck, apc::ACT_MAKE_N_COPIES).is_none());
    }

    #[test]
    fn load_lom_cache_is_config_gated() {
        let reg = Registry::new();
        let bck = Bck::new("b", Provider::Reef);
        let mut config = Config::default();
        assert!(reg.renew_load_lom_cache(&bck, &config).unwrap().is_none());

        config.lcache.load_enabled = true;
        let xact = reg.renew_load_lom_cache(&bck, &config).unwrap().unwrap();
        assert_eq!(xact.kind(), apc::ACT_LOAD_LOM_CACHE);
    }
}
