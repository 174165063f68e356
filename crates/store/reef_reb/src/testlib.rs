//! Shared fixtures for the engine's unit tests.

use std::sync::Arc;

use parking_lot::Mutex;

use reef_core::{CoreCtx, HostEnv, Target};
use reef_transport::{Bus, ObjHdr, Reader, TransportError};
use reef_types::{Config, Smap, Tsi, apc};
use reef_xact::Xact;

use crate::engine::Reb;
use crate::stage::Stage;

/// Records everything instead of delivering it.
#[derive(Default)]
pub(crate) struct StubBus {
    pub sends: Mutex<Vec<(ObjHdr, Vec<u8>, String)>>,
    pub acks: Mutex<Vec<(ObjHdr, String)>>,
    pub pushes: Mutex<Vec<(ObjHdr, Option<String>)>>,
}

impl Bus for StubBus {
    fn send(&self, hdr: ObjHdr, mut reader: Reader, target_id: &str) -> Result<(), TransportError> {
        let mut payload = Vec::new();
        std::io::Read::read_to_end(&mut reader, &mut payload)
            .map_err(|err| TransportError::Payload(err.to_string()))?;
        self.sends.lock().push((hdr, payload, target_id.to_owned()));
        Ok(())
    }

    fn ack(&self, hdr: ObjHdr, target_id: &str) -> Result<(), TransportError> {
        self.acks.lock().push((hdr, target_id.to_owned()));
        Ok(())
    }

    fn push(&self, hdr: ObjHdr, target_id: Option<&str>) -> Result<(), TransportError> {
        self.pushes.lock().push((hdr, target_id.map(str::to_owned)));
        Ok(())
    }
}

pub(crate) struct Fixture {
    pub _dirs: Vec<tempfile::TempDir>,
    pub ctxs: Vec<Arc<CoreCtx>>,
    pub rebs: Vec<Arc<Reb>>,
    pub bus: Arc<StubBus>,
    pub smap: Arc<Smap>,
}

/// One engine per id, all on generation 1, local stage `Traverse`, wired
/// to a recording bus.
pub(crate) fn fixture(ids: &[&str]) -> Fixture {
    let bus = Arc::new(StubBus::default());
    let mut smap = Smap {
        version: 1,
        ..Default::default()
    };
    for id in ids {
        smap.tmap.insert((*id).to_owned(), Tsi::new(*id));
    }
    let smap = Arc::new(smap);

    let mut dirs = Vec::new();
    let mut ctxs = Vec::new();
    let mut rebs = Vec::new();
    for (i, id) in ids.iter().enumerate() {
        let dir = tempfile::tempdir().unwrap();
        let mfs = Arc::new(reef_fs::MountedFs::new());
        mfs.add_mountpath(dir.path().join("mp1")).unwrap();
        mfs.add_mountpath(dir.path().join("mp2")).unwrap();
        let ctx = CoreCtx::init(*id, Config::default(), mfs, Arc::new(HostEnv::default()));
        let reb = Reb::new(
            Arc::clone(&ctx) as Arc<dyn Target>,
            Arc::clone(&bus) as Arc<dyn Bus>,
            Arc::clone(&ctx.mfs),
            Arc::new(Config::default()),
        );
        let xact = Arc::new(Xact::new(100 + i as i64, apc::ACT_REBALANCE, None));
        reb.start_generation(1, Arc::clone(&smap), xact);
        reb.stages.set_local(Stage::Traverse);
        dirs.push(dir);
        ctxs.push(ctx);
        rebs.push(reb);
    }

    Fixture {
        _dirs: dirs,
        ctxs,
        rebs,
        bus,
        smap,
    }
}
