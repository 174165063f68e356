//! Receive paths: regular objects, EC content and metadata, ACKs, and
//! stage notifications.
//!
//! Handlers never return errors to the transport (its lifecycle is
//! static); a failing handler aborts the owning xaction and swallows the
//! error.

use std::io;
use std::path::Path;
use std::sync::Arc;

use reef_core::{Ct, Lom, Owt, PutParams};
use reef_pack::{BytePack, ByteUnpack, Packable as _};
use reef_transport::{Handlers, ObjHdr, Reader, TransportError};
use reef_types::{Smap, feat, tname};

use crate::engine::{Reb, RebError, mono_ns};
use crate::msg::{
    EC_ACT_MOVE_CT, EC_ACT_UPDATE_MD, EcAck, EcMetadata, REB_MSG_EC, REB_MSG_NTFN,
    REB_MSG_REGULAR, RegularAck, StageNtfn,
};
use crate::stage::Stage;

impl Reb {
    /// The three receive streams, bound to this engine.
    pub fn handlers(self: &Arc<Self>) -> Handlers {
        let obj = Arc::clone(self);
        let ack = Arc::clone(self);
        let stage = Arc::clone(self);
        Handlers {
            recv_obj: Arc::new(move |hdr, reader, err| obj.recv_obj(hdr, reader, err)),
            recv_ack: Arc::new(move |hdr, reader, err| ack.recv_ack(hdr, reader, err)),
            recv_stage_ntfn: Arc::new(move |hdr, reader, err| {
                stage.recv_stage_ntfn(hdr, reader, err)
            }),
        }
    }

    fn recv_err(&self, err: RebError) {
        if let Some(xreb) = self.xctn() {
            xreb.abort(&err);
        }
    }

    // -- object stream -----------------------------------------------------

    pub(crate) fn recv_obj(&self, mut hdr: ObjHdr, reader: Reader, err: Option<TransportError>) {
        if let Some(err) = err {
            reef_log::error!("{err}");
            return;
        }
        self.lastrx.store(mono_ns(), std::sync::atomic::Ordering::Release);

        let smap = match self.wait_for_smap() {
            Ok(smap) => smap,
            Err(err) => return self.recv_err(err),
        };
        let opaque = std::mem::take(&mut hdr.opaque);
        let mut unpacker = ByteUnpack::new(&opaque);
        match unpacker.read_byte() {
            Ok(REB_MSG_REGULAR) => {
                let ack = match unpacker.read_any::<RegularAck>() {
                    Ok(ack) => ack,
                    Err(err) => {
                        reef_log::error!("g[{}]: failed to parse ACK: {err}", self.reb_id());
                        return self.recv_err(err.into());
                    }
                };
                if let Err(err) = self.recv_obj_regular(hdr, &smap, ack, reader) {
                    reef_log::error!("{err}");
                    self.recv_err(err);
                }
            }
            Ok(REB_MSG_EC) => {
                let req = match unpacker.read_any::<StageNtfn>() {
                    Ok(req) => req,
                    Err(err) => {
                        reef_log::error!(
                            "{}: invalid EC notification from {} for {}: {err}",
                            self.log_hdr(),
                            tname(&hdr.sid),
                            hdr.cname()
                        );
                        return self.recv_err(err.into());
                    }
                };
                if let Err(err) = self.recv_ec_data(hdr, req, reader) {
                    reef_log::error!("{err}");
                    self.recv_err(err);
                }
            }
            Ok(kind) => {
                self.recv_err(RebError::other(format!(
                    "g[{}]: invalid obj message kind {kind}",
                    self.reb_id()
                )));
            }
            Err(err) => {
                reef_log::error!(
                    "g[{}]: failed to recv obj message kind: {err}",
                    self.reb_id()
                );
                self.recv_err(err.into());
            }
        }
    }

    fn recv_obj_regular(
        &self,
        hdr: ObjHdr,
        smap: &Smap,
        ack: RegularAck,
        reader: Reader,
    ) -> Result<(), RebError> {
        if ack.reb_id != self.reb_id() {
            reef_log::warn!(
                "received {} {}",
                hdr.cname(),
                self.warn_id(ack.reb_id, &ack.daemon_id)
            );
            return Ok(());
        }
        let tsid = ack.daemon_id; // the sender

        let mut lom = Lom::init(hdr.bck.clone(), hdr.obj_name.clone(), &self.mfs)?;

        let stage = self.stages.local();
        if stage >= Stage::Fin {
            if stage > Stage::Fin {
                reef_log::warn!(
                    "{}: post stage-fin receive from {} {lom} (stage {stage})",
                    self.log_hdr(),
                    tname(&tsid)
                );
            }
        } else if stage < Stage::Traverse {
            reef_log::error!(
                "{}: early receive from {} {lom} (stage {stage})",
                self.log_hdr(),
                tname(&tsid)
            );
        }

        lom.copy_attrs(&hdr.obj_attrs, true /*skip checksum*/);
        let Some(xreb) = self.xctn() else {
            return Ok(());
        };
        if xreb.is_aborted() {
            return Ok(());
        }

        let atime = lom.atime();
        self.target.put_object(
            &mut lom,
            PutParams {
                reader,
                work_tag: "reb",
                owt: Owt::Rebalance,
                cksum: hdr.obj_attrs.cksum.clone(),
                atime,
                size: hdr.obj_attrs.size,
            },
        )?;
        xreb.in_objs_add(1, hdr.obj_attrs.size);

        // ACK
        let Some(tsi) = smap.get_target(&tsid) else {
            return Err(RebError::other(format!(
                "g[{}]: {} is not in the {smap}",
                self.reb_id(),
                tname(&tsid)
            )));
        };
        let stage = self.stages.local();
        if stage < Stage::FinStreams && stage != Stage::Inactive {
            let ack = RegularAck {
                reb_id: self.reb_id(),
                daemon_id: self.target.sid().to_owned(),
            };
            let mut ack_hdr = hdr;
            ack_hdr.opaque = ack.new_pack();
            ack_hdr.obj_attrs.size = 0;
            ack_hdr.sid = self.target.sid().to_owned();
            self.bus.ack(ack_hdr, &tsi.id)?;
        }
        Ok(())
    }

    // -- ACK stream --------------------------------------------------------

    pub(crate) fn recv_ack(&self, mut hdr: ObjHdr, _reader: Reader, err: Option<TransportError>) {
        if let Some(err) = err {
            reef_log::error!("{err}");
            return;
        }
        self.lastrx.store(mono_ns(), std::sync::atomic::Ordering::Release);

        let opaque = std::mem::take(&mut hdr.opaque);
        let mut unpacker = ByteUnpack::new(&opaque);
        match unpacker.read_byte() {
            Ok(REB_MSG_EC) => match unpacker.read_any::<EcAck>() {
                Ok(_ack) => {
                    self.ec_in_flight
                        .fetch_sub(1, std::sync::atomic::Ordering::AcqRel);
                }
                Err(err) => {
                    reef_log::error!(
                        "g[{}]: failed to unpack EC ACK for {}: {err}",
                        self.reb_id(),
                        hdr.cname()
                    );
                }
            },
            Ok(REB_MSG_REGULAR) => {
                let ack = match unpacker.read_any::<RegularAck>() {
                    Ok(ack) => ack,
                    Err(err) => {
                        return self.recv_err(RebError::other(format!(
                            "g[{}]: failed to unpack regular ACK: {err}",
                            self.reb_id()
                        )));
                    }
                };
                if ack.reb_id == 0 {
                    return self.recv_err(RebError::other(format!(
                        "g[{}]: invalid g[0] ACK from {}",
                        self.reb_id(),
                        tname(&ack.daemon_id)
                    )));
                }
                if ack.reb_id != self.reb_id() {
                    reef_log::warn!(
                        "ACK from {} [{}]",
                        ack.daemon_id,
                        self.warn_id(ack.reb_id, &ack.daemon_id)
                    );
                    return;
                }
                let uname = hdr.bck.make_uname(&hdr.obj_name);
                self.ack_lom_ack(&uname);
            }
            Ok(kind) => {
                self.recv_err(RebError::other(format!(
                    "g[{}]: invalid ACK message type '{kind}' (expecting '{REB_MSG_REGULAR}')",
                    self.reb_id()
                )));
            }
            Err(err) => {
                self.recv_err(RebError::other(format!(
                    "g[{}]: failed to read ACK message type: {err}",
                    self.reb_id()
                )));
            }
        }
    }

    /// The migration is confirmed:
    /// - remove the migrated object and its copies (unless the feature
    ///   flag disallows it),
    /// - free the pending slot, counting the acknowledged migration.
    fn ack_lom_ack(&self, uname: &str) {
        let Some(pending) = self.del_lom_ack(uname, 0) else {
            return;
        };
        if !self.config().feature(feat::DONT_DELETE_WHEN_REBALANCING) {
            if let Err(err) = self.target.evict_object(&pending.lom) {
                reef_log::warn!("failed to remove migrated {}: {err}", pending.lom);
            }
        }
        if let Some(xreb) = self.xctn() {
            xreb.objs_add(1, pending.lom.lsize());
        }
    }

    // -- stage-notification stream -----------------------------------------

    pub(crate) fn recv_stage_ntfn(
        &self,
        hdr: ObjHdr,
        _reader: Reader,
        err: Option<TransportError>,
    ) {
        if let Some(err) = err {
            reef_log::error!("{}: stage err {err}", self.log_hdr());
            return;
        }
        let ntfn = match decode_stage_ntfn(&hdr.opaque) {
            Ok(ntfn) => ntfn,
            Err(err) => return self.recv_err(err),
        };
        self.lastrx.store(mono_ns(), std::sync::atomic::Ordering::Release);

        let reb_id = self.reb_id();
        let Some(xreb) = self.xctn() else {
            if self.stages.local() != Stage::Inactive {
                reef_log::error!("{}: nil rebalancing xaction", self.log_hdr());
            }
            return;
        };
        if xreb.is_aborted() {
            return;
        }

        // eq
        if reb_id == ntfn.reb_id {
            self.stages.set_peer(&ntfn.daemon_id, ntfn.stage);
            if ntfn.stage == Stage::Abort {
                let err = RebError::PeerAborted {
                    from: tname(&ntfn.daemon_id),
                    stage: ntfn.stage,
                };
                xreb.abort(format!("{}: {err}", self.log_hdr()));
            }
            return;
        }
        // other's old
        if reb_id > ntfn.reb_id {
            reef_log::warn!(
                "{}: stage notification from {} at stage {}: {}",
                self.log_hdr(),
                tname(&ntfn.daemon_id),
                ntfn.stage,
                self.warn_id(ntfn.reb_id, &ntfn.daemon_id)
            );
            return;
        }
        // we are behind
        xreb.abort(format!(
            "{}: {}",
            self.log_hdr(),
            self.warn_id(ntfn.reb_id, &ntfn.daemon_id)
        ));
    }

    // -- EC receive --------------------------------------------------------

    fn recv_ec_data(&self, hdr: ObjHdr, req: StageNtfn, reader: Reader) -> Result<(), RebError> {
        if req.reb_id != self.reb_id() {
            reef_log::warn!(
                "{}: not yet started or already finished rebalancing ({}, {}) - dropping EC MD for {} from {}",
                tname(self.target.sid()),
                req.reb_id,
                self.reb_id(),
                hdr.cname(),
                tname(&hdr.sid)
            );
            return Ok(());
        }
        if req.action == EC_ACT_UPDATE_MD {
            if let Err(err) = self.receive_md(&req, &hdr) {
                reef_log::warn!(
                    "{}: failed to receive EC MD from {} for {}: [{err}]",
                    self.log_hdr(),
                    tname(&hdr.sid),
                    hdr.cname()
                );
            }
            return Ok(());
        }
        self.receive_ct(req, &hdr, reader).map_err(|err| {
            RebError::other(format!(
                "{}: failed to receive CT from {} for {}: {err}",
                self.log_hdr(),
                tname(&hdr.sid),
                hdr.cname()
            ))
        })
    }

    /// MD update: only the daemon list and the full-replica owner change,
    /// and only for the matching generation.
    fn receive_md(&self, req: &StageNtfn, hdr: &ObjHdr) -> Result<(), RebError> {
        let req_md = req
            .md
            .as_ref()
            .ok_or_else(|| RebError::other("md-update without metadata"))?;
        let ct_meta = Ct::for_object(
            hdr.bck.clone(),
            hdr.obj_name.clone(),
            reef_fs::EC_META,
            &self.mfs,
        )?;
        let Some(mut md) = load_md(ct_meta.fqn())? else {
            return Ok(());
        };
        if md.generation != req_md.generation {
            return Ok(());
        }
        md.full_replica = req_md.full_replica.clone();
        md.daemons = req_md.daemons.clone();
        write_md(ct_meta.fqn(), &md)?;
        Ok(())
    }

    /// Receive one EC content unit, resolving slice conflicts and fanning
    /// the updated metadata out.
    fn receive_ct(&self, mut req: StageNtfn, hdr: &ObjHdr, reader: Reader) -> Result<(), RebError> {
        let mut req_md = req
            .md
            .take()
            .ok_or_else(|| RebError::other("CT without metadata"))?;
        let ct = Ct::for_object(
            hdr.bck.clone(),
            hdr.obj_name.clone(),
            reef_fs::EC_SLICE,
            &self.mfs,
        )?;
        let ct_meta = Ct::for_object(
            hdr.bck.clone(),
            hdr.obj_name.clone(),
            reef_fs::EC_META,
            &self.mfs,
        )?;
        let local_md = load_md(ct_meta.fqn())?;

        // fix the metadata: update CT locations
        req_md.daemons.remove(&req.daemon_id);
        if let Some(local) = &local_md {
            if req_md.generation < local.generation {
                // local CT is newer - do not save anything
                return Ok(());
            }
        }

        // slice conflict: we already hold a different slice of the same
        // generation. Move ours to the target the incoming metadata lists
        // as the (stale) holder of the incoming slice.
        let mut move_to: Option<String> = None;
        let mut moved_slice_id = 0u16;
        let mut work_fqn: Option<String> = None;
        if let Some(local) = &local_md {
            if local.generation == req_md.generation
                && local.slice_id != req_md.slice_id
                && Path::new(ct.fqn()).exists()
            {
                let candidate = local
                    .daemons
                    .iter()
                    .find(|(id, slice)| {
                        **slice == req_md.slice_id
                            && id.as_str() != self.target.sid()
                            && id.as_str() != req.daemon_id
                    })
                    .map(|(id, _)| id.clone());
                if let Some(to) = candidate {
                    let wk = self.mfs.make_fqn(
                        ct.mountpath(),
                        ct.bck(),
                        reef_fs::WORKFILE,
                        &format!("ec-move.{:x}", reef_core::uname_digest(ct.obj_name())),
                    );
                    std::fs::create_dir_all(Path::new(&wk).parent().expect("workfile has a dir"))
                        .map_err(reef_core::CoreError::Io)?;
                    std::fs::rename(ct.fqn(), &wk).map_err(reef_core::CoreError::Io)?;
                    moved_slice_id = local.slice_id;
                    move_to = Some(to);
                    work_fqn = Some(wk);
                }
            }
        }

        req_md.full_replica = self.target.sid().to_owned();
        req_md
            .daemons
            .insert(self.target.sid().to_owned(), req_md.slice_id);
        if let Some(to) = &move_to {
            req_md.daemons.insert(to.clone(), moved_slice_id);
        }

        // save the received CT (and its metadata) to local drives
        if let Err(err) = save_ct_to_disk(&ct, &ct_meta, &req_md, reader) {
            if let Err(err_rm) = std::fs::remove_file(ct.fqn()) {
                if err_rm.kind() != io::ErrorKind::NotFound {
                    reef_log::error!("{err} nested err: failed to remove {} [{err_rm}]", ct.fqn());
                }
            }
            if let Some(wk) = &work_fqn {
                if let Err(err_mv) = std::fs::rename(wk, ct.fqn()) {
                    reef_log::error!(
                        "{err} nested err: failed to rename slice {} [{err_mv}]",
                        ct.fqn()
                    );
                }
            }
            return Err(err);
        }

        // ship the conflicting local slice
        if let (Some(to), Some(wk)) = (&move_to, &work_fqn) {
            let mut moved_md = req_md.clone();
            moved_md.slice_id = moved_slice_id;
            if let Err(err) = self.send_ct_from_disk(&ct, moved_md, to, wk) {
                reef_log::error!("failed to move slice to {} [{err}]", tname(to));
            }
        }

        // broadcast the updated MD to every remote target it references,
        // except the one the conflicting slice just went to
        let ntfn_md = StageNtfn {
            daemon_id: self.target.sid().to_owned(),
            stage: Stage::Traverse,
            reb_id: self.reb_id(),
            md: Some(req_md.clone()),
            action: EC_ACT_UPDATE_MD,
        };
        let mut first_err: Option<RebError> = None;
        for tsi_id in req_md.remote_targets(self.target.sid()) {
            if move_to.as_deref() == Some(tsi_id) {
                continue;
            }
            let Some(xreb) = self.xctn() else {
                break;
            };
            if xreb.is_aborted() {
                break;
            }
            let md_hdr = ObjHdr {
                bck: ct.bck().clone(),
                obj_name: ct.obj_name().to_owned(),
                opaque: ntfn_md.new_pack(REB_MSG_EC),
                sid: self.target.sid().to_owned(),
                ..Default::default()
            };
            self.on_air_inc();
            let res = self
                .bus
                .send(md_hdr, Box::new(io::Cursor::new(Vec::new())), tsi_id);
            self.on_air_dec();
            if let Err(err) = res {
                // best-effort fan-out; the first failure is the one reported
                if first_err.is_none() {
                    first_err = Some(RebError::other(format!(
                        "{}: failed to send updated EC MD: {err}",
                        self.log_hdr()
                    )));
                }
            }
        }
        match first_err {
            None => Ok(()),
            Some(err) => Err(err),
        }
    }

    fn send_ct_from_disk(
        &self,
        ct: &Ct,
        md: EcMetadata,
        to: &str,
        work_fqn: &str,
    ) -> Result<(), RebError> {
        let file = std::fs::File::open(work_fqn).map_err(reef_core::CoreError::Io)?;
        let size = file.metadata().map_err(reef_core::CoreError::Io)?.len() as i64;
        let ntfn = StageNtfn {
            daemon_id: self.target.sid().to_owned(),
            stage: Stage::Traverse,
            reb_id: self.reb_id(),
            md: Some(md),
            action: EC_ACT_MOVE_CT,
        };
        let mut hdr = ObjHdr {
            bck: ct.bck().clone(),
            obj_name: ct.obj_name().to_owned(),
            opaque: ntfn.new_pack(REB_MSG_EC),
            sid: self.target.sid().to_owned(),
            ..Default::default()
        };
        hdr.obj_attrs.size = size;
        self.on_air_inc();
        let res = self.bus.send(hdr, Box::new(file), to);
        self.on_air_dec();
        res?;
        let _ = std::fs::remove_file(work_fqn);
        Ok(())
    }
}

// ----------------------------------------------------------------------------

fn decode_stage_ntfn(opaque: &[u8]) -> Result<StageNtfn, RebError> {
    let mut unpacker = ByteUnpack::new(opaque);
    let kind = unpacker.read_byte()?;
    if kind != REB_MSG_NTFN {
        return Err(RebError::other(format!(
            "invalid stage-notification kind {kind}"
        )));
    }
    Ok(unpacker.read_any::<StageNtfn>()?)
}

fn load_md(fqn: &str) -> Result<Option<EcMetadata>, RebError> {
    let bytes = match std::fs::read(fqn) {
        Ok(bytes) => bytes,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(reef_core::CoreError::Io(err).into()),
    };
    let mut unpacker = ByteUnpack::new(&bytes);
    Ok(Some(unpacker.read_any::<EcMetadata>()?))
}

fn write_md(fqn: &str, md: &EcMetadata) -> Result<(), RebError> {
    let mut packer = BytePack::with_capacity(md.packed_size());
    packer.write_any(md);
    std::fs::create_dir_all(Path::new(fqn).parent().expect("md has a dir"))
        .map_err(reef_core::CoreError::Io)?;
    std::fs::write(fqn, packer.into_bytes()).map_err(reef_core::CoreError::Io)?;
    Ok(())
}

fn save_ct_to_disk(
    ct: &Ct,
    ct_meta: &Ct,
    md: &EcMetadata,
    mut reader: Reader,
) -> Result<(), RebError> {
    std::fs::create_dir_all(Path::new(ct.fqn()).parent().expect("slice has a dir"))
        .map_err(reef_core::CoreError::Io)?;
    let mut file = std::fs::File::create(ct.fqn()).map_err(reef_core::CoreError::Io)?;
    io::copy(&mut reader, &mut file).map_err(reef_core::CoreError::Io)?;
    write_md(ct_meta.fqn(), md)
}

// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testlib::{self, Fixture};
    use reef_core::Target as _;
    use reef_pack::Unpackable as _;
    use reef_types::{Bck, ObjAttrs, Provider};
    use std::collections::BTreeMap;

    fn bck() -> Bck {
        Bck::new("bkt", Provider::Reef)
    }

    fn obj_hdr(_fx: &Fixture, obj_name: &str, size: i64, opaque: Vec<u8>) -> ObjHdr {
        ObjHdr {
            bck: bck(),
            obj_name: obj_name.to_owned(),
            obj_attrs: ObjAttrs {
                size,
                atime: 42,
                ..Default::default()
            },
            opaque,
            sid: "t1".to_owned(),
        }
    }

    fn payload(bytes: &[u8]) -> Reader {
        Box::new(io::Cursor::new(bytes.to_vec()))
    }

    // -- regular object stream ---------------------------------------------

    #[test]
    fn regular_receive_puts_and_acks_once() {
        let fx = testlib::fixture(&["t1", "t2"]);
        let receiver = &fx.rebs[1];

        let ack = RegularAck {
            reb_id: 1,
            daemon_id: "t1".to_owned(),
        };
        let hdr = obj_hdr(&fx, "a/b", 5, ack.new_pack());
        receiver.recv_obj(hdr, payload(b"hello"), None);

        // the object landed locally
        let mut lom = Lom::init(bck(), "a/b", &fx.ctxs[1].mfs).unwrap();
        lom.load().unwrap();
        assert_eq!(lom.lsize(), 5);
        assert_eq!(receiver.xctn().unwrap().snap().in_objs, 1);

        // exactly one ACK, back to the sender
        let acks = fx.bus.acks.lock();
        assert_eq!(acks.len(), 1);
        let (ack_hdr, to) = &acks[0];
        assert_eq!(to, "t1");
        assert_eq!(ack_hdr.obj_attrs.size, 0);
        let mut unpacker = ByteUnpack::new(&ack_hdr.opaque);
        assert_eq!(unpacker.read_byte().unwrap(), REB_MSG_REGULAR);
        let back = RegularAck::unpack(&mut unpacker).unwrap();
        assert_eq!(back.reb_id, 1);
        assert_eq!(back.daemon_id, "t2");
    }

    #[test]
    fn no_ack_once_streams_are_closing() {
        let fx = testlib::fixture(&["t1", "t2"]);
        let receiver = &fx.rebs[1];
        receiver.stages.set_local(Stage::FinStreams);

        let ack = RegularAck {
            reb_id: 1,
            daemon_id: "t1".to_owned(),
        };
        let hdr = obj_hdr(&fx, "late/obj", 4, ack.new_pack());
        receiver.recv_obj(hdr, payload(b"data"), None);

        // stored, but not acknowledged
        let mut lom = Lom::init(bck(), "late/obj", &fx.ctxs[1].mfs).unwrap();
        lom.load().unwrap();
        assert!(fx.bus.acks.lock().is_empty());
    }

    #[test]
    fn stale_generation_object_is_dropped() {
        let fx = testlib::fixture(&["t1", "t2"]);
        let receiver = &fx.rebs[1];

        let ack = RegularAck {
            reb_id: 7, // receiver is on generation 1
            daemon_id: "t1".to_owned(),
        };
        let hdr = obj_hdr(&fx, "stale/obj", 4, ack.new_pack());
        receiver.recv_obj(hdr, payload(b"data"), None);

        let mut lom = Lom::init(bck(), "stale/obj", &fx.ctxs[1].mfs).unwrap();
        assert!(lom.load().is_err());
        assert!(fx.bus.acks.lock().is_empty());
        assert!(!receiver.xctn().unwrap().is_aborted());
    }

    // -- ACK stream --------------------------------------------------------

    #[test]
    fn regular_ack_cleans_up_the_migrated_object() {
        let fx = testlib::fixture(&["t1", "t2"]);
        let sender = &fx.rebs[0];
        let ctx = &fx.ctxs[0];

        // the object this target just migrated out
        let mut lom = Lom::init(bck(), "moved", &ctx.mfs).unwrap();
        ctx.put_object(
            &mut lom,
            reef_core::PutParams {
                reader: payload(b"body"),
                work_tag: "reb",
                owt: Owt::Rebalance,
                cksum: None,
                atime: 1,
                size: 4,
            },
        )
        .unwrap();
        let fqn = lom.fqn().to_owned();
        sender.add_lom_ack(lom);
        assert_eq!(sender.num_pending_acks(), 1);

        let ack = RegularAck {
            reb_id: 1,
            daemon_id: "t2".to_owned(),
        };
        let mut hdr = obj_hdr(&fx, "moved", 0, ack.new_pack());
        hdr.sid = "t2".to_owned();
        sender.recv_ack(hdr, payload(b""), None);

        assert_eq!(sender.num_pending_acks(), 0);
        assert!(!Path::new(&fqn).exists());
        assert_eq!(sender.xctn().unwrap().snap().objs, 1);
    }

    #[test]
    fn stale_ack_is_ignored() {
        let fx = testlib::fixture(&["t1", "t2"]);
        let sender = &fx.rebs[0];
        let ctx = &fx.ctxs[0];

        let mut lom = Lom::init(bck(), "kept", &ctx.mfs).unwrap();
        ctx.put_object(
            &mut lom,
            reef_core::PutParams {
                reader: payload(b"body"),
                work_tag: "reb",
                owt: Owt::Rebalance,
                cksum: None,
                atime: 1,
                size: 4,
            },
        )
        .unwrap();
        sender.add_lom_ack(lom);

        let ack = RegularAck {
            reb_id: 9,
            daemon_id: "t2".to_owned(),
        };
        let hdr = obj_hdr(&fx, "kept", 0, ack.new_pack());
        sender.recv_ack(hdr, payload(b""), None);
        assert_eq!(sender.num_pending_acks(), 1);
    }

    #[test]
    fn ec_ack_decrements_in_flight() {
        let fx = testlib::fixture(&["t1", "t2"]);
        let sender = &fx.rebs[0];
        sender
            .ec_in_flight
            .store(2, std::sync::atomic::Ordering::Release);

        let ack = EcAck {
            reb_id: 1,
            slice_id: 3,
            daemon_id: "t2".to_owned(),
        };
        let hdr = obj_hdr(&fx, "slice", 0, ack.new_pack());
        sender.recv_ack(hdr, payload(b""), None);
        assert_eq!(
            sender.ec_in_flight.load(std::sync::atomic::Ordering::Acquire),
            1
        );
    }

    // -- stage notifications -----------------------------------------------

    fn ntfn_hdr(reb_id: i64, stage: Stage, from: &str) -> ObjHdr {
        let ntfn = StageNtfn {
            reb_id,
            stage,
            daemon_id: from.to_owned(),
            ..Default::default()
        };
        ObjHdr {
            sid: from.to_owned(),
            opaque: ntfn.new_pack(REB_MSG_NTFN),
            ..Default::default()
        }
    }

    #[test]
    fn matching_generation_records_peer_stage() {
        let fx = testlib::fixture(&["t1", "t2"]);
        let reb = &fx.rebs[0];
        reb.recv_stage_ntfn(ntfn_hdr(1, Stage::WaitAck, "t2"), payload(b""), None);
        assert_eq!(reb.stages.peer("t2"), Some(Stage::WaitAck));
        assert!(!reb.xctn().unwrap().is_aborted());
    }

    #[test]
    fn peer_abort_aborts_locally() {
        let fx = testlib::fixture(&["t1", "t2"]);
        let reb = &fx.rebs[0];
        reb.recv_stage_ntfn(ntfn_hdr(1, Stage::Abort, "t2"), payload(b""), None);
        let xreb = reb.xctn().unwrap();
        assert!(xreb.is_aborted());
        assert!(xreb.abort_err().unwrap().contains("t2"));
    }

    #[test]
    fn older_generation_notification_is_a_noop() {
        let fx = testlib::fixture(&["t1", "t2"]);
        let reb = &fx.rebs[0];
        reb.recv_stage_ntfn(ntfn_hdr(0, Stage::Abort, "t2"), payload(b""), None);
        assert_eq!(reb.stages.peer("t2"), None);
        assert!(!reb.xctn().unwrap().is_aborted());
    }

    #[test]
    fn newer_generation_aborts_local() {
        let fx = testlib::fixture(&["t1", "t2"]);
        let reb = &fx.rebs[0];
        reb.recv_stage_ntfn(ntfn_hdr(5, Stage::Traverse, "t2"), payload(b""), None);
        assert!(reb.xctn().unwrap().is_aborted());
    }

    // -- EC data -----------------------------------------------------------

    fn ec_md(generation: i64, slice_id: u16, daemons: &[(&str, u16)]) -> EcMetadata {
        EcMetadata {
            generation,
            obj_size: 64,
            data_slices: 2,
            parity_slices: 1,
            slice_id,
            full_replica: "t1".to_owned(),
            daemons: daemons
                .iter()
                .map(|(id, s)| ((*id).to_owned(), *s))
                .collect::<BTreeMap<_, _>>(),
        }
    }

    fn ec_ct_hdr(fx: &Fixture, obj: &str, md: EcMetadata, action: u32) -> ObjHdr {
        let req = StageNtfn {
            reb_id: 1,
            action,
            stage: Stage::Traverse,
            daemon_id: "t1".to_owned(),
            md: Some(md),
        };
        obj_hdr(fx, obj, 64, req.new_pack(REB_MSG_EC))
    }

    #[test]
    fn receive_ct_rewrites_md_and_fans_out() {
        let fx = testlib::fixture(&["t1", "t2", "t3"]);
        let receiver = &fx.rebs[1]; // t2

        let md = ec_md(2, 1, &[("t1", 1), ("t3", 2)]);
        let hdr = ec_ct_hdr(&fx, "ec/obj", md, crate::msg::EC_ACT_REB_CT);
        receiver.recv_obj(hdr, payload(&[7u8; 64]), None);

        // slice on disk
        let ct = Ct::for_object(bck(), "ec/obj", reef_fs::EC_SLICE, &fx.ctxs[1].mfs).unwrap();
        assert_eq!(std::fs::read(ct.fqn()).unwrap().len(), 64);

        // metadata: sender gone, local target is the full replica
        let ct_meta = Ct::for_object(bck(), "ec/obj", reef_fs::EC_META, &fx.ctxs[1].mfs).unwrap();
        let saved = load_md(ct_meta.fqn()).unwrap().unwrap();
        assert!(!saved.daemons.contains_key("t1"));
        assert_eq!(saved.daemons.get("t2"), Some(&1));
        assert_eq!(saved.full_replica, "t2");

        // fan-out went to t3 only (t1 was dropped from the md)
        let sends = fx.bus.sends.lock();
        assert_eq!(sends.len(), 1);
        let (md_hdr, _, to) = &sends[0];
        assert_eq!(to, "t3");
        let mut unpacker = ByteUnpack::new(&md_hdr.opaque);
        assert_eq!(unpacker.read_byte().unwrap(), REB_MSG_EC);
        let ntfn = StageNtfn::unpack(&mut unpacker).unwrap();
        assert_eq!(ntfn.action, EC_ACT_UPDATE_MD);
        assert_eq!(ntfn.md.unwrap().full_replica, "t2");
    }

    #[test]
    fn receive_ct_drops_older_generation() {
        let fx = testlib::fixture(&["t1", "t2"]);
        let receiver = &fx.rebs[1];
        let ctx = &fx.ctxs[1];

        // a newer local record already exists
        let ct_meta = Ct::for_object(bck(), "ec/obj", reef_fs::EC_META, &ctx.mfs).unwrap();
        write_md(ct_meta.fqn(), &ec_md(5, 0, &[("t2", 0)])).unwrap();

        let hdr = ec_ct_hdr(&fx, "ec/obj", ec_md(2, 1, &[("t1", 1)]), crate::msg::EC_ACT_REB_CT);
        receiver.recv_obj(hdr, payload(&[1u8; 64]), None);

        let ct = Ct::for_object(bck(), "ec/obj", reef_fs::EC_SLICE, &ctx.mfs).unwrap();
        assert!(!Path::new(ct.fqn()).exists());
        let saved = load_md(ct_meta.fqn()).unwrap().unwrap();
        assert_eq!(saved.generation, 5);
        assert!(fx.bus.sends.lock().is_empty());
    }

    #[test]
    fn receive_md_updates_matching_generation_only() {
        let fx = testlib::fixture(&["t1", "t2"]);
        let receiver = &fx.rebs[1];
        let ctx = &fx.ctxs[1];

        let ct_meta = Ct::for_object(bck(), "ec/obj", reef_fs::EC_META, &ctx.mfs).unwrap();
        write_md(ct_meta.fqn(), &ec_md(3, 0, &[("t2", 0), ("t1", 1)])).unwrap();

        // generation mismatch: untouched
        let mut update = ec_md(4, 0, &[("t9", 0)]);
        update.full_replica = "t9".to_owned();
        let hdr = ec_ct_hdr(&fx, "ec/obj", update, EC_ACT_UPDATE_MD);
        receiver.recv_obj(hdr, payload(b""), None);
        assert_eq!(load_md(ct_meta.fqn()).unwrap().unwrap().full_replica, "t1");

        // matching generation: daemons and full-replica rewritten
        let mut update = ec_md(3, 0, &[("t9", 0)]);
        update.full_replica = "t9".to_owned();
        let hdr = ec_ct_hdr(&fx, "ec/obj", update, EC_ACT_UPDATE_MD);
        receiver.recv_obj(hdr, payload(b""), None);
        let saved = load_md(ct_meta.fqn()).unwrap().unwrap();
        assert_eq!(saved.full_replica, "t9");
        assert!(saved.daemons.contains_key("t9"));
        assert_eq!(saved.generation, 3);
    }
}
