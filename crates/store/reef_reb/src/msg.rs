//! Packed rebalance messages.
//!
//! Every message starts with a 1-byte kind, then fixed big-endian
//! fields; the packed size is computable a priori and the packers
//! reserve exactly that much.

use std::collections::BTreeMap;

use reef_pack::{
    BytePack, ByteUnpack, PackError, Packable, SIZEOF_I64, SIZEOF_U16, SIZEOF_U32, Unpackable,
    packed_str_len,
};

use crate::stage::Stage;

// message kinds (for ACKs and for sending files)
pub const REB_MSG_REGULAR: u8 = 0;
pub const REB_MSG_EC: u8 = 1;
/// Stage transition notification (ack stream) _or_ EC md update (data
/// stream).
pub const REB_MSG_NTFN: u8 = 2;

pub const REB_MSG_KIND_SIZE: usize = 1;

// EC actions carried by [`StageNtfn::action`]
/// A CT moved to its correct target.
pub const EC_ACT_REB_CT: u32 = 0;
/// A CT moved away after a slice conflict on the receiver.
pub const EC_ACT_MOVE_CT: u32 = 1;
/// A new metadata record to update the existing local one.
pub const EC_ACT_UPDATE_MD: u32 = 2;

// ----------------------------------------------------------------------------

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RegularAck {
    pub reb_id: i64,
    pub daemon_id: String,
}

impl Packable for RegularAck {
    fn pack(&self, packer: &mut BytePack) {
        packer.write_i64(self.reb_id);
        packer.write_str(&self.daemon_id);
    }

    fn packed_size(&self) -> usize {
        SIZEOF_I64 + packed_str_len(&self.daemon_id)
    }
}

impl Unpackable for RegularAck {
    fn unpack(unpacker: &mut ByteUnpack<'_>) -> Result<Self, PackError> {
        Ok(Self {
            reb_id: unpacker.read_i64()?,
            daemon_id: unpacker.read_str()?,
        })
    }
}

impl RegularAck {
    pub fn new_pack(&self) -> Vec<u8> {
        let mut packer = BytePack::with_capacity(REB_MSG_KIND_SIZE + self.packed_size());
        packer.write_byte(REB_MSG_REGULAR);
        packer.write_any(self);
        packer.into_bytes()
    }
}

// ----------------------------------------------------------------------------

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct EcAck {
    pub reb_id: i64,
    pub slice_id: u16,
    pub daemon_id: String,
}

impl Packable for EcAck {
    fn pack(&self, packer: &mut BytePack) {
        packer.write_i64(self.reb_id);
        packer.write_u16(self.slice_id);
        packer.write_str(&self.daemon_id);
    }

    fn packed_size(&self) -> usize {
        SIZEOF_I64 + SIZEOF_U16 + packed_str_len(&self.daemon_id)
    }
}

impl Unpackable for EcAck {
    fn unpack(unpacker: &mut ByteUnpack<'_>) -> Result<Self, PackError> {
        Ok(Self {
            reb_id: unpacker.read_i64()?,
            slice_id: unpacker.read_u16()?,
            daemon_id: unpacker.read_str()?,
        })
    }
}

impl EcAck {
    pub fn new_pack(&self) -> Vec<u8> {
        let mut packer = BytePack::with_capacity(REB_MSG_KIND_SIZE + self.packed_size());
        packer.write_byte(REB_MSG_EC);
        packer.write_any(self);
        packer.into_bytes()
    }
}

// ----------------------------------------------------------------------------

/// Erasure-coding metadata for one object, as shipped between targets
/// and persisted as the content of the object's `%mt` unit.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct EcMetadata {
    /// Bumped whenever the object is re-encoded; an older incoming
    /// generation loses.
    pub generation: i64,
    pub obj_size: i64,
    pub data_slices: u16,
    pub parity_slices: u16,

    /// Which slice this record accompanies (0 = the full replica).
    pub slice_id: u16,

    /// Daemon holding the whole object.
    pub full_replica: String,

    /// daemon id → slice id held there. Ordered, so packing is
    /// deterministic.
    pub daemons: BTreeMap<String, u16>,
}

impl EcMetadata {
    /// Daemons referenced by this record, except `self_id`.
    pub fn remote_targets(&self, self_id: &str) -> Vec<&str> {
        self.daemons
            .keys()
            .map(|id| id.as_str())
            .filter(|id| *id != self_id)
            .collect()
    }
}

impl Packable for EcMetadata {
    fn pack(&self, packer: &mut BytePack) {
        packer.write_i64(self.generation);
        packer.write_i64(self.obj_size);
        packer.write_u16(self.data_slices);
        packer.write_u16(self.parity_slices);
        packer.write_u16(self.slice_id);
        packer.write_str(&self.full_replica);
        packer.write_u16(self.daemons.len() as u16);
        for (daemon_id, slice_id) in &self.daemons {
            packer.write_str(daemon_id);
            packer.write_u16(*slice_id);
        }
    }

    fn packed_size(&self) -> usize {
        let mut size = SIZEOF_I64 * 2 + SIZEOF_U16 * 3 + packed_str_len(&self.full_replica)
            + SIZEOF_U16;
        for daemon_id in self.daemons.keys() {
            size += packed_str_len(daemon_id) + SIZEOF_U16;
        }
        size
    }
}

impl Unpackable for EcMetadata {
    fn unpack(unpacker: &mut ByteUnpack<'_>) -> Result<Self, PackError> {
        let generation = unpacker.read_i64()?;
        let obj_size = unpacker.read_i64()?;
        let data_slices = unpacker.read_u16()?;
        let parity_slices = unpacker.read_u16()?;
        let slice_id = unpacker.read_u16()?;
        let full_replica = unpacker.read_str()?;
        let num_daemons = unpacker.read_u16()?;
        let mut daemons = BTreeMap::new();
        for _ in 0..num_daemons {
            let daemon_id = unpacker.read_str()?;
            let slice = unpacker.read_u16()?;
            daemons.insert(daemon_id, slice);
        }
        Ok(Self {
            generation,
            obj_size,
            data_slices,
            parity_slices,
            slice_id,
            full_replica,
            daemons,
        })
    }
}

// ----------------------------------------------------------------------------

/// Stage transition announcement, optionally carrying an EC metadata
/// record (the md-update path rides the same message).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StageNtfn {
    pub reb_id: i64,
    pub action: u32,
    pub stage: Stage,
    pub daemon_id: String,
    pub md: Option<EcMetadata>,
}

impl Default for StageNtfn {
    fn default() -> Self {
        Self {
            reb_id: 0,
            action: EC_ACT_REB_CT,
            stage: Stage::Inactive,
            daemon_id: String::new(),
            md: None,
        }
    }
}

impl Packable for StageNtfn {
    fn pack(&self, packer: &mut BytePack) {
        packer.write_i64(self.reb_id);
        packer.write_u32(self.action);
        packer.write_u32(self.stage as u32);
        packer.write_str(&self.daemon_id);
        match &self.md {
            None => packer.write_byte(0),
            Some(md) => {
                packer.write_byte(1);
                packer.write_any(md);
            }
        }
    }

    fn packed_size(&self) -> usize {
        let mut size = SIZEOF_I64 + SIZEOF_U32 * 2 + packed_str_len(&self.daemon_id) + 1;
        if let Some(md) = &self.md {
            size += md.packed_size();
        }
        size
    }
}

impl Unpackable for StageNtfn {
    fn unpack(unpacker: &mut ByteUnpack<'_>) -> Result<Self, PackError> {
        let reb_id = unpacker.read_i64()?;
        let action = unpacker.read_u32()?;
        let raw_stage = unpacker.read_u32()?;
        let stage = Stage::from_u32(raw_stage).unwrap_or(Stage::Inactive);
        let daemon_id = unpacker.read_str()?;
        let md = match unpacker.read_byte()? {
            0 => None,
            _ => Some(unpacker.read_any::<EcMetadata>()?),
        };
        Ok(Self {
            reb_id,
            action,
            stage,
            daemon_id,
            md,
        })
    }
}

impl StageNtfn {
    pub fn new_pack(&self, kind: u8) -> Vec<u8> {
        let mut packer = BytePack::with_capacity(REB_MSG_KIND_SIZE + self.packed_size());
        packer.write_byte(kind);
        packer.write_any(self);
        packer.into_bytes()
    }
}

// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn regular_ack_wire_size() {
        let ack = RegularAck {
            reb_id: 7,
            daemon_id: "t7".to_owned(),
        };
        let bytes = ack.new_pack();
        // kind + i64 + u16 len + 2 bytes of id
        assert_eq!(bytes.len(), 1 + 8 + 2 + 2);
        assert_eq!(bytes[0], REB_MSG_REGULAR);

        let mut unpacker = ByteUnpack::new(&bytes[1..]);
        let back: RegularAck = unpacker.read_any().unwrap();
        assert_eq!(back, ack);
    }

    #[test]
    fn ec_ack_roundtrip() {
        let ack = EcAck {
            reb_id: 42,
            slice_id: 3,
            daemon_id: "t-long-name".to_owned(),
        };
        let bytes = ack.new_pack();
        assert_eq!(bytes.len(), 1 + ack.packed_size());
        assert_eq!(bytes[0], REB_MSG_EC);
        let mut unpacker = ByteUnpack::new(&bytes[1..]);
        assert_eq!(unpacker.read_any::<EcAck>().unwrap(), ack);
    }

    fn sample_md() -> EcMetadata {
        EcMetadata {
            generation: 3,
            obj_size: 1 << 20,
            data_slices: 4,
            parity_slices: 2,
            slice_id: 1,
            full_replica: "t1".to_owned(),
            daemons: [("t1".to_owned(), 0), ("t2".to_owned(), 1), ("t3".to_owned(), 2)]
                .into_iter()
                .collect(),
        }
    }

    #[test]
    fn stage_ntfn_without_md() {
        let ntfn = StageNtfn {
            reb_id: 9,
            action: EC_ACT_REB_CT,
            stage: Stage::Traverse,
            daemon_id: "t2".to_owned(),
            md: None,
        };
        let bytes = ntfn.new_pack(REB_MSG_NTFN);
        // kind + i64 + 2*u32 + (2 + 2) + md marker
        assert_eq!(bytes.len(), 1 + 8 + 8 + 4 + 1);
        let mut unpacker = ByteUnpack::new(&bytes[1..]);
        assert_eq!(unpacker.read_any::<StageNtfn>().unwrap(), ntfn);
    }

    #[test]
    fn stage_ntfn_with_md() {
        let ntfn = StageNtfn {
            reb_id: 9,
            action: EC_ACT_UPDATE_MD,
            stage: Stage::Traverse,
            daemon_id: "t2".to_owned(),
            md: Some(sample_md()),
        };
        let bytes = ntfn.new_pack(REB_MSG_EC);
        assert_eq!(bytes.len(), 1 + ntfn.packed_size());
        let mut unpacker = ByteUnpack::new(&bytes[1..]);
        let back = unpacker.read_any::<StageNtfn>().unwrap();
        assert_eq!(back, ntfn);
        assert_eq!(unpacker.remaining(), 0);
    }

    #[test]
    fn md_remote_targets() {
        let md = sample_md();
        assert_eq!(md.remote_targets("t2"), ["t1", "t3"]);
        assert_eq!(md.remote_targets("t9").len(), 3);
    }
}
