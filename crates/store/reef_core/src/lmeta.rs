//! The per-object metadata record cached in memory and persisted as the
//! `lmd` attribute.

use std::sync::Arc;

use reef_pack::{BytePack, ByteUnpack, SIZEOF_I64, SIZEOF_U16, packed_str_len};
use reef_types::{Cksum, CksumType};

use crate::err::CoreError;
use crate::lombid::LomBid;

const LMETA_VERSION: u8 = 1;

/// One metadata cache entry.
///
/// `atime` is sign-encoded: negative means "prefetched, not yet
/// accessed", with the absolute value still the timestamp (nanoseconds).
/// `atimefs` mirrors the last value flushed to the filesystem, as a raw
/// bit pattern, so divergence detection is a plain compare.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Lmeta {
    /// `None` turns the entry into a tombstone available for reuse.
    pub uname: Option<Arc<str>>,

    pub lid: LomBid,
    pub atime: i64,
    pub atimefs: u64,

    /// Persisted metadata differs from this in-memory copy.
    pub dirty: bool,

    pub size: i64,
    pub cksum: Option<Cksum>,

    /// FQNs of the object's additional mirror copies, when n-way
    /// mirroring is on.
    pub copies: Option<Vec<String>>,
}

impl Lmeta {
    pub fn is_tombstone(&self) -> bool {
        self.uname.is_none()
    }

    /// Timestamp with the prefetched sign stripped.
    pub fn atime_abs(&self) -> i64 {
        self.atime.wrapping_abs()
    }

    pub fn is_prefetched(&self) -> bool {
        self.atime < 0
    }

    /// Whether eviction must write back before removing this entry.
    pub fn needs_flush(&self) -> bool {
        self.dirty || self.atimefs != self.atime as u64
    }

    /// Mark flushed at `atime_ns`.
    pub fn mark_flushed(&mut self, atime_ns: i64) {
        self.atime = atime_ns;
        self.atimefs = atime_ns as u64;
        self.dirty = false;
    }

    // -- persistence -------------------------------------------------------

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut size = 1 + SIZEOF_I64 * 3 + 1 + SIZEOF_U16;
        if let Some(cksum) = &self.cksum {
            size += 1 + packed_str_len(&cksum.value);
        }
        for copy in self.copies.iter().flatten() {
            size += packed_str_len(copy);
        }

        let mut packer = BytePack::with_capacity(size);
        packer.write_byte(LMETA_VERSION);
        packer.write_i64(self.lid.raw() as i64);
        packer.write_i64(self.atime);
        packer.write_i64(self.size);
        match &self.cksum {
            None => packer.write_byte(0),
            Some(cksum) => {
                packer.write_byte(1);
                packer.write_byte(cksum_type_tag(cksum.ty));
                packer.write_str(&cksum.value);
            }
        }
        let copies = self.copies.as_deref().unwrap_or_default();
        packer.write_u16(copies.len() as u16);
        for copy in copies {
            packer.write_str(copy);
        }
        debug_assert_eq!(packer.len(), size);
        packer.into_bytes()
    }

    /// Decode a persisted record. `uname` and the runtime bits are the
    /// caller's to fill in; `atimefs` starts out equal to `atime`.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CoreError> {
        let mut unpacker = ByteUnpack::new(bytes);
        let version = unpacker.read_byte()?;
        if version != LMETA_VERSION {
            return Err(CoreError::MetaVersion(version));
        }
        let lid = LomBid::from_raw(unpacker.read_i64()? as u64);
        let atime = unpacker.read_i64()?;
        let size = unpacker.read_i64()?;
        let cksum = match unpacker.read_byte()? {
            0 => None,
            _ => {
                let ty = cksum_type_from_tag(unpacker.read_byte()?);
                Some(Cksum::new(ty, unpacker.read_str()?))
            }
        };
        let num_copies = unpacker.read_u16()? as usize;
        let copies = if num_copies == 0 {
            None
        } else {
            let mut copies = Vec::with_capacity(num_copies);
            for _ in 0..num_copies {
                copies.push(unpacker.read_str()?);
            }
            Some(copies)
        };
        Ok(Self {
            uname: None,
            lid,
            atime,
            atimefs: atime as u64,
            dirty: false,
            size,
            cksum,
            copies,
        })
    }
}

fn cksum_type_tag(ty: CksumType) -> u8 {
    match ty {
        CksumType::None => 0,
        CksumType::Xxhash => 1,
        CksumType::Md5 => 2,
        CksumType::Sha256 => 3,
        CksumType::Crc32c => 4,
    }
}

fn cksum_type_from_tag(tag: u8) -> CksumType {
    match tag {
        1 => CksumType::Xxhash,
        2 => CksumType::Md5,
        3 => CksumType::Sha256,
        4 => CksumType::Crc32c,
        _ => CksumType::None,
    }
}

// ----------------------------------------------------------------------------
