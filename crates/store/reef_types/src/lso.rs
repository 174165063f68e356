//! List-objects request and response messages.
//!
//! Result sets are serialized with msgpack (the short `msg`-style field
//! tags below) rather than json: listing very large buckets is the one
//! client path where serialization cost shows up in benchmarks.

use serde::{Deserialize, Serialize};

// ----------------------------------------------------------------------------

/// Bits 0..=4 of [`LsoEnt::flags`] hold the (mutually exclusive) object
/// status; the remaining bits are presence markers.
pub const ENTRY_STATUS_MASK: u16 = 0x1f;

pub const ENTRY_IS_CACHED: u16 = 1 << 5;
pub const ENTRY_IS_DIR: u16 = 1 << 6;
pub const ENTRY_IN_ARCH: u16 = 1 << 7;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[repr(u16)]
pub enum EntryStatus {
    #[default]
    Ok = 0,
    Misplaced = 1,
    Deleted = 2,
}

// ----------------------------------------------------------------------------

/// List-objects control message: what to list and how.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct LsoMsg {
    /// Assigned by the server on the first page; must not change across
    /// pages of one listing.
    #[serde(rename = "u", default, skip_serializing_if = "String::is_empty")]
    pub uuid: String,

    #[serde(rename = "p", default, skip_serializing_if = "String::is_empty")]
    pub prefix: String,

    /// Requested properties, comma-separated (`"name,size,atime"`).
    #[serde(rename = "pr", default, skip_serializing_if = "String::is_empty")]
    pub props: String,

    #[serde(rename = "f", default)]
    pub flags: u64,

    #[serde(rename = "ps", default)]
    pub page_size: i64,

    /// Opaque cursor from the previous page.
    #[serde(rename = "ct", default, skip_serializing_if = "String::is_empty")]
    pub continuation_token: String,
}

// ----------------------------------------------------------------------------

/// One listed object (or archived file).
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct LsoEnt {
    #[serde(rename = "n")]
    pub name: String,

    #[serde(rename = "cs", default, skip_serializing_if = "String::is_empty")]
    pub checksum: String,

    #[serde(rename = "a", default, skip_serializing_if = "String::is_empty")]
    pub atime: String,

    #[serde(rename = "v", default, skip_serializing_if = "String::is_empty")]
    pub version: String,

    /// `[tnode:mountpath]`
    #[serde(rename = "t", default, skip_serializing_if = "String::is_empty")]
    pub location: String,

    /// Custom metadata: ETag, MD5, user-defined…
    #[serde(rename = "m", default, skip_serializing_if = "String::is_empty")]
    pub custom: String,

    #[serde(rename = "s", default)]
    pub size: i64,

    /// Number of copies; 1 for a non-replicated object.
    #[serde(rename = "c", default)]
    pub copies: i16,

    #[serde(rename = "f", default)]
    pub flags: u16,
}

impl LsoEnt {
    pub fn status(&self) -> u16 {
        self.flags & ENTRY_STATUS_MASK
    }

    pub fn is_ok(&self) -> bool {
        self.status() == EntryStatus::Ok as u16
    }

    pub fn is_cached(&self) -> bool {
        self.flags & ENTRY_IS_CACHED != 0
    }
}

pub type LsoEntries = Vec<LsoEnt>;

/// One page (or, client-side, the accumulated pages) of a listing.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct LsoRes {
    #[serde(rename = "u", default)]
    pub uuid: String,

    #[serde(rename = "ct", default, skip_serializing_if = "String::is_empty")]
    pub continuation_token: String,

    #[serde(rename = "e", default)]
    pub entries: LsoEntries,

    #[serde(rename = "f", default)]
    pub flags: u32,
}

// ----------------------------------------------------------------------------
