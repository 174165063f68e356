//! Object attributes carried in transport headers and persisted metadata.

use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CksumType {
    #[default]
    None,
    Xxhash,
    Md5,
    Sha256,
    Crc32c,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cksum {
    pub ty: CksumType,
    pub value: String,
}

impl Cksum {
    pub fn new(ty: CksumType, value: impl Into<String>) -> Self {
        Self {
            ty,
            value: value.into(),
        }
    }
}

/// Attributes of one object: what travels alongside the payload.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjAttrs {
    pub size: i64,

    /// Access time in nanoseconds since the epoch.
    pub atime: i64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cksum: Option<Cksum>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}
