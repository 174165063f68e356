//! The target interface: what the storage-plane subsystems may ask of
//! the node they run on.

use reef_types::{Bck, BckProps, Cksum};

use crate::err::CoreError;
use crate::lom::Lom;

/// Origin of a write ("why is this PUT happening").
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Owt {
    Put,
    Rebalance,
    Prefetch,
    Copy,
}

impl std::fmt::Display for Owt {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Put => "owt-put",
            Self::Rebalance => "owt-rebalance",
            Self::Prefetch => "owt-prefetch",
            Self::Copy => "owt-copy",
        };
        f.write_str(s)
    }
}

pub struct PutParams<'a> {
    pub reader: Box<dyn std::io::Read + Send + 'a>,

    /// Workfile tag; the payload lands under `%wk` first and is renamed
    /// into place.
    pub work_tag: &'a str,

    pub owt: Owt,
    pub cksum: Option<Cksum>,
    pub atime: i64,
    pub size: i64,
}

/// Node-level operations. The receive paths and activity entries talk to
/// the target exclusively through this.
pub trait Target: Send + Sync {
    /// This target's daemon id.
    fn sid(&self) -> &str;

    fn bck_props(&self, bck: &Bck) -> BckProps;

    fn put_object(&self, lom: &mut Lom, params: PutParams<'_>) -> Result<(), CoreError>;

    /// Remove the local replica and its mirror copies (post-migration
    /// cleanup).
    fn evict_object(&self, lom: &Lom) -> Result<(), CoreError>;
}
