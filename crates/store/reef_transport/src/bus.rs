//! Header, handler, and bus traits.

use std::sync::Arc;

use reef_types::{Bck, ObjAttrs};

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("unknown transport target {0:?}")]
    UnknownTarget(String),

    #[error("transport to {0:?} is closed")]
    Closed(String),

    #[error("failed to read payload: {0}")]
    Payload(String),
}

/// What travels ahead of (or instead of) a payload.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ObjHdr {
    pub bck: Bck,
    pub obj_name: String,
    pub obj_attrs: ObjAttrs,

    /// Uninterpreted by the transport; the storage plane packs its
    /// control messages here (1-byte kind prefix and all).
    pub opaque: Vec<u8>,

    /// Sender's daemon id.
    pub sid: String,
}

impl ObjHdr {
    /// `bucket/object`, for log lines.
    pub fn cname(&self) -> String {
        format!("{}/{}", self.bck, self.obj_name)
    }
}

pub type Reader = Box<dyn std::io::Read + Send>;

/// Receive handler. Invoked once per message; the handler owns the
/// reader and must drain it. The error slot carries a receive-side
/// failure for the handler to observe (the payload is absent then).
pub type RecvFn = Arc<dyn Fn(ObjHdr, Reader, Option<TransportError>) + Send + Sync>;

/// The three receive streams of one target.
#[derive(Clone)]
pub struct Handlers {
    pub recv_obj: RecvFn,
    pub recv_ack: RecvFn,
    pub recv_stage_ntfn: RecvFn,
}

/// Send side of the bus.
pub trait Bus: Send + Sync {
    /// Ship a payload (object or EC content) to one target; the header's
    /// opaque bytes ride along.
    fn send(&self, hdr: ObjHdr, reader: Reader, target_id: &str) -> Result<(), TransportError>;

    /// Zero-length acknowledgment.
    fn ack(&self, hdr: ObjHdr, target_id: &str) -> Result<(), TransportError>;

    /// Stage notification; `None` broadcasts to every other target.
    fn push(&self, hdr: ObjHdr, target_id: Option<&str>) -> Result<(), TransportError>;
}
