//! The streaming-bus contract.
//!
//! The storage plane is transport-agnostic: it sends object payloads,
//! zero-length ACKs, and stage notifications through [`Bus`], and
//! receives them through three registered handlers. Wire framing,
//! connection management, and congestion control are entirely the bus
//! implementation's business.
//!
//! [`LoopbackBus`] wires several in-process targets together — one
//! delivery thread per receiver — which is how the rebalance engine is
//! exercised in tests.

mod bus;
mod loopback;

pub use bus::{Bus, Handlers, ObjHdr, Reader, RecvFn, TransportError};
pub use loopback::LoopbackBus;
