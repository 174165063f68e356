//! An in-process bus: every registered target gets a delivery thread.

use std::io::Read as _;

use ahash::HashMap;
use crossbeam::channel::{Sender, unbounded};
use parking_lot::{Mutex, RwLock};

use crate::bus::{Bus, Handlers, ObjHdr, TransportError};

enum Stream {
    Obj,
    Ack,
    Stage,
}

struct Delivery {
    stream: Stream,
    hdr: ObjHdr,
    payload: Vec<u8>,
}

struct Node {
    tx: Sender<Delivery>,
    handle: std::thread::JoinHandle<()>,
}

/// Wires in-process targets together; payloads are materialized and
/// re-presented to the receiver as readers.
#[derive(Default)]
pub struct LoopbackBus {
    nodes: RwLock<HashMap<String, Node>>,
    draining: Mutex<()>,
}

impl LoopbackBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a target and its three receive handlers.
    pub fn register(&self, target_id: impl Into<String>, handlers: Handlers) {
        let target_id = target_id.into();
        let (tx, rx) = unbounded::<Delivery>();
        let name = format!("loopback-{target_id}");
        let handle = std::thread::Builder::new()
            .name(name)
            .spawn(move || {
                for delivery in rx {
                    let reader = Box::new(std::io::Cursor::new(delivery.payload));
                    let handler = match delivery.stream {
                        Stream::Obj => &handlers.recv_obj,
                        Stream::Ack => &handlers.recv_ack,
                        Stream::Stage => &handlers.recv_stage_ntfn,
                    };
                    handler(delivery.hdr, reader, None);
                }
            })
            .expect("failed to spawn loopback receiver");
        self.nodes.write().insert(target_id, Node { tx, handle });
    }

    /// Disconnect every target and wait for the delivery threads to
    /// drain their queues.
    pub fn shutdown(&self) {
        let _drain = self.draining.lock();
        let nodes: Vec<Node> = {
            let mut map = self.nodes.write();
            map.drain().map(|(_, node)| node).collect()
        };
        for node in nodes {
            drop(node.tx);
            let _ = node.handle.join();
        }
    }

    fn deliver(&self, to: &str, delivery: Delivery) -> Result<(), TransportError> {
        let nodes = self.nodes.read();
        let node = nodes
            .get(to)
            .ok_or_else(|| TransportError::UnknownTarget(to.to_owned()))?;
        node.tx
            .send(delivery)
            .map_err(|_| TransportError::Closed(to.to_owned()))
    }
}

impl Bus for LoopbackBus {
    fn send(
        &self,
        hdr: ObjHdr,
        mut reader: crate::bus::Reader,
        target_id: &str,
    ) -> Result<(), TransportError> {
        let mut payload = Vec::new();
        reader
            .read_to_end(&mut payload)
            .map_err(|err| TransportError::Payload(err.to_string()))?;
        self.deliver(
            target_id,
            Delivery {
                stream: Stream::Obj,
                hdr,
                payload,
            },
        )
    }

    fn ack(&self, hdr: ObjHdr, target_id: &str) -> Result<(), TransportError> {
        self.deliver(
            target_id,
            Delivery {
                stream: Stream::Ack,
                hdr,
                payload: Vec::new(),
            },
        )
    }

    fn push(&self, hdr: ObjHdr, target_id: Option<&str>) -> Result<(), TransportError> {
        if let Some(to) = target_id {
            return self.deliver(
                to,
                Delivery {
                    stream: Stream::Stage,
                    hdr,
                    payload: Vec::new(),
                },
            );
        }
        // broadcast to everyone but the sender
        let ids: Vec<String> = {
            let nodes = self.nodes.read();
            nodes.keys().filter(|id| **id != hdr.sid).cloned().collect()
        };
        let mut first_err = None;
        for id in ids {
            let delivery = Delivery {
                stream: Stream::Stage,
                hdr: hdr.clone(),
                payload: Vec::new(),
            };
            if let Err(err) = self.deliver(&id, delivery) {
                reef_log::warn!("loopback: push to {id}: {err}");
                first_err.get_or_insert(err);
            }
        }
        match first_err {
            None => Ok(()),
            Some(err) => Err(err),
        }
    }
}

// ----------------------------------------------------------------------------
