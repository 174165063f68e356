//! Watching an external transformation pod.
//!
//! Transformation containers are expected to serve requests indefinitely;
//! a terminated container is a failure of the whole activity. The watcher
//! consumes the pod's container-state events from a channel, keeps the
//! most recent status for diagnostics, and aborts the owning xaction the
//! moment any container exits non-zero.

mod watcher;

pub use watcher::{
    ContainerState, CtrPhase, PodEvent, PodFailure, PodPhase, PodStatus, PodWatcher,
};
