use std::sync::Arc;

use crossbeam::channel::{Receiver, Sender, bounded};
use crossbeam::select;
use parking_lot::Mutex;
use smallvec::SmallVec;

use reef_xact::Xact;

// ----------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CtrPhase {
    Waiting,
    Running,
    Terminated,
}

impl CtrPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Waiting => "Waiting",
            Self::Running => "Running",
            Self::Terminated => "Terminated",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PodPhase {
    Pending,
    Running,
    Succeeded,
    Failed,
}

/// One container's state as reported by the pod runtime.
#[derive(Clone, Debug)]
pub struct ContainerState {
    pub name: String,
    pub phase: CtrPhase,
    pub reason: String,
    pub message: String,
    pub exit_code: i32,
}

/// One event from the pod's watch stream.
#[derive(Clone, Debug)]
pub struct PodEvent {
    pub phase: PodPhase,
    pub init_states: SmallVec<[ContainerState; 2]>,
    pub states: SmallVec<[ContainerState; 2]>,
}

/// The most recent observed container status.
#[derive(Clone, Debug, Default)]
pub struct PodStatus {
    pub state: String,
    pub ctr_name: String,
    pub reason: String,
    pub message: String,
    pub exit_code: i32,
}

impl PodStatus {
    pub fn is_terminated(&self) -> bool {
        self.state == CtrPhase::Terminated.as_str()
    }
}

/// The structured failure the owning activity is aborted with.
#[derive(thiserror::Error, Debug, Clone)]
#[error(
    "pod {pod}: container {container:?} terminated: {reason} ({message}), exit code {exit_code}"
)]
pub struct PodFailure {
    pub pod: String,
    pub container: String,
    pub reason: String,
    pub message: String,
    pub exit_code: i32,
}

// ----------------------------------------------------------------------------

pub struct PodWatcher {
    pod_name: String,
    xctn: Arc<Xact>,
    recent: Arc<Mutex<PodStatus>>,
    stop_tx: Sender<()>,
    handle: std::thread::JoinHandle<Receiver<PodEvent>>,
}

impl PodWatcher {
    /// Start consuming `events`; aborts `xctn` on the first terminal
    /// container exit.
    pub fn start(pod_name: impl Into<String>, xctn: Arc<Xact>, events: Receiver<PodEvent>) -> Self {
        let pod_name = pod_name.into();
        let recent = Arc::new(Mutex::new(PodStatus::default()));
        let (stop_tx, stop_rx) = bounded::<()>(0);

        let worker = Worker {
            pod_name: pod_name.clone(),
            xctn: Arc::clone(&xctn),
            recent: Arc::clone(&recent),
        };
        let handle = std::thread::Builder::new()
            .name(format!("pod-watch-{pod_name}"))
            .spawn(move || worker.process_events(events, stop_rx))
            .expect("failed to spawn pod watcher");

        Self {
            pod_name,
            xctn,
            recent,
            stop_tx,
            handle,
        }
    }

    pub fn status(&self) -> PodStatus {
        self.recent.lock().clone()
    }

    /// Stop watching. Always call this, even after a failure.
    ///
    /// With `wait` set and no terminal state captured yet, the remaining
    /// queued events are processed before returning; otherwise they are
    /// discarded.
    pub fn stop(self, wait: bool) {
        drop(self.stop_tx);
        let Ok(events) = self.handle.join() else {
            return;
        };

        if !wait || self.recent.lock().clone().is_terminated() {
            for _ in events.try_iter() {}
            return;
        }
        let worker = Worker {
            pod_name: self.pod_name,
            xctn: self.xctn,
            recent: self.recent,
        };
        for event in events.try_iter() {
            if worker.process(&event) != 0 {
                break;
            }
        }
    }
}

// ----------------------------------------------------------------------------

struct Worker {
    pod_name: String,
    xctn: Arc<Xact>,
    recent: Arc<Mutex<PodStatus>>,
}

impl Worker {
    /// Returns the receiver so a waiting stop can drain it.
    fn process_events(
        self,
        events: Receiver<PodEvent>,
        stop_rx: Receiver<()>,
    ) -> Receiver<PodEvent> {
        loop {
            select! {
                recv(events) -> event => {
                    let Ok(event) = event else {
                        return events; // sender gone
                    };
                    if self.process(&event) != 0 {
                        return events;
                    }
                }
                recv(stop_rx) -> _ => {
                    return events;
                }
            }
        }
    }

    /// Analyze container states; a non-zero return is the exit code that
    /// terminated the pod (the owning xaction has been aborted by then).
    fn process(&self, event: &PodEvent) -> i32 {
        // Init containers: the only state worth watching is a failed
        // initialization (non-zero termination).
        for ics in &event.init_states {
            if ics.phase == CtrPhase::Terminated && ics.exit_code != 0 {
                self.set_status(ics);
                self.abort(ics);
                return ics.exit_code;
            }
        }

        // Main containers:
        // - Waiting and Running are recorded and watched further
        // - a non-zero Terminated stops the watcher and fails the activity
        for cs in &event.states {
            self.set_status(cs);
            if cs.phase == CtrPhase::Terminated && cs.exit_code != 0 {
                self.abort(cs);
                return cs.exit_code;
            }
        }

        // Containers serve indefinitely until stopped; a pod that "ran to
        // completion" is as wrong as a failed one.
        if matches!(event.phase, PodPhase::Failed | PodPhase::Succeeded) {
            reef_log::error!(
                "pod {} is in problematic phase {:?} (expecting Pending or Running)",
                self.pod_name,
                event.phase
            );
        }
        0
    }

    fn set_status(&self, cs: &ContainerState) {
        let mut recent = self.recent.lock();
        recent.state = cs.phase.as_str().to_owned();
        recent.ctr_name = cs.name.clone();
        recent.reason = cs.reason.clone();
        recent.message = cs.message.clone();
        recent.exit_code = cs.exit_code;
    }

    fn abort(&self, cs: &ContainerState) {
        let failure = PodFailure {
            pod: self.pod_name.clone(),
            container: cs.name.clone(),
            reason: cs.reason.clone(),
            message: cs.message.clone(),
            exit_code: cs.exit_code,
        };
        self.xctn.abort(&failure);
    }
}

// ----------------------------------------------------------------------------
