//! The xaction handle: shared by the running activity and everyone
//! watching it.

use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use reef_types::Bck;

#[derive(thiserror::Error, Debug)]
pub enum XactError {
    #[error("failed to start {kind}: {reason}")]
    Start { kind: &'static str, reason: String },
}

/// A point-in-time copy of an xaction's externally visible state.
#[derive(Clone, Debug, PartialEq)]
pub struct XactSnap {
    pub id: i64,
    pub kind: &'static str,
    pub bck: Option<Bck>,
    pub objs: i64,
    pub bytes: i64,
    pub in_objs: i64,
    pub in_bytes: i64,
    pub elapsed: Duration,
    pub running: bool,
    pub aborted: bool,
    pub abort_err: Option<String>,
}

/// One running (or finished) activity.
///
/// Abort is sticky and idempotent: the first `abort` wins, later calls
/// return false. Everything operating on behalf of the xaction is
/// expected to poll [`Xact::is_aborted`] and wind down promptly.
#[derive(Debug)]
pub struct Xact {
    id: i64,
    kind: &'static str,
    bck: Option<Bck>,
    start: Instant,

    aborted: AtomicBool,
    finished: AtomicBool,
    abort_err: Mutex<Option<String>>,
    end: Mutex<Option<Instant>>,

    // objects/bytes produced locally and received from peers
    objs: AtomicI64,
    bytes: AtomicI64,
    in_objs: AtomicI64,
    in_bytes: AtomicI64,

    /// On-demand activities linger idle between requests; `renew_idle`
    /// pushes the deadline out.
    idle: Option<Mutex<IdleTimer>>,
}

#[derive(Debug)]
struct IdleTimer {
    deadline: Instant,
    ival: Duration,
}

impl Xact {
    pub fn new(id: i64, kind: &'static str, bck: Option<Bck>) -> Self {
        Self {
            id,
            kind,
            bck,
            start: Instant::now(),
            aborted: AtomicBool::new(false),
            finished: AtomicBool::new(false),
            abort_err: Mutex::new(None),
            end: Mutex::new(None),
            objs: AtomicI64::new(0),
            bytes: AtomicI64::new(0),
            in_objs: AtomicI64::new(0),
            in_bytes: AtomicI64::new(0),
            idle: None,
        }
    }

    pub fn on_demand(id: i64, kind: &'static str, bck: Option<Bck>, idle_ival: Duration) -> Self {
        let mut xact = Self::new(id, kind, bck);
        xact.idle = Some(Mutex::new(IdleTimer {
            deadline: Instant::now() + idle_ival,
            ival: idle_ival,
        }));
        xact
    }

    #[inline]
    pub fn id(&self) -> i64 {
        self.id
    }

    #[inline]
    pub fn kind(&self) -> &'static str {
        self.kind
    }

    #[inline]
    pub fn bck(&self) -> Option<&Bck> {
        self.bck.as_ref()
    }

    pub fn name(&self) -> String {
        match &self.bck {
            Some(bck) => format!("{}[{}]-{}", self.kind, self.id, bck),
            None => format!("{}[{}]", self.kind, self.id),
        }
    }

    // -- lifecycle ---------------------------------------------------------

    /// Returns whether this call took effect (false when already aborted
    /// or finished).
    pub fn abort(&self, err: impl std::fmt::Display) -> bool {
        if self.finished.load(Ordering::Acquire) {
            return false;
        }
        if self
            .aborted
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }
        *self.abort_err.lock() = Some(err.to_string());
        self.finish();
        true
    }

    #[inline]
    pub fn is_aborted(&self) -> bool {
        self.aborted.load(Ordering::Acquire)
    }

    pub fn abort_err(&self) -> Option<String> {
        self.abort_err.lock().clone()
    }

    pub fn finish(&self) {
        if self
            .finished
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            *self.end.lock() = Some(Instant::now());
        }
    }

    #[inline]
    pub fn finished(&self) -> bool {
        self.finished.load(Ordering::Acquire)
    }

    // -- on-demand idling --------------------------------------------------

    #[inline]
    pub fn is_on_demand(&self) -> bool {
        self.idle.is_some()
    }

    /// Push the idle deadline out by one interval.
    pub fn renew_idle(&self) {
        if let Some(idle) = &self.idle {
            let mut idle = idle.lock();
            idle.deadline = Instant::now() + idle.ival;
        }
    }

    pub fn is_idle(&self) -> bool {
        match &self.idle {
            Some(idle) => Instant::now() >= idle.lock().deadline,
            None => false,
        }
    }

    // -- stats -------------------------------------------------------------

    pub fn objs_add(&self, objs: i64, bytes: i64) {
        self.objs.fetch_add(objs, Ordering::Relaxed);
        self.bytes.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn in_objs_add(&self, objs: i64, bytes: i64) {
        self.in_objs.fetch_add(objs, Ordering::Relaxed);
        self.in_bytes.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn snap(&self) -> XactSnap {
        let end = *self.end.lock();
        XactSnap {
            id: self.id,
            kind: self.kind,
            bck: self.bck.clone(),
            objs: self.objs.load(Ordering::Relaxed),
            bytes: self.bytes.load(Ordering::Relaxed),
            in_objs: self.in_objs.load(Ordering::Relaxed),
            in_bytes: self.in_bytes.load(Ordering::Relaxed),
            elapsed: end.unwrap_or_else(Instant::now).duration_since(self.start),
            running: end.is_none(),
            aborted: self.is_aborted(),
            abort_err: self.abort_err(),
        }
    }
}

impl std::fmt::Display for Xact {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.name())
    }
}

// ----------------------------------------------------------------------------
