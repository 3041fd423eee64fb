//! Task identity and the bounded concurrent scheduler (spec §3, §4.1).

pub mod manager;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

pub use manager::{AddOutcome, TaskManager};

/// What kind of media job a task performs (spec §3).
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum Kind {
    Screenshot,
    Recording,
    Mixing,
}

/// The method/variant within a [`Kind`] (spec §3, §6).
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub enum Method {
    Interval,
    Percentage,
    Immediate,
    SpecificTime,
    Mp4,
    Hls,
    Mix,
}

impl Method {
    fn as_str(&self) -> &'static str {
        match self {
            Method::Interval => "interval",
            Method::Percentage => "percentage",
            Method::Immediate => "immediate",
            Method::SpecificTime => "specific_time",
            Method::Mp4 => "mp4",
            Method::Hls => "hls",
            Method::Mix => "mix",
        }
    }
}

/// The dedup key `"{target}|{method}"` used by [`TaskManager`] (spec
/// glossary).
pub fn dedup_key(target: &str, method: &Method) -> String {
    format!("{target}|{}", method.as_str())
}

/// Task identity, set once at construction and never mutated (spec §3
/// invariant).
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct TaskId {
    pub kind: Kind,
    pub target: String,
    pub method: Method,
}

impl TaskId {
    pub fn key(&self) -> String {
        dedup_key(&self.target, &self.method)
    }
}

/// Monotonic (false→true) cancellation flag shared between the manager and
/// the worker thread running a task (spec §4.3).
#[derive(Clone, Debug, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self(Arc::new(AtomicBool::new(false)))
    }

    /// Sets the flag. Idempotent; never transitions true→false.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// A thread-safe handle for forwarding live parameter updates into a
/// running task (spec §4.1 `update`, mixing only). Extracted from the
/// [`Runnable`] once, before it is moved onto its worker thread, so the
/// manager can reach it without touching the runnable itself.
pub type UpdateFn = Arc<dyn Fn(serde_json::Value) -> bool + Send + Sync>;

/// Behavior a scheduled job must provide for the manager to drive it (spec
/// §4.1 worker lifecycle). Implemented by the media-session-backed
/// screenshot/recording/mix runners; kept as a trait so the manager itself
/// is testable without a real codec.
pub trait Runnable: Send + 'static {
    /// Runs to natural completion, cooperative stop, or timeout. Must
    /// observe `cancel` between iterations (spec §4.3) and return promptly
    /// once it is set.
    fn run(&mut self, cancel: &CancelFlag);

    /// Returns a handle for live updates, if this task kind supports them.
    /// Only mixing tasks do (spec §9 decision: `Update` is `NotFound` for
    /// every other kind).
    fn updater(&self) -> Option<UpdateFn> {
        None
    }
}
