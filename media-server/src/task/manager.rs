//! The bounded concurrent scheduler (spec §4.1, §5).
//!
//! Grounded in the original source's `HlmTaskManager` (single mutex guarding
//! a waiting queue and a vector of active tasks) and in
//! `examples/Eric-Lautanen-velocut/crates/velocut-media/src/worker.rs`'s
//! OS-thread-per-job style. Unlike both of those, worker `JoinHandle`s are
//! retained rather than detached (spec §9 "Detached threads").

use super::{CancelFlag, Method, Runnable, TaskId, UpdateFn};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// Result of [`TaskManager::add`] (spec §4.1 contract).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum AddOutcome {
    Started,
    Queued,
    AlreadyRunning,
    QueueFull,
}

struct ActiveEntry {
    id: TaskId,
    cancel: CancelFlag,
    updater: Option<UpdateFn>,
    handle: Option<JoinHandle<()>>,
}

struct QueuedEntry {
    id: TaskId,
    runnable: Box<dyn Runnable>,
}

#[derive(Default)]
struct Inner {
    active: Vec<ActiveEntry>,
    queue: VecDeque<QueuedEntry>,
    active_keys: HashSet<String>,
}

/// Bounded concurrent task scheduler (components C1+C2). Cheap to clone;
/// clones share the same underlying state and may be handed to worker
/// threads so they can report completion.
#[derive(Clone)]
pub struct TaskManager {
    inner: Arc<Mutex<Inner>>,
    max_tasks: usize,
    max_queue: usize,
}

impl TaskManager {
    pub fn new(max_tasks: usize, max_queue: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner::default())),
            max_tasks,
            max_queue,
        }
    }

    /// Admits `task`, spawning a worker immediately if capacity allows
    /// (spec §4.1 admission decision).
    pub fn add(&self, id: TaskId, runnable: Box<dyn Runnable>) -> AddOutcome {
        let mut inner = self.inner.lock();
        let key = id.key();

        if inner.active_keys.contains(&key) {
            return AddOutcome::AlreadyRunning;
        }
        if inner.queue.iter().any(|q| q.id.key() == key) {
            return AddOutcome::AlreadyRunning;
        }

        if inner.active.len() >= self.max_tasks {
            if inner.queue.len() >= self.max_queue {
                return AddOutcome::QueueFull;
            }
            inner.queue.push_back(QueuedEntry { id, runnable });
            return AddOutcome::Queued;
        }

        self.spawn_active(&mut inner, id, runnable);
        AddOutcome::Started
    }

    /// Forwards `params` to the live executor for `(target, method)` (spec
    /// §4.1 `update`). Returns `false` if no such active task exists, or if
    /// its kind doesn't support live updates.
    pub fn update(&self, target: &str, method: &Method, params: Value) -> bool {
        let key = super::dedup_key(target, method);
        let updater = {
            let inner = self.inner.lock();
            inner
                .active
                .iter()
                .find(|a| a.id.key() == key)
                .and_then(|a| a.updater.clone())
        };
        match updater {
            Some(f) => f(params),
            None => false,
        }
    }

    /// Cancels a live task, or drops it from the queue (spec §4.1 `remove`,
    /// §4.1 "Cancellation race"). Non-blocking: the worker thread, if any,
    /// finishes its current iteration and exits on its own.
    pub fn remove(&self, target: &str, method: &Method) -> bool {
        let key = super::dedup_key(target, method);
        let mut inner = self.inner.lock();

        if let Some(pos) = inner.active.iter().position(|a| a.id.key() == key) {
            let entry = inner.active.remove(pos);
            inner.active_keys.remove(&key);
            entry.cancel.cancel();
            // The handle is simply dropped: the OS thread keeps running
            // detached and will call `on_worker_done`, which becomes a
            // no-op because `cancel` is now set.
            return true;
        }

        if let Some(pos) = inner.queue.iter().position(|q| q.id.key() == key) {
            inner.queue.remove(pos);
            return true;
        }

        false
    }

    /// Blocks until every currently-active worker has exited, for clean
    /// process shutdown (spec §9 "Detached threads").
    pub fn shutdown(&self) {
        let handles: Vec<JoinHandle<()>> = {
            let mut inner = self.inner.lock();
            for entry in &inner.active {
                entry.cancel.cancel();
            }
            inner
                .active
                .iter_mut()
                .filter_map(|e| e.handle.take())
                .collect()
        };
        for h in handles {
            let _ = h.join();
        }
    }

    pub fn active_count(&self) -> usize {
        self.inner.lock().active.len()
    }

    pub fn queue_len(&self) -> usize {
        self.inner.lock().queue.len()
    }

    pub fn is_active(&self, target: &str, method: &Method) -> bool {
        let key = super::dedup_key(target, method);
        self.inner.lock().active_keys.contains(&key)
    }

    fn spawn_active(&self, inner: &mut Inner, id: TaskId, mut runnable: Box<dyn Runnable>) {
        let key = id.key();
        let cancel = CancelFlag::new();
        let updater = runnable.updater();

        let mgr = self.clone();
        let worker_id = id.clone();
        let worker_cancel = cancel.clone();
        let handle = thread::spawn(move || {
            runnable.run(&worker_cancel);
            mgr.on_worker_done(worker_id, worker_cancel);
        });

        inner.active_keys.insert(key);
        inner.active.push(ActiveEntry {
            id,
            cancel,
            updater,
            handle: Some(handle),
        });
    }

    fn on_worker_done(&self, id: TaskId, cancel: CancelFlag) {
        let mut inner = self.inner.lock();

        // `remove()` already stripped this task from `active`/`active_keys`
        // and set `cancel`; a cancelled worker must not mutate state again
        // (spec §4.1 "Cancellation race").
        if cancel.is_cancelled() {
            return;
        }

        if let Some(pos) = inner.active.iter().position(|a| a.id == id) {
            let entry = inner.active.remove(pos);
            inner.active_keys.remove(&entry.id.key());
        }

        if let Some(next) = inner.queue.pop_front() {
            self.spawn_active(&mut inner, next.id, next.runnable);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::Kind;
    use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
    use std::time::{Duration, Instant};

    struct Blocking {
        rx: Receiver<()>,
    }

    impl Runnable for Blocking {
        fn run(&mut self, cancel: &CancelFlag) {
            loop {
                if cancel.is_cancelled() {
                    return;
                }
                match self.rx.recv_timeout(Duration::from_millis(10)) {
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => return,
                    Err(RecvTimeoutError::Timeout) => continue,
                }
            }
        }
    }

    fn blocking_task() -> (Box<dyn Runnable>, Sender<()>) {
        let (tx, rx) = bounded(1);
        (Box::new(Blocking { rx }), tx)
    }

    fn id(target: &str, method: Method) -> TaskId {
        TaskId {
            kind: Kind::Screenshot,
            target: target.to_owned(),
            method,
        }
    }

    fn wait_until(mut pred: impl FnMut() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(2);
        while Instant::now() < deadline {
            if pred() {
                return;
            }
            thread::sleep(Duration::from_millis(5));
        }
        panic!("condition never became true");
    }

    #[test]
    fn dedup_rejects_identical_active_task() {
        let mgr = TaskManager::new(2, 10);
        let (r1, _tx1) = blocking_task();
        let (r2, _tx2) = blocking_task();

        assert_eq!(
            mgr.add(id("a", Method::Interval), r1),
            AddOutcome::Started
        );
        assert_eq!(
            mgr.add(id("a", Method::Interval), r2),
            AddOutcome::AlreadyRunning
        );
        mgr.shutdown();
    }

    #[test]
    fn queue_overflow_yields_started_started_queued() {
        let mgr = TaskManager::new(2, 10);
        let (r1, _tx1) = blocking_task();
        let (r2, _tx2) = blocking_task();
        let (r3, _tx3) = blocking_task();

        assert_eq!(
            mgr.add(id("a", Method::Interval), r1),
            AddOutcome::Started
        );
        assert_eq!(
            mgr.add(id("b", Method::Interval), r2),
            AddOutcome::Started
        );
        assert_eq!(
            mgr.add(id("c", Method::Interval), r3),
            AddOutcome::Queued
        );
        assert_eq!(mgr.active_count(), 2);
        assert_eq!(mgr.queue_len(), 1);
        mgr.shutdown();
    }

    #[test]
    fn queue_full_is_enforced() {
        let mgr = TaskManager::new(1, 1);
        let (r1, _tx1) = blocking_task();
        let (r2, _tx2) = blocking_task();
        let (r3, _tx3) = blocking_task();

        assert_eq!(mgr.add(id("a", Method::Interval), r1), AddOutcome::Started);
        assert_eq!(mgr.add(id("b", Method::Interval), r2), AddOutcome::Queued);
        assert_eq!(
            mgr.add(id("c", Method::Interval), r3),
            AddOutcome::QueueFull
        );
        mgr.shutdown();
    }

    #[test]
    fn completion_promotes_queue_head_fifo() {
        let mgr = TaskManager::new(1, 10);
        let (r1, tx1) = blocking_task();
        let (r2, _tx2) = blocking_task();

        assert_eq!(mgr.add(id("a", Method::Interval), r1), AddOutcome::Started);
        assert_eq!(mgr.add(id("b", Method::Interval), r2), AddOutcome::Queued);

        tx1.send(()).unwrap();
        wait_until(|| mgr.is_active("b", &Method::Interval));
        assert_eq!(mgr.active_count(), 1);
        assert_eq!(mgr.queue_len(), 0);
        mgr.shutdown();
    }

    #[test]
    fn cancel_does_not_double_promote() {
        let mgr = TaskManager::new(1, 10);
        let (r1, _tx1) = blocking_task();
        let (r2, _tx2) = blocking_task();

        assert_eq!(mgr.add(id("a", Method::Interval), r1), AddOutcome::Started);
        assert_eq!(mgr.add(id("b", Method::Interval), r2), AddOutcome::Queued);

        assert!(mgr.remove("a", &Method::Interval));
        wait_until(|| mgr.is_active("b", &Method::Interval));
        assert_eq!(mgr.active_count(), 1);
        assert_eq!(mgr.queue_len(), 0);
        mgr.shutdown();
    }

    #[test]
    fn stop_of_unknown_task_is_false_and_side_effect_free() {
        let mgr = TaskManager::new(2, 10);
        assert!(!mgr.remove("nothing", &Method::Interval));
        assert_eq!(mgr.active_count(), 0);
    }

    #[test]
    fn update_of_non_updatable_task_returns_false() {
        let mgr = TaskManager::new(1, 10);
        let (r1, _tx1) = blocking_task();
        assert_eq!(mgr.add(id("a", Method::Interval), r1), AddOutcome::Started);
        assert!(!mgr.update("a", &Method::Interval, serde_json::json!({})));
        mgr.shutdown();
    }
}
