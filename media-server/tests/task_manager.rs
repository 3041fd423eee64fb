//! End-to-end `TaskManager` scenarios (spec §8) against fake `Runnable`s —
//! no real ffmpeg I/O, per the test-tooling design in `SPEC_FULL.md` §13.

use media_server::mix::state::{Change, MixState, MixStream};
use media_server::task::{AddOutcome, CancelFlag, Kind, Method, Runnable, TaskId, TaskManager, UpdateFn};
use parking_lot::Mutex;
use std::sync::mpsc::{channel, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::time::{Duration, Instant};

fn id(kind: Kind, target: &str, method: Method) -> TaskId {
    TaskId {
        kind,
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
        std::thread::sleep(Duration::from_millis(5));
    }
    panic!("condition never became true within 2s");
}

/// Blocks until told to finish, like a long-running screenshot/recording
/// session would while waiting on a live stream.
struct Blocking(std::sync::mpsc::Receiver<()>);

impl Runnable for Blocking {
    fn run(&mut self, cancel: &CancelFlag) {
        loop {
            if cancel.is_cancelled() {
                return;
            }
            match self.0.recv_timeout(Duration::from_millis(10)) {
                Ok(()) | Err(RecvTimeoutError::Disconnected) => return,
                Err(RecvTimeoutError::Timeout) => continue,
            }
        }
    }
}

fn blocking() -> (Box<dyn Runnable>, Sender<()>) {
    let (tx, rx) = channel();
    (Box::new(Blocking(rx)), tx)
}

/// Stands in for `mix::MixSession`: holds a `MixState` behind a mutex and
/// records every diff `update()` produces, the way a real mix worker would
/// log adds/removes/updates (spec §4.6).
struct FakeMix {
    state: Arc<Mutex<MixState>>,
    log: Arc<Mutex<Vec<Change>>>,
    stop_rx: std::sync::mpsc::Receiver<()>,
}

impl Runnable for FakeMix {
    fn run(&mut self, cancel: &CancelFlag) {
        loop {
            if cancel.is_cancelled() {
                return;
            }
            match self.stop_rx.recv_timeout(Duration::from_millis(10)) {
                Ok(()) | Err(RecvTimeoutError::Disconnected) => return,
                Err(RecvTimeoutError::Timeout) => continue,
            }
        }
    }

    fn updater(&self) -> Option<UpdateFn> {
        let state = Arc::clone(&self.state);
        let log = Arc::clone(&self.log);
        Some(Arc::new(move |params: serde_json::Value| {
            let streams: Vec<MixStream> = match serde_json::from_value(params) {
                Ok(s) => s,
                Err(_) => return false,
            };
            let changes = state.lock().update(streams);
            log.lock().extend(changes);
            true
        }))
    }
}

fn stream(id: &str, z: i32) -> MixStream {
    MixStream {
        id: id.to_owned(),
        url: format!("rtmp://example/{id}"),
        width: 320,
        height: 180,
        x: 0,
        y: 0,
        z_index: z,
    }
}

#[test]
fn duplicate_start_then_already_running() {
    let mgr = TaskManager::new(2, 10);
    let (a, _tx) = blocking();
    let (b, _tx2) = blocking();

    assert_eq!(
        mgr.add(id(Kind::Screenshot, "rtmp://x/y", Method::Interval), a),
        AddOutcome::Started
    );
    assert_eq!(
        mgr.add(id(Kind::Screenshot, "rtmp://x/y", Method::Interval), b),
        AddOutcome::AlreadyRunning
    );
    mgr.shutdown();
}

#[test]
fn stop_of_unknown_task_is_side_effect_free() {
    let mgr = TaskManager::new(2, 10);
    assert!(!mgr.remove("rtmp://nothing", &Method::Interval));
    assert_eq!(mgr.active_count(), 0);
    assert_eq!(mgr.queue_len(), 0);
}

#[test]
fn queue_of_max_tasks_plus_k_yields_k_queued_and_promotes_fifo() {
    let mgr = TaskManager::new(1, 10);
    let (a, tx_a) = blocking();
    let (b, _tx_b) = blocking();
    let (c, _tx_c) = blocking();

    assert_eq!(
        mgr.add(id(Kind::Screenshot, "a", Method::Interval), a),
        AddOutcome::Started
    );
    assert_eq!(
        mgr.add(id(Kind::Screenshot, "b", Method::Interval), b),
        AddOutcome::Queued
    );
    assert_eq!(
        mgr.add(id(Kind::Screenshot, "c", Method::Interval), c),
        AddOutcome::Queued
    );
    assert_eq!(mgr.queue_len(), 2);

    tx_a.send(()).unwrap();
    wait_until(|| mgr.is_active("b", &Method::Interval));
    assert_eq!(mgr.active_count(), 1);
    assert_eq!(mgr.queue_len(), 1);
    assert!(!mgr.is_active("c", &Method::Interval));

    mgr.shutdown();
}

#[test]
fn mix_update_with_identical_set_is_a_no_op() {
    let mgr = TaskManager::new(1, 10);
    let state = Arc::new(Mutex::new(MixState::new()));
    let log = Arc::new(Mutex::new(Vec::new()));
    let (_stop_tx, stop_rx) = channel();
    let runnable = FakeMix {
        state: Arc::clone(&state),
        log: Arc::clone(&log),
        stop_rx,
    };

    assert_eq!(
        mgr.add(
            id(Kind::Mixing, "rtmp://out", Method::Mix),
            Box::new(runnable)
        ),
        AddOutcome::Started
    );

    let first = vec![stream("a", 0), stream("b", 1)];
    assert!(mgr.update(
        "rtmp://out",
        &Method::Mix,
        serde_json::to_value(&first).unwrap()
    ));
    assert!(mgr.update(
        "rtmp://out",
        &Method::Mix,
        serde_json::to_value(&first).unwrap()
    ));

    let recorded = log.lock().clone();
    // The first update adds both streams; the second, identical update must
    // not append anything further.
    assert_eq!(recorded.len(), 2);

    mgr.shutdown();
}

#[test]
fn mix_swap_logs_exactly_remove_a_add_c() {
    let mgr = TaskManager::new(1, 10);
    let state = Arc::new(Mutex::new(MixState::new()));
    let log = Arc::new(Mutex::new(Vec::new()));
    let (_stop_tx, stop_rx) = channel();
    let runnable = FakeMix {
        state: Arc::clone(&state),
        log: Arc::clone(&log),
        stop_rx,
    };

    mgr.add(
        id(Kind::Mixing, "rtmp://out", Method::Mix),
        Box::new(runnable),
    );
    mgr.update(
        "rtmp://out",
        &Method::Mix,
        serde_json::to_value(vec![stream("a", 0), stream("b", 1)]).unwrap(),
    );
    log.lock().clear();

    mgr.update(
        "rtmp://out",
        &Method::Mix,
        serde_json::to_value(vec![stream("b", 1), stream("c", 2)]).unwrap(),
    );

    let recorded = log.lock().clone();
    assert_eq!(
        recorded,
        vec![Change::Removed("a".to_owned()), Change::Added(stream("c", 2))]
    );

    mgr.shutdown();
}

#[test]
fn update_targeting_a_non_mix_task_is_rejected() {
    let mgr = TaskManager::new(1, 10);
    let (a, _tx) = blocking();
    mgr.add(id(Kind::Screenshot, "rtmp://x", Method::Interval), a);

    assert!(!mgr.update("rtmp://x", &Method::Interval, serde_json::json!([])));
    mgr.shutdown();
}
