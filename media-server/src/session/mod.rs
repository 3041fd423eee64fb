//! The per-task media pipeline engine (spec §4.2, §4.3): component C3.
//!
//! Grounded in
//! `examples/Eric-Lautanen-velocut/crates/velocut-media/src/encode.rs`'s
//! `run_encode`/flush pattern for the init→read-loop→flush→teardown shape,
//! and in `examples/hua0512-rust-srec/crates/pipeline-common/src/pipeline.rs`'s
//! `Processor` trait for collapsing the source's executor/policy class
//! hierarchy into one injected [`Policy`] (spec §9 "Deep inheritance
//! hierarchy").

pub mod interrupt;
pub mod timebase;

use crate::error::{SessionError, SessionResult};
use crate::task::CancelFlag;
use interrupt::Watchdog;
use std::cell::{Cell, RefCell};
use std::path::Path;
use std::rc::Rc;
use std::time::{Duration, Instant};

/// Strategy injected into [`MediaSession::run`], one implementation per
/// policy variant (C4 screenshot, C5 recording). Collapses the source's
/// executor + policy class hierarchy to a single non-virtual seam (spec §9).
pub trait Policy {
    /// Directory that must exist before `open_input` runs (spec §4.2 step
    /// 1), if this policy writes to one.
    fn output_dir(&self) -> Option<&Path> {
        None
    }

    /// Discovers streams and builds decoder/encoder/scaler/output state
    /// from the freshly opened input (spec §4.2 steps 3-7).
    fn init(&mut self, input: &ffmpeg_next::format::context::Input) -> SessionResult<()>;

    /// Dispatches one demuxed packet by `packet.stream()` (spec §4.2 read
    /// loop). Returns `false` to request a self-stop (screenshot `immediate`
    /// / `specific_time`, spec §4.4); the loop then exits and flushes
    /// normally, same as cooperative stop (spec §4.3).
    fn handle_packet(&mut self, packet: ffmpeg_next::codec::packet::Packet) -> SessionResult<bool>;

    /// Drains residual frames/packets and writes the trailer if a header
    /// was written (spec §4.2 "Flush semantics" + "Teardown"). Called
    /// exactly once, on every exit path.
    fn finish(&mut self) -> SessionResult<()>;
}

/// Timing knobs for the interrupt watchdog (spec §4.2, §5, config §11).
#[derive(Clone, Copy, Debug)]
pub struct TimeoutConfig {
    pub check_interval: Duration,
    pub abort_after: Duration,
}

impl From<crate::config::TimeoutConfig> for TimeoutConfig {
    fn from(c: crate::config::TimeoutConfig) -> Self {
        Self {
            check_interval: Duration::from_micros(c.check_interval_us),
            abort_after: Duration::from_micros(c.abort_after_us),
        }
    }
}

/// Adapts a single-input [`MediaSession`] run into a [`crate::task::Runnable`]
/// so the control surface (C7) can hand screenshot/recording jobs to the
/// task manager the same way it hands mix jobs to `mix::MixSession` (spec
/// §4.1 worker lifecycle).
pub struct SessionRunnable {
    url: String,
    policy: Option<Box<dyn Policy>>,
    timeouts: TimeoutConfig,
}

impl SessionRunnable {
    pub fn new(url: impl Into<String>, policy: Box<dyn Policy>, timeouts: TimeoutConfig) -> Self {
        Self {
            url: url.into(),
            policy: Some(policy),
            timeouts,
        }
    }
}

impl crate::task::Runnable for SessionRunnable {
    fn run(&mut self, cancel: &crate::task::CancelFlag) {
        let policy = match self.policy.take() {
            Some(p) => p,
            None => return,
        };
        if let Err(e) = MediaSession::run(&self.url, policy, cancel, self.timeouts) {
            slog_scope::error!("media session failed"; "url" => %self.url, "error" => %e);
        }
    }
}

/// Orchestrates one media job end to end: init, read loop, flush, teardown
/// (spec §4.2). Stateless beyond the watchdog clock; all job-specific state
/// lives in the injected [`Policy`].
pub struct MediaSession;

impl MediaSession {
    /// Runs `policy` against `url` until EOF, cooperative stop, self-stop,
    /// or a watchdog timeout, then flushes and tears down.
    ///
    /// Every exit path — success, init failure, mid-session error, timeout,
    /// cancellation — reaches `policy.finish()` exactly once before
    /// returning, and every ffmpeg-next resource the policy owns is freed
    /// by `Drop` when `policy` goes out of scope at the end of this call
    /// (spec §4.2 "Teardown").
    pub fn run(
        url: &str,
        mut policy: Box<dyn Policy>,
        cancel: &CancelFlag,
        timeouts: TimeoutConfig,
    ) -> SessionResult<()> {
        if let Some(dir) = policy.output_dir() {
            std::fs::create_dir_all(dir).map_err(|source| SessionError::CreateDir {
                dir: dir.to_path_buf(),
                source,
            })?;
        }

        let session_start = Instant::now();
        let elapsed = move || Instant::now().duration_since(session_start);

        let watchdog = Rc::new(RefCell::new(Watchdog::new(
            timeouts.check_interval,
            timeouts.abort_after,
            elapsed(),
        )));

        let timed_out = Rc::new(Cell::new(false));

        watchdog.borrow_mut().touch(elapsed());
        let wd_for_callback = Rc::clone(&watchdog);
        let timed_out_for_callback = Rc::clone(&timed_out);
        let mut input = match ffmpeg_next::format::input_with_interrupt(url, move || {
            let abort = wd_for_callback.borrow_mut().poll(elapsed());
            if abort {
                timed_out_for_callback.set(true);
            }
            abort
        }) {
            Ok(i) => i,
            Err(_) if timed_out.get() => return Err(SessionError::Timeout),
            Err(source) => {
                return Err(SessionError::OpenInput {
                    url: url.to_owned(),
                    source,
                })
            }
        };
        watchdog.borrow_mut().touch(elapsed());

        let result = Self::drive(&mut input, policy.as_mut(), cancel, &watchdog, elapsed, &timed_out);

        // Flush/trailer must run on every path, including init failure
        // after streams were opened, so report whichever error came first
        // but still attempt `finish`.
        let finish_result = policy.finish();
        result.and(finish_result)
    }

    fn drive(
        input: &mut ffmpeg_next::format::context::Input,
        policy: &mut dyn Policy,
        cancel: &CancelFlag,
        watchdog: &Rc<RefCell<Watchdog>>,
        elapsed: impl Fn() -> Duration,
        timed_out: &Rc<Cell<bool>>,
    ) -> SessionResult<()> {
        policy.init(input)?;

        let mut packets = input.packets();
        loop {
            if cancel.is_cancelled() {
                return Ok(());
            }
            watchdog.borrow_mut().touch(elapsed());

            let (_stream, packet) = match packets.next() {
                Some(p) => p,
                // `packets()` swallows the underlying ffmpeg error, including
                // one produced by the interrupt callback aborting a stalled
                // read, so a real EOF is indistinguishable from a watchdog
                // abort except via the flag the callback itself set.
                None if timed_out.get() => return Err(SessionError::Timeout),
                None => return Ok(()),
            };

            if !policy.handle_packet(packet)? {
                return Ok(());
            }
        }
    }
}
