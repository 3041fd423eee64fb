//! Logging tools and their initialization.
//!
//! The media server configures its logger once at startup from a
//! [`LogConfig`] and never reloads it. Everything downstream just uses
//! [`slog_scope::log`] macros against the process-wide logger.

#![deny(
    broken_intra_doc_links,
    missing_debug_implementations,
    nonstandard_style,
    rust_2018_idioms,
    trivial_casts,
    trivial_numeric_casts,
    unsafe_code
)]
#![warn(
    deprecated_in_future,
    missing_docs,
    unreachable_pub,
    unused_import_braces,
    unused_labels,
    unused_lifetimes,
    unused_qualifications,
    unused_results
)]

use std::{
    fs::{self, File, OpenOptions},
    io::{self, Write as _},
    path::{Path, PathBuf},
    sync::Mutex,
};

pub use slog::{self, Drain};
pub use slog_scope::{self as log, logger};

/// Where log records should be emitted.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum LogTarget {
    /// Terminal only.
    Console,
    /// Rotating file only.
    File,
    /// Both terminal and rotating file.
    Both,
}

/// Rotation limits for the file target.
#[derive(Clone, Copy, Debug)]
pub struct Rotation {
    /// Maximum size in bytes a single log file may reach before it's rolled
    /// over to `<base_name>.log.1`, `.2`, and so on.
    pub max_file_size: u64,
    /// Number of rotated files to retain. Older ones are deleted.
    pub max_files: usize,
}

impl Default for Rotation {
    fn default() -> Self {
        Self {
            max_file_size: 10 * 1024 * 1024,
            max_files: 5,
        }
    }
}

/// Logger configuration loaded once at process start (see the server's
/// configuration document).
#[derive(Clone, Debug)]
pub struct LogConfig {
    /// Minimum verbosity level emitted.
    pub level: slog::Level,
    /// Emission target(s).
    pub target: LogTarget,
    /// Directory the rotating log file is written into. Ignored if `target`
    /// is [`LogTarget::Console`].
    pub dir: PathBuf,
    /// Base file name, without extension (`"<base_name>.log"` is the active
    /// file).
    pub base_name: String,
    /// Whether log records are dispatched through an async channel so
    /// callers never block on I/O.
    pub is_async: bool,
    /// File rotation limits.
    pub rotation: Rotation,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: slog::Level::Info,
            target: LogTarget::Console,
            dir: PathBuf::from("logs"),
            base_name: "media-server".to_owned(),
            is_async: true,
            rotation: Rotation::default(),
        }
    }
}

/// Parses a `slog::Level` from its short or long name (`"info"`, `"INFO"`,
/// `"dbg"`, ...), for use by CLI/config layers that can't derive
/// [`std::str::FromStr`] directly because [`slog::Level::from_str`] returns
/// `Result<_, ()>`, which isn't [`std::fmt::Display`].
pub fn parse_level(s: &str) -> Result<slog::Level, String> {
    s.parse()
        .map_err(|()| format!("invalid log level: {s}"))
}

/// Initializes the global logger from the given `config`, returning a guard
/// that must be held as long as the program runs.
///
/// Subsequent calls are ignored: [`slog_scope::set_global_logger`] itself
/// only ever installs the first logger handed to it for the lifetime of the
/// returned guard, so re-initialization is a caller bug, not a crash.
pub fn init(config: &LogConfig) -> io::Result<slog_scope::GlobalLoggerGuard> {
    let drain = build_drain(config)?;
    let guard = slog_scope::set_global_logger(slog::Logger::root(drain, slog::o!()));
    let _ = slog_stdlog::init();
    Ok(guard)
}

fn build_drain(config: &LogConfig) -> io::Result<slog::Fuse<slog_async::Async>> {
    use slog::Drain as _;

    let level = config.level;
    let filter_noise = |rec: &slog::Record<'_>| {
        !(rec.level() == slog::Level::Debug && rec.module() == "hyper::proto::h1::io")
    };

    let console = slog_term::CompactFormat::new(slog_term::TermDecorator::new().build())
        .build()
        .fuse();

    let drain: Box<dyn slog::Drain<Ok = (), Err = slog::Never> + Send> = match config.target {
        LogTarget::Console => Box::new(console.filter_level(level).filter(filter_noise).fuse()),
        LogTarget::File => {
            let file = RotatingFileDrain::new(config)?;
            Box::new(file.filter_level(level).filter(filter_noise).fuse())
        }
        LogTarget::Both => {
            let file = RotatingFileDrain::new(config)?;
            Box::new(
                slog::Duplicate::new(console, file)
                    .filter_level(level)
                    .filter(filter_noise)
                    .fuse(),
            )
        }
    };

    let async_drain = if config.is_async {
        slog_async::Async::new(drain)
            .overflow_strategy(slog_async::OverflowStrategy::Drop)
            .build()
    } else {
        // `slog_async::Async` is required to satisfy the return type, but a
        // single-threaded blocking dispatcher is simulated by keeping the
        // channel depth at 1 so every record is flushed before the next one
        // is accepted.
        slog_async::Async::new(drain)
            .chan_size(1)
            .overflow_strategy(slog_async::OverflowStrategy::Block)
            .build()
    };
    Ok(async_drain.fuse())
}

/// A [`slog::Drain`] that writes formatted records to `<dir>/<base_name>.log`,
/// rolling the file over to `<base_name>.log.1`, `.2`, ... once it crosses
/// [`Rotation::max_file_size`], and deleting the oldest rotation once
/// [`Rotation::max_files`] is exceeded.
struct RotatingFileDrain {
    inner: Mutex<RotatingFileInner>,
}

struct RotatingFileInner {
    dir: PathBuf,
    base_name: String,
    rotation: Rotation,
    file: File,
    size: u64,
}

impl RotatingFileDrain {
    fn new(config: &LogConfig) -> io::Result<Self> {
        fs::create_dir_all(&config.dir)?;
        let active_path = config.dir.join(format!("{}.log", config.base_name));
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&active_path)?;
        let size = file.metadata()?.len();
        Ok(Self {
            inner: Mutex::new(RotatingFileInner {
                dir: config.dir.clone(),
                base_name: config.base_name.clone(),
                rotation: config.rotation,
                file,
                size,
            }),
        })
    }
}

impl RotatingFileInner {
    fn active_path(&self) -> PathBuf {
        self.dir.join(format!("{}.log", self.base_name))
    }

    fn rotated_path(&self, n: usize) -> PathBuf {
        self.dir.join(format!("{}.log.{n}", self.base_name))
    }

    fn rotate(&mut self) -> io::Result<()> {
        for n in (1..self.rotation.max_files).rev() {
            let from = self.rotated_path(n);
            if from.exists() {
                fs::rename(from, self.rotated_path(n + 1))?;
            }
        }
        let oldest = self.rotated_path(self.rotation.max_files);
        if oldest.exists() {
            fs::remove_file(&oldest)?;
        }
        fs::rename(self.active_path(), self.rotated_path(1))?;
        self.file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.active_path())?;
        self.size = 0;
        Ok(())
    }
}

impl Drain for RotatingFileDrain {
    type Ok = ();
    type Err = io::Error;

    fn log(
        &self,
        record: &slog::Record<'_>,
        values: &slog::OwnedKVList,
    ) -> Result<Self::Ok, Self::Err> {
        let mut line = format!(
            "{} {:<5} {}: {}",
            chrono::Local::now().format("%Y-%m-%dT%H:%M:%S%.3f"),
            record.level().as_short_str(),
            record.module(),
            record.msg(),
        );

        let mut ser = KvLineSerializer(&mut line);
        values.serialize(record, &mut ser).ok();
        record.kv().serialize(record, &mut ser).ok();
        line.push('\n');

        let mut inner = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        if inner.size >= inner.rotation.max_file_size {
            inner.rotate()?;
        }
        inner.file.write_all(line.as_bytes())?;
        inner.file.flush()?;
        inner.size += line.len() as u64;
        Ok(())
    }
}

/// Appends `key=value` pairs to a log line as plain text.
struct KvLineSerializer<'a>(&'a mut String);

impl slog::Serializer for KvLineSerializer<'_> {
    fn emit_arguments(&mut self, key: slog::Key, val: &std::fmt::Arguments<'_>) -> slog::Result {
        use std::fmt::Write as _;
        write!(self.0, " {key}={val}").ok();
        Ok(())
    }
}

impl std::fmt::Debug for RotatingFileDrain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RotatingFileDrain").finish()
    }
}
