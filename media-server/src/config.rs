//! Process configuration, loaded once at startup (spec §6, §11).
//!
//! Configuration is a key-value document (TOML) optionally overlaid with
//! `MEDIASRV_*` environment variables, following the layering
//! `examples/mrecords121-ephyr` applies via the `config` crate. The logger
//! settings deserialize into a local [`RawLogConfig`] rather than
//! `mediasrv_log::LogConfig` directly, since `slog::Level` has no `serde`
//! support (mirrors ephyr's `cli.rs`, which parses `slog::Level` by hand for
//! the same reason).

use crate::error::ConfigError;
use mediasrv_log::{LogConfig, LogTarget, Rotation};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Top-level server configuration.
#[derive(Clone, Debug)]
pub struct Config {
    /// Address the HTTP control surface binds to.
    pub http_host: String,
    /// Port the HTTP control surface binds to (spec default 6088).
    pub http_port: u16,
    /// Maximum number of concurrently active tasks.
    pub max_tasks: usize,
    /// Maximum number of tasks allowed to wait in the queue before `add`
    /// returns `QueueFull` (spec §4.1 / §9 decision).
    pub max_queue: usize,
    /// Interrupt watchdog timing (spec §4.2, §5).
    pub timeout: TimeoutConfig,
    /// Logger configuration.
    pub log: LogConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            http_host: "0.0.0.0".to_owned(),
            http_port: 6088,
            max_tasks: 3,
            max_queue: 1024,
            timeout: TimeoutConfig::default(),
            log: LogConfig::default(),
        }
    }
}

/// Interrupt-watchdog timing (spec §4.2's `CHECK_INTERVAL` / `TIMEOUT`).
#[derive(Clone, Copy, Debug, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// How often the interrupt callback re-checks elapsed time, in
    /// microseconds. Spec default: 1,000,000 (1s).
    pub check_interval_us: u64,
    /// How long the input may stay silent before the callback aborts, in
    /// microseconds. Spec default: 3,000,000 (3s).
    pub abort_after_us: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            check_interval_us: 1_000_000,
            abort_after_us: 3_000_000,
        }
    }
}

/// Wire format for [`Config`] as read from the TOML document / environment.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
struct RawConfig {
    http_host: String,
    http_port: u16,
    max_tasks: usize,
    max_queue: usize,
    timeout: TimeoutConfig,
    log: RawLogConfig,
}

impl Default for RawConfig {
    fn default() -> Self {
        let d = Config::default();
        Self {
            http_host: d.http_host,
            http_port: d.http_port,
            max_tasks: d.max_tasks,
            max_queue: d.max_queue,
            timeout: d.timeout,
            log: RawLogConfig::default(),
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
struct RawLogConfig {
    level: String,
    target: RawLogTarget,
    dir: PathBuf,
    base_name: String,
    is_async: bool,
    rotation: RawRotation,
}

impl Default for RawLogConfig {
    fn default() -> Self {
        let d = LogConfig::default();
        Self {
            level: d.level.as_str().to_owned(),
            target: RawLogTarget::from(d.target),
            dir: d.dir,
            base_name: d.base_name,
            is_async: d.is_async,
            rotation: RawRotation::from(d.rotation),
        }
    }
}

#[derive(Clone, Copy, Debug, Deserialize)]
#[serde(rename_all = "snake_case")]
enum RawLogTarget {
    Console,
    File,
    Both,
}

impl From<LogTarget> for RawLogTarget {
    fn from(t: LogTarget) -> Self {
        match t {
            LogTarget::Console => Self::Console,
            LogTarget::File => Self::File,
            LogTarget::Both => Self::Both,
        }
    }
}

impl From<RawLogTarget> for LogTarget {
    fn from(t: RawLogTarget) -> Self {
        match t {
            RawLogTarget::Console => Self::Console,
            RawLogTarget::File => Self::File,
            RawLogTarget::Both => Self::Both,
        }
    }
}

#[derive(Clone, Copy, Debug, Deserialize)]
#[serde(default)]
struct RawRotation {
    max_file_size: u64,
    max_files: usize,
}

impl From<Rotation> for RawRotation {
    fn from(r: Rotation) -> Self {
        Self {
            max_file_size: r.max_file_size,
            max_files: r.max_files,
        }
    }
}

impl From<RawRotation> for Rotation {
    fn from(r: RawRotation) -> Self {
        Self {
            max_file_size: r.max_file_size,
            max_files: r.max_files,
        }
    }
}

impl Default for RawRotation {
    fn default() -> Self {
        Self::from(Rotation::default())
    }
}

impl RawConfig {
    fn into_config(self) -> Result<Config, ConfigError> {
        let level = mediasrv_log::parse_level(&self.log.level)
            .map_err(ConfigError::Invalid)?;
        Ok(Config {
            http_host: self.http_host,
            http_port: self.http_port,
            max_tasks: self.max_tasks,
            max_queue: self.max_queue,
            timeout: self.timeout,
            log: LogConfig {
                level,
                target: self.log.target.into(),
                dir: self.log.dir,
                base_name: self.log.base_name,
                is_async: self.log.is_async,
                rotation: self.log.rotation.into(),
            },
        })
    }
}

impl Config {
    /// Loads configuration from `path`, overlaid with `MEDIASRV_*`
    /// environment variables, and validates it.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = config::Config::builder()
            .add_source(config::File::from(path))
            .add_source(config::Environment::with_prefix("MEDIASRV").separator("__"))
            .build()
            .map_err(ConfigError::Load)?;

        let raw: RawConfig = raw.try_deserialize().map_err(ConfigError::Load)?;
        let cfg = raw.into_config()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.http_port == 0 {
            return Err(ConfigError::Invalid("http_port must be nonzero".into()));
        }
        if self.max_tasks == 0 {
            return Err(ConfigError::Invalid("max_tasks must be at least 1".into()));
        }
        if self.timeout.abort_after_us <= self.timeout.check_interval_us {
            return Err(ConfigError::Invalid(
                "timeout.abort_after_us must exceed timeout.check_interval_us".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        Config::default().validate().unwrap();
    }

    #[test]
    fn rejects_zero_port() {
        let mut cfg = Config::default();
        cfg.http_port = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_zero_max_tasks() {
        let mut cfg = Config::default();
        cfg.max_tasks = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_inverted_timeout() {
        let mut cfg = Config::default();
        cfg.timeout.abort_after_us = cfg.timeout.check_interval_us;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn raw_default_round_trips_log_config() {
        let raw = RawConfig::default();
        let cfg = raw.into_config().unwrap();
        assert_eq!(cfg.log.level, slog::Level::Info);
    }

    #[test]
    fn loads_from_toml_file_and_applies_env_overlay() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("media-server.toml");
        std::fs::write(&path, "http_port = 7000\nmax_tasks = 5\n").unwrap();

        std::env::set_var("MEDIASRV_MAX_TASKS", "9");
        let cfg = Config::load(&path).unwrap();
        std::env::remove_var("MEDIASRV_MAX_TASKS");

        assert_eq!(cfg.http_port, 7000);
        assert_eq!(cfg.max_tasks, 9, "env overlay must win over the file");
    }
}
