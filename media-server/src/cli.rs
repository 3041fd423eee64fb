//! Command line parsing (spec §13).
//!
//! Mirrors `examples/mrecords121-ephyr`'s `cli.rs`: a `StructOpt`-derived
//! `Opts`, with `slog::Level` parsed by hand because it has no
//! [`std::str::FromStr`] impl whose error type is [`std::fmt::Display`].

use std::path::PathBuf;
use structopt::StructOpt;

/// Command line options for the `media-server` binary.
#[derive(Clone, Debug, StructOpt)]
#[structopt(name = "media-server")]
pub struct Opts {
    /// Path to the configuration document (TOML).
    #[structopt(long, short = "c", env = "MEDIASRV_CONFIG", default_value = "media-server.toml")]
    pub config: PathBuf,

    /// Overrides the configured log verbosity.
    #[structopt(long, short = "v", parse(try_from_str = parse_log_level))]
    pub verbose: Option<slog::Level>,
}

fn parse_log_level(s: &str) -> Result<slog::Level, String> {
    mediasrv_log::parse_level(s)
}

/// Marker error used to request a non-zero process exit without printing a
/// second error message (the failing step already logged its own).
#[derive(Debug)]
pub struct Failure;
