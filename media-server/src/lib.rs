//! Long-running media processing server: screenshot capture, recording, and
//! live stream mixing over a shared decode→(scale)→encode→mux pipeline.
//!
//! See `SPEC_FULL.md` at the workspace root for the full module map; this
//! crate implements components C1-C7.

#![warn(rust_2018_idioms, unreachable_pub)]

pub mod cli;
pub mod config;
pub mod error;
pub mod mix;
pub mod policy;
pub mod server;
pub mod session;
pub mod task;
