//! Screenshot and recording policies (components C4, C5).
//!
//! Each variant is split into a pure, clock/codec-free predicate (unit
//! tested directly against spec §8's boundary behaviors) and a
//! [`crate::session::Policy`] implementation that drives the actual
//! ffmpeg-next decode/scale/encode calls.

pub mod recording;
pub mod screenshot;
