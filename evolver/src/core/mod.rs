//! Pure, deterministic evolution logic.
//!
//! Nothing in this module performs I/O; everything is a function of its
//! inputs so the loop's decisions can be tested in isolation and replayed
//! identically on resume.

pub mod acceptance;
pub mod digest;
pub mod generation;
pub mod invariants;
pub mod program;
pub mod types;
