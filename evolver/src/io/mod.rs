//! Side-effecting operations: filesystem, configuration, child processes.
//!
//! Everything that touches the outside world lives here, behind traits where
//! the controller needs a seam ([`evaluator::Evaluator`],
//! [`model::ModelClient`]) so tests can script the collaborators.

pub mod config;
pub mod evaluator;
pub mod meta;
pub mod model;
pub mod process;
pub mod prompt;
pub mod store;
