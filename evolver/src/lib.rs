//! LLM-driven iterative program optimization.
//!
//! This crate implements a single-lineage guided-mutation loop: a researcher
//! role proposes one complete candidate program per iteration, an external
//! evaluator scores it, and an acceptance policy decides whether it becomes
//! the new best-so-far. A supervisor role steers the researcher using only a
//! code-free digest of the run. The architecture enforces a strict
//! separation:
//!
//! - **[`core`]**: Pure, deterministic logic (acceptance, digests,
//!   invariants). No I/O, fully testable in isolation, replayable on resume.
//! - **[`io`]**: Side-effecting operations (storage, configuration, child
//!   processes) behind traits so tests can script the collaborators.
//! - **[`agents`]**: The two roles, with the information asymmetry between
//!   them enforced by their input types.
//!
//! [`run`] ties core logic to I/O to implement the evolution state machine.

pub mod agents;
pub mod core;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod run;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
