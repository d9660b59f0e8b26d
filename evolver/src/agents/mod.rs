//! The two cooperating roles with asymmetric information.
//!
//! The researcher sees program source and evaluation feedback; the supervisor
//! sees only the code-free [`crate::core::digest::RunDigest`]. The asymmetry
//! is enforced structurally by the input types, not by convention.

pub mod researcher;
pub mod supervisor;
