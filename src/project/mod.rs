//! Project analysis and verification
//!
//! The analyzer feeds the planner what already exists on disk; the
//! verifier gates a finished build on real build/test commands.

mod analyzer;
mod verifier;

pub use analyzer::{ProjectAnalyzer, ProjectScan};
pub use verifier::{DefaultVerifier, Verifier, VerifyReport};
