//! Deterministic, pure logic shared by the control core.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data structures and return deterministic outputs suitable for tests.

pub mod budget;
pub mod classifier;
pub mod invariants;
pub mod path;
pub mod policy;
pub mod response;
pub mod stats;
pub mod transitions;
pub mod types;
