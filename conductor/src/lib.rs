//! Task orchestration with a safety-gated plan/execute/reflect loop.
//!
//! A task description is classified into a domain, handed to that domain's
//! workflow, and driven by the execution engine until it completes, fails,
//! exhausts its iteration budget, or is cancelled. Every side effect passes
//! through the safety gate first. The architecture keeps a strict split:
//!
//! - **[`core`]**: Pure, deterministic logic (keyword scoring, path and policy
//!   rules, the state machine, invariants). No I/O, testable in isolation.
//! - **[`io`]**: Side-effecting operations (config, LLM backend, tools,
//!   processes, git). Behind traits so tests can substitute them.
//!
//! Orchestration modules ([`intent`], [`safety`], [`workflows`], [`engine`],
//! [`orchestrator`]) coordinate the two and stream [`events`] to the caller.

pub mod core;
pub mod engine;
pub mod events;
pub mod exit_codes;
pub mod intent;
pub mod io;
pub mod logging;
pub mod orchestrator;
pub mod safety;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
pub mod workflows;
