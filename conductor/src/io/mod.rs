//! I/O helpers: configuration, model backend, tools and prompts.

pub mod config;
pub mod git;
pub mod llm;
pub mod process;
pub mod prompt;
pub mod tools;
