//! Autonomous coding agent.
//!
//! A session drives a language model through a repository one command at a
//! time and records every step in an append-only event log. The crate keeps a
//! strict split:
//!
//! - **[`core`]**: pure, deterministic logic. The fuzzy diff engine, the
//!   command and reply grammars, the event types, and the transition function
//!   that decides what each event leads to. No I/O.
//! - **[`io`]**: side effects. Environments, model backends, git, prompts,
//!   configuration, and run artifacts.
//! - **[`tools`]**: the commands the model can call, built on both.
//!
//! [`session`] and [`agent`] tie these together into a running loop.

pub mod agent;
pub mod core;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod session;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
pub mod tools;
