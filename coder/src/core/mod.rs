//! Deterministic, pure logic shared by the agent.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data structures and return deterministic outputs suitable for tests: the
//! diff engine works on strings handed to it, and the transition rules work on
//! an event slice.

pub mod command;
pub mod diff_engine;
pub mod diff_error;
pub mod diff_parser;
pub mod event;
pub mod fuzzy;
pub mod hunk;
pub mod lint;
pub mod patch;
pub mod reply;
pub mod transition;
pub mod types;
