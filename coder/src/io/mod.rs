//! Side-effecting collaborators: processes, environments, models, files.

pub mod config;
pub mod environment;
pub mod event_log;
pub mod git;
pub mod model;
pub mod predictions;
pub mod process;
pub mod prompt;
