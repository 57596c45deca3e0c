use serde::{Deserialize, Serialize};

use coder::core::types::StopReason;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    /// Submitted with a non-empty diff.
    Submitted,
    /// Submitted without changing anything.
    Empty,
    /// Stopped gracefully without submitting.
    NotSubmitted,
    EarlyExit,
    /// The session could not be set up or failed outside its own stop path.
    Error,
}

pub fn classify_outcome(stop: Option<&StopReason>, prediction: Option<&str>) -> Outcome {
    match stop {
        Some(StopReason::Submitted) => match prediction {
            Some(diff) if !diff.trim().is_empty() => Outcome::Submitted,
            _ => Outcome::Empty,
        },
        Some(StopReason::EarlyExit { .. }) => Outcome::EarlyExit,
        Some(_) => Outcome::NotSubmitted,
        None => Outcome::Error,
    }
}
