//! Model reply format: exactly one `<THOUGHT>` and one `<COMMAND>` block.

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const THOUGHT_TAG: &str = "THOUGHT";
pub const COMMAND_TAG: &str = "COMMAND";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParsedReply {
    pub thought: String,
    pub action: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ReplyFormatError {
    #[error("reply has no <THOUGHT> block")]
    MissingThought,
    #[error("reply has no <COMMAND> block")]
    MissingCommand,
    #[error("reply has more than one <THOUGHT> block")]
    MultipleThoughts,
    #[error("reply has more than one <COMMAND> block")]
    MultipleCommands,
}

impl ReplyFormatError {
    /// Observation sent back to the model in place of a tool result.
    pub fn observation(&self) -> String {
        format!(
            "Your reply was malformed: {self}. Reply with exactly one \
             <{THOUGHT_TAG}>...</{THOUGHT_TAG}> block explaining your reasoning followed by \
             exactly one <{COMMAND_TAG}>...</{COMMAND_TAG}> block containing a single command."
        )
    }
}

pub fn parse_reply(output: &str) -> Result<ParsedReply, ReplyFormatError> {
    let thoughts = tagged_sections(output, THOUGHT_TAG);
    let commands = tagged_sections(output, COMMAND_TAG);
    let thought = match thoughts.as_slice() {
        [] => return Err(ReplyFormatError::MissingThought),
        [only] => only.trim().to_string(),
        _ => return Err(ReplyFormatError::MultipleThoughts),
    };
    let action = match commands.as_slice() {
        [] => return Err(ReplyFormatError::MissingCommand),
        [only] => only.trim().to_string(),
        _ => return Err(ReplyFormatError::MultipleCommands),
    };
    Ok(ParsedReply { thought, action })
}

fn tagged_sections<'a>(text: &'a str, tag: &str) -> Vec<&'a str> {
    let open = format!("<{tag}>");
    let close = format!("</{tag}>");
    let mut sections = Vec::new();
    let mut rest = text;
    while let Some(start) = rest.find(&open) {
        let body = &rest[start + open.len()..];
        let Some(end) = body.find(&close) else {
            break;
        };
        sections.push(&body[..end]);
        rest = &body[end + close.len()..];
    }
    sections
}
