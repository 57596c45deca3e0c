//! Command grammar: `name arg1 "arg two" ... [<<< block >>>]`.
//!
//! Arguments are bare words or double-quoted strings (`\"` and `\\` escapes).
//! At most one heredoc-style block may follow the arguments. It opens with
//! `<<<` and closes with the last `>>>` in the command, so the block body may
//! itself contain `>>>`. Only whitespace may follow the closing marker.

use serde::{Deserialize, Serialize};
use thiserror::Error;

const BLOCK_OPEN: &str = "<<<";
const BLOCK_CLOSE: &str = ">>>";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCall {
    pub name: String,
    pub args: Vec<String>,
    /// The command exactly as the model wrote it, trimmed.
    pub raw: String,
}

impl ToolCall {
    pub fn arg(&self, idx: usize) -> Option<&str> {
        self.args.get(idx).map(String::as_str)
    }

    /// Everything after the name, for tools that take free text.
    pub fn joined_args(&self) -> String {
        self.args.join(" ")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommandParseError {
    #[error("empty command")]
    Empty,
    #[error("unterminated quoted string")]
    UnterminatedQuote,
    #[error("missing closing `>>>` for `<<<` block")]
    UnterminatedBlock,
    #[error("unexpected text after the closing `>>>`")]
    TrailingInput,
}

pub fn parse_command(input: &str) -> Result<ToolCall, CommandParseError> {
    let raw = input.trim();
    if raw.is_empty() {
        return Err(CommandParseError::Empty);
    }

    let mut tokens: Vec<String> = Vec::new();
    let mut current = String::new();
    let mut in_token = false;
    let mut chars = raw.char_indices().peekable();

    while let Some((idx, ch)) = chars.next() {
        if !in_token && raw[idx..].starts_with(BLOCK_OPEN) {
            tokens.push(parse_block(&raw[idx + BLOCK_OPEN.len()..])?);
            break;
        }
        match ch {
            c if c.is_whitespace() => {
                if in_token {
                    tokens.push(std::mem::take(&mut current));
                    in_token = false;
                }
            }
            '"' => {
                in_token = true;
                let mut closed = false;
                while let Some((_, c)) = chars.next() {
                    match c {
                        '"' => {
                            closed = true;
                            break;
                        }
                        '\\' => match chars.peek() {
                            Some((_, next @ ('"' | '\\'))) => {
                                current.push(*next);
                                chars.next();
                            }
                            _ => current.push('\\'),
                        },
                        other => current.push(other),
                    }
                }
                if !closed {
                    return Err(CommandParseError::UnterminatedQuote);
                }
            }
            other => {
                in_token = true;
                current.push(other);
            }
        }
    }
    if in_token {
        tokens.push(current);
    }

    let mut tokens = tokens.into_iter();
    let name = tokens.next().filter(|name| !name.is_empty() && !raw.starts_with(BLOCK_OPEN));
    let Some(name) = name else {
        return Err(CommandParseError::Empty);
    };
    Ok(ToolCall {
        name,
        args: tokens.collect(),
        raw: raw.to_string(),
    })
}

fn parse_block(rest: &str) -> Result<String, CommandParseError> {
    let end = rest
        .rfind(BLOCK_CLOSE)
        .ok_or(CommandParseError::UnterminatedBlock)?;
    if !rest[end + BLOCK_CLOSE.len()..].trim().is_empty() {
        return Err(CommandParseError::TrailingInput);
    }
    let body = &rest[..end];
    let body = body.strip_prefix('\n').unwrap_or(body);
    let body = body.strip_suffix('\n').unwrap_or(body);
    Ok(body.to_string())
}
