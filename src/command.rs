//! Line-oriented commands for interactive clients.
//!
//! This module defines the [`Command`] enum, which maps a line typed by a user onto
//! an action on a [`ClientSession`](crate::protocol::ClientSession).
//!
//! # Overview
//! A line is one of:
//!
//! - `.quit` (or `.exit`): end the session gracefully.
//! - `.drain`: process any replies that have already arrived.
//! - `TYPE [name=value ...]`: send a numbered message of type `TYPE` with the given
//!   parameters.
//!
//! # Example
//! ```rust
//! use seqlink::Command;
//!
//! let cmd: Command = "ECHO TEXT=hello".try_into().unwrap();
//! match cmd {
//!     Command::Send(message) => assert_eq!(message.parameter("TEXT"), Some("hello")),
//!     _ => unreachable!(),
//! }
//! ```
use thiserror::Error;

use crate::protocol::Message;

/// List of possible errors when parsing a command.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CommandError {
    #[error("unrecognized command '{0}'")]
    UnrecognizedCommand(String),

    #[error("invalid parameter '{token}', {reason}")]
    InvalidParameter { token: String, reason: String },

    #[error("no command provided")]
    Empty,
}

/// Action requested by a user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Ask the server to end the session.
    Quit,
    /// Process replies that are already waiting.
    Drain,
    /// Send a numbered message.
    Send(Message),
}

impl TryInto<Command> for &str {
    type Error = CommandError;

    fn try_into(self) -> Result<Command, Self::Error> {
        match self.trim() {
            "" => Err(CommandError::Empty),
            ".quit" | ".exit" => Ok(Command::Quit),
            ".drain" => Ok(Command::Drain),
            s if s.starts_with('.') => Err(CommandError::UnrecognizedCommand(s.to_string())),
            s => {
                let mut parts = s.split_whitespace();
                let Some(message_type) = parts.next() else {
                    return Err(CommandError::Empty);
                };

                let mut message = Message::new(message_type);
                for token in parts {
                    let Some((name, value)) = token.split_once('=') else {
                        return Err(CommandError::InvalidParameter {
                            token: token.to_string(),
                            reason: "expected name=value".to_string(),
                        });
                    };
                    if name.is_empty() || value.is_empty() {
                        return Err(CommandError::InvalidParameter {
                            token: token.to_string(),
                            reason: "name and value must not be empty".to_string(),
                        });
                    }
                    message.set_parameter(name, value);
                }
                Ok(Command::Send(message))
            }
        }
    }
}
