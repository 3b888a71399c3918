use std::{error::Error as StdError, io};

use thiserror::Error;

/// Errors that end (or, for `SoftFail`, interrupt) a session.
#[derive(Debug, Error)]
pub enum SessionError {
    /// Malformed or size-violating wire data.
    #[error("bad message: {0}")]
    BadMessage(String),

    /// Logical contract violation, e.g. a sequence mismatch or unmatched ACK.
    #[error("protocol fault: {0}")]
    ProtocolFault(String),

    /// Transport failure, including the peer closing mid-message.
    #[error("link error: {0}")]
    Link(#[from] io::Error),

    /// Processing of the current message was abandoned deliberately.
    #[error("soft failure: {0}")]
    SoftFail(String),

    /// The handshake named a service the factory does not know.
    #[error("no handler registered for service '{0}'")]
    NotFound(String),

    /// A handler failed in a way that cannot be reported as a NACK.
    #[error("handler fault: {0}")]
    Fault(String),
}

impl SessionError {
    pub(crate) fn bad(reason: impl Into<String>) -> Self {
        Self::BadMessage(reason.into())
    }

    pub(crate) fn fault(reason: impl Into<String>) -> Self {
        Self::ProtocolFault(reason.into())
    }

    pub(crate) fn not_connected() -> Self {
        Self::Link(io::Error::new(
            io::ErrorKind::NotConnected,
            "session is not established",
        ))
    }
}

/// Outcome of a handler entry point that did not complete normally.
#[derive(Debug, Error)]
pub enum HandlerError {
    /// Abort the current message only; it is answered with a NACK.
    #[error("{0}")]
    SoftFail(String),

    /// Abort the whole session.
    #[error("{message}")]
    Fatal {
        message: String,
        #[source]
        cause: Option<Box<dyn StdError + Send + Sync>>,
    },
}

impl HandlerError {
    pub fn fatal(message: impl Into<String>) -> Self {
        Self::Fatal {
            message: message.into(),
            cause: None,
        }
    }
}

impl From<HandlerError> for SessionError {
    fn from(value: HandlerError) -> Self {
        match value {
            HandlerError::SoftFail(message) => SessionError::SoftFail(message),
            HandlerError::Fatal {
                message,
                cause: Some(cause),
            } => SessionError::Fault(format!("{message}: {cause}")),
            HandlerError::Fatal {
                message,
                cause: None,
            } => SessionError::Fault(message),
        }
    }
}

/// Result of processing one message.
pub type ProcessOutcome = Result<(), HandlerError>;
