use std::{collections::HashMap, error::Error as StdError, fmt};

use super::{
    Disposition, HandlerError, Message, ProcessOutcome, SessionError, UNNUMBERED, params,
    transport::{ProtocolTransport, Transport},
    types,
};

/// Service logic bound to one server session.
///
/// A handler is created for each connection during the handshake, sees every message
/// the client sends in order, and is dropped when the session ends.
pub trait Handler: Send {
    /// Called once after the handshake resolved this handler, before it is acknowledged.
    fn init(&mut self) -> ProcessOutcome {
        Ok(())
    }

    /// Called once when the client asks to quit.
    fn quit(&mut self) {}

    /// Processes one numbered message. The handler must record a verdict on the
    /// context's disposition (`ok`, `fail` or `punt`) before returning.
    fn process(&mut self, ctx: &mut Context<'_>) -> ProcessOutcome;

    /// Processes one unnumbered control message other than `QUIT`. No reply is sent.
    fn process_unnumbered(&mut self, _ctx: &mut Context<'_>) -> ProcessOutcome {
        Ok(())
    }
}

/// Outbound path available to handlers while they run.
pub(crate) trait MessageSink {
    fn send(&mut self, message: &Message) -> Result<(), SessionError>;
}

impl<T: Transport> MessageSink for ProtocolTransport<T> {
    fn send(&mut self, message: &Message) -> Result<(), SessionError> {
        self.write_message(message)
    }
}

/// State handed to a [`Handler`] while it processes one message.
pub struct Context<'a> {
    message: &'a Message,
    disposition: &'a mut Disposition,
    sink: &'a mut dyn MessageSink,
}

impl<'a> Context<'a> {
    pub(crate) fn new(
        message: &'a Message,
        disposition: &'a mut Disposition,
        sink: &'a mut dyn MessageSink,
    ) -> Self {
        Self {
            message,
            disposition,
            sink,
        }
    }

    /// Message being processed.
    pub fn message(&self) -> &'a Message {
        self.message
    }

    pub fn disposition(&mut self) -> &mut Disposition {
        &mut *self.disposition
    }

    /// Looks up a parameter the message must carry; soft-fails the message if absent.
    pub fn required_parameter(&mut self, name: &str) -> Result<&'a str, HandlerError> {
        let message = self.message;
        match message.parameter(name) {
            Some(value) => Ok(value),
            None => {
                let response = format!("{} requires parameter '{name}'", message.message_type);
                self.disposition.fail_soft(response.clone());
                Err(HandlerError::SoftFail(response))
            }
        }
    }

    pub fn optional_parameter(&self, name: &str) -> Option<&'a str> {
        self.message.parameter(name)
    }

    /// Acknowledges the message.
    pub fn ok(&mut self) {
        self.disposition.ok();
    }

    /// Acknowledges the message with a response text.
    pub fn ok_with(&mut self, response: impl Into<String>) {
        self.disposition.ok_with(response);
    }

    /// Rejects the message and keeps processing.
    pub fn fail(&mut self, response: impl Into<String>) {
        self.disposition.fail_soft(response);
    }

    /// Rejects the message and abandons the rest of its processing.
    pub fn punt(&mut self, response: impl Into<String>) -> ProcessOutcome {
        self.disposition.fail(response)
    }

    /// Ends the session.
    pub fn fault(&self, message: impl Into<String>) -> ProcessOutcome {
        Err(HandlerError::fatal(message))
    }

    /// Ends the session, recording what caused it.
    pub fn fault_with<E>(&self, message: impl Into<String>, cause: E) -> ProcessOutcome
    where
        E: StdError + Send + Sync + 'static,
    {
        Err(HandlerError::Fatal {
            message: message.into(),
            cause: Some(Box::new(cause)),
        })
    }

    /// Attaches a parameter to the eventual ACK/NACK.
    pub fn add_parameter(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.disposition.add_parameter(name, value);
    }

    /// Sends an unnumbered `LOG` message to the client right away.
    pub fn send_log(&mut self, text: impl Into<String>) -> ProcessOutcome {
        let log = Message::new(types::LOG)
            .with_sequence(UNNUMBERED)
            .with_parameter(params::LOG, text);
        self.sink.send(&log).map_err(|e| HandlerError::Fatal {
            message: "failed to send log".to_string(),
            cause: Some(Box::new(e)),
        })
    }
}

/// Resolves the service named during the handshake to a fresh [`Handler`].
pub trait HandlerFactory: Send + Sync {
    fn resolve(&self, name: &str) -> Result<Box<dyn Handler>, SessionError>;
}

type Constructor = Box<dyn Fn() -> Box<dyn Handler> + Send + Sync>;

/// Name to constructor table built at startup.
#[derive(Default)]
pub struct Registry {
    constructors: HashMap<String, Constructor>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `constructor` under `name`, replacing any previous entry.
    pub fn register<F, H>(&mut self, name: impl Into<String>, constructor: F) -> &mut Self
    where
        F: Fn() -> H + Send + Sync + 'static,
        H: Handler + 'static,
    {
        self.constructors.insert(
            name.into(),
            Box::new(move || Box::new(constructor()) as Box<dyn Handler>),
        );
        self
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.constructors.keys().map(String::as_str)
    }
}

impl HandlerFactory for Registry {
    fn resolve(&self, name: &str) -> Result<Box<dyn Handler>, SessionError> {
        self.constructors
            .get(name)
            .map(|constructor| constructor())
            .ok_or_else(|| SessionError::NotFound(name.to_string()))
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("services", &self.names().collect::<Vec<_>>())
            .finish()
    }
}
