use std::collections::HashSet;

use log::{debug, info, warn};

use super::{
    INITIAL, Message, STARTUP, SessionError, UNNUMBERED, next_sequence, params,
    transport::{ProtocolTransport, Transport},
    types,
};

/// Lifecycle of a [`ClientSession`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    Connecting,
    Established,
    Closed,
}

/// Sending side of a client session, as seen from inside a [`ClientHandler`] callback.
///
/// Messages sent from a callback are written immediately but do not start a nested
/// drain; their replies are picked up by the drain that is already running, or by the
/// next one.
pub trait Outbound {
    /// Sends a numbered message and returns the sequence number it was given.
    fn send(&mut self, message: Message) -> Result<i32, SessionError>;

    /// Sends a message outside the ACK/NACK contract.
    fn send_unnumbered(&mut self, message: Message) -> Result<(), SessionError>;
}

/// Callbacks invoked by a [`ClientSession`] as inbound traffic is processed.
#[allow(unused_variables)]
pub trait ClientHandler {
    /// The server accepted message `sequence`.
    fn on_ack(&mut self, out: &mut dyn Outbound, sequence: i32, reply: &Message) {}

    /// The server rejected message `sequence`; the reason is in `reply.response()`.
    fn on_nack(&mut self, out: &mut dyn Outbound, sequence: i32, reply: &Message) {}

    /// The server sent a `LOG` line.
    fn on_log(&mut self, text: &str) {}

    /// The server sent an application message of its own.
    fn on_message(&mut self, out: &mut dyn Outbound, message: &Message) {}

    /// The session is about to close after the server confirmed a quit.
    fn on_quit(&mut self) {}
}

/// Transport and outbound bookkeeping, split from the session so callbacks can send
/// while the session's handler is borrowed.
struct Link<T: Transport> {
    transport: ProtocolTransport<T>,
    tx_sequence: i32,
    pending: HashSet<String>,
    established: bool,
}

impl<T: Transport> Outbound for Link<T> {
    fn send(&mut self, mut message: Message) -> Result<i32, SessionError> {
        if !self.established {
            return Err(SessionError::not_connected());
        }
        let sequence = self.tx_sequence;
        let next = next_sequence(sequence)?;
        message.sequence = sequence;
        self.transport.write_message(&message)?;
        self.tx_sequence = next;
        self.pending.insert(sequence.to_string());
        Ok(sequence)
    }

    fn send_unnumbered(&mut self, mut message: Message) -> Result<(), SessionError> {
        if !self.established {
            return Err(SessionError::not_connected());
        }
        message.sequence = UNNUMBERED;
        self.transport.write_message(&message)
    }
}

/// Client side of a session.
///
/// All methods must be called from the thread that owns the session.
pub struct ClientSession<T: Transport, H: ClientHandler> {
    link: Link<T>,
    handler: H,
    service: String,
    state: ClientState,
    rx_sequence: i32,
    draining: bool,
}

impl<T: Transport, H: ClientHandler> ClientSession<T, H> {
    /// Opens a session for `service` over `stream`, blocking until the server
    /// answers the handshake. The stream is closed if the handshake fails.
    pub fn start(stream: T, service: &str, handler: H) -> Result<Self, SessionError> {
        let mut session = Self {
            link: Link {
                transport: ProtocolTransport::new(stream),
                tx_sequence: STARTUP,
                pending: HashSet::new(),
                established: false,
            },
            handler,
            service: service.to_string(),
            state: ClientState::Connecting,
            rx_sequence: STARTUP,
            draining: false,
        };

        let res = session.handshake();
        session.settle(res)?;

        session.link.tx_sequence = INITIAL;
        session.link.established = true;
        session.rx_sequence = INITIAL;
        session.state = ClientState::Established;
        info!("session established for service '{service}'");
        Ok(session)
    }

    fn handshake(&mut self) -> Result<(), SessionError> {
        let hello = Message::new(types::SERVICE)
            .with_sequence(STARTUP)
            .with_parameter(params::CLASS, self.service.as_str());
        self.link.transport.write_message(&hello)?;

        let reply = self.link.transport.read_message()?;
        if reply.is_type(types::NACK) {
            return Err(SessionError::fault(format!(
                "handshake rejected: {}",
                reply.response().unwrap_or("no reason given")
            )));
        }
        if !reply.is_type(types::ACK) || reply.sequence != STARTUP || reply.ackseq().is_none() {
            return Err(SessionError::fault(format!(
                "expected {} at sequence {STARTUP}, received {} at {}",
                types::ACK,
                reply.message_type,
                reply.sequence
            )));
        }
        Ok(())
    }

    pub fn state(&self) -> ClientState {
        self.state
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    /// Sequence number the next numbered send will use.
    pub fn tx_sequence(&self) -> i32 {
        self.link.tx_sequence
    }

    /// One more than the number of numbered messages received from the server.
    pub fn rx_sequence(&self) -> i32 {
        self.rx_sequence
    }

    /// Sequence numbers sent but not yet acknowledged.
    pub fn pending(&self) -> impl Iterator<Item = &str> {
        self.link.pending.iter().map(String::as_str)
    }

    pub fn pending_count(&self) -> usize {
        self.link.pending.len()
    }

    pub fn handler(&self) -> &H {
        &self.handler
    }

    pub fn handler_mut(&mut self) -> &mut H {
        &mut self.handler
    }

    /// Sends a numbered message, then processes whatever replies have already
    /// arrived. Returns the sequence number assigned to the message.
    pub fn send(&mut self, message: Message) -> Result<i32, SessionError> {
        if self.state != ClientState::Established {
            return Err(SessionError::not_connected());
        }
        let res = self.link.send(message);
        let sequence = self.settle(res)?;
        debug!("sent message {sequence} to '{}'", self.service);

        self.receive()?;
        Ok(sequence)
    }

    /// Sends a message outside the ACK/NACK contract.
    pub fn send_unnumbered(&mut self, message: Message) -> Result<(), SessionError> {
        if self.state != ClientState::Established {
            return Err(SessionError::not_connected());
        }
        let res = self.link.send_unnumbered(message);
        self.settle(res)
    }

    /// Processes every message that has fully arrived. Never waits for more bytes;
    /// a message still in transit is left for a later call.
    ///
    /// Returns `true` once the server has confirmed a quit and the session should
    /// close. A call made while another drain is running returns `false` at once.
    /// A `QUIT` from the server surfaces as [`SessionError::SoftFail`].
    pub fn drain(&mut self) -> Result<bool, SessionError> {
        if self.draining {
            return Ok(false);
        }
        self.draining = true;
        let res = self.pump();
        self.draining = false;
        self.settle(res)
    }

    /// Drains once and, if the server confirmed a quit, closes the session.
    pub fn receive(&mut self) -> Result<bool, SessionError> {
        let done = self.drain()?;
        if done {
            self.finish();
        }
        Ok(done)
    }

    /// Asks the server to end the session and blocks until it confirms, processing
    /// any replies still in flight. Every sent message must have been acknowledged
    /// by then.
    pub fn shutdown(&mut self) -> Result<(), SessionError> {
        if self.state != ClientState::Established {
            return Err(SessionError::not_connected());
        }
        let res = self.link.send_unnumbered(Message::new(types::QUIT));
        self.settle(res)?;

        self.draining = true;
        let res = self.await_quiting();
        self.draining = false;
        self.settle(res)?;
        self.finish();

        if !self.link.pending.is_empty() {
            let mut unanswered: Vec<_> = self.link.pending.iter().cloned().collect();
            unanswered.sort();
            return Err(SessionError::fault(format!(
                "session closed with unacknowledged messages: {}",
                unanswered.join(", ")
            )));
        }
        Ok(())
    }

    fn await_quiting(&mut self) -> Result<(), SessionError> {
        loop {
            let message = self.link.transport.read_message()?;
            match self.dispatch(message) {
                Ok(true) => return Ok(()),
                Ok(false) => {}
                // Already quitting.
                Err(SessionError::SoftFail(_)) => {}
                Err(e) => return Err(e),
            }
        }
    }

    fn pump(&mut self) -> Result<bool, SessionError> {
        while let Some(message) = self.link.transport.try_read_message()? {
            if self.dispatch(message)? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn dispatch(&mut self, message: Message) -> Result<bool, SessionError> {
        debug!(
            "[{}] received {} seq={}",
            self.service, message.message_type, message.sequence
        );

        match message.message_type.as_str() {
            types::ACK | types::NACK => {
                let sequence = self.acknowledge(&message)?;
                if message.is_type(types::ACK) {
                    self.handler.on_ack(&mut self.link, sequence, &message);
                } else {
                    self.handler.on_nack(&mut self.link, sequence, &message);
                }
            }
            types::QUIT => {
                return Err(SessionError::SoftFail("quit requested by peer".to_string()));
            }
            types::LOG => {
                let Some(text) = message.parameter(params::LOG) else {
                    return Err(SessionError::fault(format!(
                        "{} without {}",
                        types::LOG,
                        params::LOG
                    )));
                };
                self.handler.on_log(text);
            }
            types::QUITING => return Ok(true),
            _ => {
                if !message.is_unnumbered() {
                    self.rx_sequence = next_sequence(self.rx_sequence)?;
                }
                self.handler.on_message(&mut self.link, &message);
            }
        }
        Ok(false)
    }

    /// Removes the pending entry an ACK/NACK refers to.
    fn acknowledge(&mut self, reply: &Message) -> Result<i32, SessionError> {
        let Some(ackseq) = reply.ackseq() else {
            return Err(SessionError::fault(format!(
                "{} without {}",
                reply.message_type,
                params::ACKSEQ
            )));
        };
        if !self.link.pending.remove(ackseq) {
            return Err(SessionError::fault(format!(
                "{} for {ackseq}, which is not pending",
                reply.message_type
            )));
        }
        ackseq
            .parse()
            .map_err(|_| SessionError::fault(format!("malformed {}: {ackseq}", params::ACKSEQ)))
    }

    /// Closes the session on fatal errors. Soft failures leave it open.
    fn settle<R>(&mut self, res: Result<R, SessionError>) -> Result<R, SessionError> {
        if let Err(e) = &res {
            if !matches!(e, SessionError::SoftFail(_)) {
                warn!("closing session for '{}': {e}", self.service);
                self.close();
            }
        }
        res
    }

    fn finish(&mut self) {
        info!("session for '{}' ended", self.service);
        self.handler.on_quit();
        self.close();
    }

    fn close(&mut self) {
        self.link.established = false;
        self.link.transport.close();
        self.state = ClientState::Closed;
    }
}
