use std::{
    net::{SocketAddr, TcpListener, TcpStream},
    sync::Arc,
};

use log::{debug, info, warn};

use super::{
    Context, Disposition, Handler, HandlerError, HandlerFactory, INITIAL, Message, STARTUP,
    SessionError, ThreadPool, UNNUMBERED, next_sequence, params,
    transport::{ProtocolTransport, Transport},
    types,
};

/// Accepts TCP connections and runs one [`ServerSession`] per connection on a
/// fixed pool of worker threads.
pub struct Server {
    address: SocketAddr,
    factory: Arc<dyn HandlerFactory>,
    pool: ThreadPool,
}

impl Server {
    pub fn new<F>(address: SocketAddr, workers: usize, factory: F) -> Self
    where
        F: HandlerFactory + 'static,
    {
        Self {
            address,
            factory: Arc::new(factory),
            pool: ThreadPool::new(workers),
        }
    }

    /// Binds the configured address and serves connections until the listener fails.
    pub fn listen(self) -> Result<(), SessionError> {
        let listener = TcpListener::bind(self.address)?;
        self.run(listener)
    }

    /// Serves connections accepted on an already bound listener.
    pub fn run(self, listener: TcpListener) -> Result<(), SessionError> {
        info!("listening at {}", listener.local_addr()?);

        for stream in listener.incoming() {
            match stream {
                Ok(stream) => {
                    let factory = Arc::clone(&self.factory);
                    self.pool
                        .execute(move || handle_connection(stream, factory.as_ref()));
                }
                Err(e) => warn!("broken connection: {e:?}"),
            }
        }
        Ok(())
    }
}

fn handle_connection(stream: TcpStream, factory: &dyn HandlerFactory) {
    let peer = stream
        .peer_addr()
        .map(|addr| addr.to_string())
        .unwrap_or_else(|_| String::from("unknown peer"));
    debug!("accepted connection from {peer}");

    match serve(stream, factory) {
        Ok(()) => info!("session with {peer} closed"),
        Err(e) => warn!("session with {peer} failed: {e}"),
    }
}

/// Runs a complete server session over `stream`: handshake, message loop and close.
pub fn serve<T: Transport>(stream: T, factory: &dyn HandlerFactory) -> Result<(), SessionError> {
    ServerSession::accept(stream, factory)?.run()
}

enum Step {
    Continue,
    Quit,
}

/// Server side of one connection.
pub struct ServerSession<T: Transport> {
    transport: ProtocolTransport<T>,
    handler: Box<dyn Handler>,
    service: String,
    rx_sequence: i32,
}

impl<T: Transport> ServerSession<T> {
    /// Performs the handshake on a freshly accepted stream. The stream is closed if
    /// the handshake fails.
    pub fn accept(stream: T, factory: &dyn HandlerFactory) -> Result<Self, SessionError> {
        let mut transport = ProtocolTransport::new(stream);

        match handshake(&mut transport, factory) {
            Ok((service, handler)) => {
                info!("session established for service '{service}'");
                Ok(Self {
                    transport,
                    handler,
                    service,
                    rx_sequence: INITIAL,
                })
            }
            Err(e) => {
                warn!("handshake failed: {e}");
                transport.close();
                Err(e)
            }
        }
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    /// Sequence number the next numbered message must carry.
    pub fn rx_sequence(&self) -> i32 {
        self.rx_sequence
    }

    /// Processes messages until the client quits or the session fails. The
    /// transport is closed in both cases.
    pub fn run(mut self) -> Result<(), SessionError> {
        loop {
            match self.step() {
                Ok(Step::Continue) => {}
                Ok(Step::Quit) => {
                    info!("client quit service '{}'", self.service);
                    self.transport.close();
                    return Ok(());
                }
                Err(e) => {
                    warn!("closing session for '{}': {e}", self.service);
                    self.transport.close();
                    return Err(e);
                }
            }
        }
    }

    fn step(&mut self) -> Result<Step, SessionError> {
        let message = self.transport.read_message()?;
        debug!(
            "[{}] received {} seq={}",
            self.service, message.message_type, message.sequence
        );

        if message.sequence == UNNUMBERED {
            return self.unnumbered(message);
        }

        if message.sequence != self.rx_sequence {
            return Err(SessionError::fault(format!(
                "expected sequence {}, received {}",
                self.rx_sequence, message.sequence
            )));
        }

        let mut disposition = Disposition::new(message.sequence);
        let outcome = {
            let mut ctx = Context::new(&message, &mut disposition, &mut self.transport);
            self.handler.process(&mut ctx)
        };
        match outcome {
            Ok(()) => {}
            Err(HandlerError::SoftFail(reason)) => {
                debug!("[{}] message {} punted: {reason}", self.service, message.sequence);
                disposition.abandon(reason);
            }
            Err(fatal) => return Err(fatal.into()),
        }
        self.rx_sequence = next_sequence(self.rx_sequence)?;

        disposition.fix_type()?;
        self.transport.write_disposition(&disposition)?;
        Ok(Step::Continue)
    }

    fn unnumbered(&mut self, message: Message) -> Result<Step, SessionError> {
        if message.is_type(types::QUIT) {
            self.transport.write_message(&Message::new(types::QUITING))?;
            self.handler.quit();
            return Ok(Step::Quit);
        }

        // Verdicts recorded on unnumbered messages are never sent.
        let mut scratch = Disposition::new(UNNUMBERED);
        let mut ctx = Context::new(&message, &mut scratch, &mut self.transport);
        match self.handler.process_unnumbered(&mut ctx) {
            Ok(()) => Ok(Step::Continue),
            Err(HandlerError::SoftFail(reason)) => {
                warn!(
                    "[{}] unnumbered {} rejected: {reason}",
                    self.service, message.message_type
                );
                Ok(Step::Continue)
            }
            Err(fatal) => Err(fatal.into()),
        }
    }
}

fn handshake<T: Transport>(
    transport: &mut ProtocolTransport<T>,
    factory: &dyn HandlerFactory,
) -> Result<(String, Box<dyn Handler>), SessionError> {
    let hello = transport.read_message()?;
    if hello.sequence != STARTUP || !hello.is_type(types::SERVICE) {
        return Err(SessionError::fault(format!(
            "expected {} at sequence {STARTUP}, received {} at {}",
            types::SERVICE,
            hello.message_type,
            hello.sequence
        )));
    }
    let Some(service) = hello.parameter(params::CLASS) else {
        return Err(SessionError::fault(format!(
            "{} without {}",
            types::SERVICE,
            params::CLASS
        )));
    };

    let mut handler = match factory.resolve(service) {
        Ok(handler) => handler,
        Err(e) => {
            reject(transport, &e);
            return Err(e);
        }
    };
    if let Err(e) = handler.init() {
        let e: SessionError = e.into();
        reject(transport, &e);
        return Err(e);
    }

    let mut ack = Disposition::new(STARTUP);
    ack.ok();
    ack.fix_type()?;
    transport.write_disposition(&ack)?;
    Ok((service.to_string(), handler))
}

/// Tells the client why its handshake was refused. Best effort.
fn reject<T: Transport>(transport: &mut ProtocolTransport<T>, reason: &SessionError) {
    let mut nack = Disposition::new(STARTUP);
    nack.fail_soft(reason.to_string());
    let res = nack
        .fix_type()
        .and_then(|_| transport.write_disposition(&nack));
    if let Err(e) = res {
        debug!("could not send handshake rejection: {e}");
    }
}
