use std::{
    collections::VecDeque,
    io::{self, Read, Write},
    net::{Shutdown, TcpStream},
    sync::{Arc, Condvar, Mutex, MutexGuard},
};

use log::{debug, trace};

use super::{Disposition, Message, SessionError, codec};

const READ_CHUNK: usize = 512;

/// Bidirectional byte stream a session runs over.
pub trait Transport: Read + Write {
    /// Number of bytes that can be read right now without blocking.
    fn available(&mut self) -> io::Result<usize>;

    /// Closes both directions of the stream.
    fn close(&mut self) -> io::Result<()>;
}

impl Transport for TcpStream {
    fn available(&mut self) -> io::Result<usize> {
        let mut probe = [0u8; READ_CHUNK];
        self.set_nonblocking(true)?;
        let res = self.peek(&mut probe);
        self.set_nonblocking(false)?;

        match res {
            Ok(n) => Ok(n),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(0),
            Err(e) => Err(e),
        }
    }

    fn close(&mut self) -> io::Result<()> {
        match self.shutdown(Shutdown::Both) {
            Err(e) if e.kind() != io::ErrorKind::NotConnected => Err(e),
            _ => Ok(()),
        }
    }
}

/// Message-level view of a [`Transport`], shared by the client and server sessions.
///
/// Bytes read by [`try_read_message`](Self::try_read_message) that do not yet form a
/// whole message are kept until the rest arrives.
pub struct ProtocolTransport<T: Transport> {
    stream: T,
    connected: bool,
    partial: Vec<u8>,
}

impl<T: Transport> ProtocolTransport<T> {
    pub fn new(stream: T) -> Self {
        Self {
            stream,
            connected: true,
            partial: Vec::new(),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    /// Reads one message, blocking until it is complete.
    pub fn read_message(&mut self) -> Result<Message, SessionError> {
        if !self.connected {
            return Err(SessionError::not_connected());
        }
        loop {
            if let Some(message) = self.take_buffered()? {
                return Ok(message);
            }
            if self.partial.is_empty() {
                let message = codec::decode(&mut self.stream)?;
                trace_read(&message);
                return Ok(message);
            }

            let mut chunk = [0u8; READ_CHUNK];
            let n = self.stream.read(&mut chunk)?;
            if n == 0 {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "stream ended inside a message",
                )
                .into());
            }
            self.partial.extend_from_slice(&chunk[..n]);
        }
    }

    /// Returns the next message if it has fully arrived, without blocking.
    pub fn try_read_message(&mut self) -> Result<Option<Message>, SessionError> {
        if !self.connected {
            return Ok(None);
        }
        loop {
            if let Some(message) = self.take_buffered()? {
                return Ok(Some(message));
            }
            let available = self.stream.available()?;
            if available == 0 {
                return Ok(None);
            }

            let start = self.partial.len();
            self.partial.resize(start + available, 0);
            let n = match self.stream.read(&mut self.partial[start..]) {
                Ok(n) => n,
                Err(e) => {
                    self.partial.truncate(start);
                    return Err(e.into());
                }
            };
            self.partial.truncate(start + n);
            if n == 0 {
                return Ok(None);
            }
        }
    }

    fn take_buffered(&mut self) -> Result<Option<Message>, SessionError> {
        let Some(length) = codec::frame_length(&self.partial)? else {
            return Ok(None);
        };
        let message = codec::decode(&mut &self.partial[..length])?;
        self.partial.drain(..length);
        trace_read(&message);
        Ok(Some(message))
    }

    pub fn write_message(&mut self, message: &Message) -> Result<(), SessionError> {
        if !self.connected {
            return Err(SessionError::not_connected());
        }
        trace!("write {} seq={}", message.message_type, message.sequence);
        codec::write_message(&mut self.stream, message)
    }

    pub fn write_disposition(&mut self, disposition: &Disposition) -> Result<(), SessionError> {
        if !self.connected {
            return Err(SessionError::not_connected());
        }
        let bytes = disposition.encode()?;
        trace!(
            "write {} seq={}",
            disposition.kind().as_type(),
            disposition.sequence()
        );
        self.stream.write_all(&bytes)?;
        self.stream.flush()?;
        Ok(())
    }

    /// Bytes received but not yet decoded, including any partial message.
    pub fn available(&mut self) -> Result<usize, SessionError> {
        if !self.connected {
            return Ok(0);
        }
        Ok(self.partial.len() + self.stream.available()?)
    }

    /// Closes the underlying stream. Safe to call more than once.
    pub fn close(&mut self) {
        if !self.connected {
            return;
        }
        self.connected = false;
        if let Err(e) = self.stream.close() {
            debug!("error while closing transport: {e}");
        }
    }

    pub fn get_ref(&self) -> &T {
        &self.stream
    }
}

fn trace_read(message: &Message) {
    trace!(
        "read {} seq={} params={:?}",
        message.message_type, message.sequence, message.parameters
    );
}

#[derive(Debug, Default)]
struct Pipe {
    buf: VecDeque<u8>,
    closed: bool,
}

#[derive(Debug, Default)]
struct Channel {
    pipe: Mutex<Pipe>,
    ready: Condvar,
}

impl Channel {
    fn lock(&self) -> io::Result<MutexGuard<'_, Pipe>> {
        self.pipe
            .lock()
            .map_err(|_| io::Error::other("memory transport lock poisoned"))
    }

    fn close(&self) -> io::Result<()> {
        self.lock()?.closed = true;
        self.ready.notify_all();
        Ok(())
    }
}

/// In-process transport: one end of a connected pair of byte pipes.
///
/// Reads block until bytes arrive or the peer closes its writing side.
#[derive(Debug)]
pub struct MemoryTransport {
    inbound: Arc<Channel>,
    outbound: Arc<Channel>,
}

impl MemoryTransport {
    /// Creates two connected ends.
    pub fn pair() -> (Self, Self) {
        let a = Arc::new(Channel::default());
        let b = Arc::new(Channel::default());
        (
            Self {
                inbound: Arc::clone(&a),
                outbound: Arc::clone(&b),
            },
            Self {
                inbound: b,
                outbound: a,
            },
        )
    }

    /// Closes the writing side only; the peer reads end-of-stream once it has
    /// consumed everything already written.
    pub fn finish(&self) -> io::Result<()> {
        self.outbound.close()
    }

    /// True once this end has been closed or the peer has stopped writing.
    pub fn is_closed(&self) -> bool {
        self.inbound.lock().map(|p| p.closed).unwrap_or(true)
    }
}

impl Read for MemoryTransport {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut pipe = self.inbound.lock()?;
        while pipe.buf.is_empty() && !pipe.closed {
            pipe = self
                .inbound
                .ready
                .wait(pipe)
                .map_err(|_| io::Error::other("memory transport lock poisoned"))?;
        }

        let n = buf.len().min(pipe.buf.len());
        for (dst, src) in buf.iter_mut().zip(pipe.buf.drain(..n)) {
            *dst = src;
        }
        Ok(n)
    }
}

impl Write for MemoryTransport {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut pipe = self.outbound.lock()?;
        if pipe.closed {
            return Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "memory transport closed",
            ));
        }
        pipe.buf.extend(buf);
        self.outbound.ready.notify_all();
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Transport for MemoryTransport {
    fn available(&mut self) -> io::Result<usize> {
        Ok(self.inbound.lock()?.buf.len())
    }

    fn close(&mut self) -> io::Result<()> {
        self.outbound.close()?;
        self.inbound.close()
    }
}
