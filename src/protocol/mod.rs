//! Client-server session protocol.
//!
//! This module defines the session protocol spoken between seqlink clients and servers:
//! the binary message format, the sequence-number contract used to correlate requests
//! with their acknowledgements, and the control exchanges used to open and close a
//! session.
//!
//! # Overview
//!
//! A session runs over a single reliable, ordered byte stream (see [`Transport`]). Every
//! exchange is a [`Message`]: a sequence number, a type name and two small string maps
//! (parameters and attributes).
//!
//! - The client opens a session with a `SERVICE` message at sequence [`STARTUP`], naming
//!   the service it wants in the `CLASS` parameter. The server answers `ACK` at
//!   [`STARTUP`].
//! - Numbered messages then flow from the client starting at [`INITIAL`]. Each one is
//!   answered by exactly one [`Disposition`] (`ACK` or `NACK`) carrying `ACKSEQ`.
//! - Control traffic (`QUIT`, `QUITING`, `LOG`) travels at [`UNNUMBERED`] and is never
//!   acknowledged.
//!
//! # Binary Format
//!
//! ```text
//! MESSAGE = SEQUENCE, NUM_PARAMS, NUM_ATTRS, TYPE, PARAM*NUM_PARAMS, ATTR*NUM_ATTRS
//! STRING  = LENGTH, LENGTH bytes of UTF-8
//! ```
//!
//! All integers are 4-byte big-endian `i32`. See [`codec`] for the size rules.
//!
//! # Key Components
//!
//! - [`ClientSession`]: handshake, numbered sends and the non-blocking drain pump.
//! - [`ServerSession`]: per-connection handshake, sequence validation and dispatch.
//! - [`Handler`]: contract each service implements; resolved by a [`HandlerFactory`].
//! - [`Server`]: TCP listener that runs one server session per accepted connection.
mod client;
pub mod codec;
mod disposition;
mod error;
mod handler;
mod message;
mod server;
mod thread;
mod transport;

use thread::ThreadPool;

pub use client::{ClientHandler, ClientSession, ClientState, Outbound};
pub use disposition::{Disposition, DispositionKind};
pub use error::{HandlerError, ProcessOutcome, SessionError};
pub use handler::{Context, Handler, HandlerFactory, Registry};
pub use message::Message;
pub use server::{Server, ServerSession, serve};
pub use transport::{MemoryTransport, ProtocolTransport, Transport};

/// Sequence of control messages that sit outside the ACK/NACK contract.
pub const UNNUMBERED: i32 = -1;
/// Sequence reserved for the handshake exchange.
pub const STARTUP: i32 = 0;
/// First numbered sequence in each direction.
pub const INITIAL: i32 = 1;

/// Sequence number following `sequence`. Running out of sequence numbers ends the
/// session.
pub(crate) fn next_sequence(sequence: i32) -> Result<i32, SessionError> {
    sequence
        .checked_add(1)
        .ok_or_else(|| SessionError::fault(format!("sequence numbers exhausted at {sequence}")))
}

/// Longest encoded string accepted on the wire, in bytes.
pub const MAX_MESSAGE_TOKEN: usize = 4096;
/// Most parameters (and, separately, attributes) a message may carry.
pub const MAX_PARAMETERS_PER_MESSAGE: usize = 10;

/// Message type catalog.
pub mod types {
    pub const NONE: &str = "NONE";
    pub const QUIT: &str = "QUIT";
    pub const ACK: &str = "ACK";
    pub const NACK: &str = "NACK";
    pub const QUITING: &str = "QUITING";
    pub const LOG: &str = "LOG";
    pub const SERVICE: &str = "SERVICE";
    /// Reserved; no behavior is attached to it.
    pub const CONFIGURATION: &str = "CONFIGURATION";
    /// Reserved; no behavior is attached to it.
    pub const SEND: &str = "SEND";
}

/// Parameter name catalog.
pub mod params {
    pub const ACKSEQ: &str = "ACKSEQ";
    pub const CLASS: &str = "CLASS";
    pub const RESPONSE: &str = "RESPONSE";
    pub const LOG: &str = "LOG";

    // Reserved extension points.
    pub const RESETS: &str = "RESETS";
    pub const FROM: &str = "FROM";
    pub const TO: &str = "TO";
    pub const FILE: &str = "FILE";
    pub const CODE: &str = "CODE";
    pub const TIME: &str = "TIME";
    pub const SIZE: &str = "SIZE";
}
