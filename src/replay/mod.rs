//! Offline replay of a decrypted conversation through a protocol stack.
//!
//! The replayer owns a two-sided stack, a transport per side and the
//! recorder. Bytes are fed in capture order; every PDU the stack completes
//! is relayed to the opposite side's transport and recorded with the
//! timestamp set before the call. Replay never talks to the network, so
//! the default transports discard what they are given.

pub mod stack;

use std::io::{self, Write};

use crate::error::FinalizeError;
use crate::recording::{EventKind, Recorder};
pub use stack::RdpFramingStack;

/// Endpoint a chunk of bytes was received from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Client,
    Server,
}

impl Side {
    pub fn from_client(from_client: bool) -> Self {
        if from_client {
            Side::Client
        } else {
            Side::Server
        }
    }

    fn peer(self) -> Self {
        match self {
            Side::Client => Side::Server,
            Side::Server => Side::Client,
        }
    }

    fn name(self) -> &'static str {
        match self {
            Side::Client => "client",
            Side::Server => "server",
        }
    }
}

/// A complete protocol data unit cut by the stack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pdu {
    pub kind: EventKind,
    pub bytes: Vec<u8>,
}

/// Two-sided protocol engine driven by the replayer.
pub trait ProtocolStack {
    /// Feed bytes received from `side`, returning the PDUs they complete.
    fn receive(&mut self, side: Side, data: &[u8]) -> Vec<Pdu>;

    /// Bytes buffered for an incomplete PDU on `side`.
    fn pending(&self, side: Side) -> usize;
}

/// Outbound path of one side of the stack.
pub trait Transport {
    fn send(&mut self, data: &[u8]) -> io::Result<()>;
}

/// Transport that drops everything. Used for offline replay.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullTransport;

impl Transport for NullTransport {
    fn send(&mut self, data: &[u8]) -> io::Result<()> {
        tracing::trace!(len = data.len(), "send suppressed");
        Ok(())
    }
}

pub struct Replayer<S: ProtocolStack, W: Write> {
    stack: S,
    to_client: Box<dyn Transport>,
    to_server: Box<dyn Transport>,
    recorder: Recorder<W>,
}

impl<S: ProtocolStack, W: Write> Replayer<S, W> {
    pub fn new(stack: S, recorder: Recorder<W>) -> Self {
        Replayer {
            stack,
            to_client: Box::new(NullTransport),
            to_server: Box::new(NullTransport),
            recorder,
        }
    }

    /// Replace the outbound transports of the client and server sides.
    pub fn with_transports(
        mut self,
        to_client: Box<dyn Transport>,
        to_server: Box<dyn Transport>,
    ) -> Self {
        self.to_client = to_client;
        self.to_server = to_server;
        self
    }

    /// Timestamp (ms since the Unix epoch) of events produced by the next
    /// [`Replayer::ingest`].
    pub fn set_timestamp(&mut self, timestamp_ms: u64) {
        self.recorder.set_timestamp(timestamp_ms);
    }

    pub fn ingest(&mut self, data: &[u8], from_client: bool) -> io::Result<()> {
        let side = Side::from_client(from_client);
        for pdu in self.stack.receive(side, data) {
            let transport = match side.peer() {
                Side::Client => &mut self.to_client,
                Side::Server => &mut self.to_server,
            };
            transport.send(&pdu.bytes)?;
            self.recorder.record(&pdu.bytes, pdu.kind)?;
        }
        Ok(())
    }

    /// Record the connection close. Fails without recording it when a side
    /// still holds part of a PDU.
    pub fn finalize(&mut self) -> Result<(), FinalizeError> {
        for side in [Side::Client, Side::Server] {
            let pending = self.stack.pending(side);
            if pending > 0 {
                return Err(FinalizeError::Incomplete {
                    direction: side.name(),
                    pending,
                });
            }
        }
        self.recorder.record(&[], EventKind::ConnectionClose)?;
        Ok(())
    }

    /// Number of events recorded so far.
    pub fn recorded(&self) -> usize {
        self.recorder.recorded()
    }

    pub fn into_recorder(self) -> Recorder<W> {
        self.recorder
    }
}
