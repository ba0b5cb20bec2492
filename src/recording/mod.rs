//! Canonical session recording.
//!
//! A [`Recorder`] stamps every event produced by the protocol stack, hands
//! it to its observers and appends it to its transports. The replay
//! artifact written by [`RecordingWriter`] is a flat sequence of events:
//!
//! ```text
//! u64 LE  length of the rest of the event
//! u16 LE  event kind
//! u64 LE  timestamp, milliseconds since the Unix epoch
//! ...     payload
//! ```

use std::io::{self, Read, Write};

use serde::Serialize;

/// Bytes of an event header after the length prefix: kind + timestamp.
const EVENT_HEADER_LEN: usize = 2 + 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// A complete PDU sent by the client.
    ClientPdu,
    /// A complete PDU sent by the server.
    ServerPdu,
    /// Bytes the stack could not frame.
    Raw,
    ConnectionClose,
}

impl EventKind {
    pub fn code(self) -> u16 {
        match self {
            EventKind::ClientPdu => 1,
            EventKind::ServerPdu => 2,
            EventKind::Raw => 3,
            EventKind::ConnectionClose => 4,
        }
    }

    pub fn from_code(code: u16) -> Option<Self> {
        match code {
            1 => Some(EventKind::ClientPdu),
            2 => Some(EventKind::ServerPdu),
            3 => Some(EventKind::Raw),
            4 => Some(EventKind::ConnectionClose),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    pub timestamp_ms: u64,
    pub kind: EventKind,
    pub payload: Vec<u8>,
}

/// Hook notified of every event before it is written.
pub trait EventObserver {
    fn on_event_received(&mut self, event: &Event) -> io::Result<()>;

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Serializes events into the replay artifact format.
pub struct RecordingWriter<W: Write> {
    out: W,
}

impl<W: Write> RecordingWriter<W> {
    pub fn new(out: W) -> Self {
        RecordingWriter { out }
    }

    pub fn write_event(&mut self, event: &Event) -> io::Result<()> {
        let length = (EVENT_HEADER_LEN + event.payload.len()) as u64;
        self.out.write_all(&length.to_le_bytes())?;
        self.out.write_all(&event.kind.code().to_le_bytes())?;
        self.out.write_all(&event.timestamp_ms.to_le_bytes())?;
        self.out.write_all(&event.payload)
    }

    pub fn flush(&mut self) -> io::Result<()> {
        self.out.flush()
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

/// Fans events out to observers, then to artifact writers.
pub struct Recorder<W: Write> {
    timestamp_ms: u64,
    observers: Vec<Box<dyn EventObserver>>,
    writers: Vec<RecordingWriter<W>>,
    recorded: usize,
}

impl<W: Write> Recorder<W> {
    pub fn new() -> Self {
        Recorder {
            timestamp_ms: 0,
            observers: Vec::new(),
            writers: Vec::new(),
            recorded: 0,
        }
    }

    pub fn with_writer(mut self, out: W) -> Self {
        self.writers.push(RecordingWriter::new(out));
        self
    }

    pub fn with_observer(mut self, observer: Box<dyn EventObserver>) -> Self {
        self.observers.push(observer);
        self
    }

    /// Timestamp stamped on subsequently recorded events.
    pub fn set_timestamp(&mut self, timestamp_ms: u64) {
        self.timestamp_ms = timestamp_ms;
    }

    pub fn record(&mut self, payload: &[u8], kind: EventKind) -> io::Result<()> {
        let event = Event {
            timestamp_ms: self.timestamp_ms,
            kind,
            payload: payload.to_vec(),
        };
        for observer in &mut self.observers {
            observer.on_event_received(&event)?;
        }
        for writer in &mut self.writers {
            writer.write_event(&event)?;
        }
        self.recorded += 1;
        Ok(())
    }

    /// Number of events recorded so far.
    pub fn recorded(&self) -> usize {
        self.recorded
    }

    /// Flush every sink and hand back the writers' outputs.
    pub fn finish(mut self) -> io::Result<Vec<W>> {
        for observer in &mut self.observers {
            observer.flush()?;
        }
        self.writers
            .into_iter()
            .map(|mut w| {
                w.flush()?;
                Ok(w.into_inner())
            })
            .collect()
    }
}

impl<W: Write> Default for Recorder<W> {
    fn default() -> Self {
        Self::new()
    }
}

/// Parse a replay artifact back into events.
pub fn read_events<R: Read>(mut input: R) -> io::Result<Vec<Event>> {
    let mut data = Vec::new();
    input.read_to_end(&mut data)?;

    let mut events = Vec::new();
    let mut rest = data.as_slice();
    while !rest.is_empty() {
        let (length, tail) = take::<8>(rest)?;
        let length = usize::try_from(u64::from_le_bytes(length))
            .map_err(|_| invalid("event length overflows"))?;
        if length < EVENT_HEADER_LEN {
            return Err(invalid("event shorter than its header"));
        }
        if tail.len() < length {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!(
                    "truncated event: {} bytes declared, {} available",
                    length,
                    tail.len()
                ),
            ));
        }
        let (body, next) = tail.split_at(length);
        let (kind, body) = take::<2>(body)?;
        let (timestamp, payload) = take::<8>(body)?;
        let code = u16::from_le_bytes(kind);
        let kind = EventKind::from_code(code)
            .ok_or_else(|| invalid(&format!("unknown event kind {}", code)))?;
        events.push(Event {
            timestamp_ms: u64::from_le_bytes(timestamp),
            kind,
            payload: payload.to_vec(),
        });
        rest = next;
    }
    Ok(events)
}

fn take<const N: usize>(buf: &[u8]) -> io::Result<([u8; N], &[u8])> {
    if buf.len() < N {
        return Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            "truncated event header",
        ));
    }
    let (head, tail) = buf.split_at(N);
    let mut out = [0u8; N];
    out.copy_from_slice(head);
    Ok((out, tail))
}

fn invalid(msg: &str) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, msg.to_string())
}
