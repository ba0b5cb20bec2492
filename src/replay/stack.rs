//! Minimal two-sided RDP framing engine.
//!
//! Each side buffers what it receives and cuts it into PDUs: slow-path
//! TPKT (`0x03 0x00 len_be16`) or fast-path (action bits `00`, then a one
//! or two byte length). Both lengths include the header.
//!
//! During connection setup a side may also carry CredSSP (NLA) messages,
//! which are DER SEQUENCEs starting with `0x30`. That byte is also a valid
//! fast-path header, so it is framed as DER only until the side sends its
//! first PDU past the X.224 negotiation.

use super::{Pdu, ProtocolStack, Side};
use crate::recording::EventKind;

const TPKT_VERSION: u8 = 0x03;
const TPKT_HEADER_LEN: usize = 4;
const FASTPATH_ACTION_MASK: u8 = 0x03;
const DER_SEQUENCE: u8 = 0x30;
const X224_CONNECTION_REQUEST: u8 = 0xe0;
const X224_CONNECTION_CONFIRM: u8 = 0xd0;

/// Outcome of looking at the head of a side's buffer.
#[derive(Debug, PartialEq, Eq)]
enum Head {
    /// A PDU of this many bytes starts the buffer.
    Pdu(usize),
    /// Not enough bytes to know the length yet.
    NeedMore,
    /// The buffer does not start with a PDU we can frame.
    Unframed,
}

fn pdu_length(buf: &[u8], credssp: bool) -> Head {
    let Some(&first) = buf.first() else {
        return Head::NeedMore;
    };

    if credssp && first == DER_SEQUENCE {
        return der_length(buf);
    }

    if first == TPKT_VERSION {
        if buf.len() >= 2 && buf[1] != 0x00 {
            return Head::Unframed;
        }
        if buf.len() < TPKT_HEADER_LEN {
            return Head::NeedMore;
        }
        let len = u16::from_be_bytes([buf[2], buf[3]]) as usize;
        return if len < TPKT_HEADER_LEN {
            Head::Unframed
        } else {
            Head::Pdu(len)
        };
    }

    if first & FASTPATH_ACTION_MASK == 0 {
        let Some(&len1) = buf.get(1) else {
            return Head::NeedMore;
        };
        if len1 & 0x80 == 0 {
            let len = len1 as usize;
            return if len < 2 { Head::Unframed } else { Head::Pdu(len) };
        }
        let Some(&len2) = buf.get(2) else {
            return Head::NeedMore;
        };
        let len = (((len1 & 0x7f) as usize) << 8) | len2 as usize;
        return if len < 3 { Head::Unframed } else { Head::Pdu(len) };
    }

    Head::Unframed
}

/// Total size of a DER SEQUENCE with a definite length.
fn der_length(buf: &[u8]) -> Head {
    let Some(&first_len) = buf.get(1) else {
        return Head::NeedMore;
    };
    if first_len & 0x80 == 0 {
        return Head::Pdu(2 + first_len as usize);
    }
    // 0x80 is the indefinite form, which DER forbids
    let octets = (first_len & 0x7f) as usize;
    if octets == 0 || octets > 4 {
        return Head::Unframed;
    }
    let Some(len_bytes) = buf.get(2..2 + octets) else {
        return Head::NeedMore;
    };
    let len = len_bytes
        .iter()
        .fold(0usize, |acc, &b| (acc << 8) | b as usize);
    Head::Pdu(2 + octets + len)
}

/// X.224 connection request/confirm and CredSSP messages precede the
/// MCS connection and do not end the security exchange.
fn is_negotiation(pdu: &[u8]) -> bool {
    match pdu.first() {
        Some(&DER_SEQUENCE) => true,
        Some(&TPKT_VERSION) => matches!(
            pdu.get(5).map(|code| code & 0xf0),
            Some(X224_CONNECTION_REQUEST | X224_CONNECTION_CONFIRM)
        ),
        _ => false,
    }
}

#[derive(Debug, Default)]
struct Framer {
    buf: Vec<u8>,
    /// Set once a PDU past connection negotiation was framed.
    connected: bool,
}

impl Framer {
    fn push(&mut self, data: &[u8], kind: EventKind, out: &mut Vec<Pdu>) {
        self.buf.extend_from_slice(data);
        loop {
            match pdu_length(&self.buf, !self.connected) {
                Head::Pdu(len) if self.buf.len() >= len => {
                    let bytes: Vec<u8> = self.buf.drain(..len).collect();
                    if !self.connected && !is_negotiation(&bytes) {
                        self.connected = true;
                    }
                    out.push(Pdu { kind, bytes });
                }
                Head::Pdu(_) | Head::NeedMore => break,
                Head::Unframed => {
                    tracing::debug!(len = self.buf.len(), "unframed bytes recorded raw");
                    out.push(Pdu {
                        kind: EventKind::Raw,
                        bytes: std::mem::take(&mut self.buf),
                    });
                    break;
                }
            }
        }
    }
}

/// Client-facing and server-facing framers of one replayed connection.
#[derive(Debug, Default)]
pub struct RdpFramingStack {
    client: Framer,
    server: Framer,
}

impl RdpFramingStack {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ProtocolStack for RdpFramingStack {
    fn receive(&mut self, side: Side, data: &[u8]) -> Vec<Pdu> {
        let mut out = Vec::new();
        match side {
            Side::Client => self.client.push(data, EventKind::ClientPdu, &mut out),
            Side::Server => self.server.push(data, EventKind::ServerPdu, &mut out),
        }
        out
    }

    fn pending(&self, side: Side) -> usize {
        match side {
            Side::Client => self.client.buf.len(),
            Side::Server => self.server.buf.len(),
        }
    }
}
