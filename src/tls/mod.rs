//! Passive TLS 1.2 reassembly and decryption of a single flow.

pub mod decrypt;
pub mod handshake;
pub mod keylog;
pub mod record;
pub mod session;
#[cfg(test)]
pub(crate) mod testutil;

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::time::SystemTime;

use tls_parser::TlsCipherSuiteID;
use zeroize::Zeroizing;

use crate::capture::{NetInfo, Packet};
use crate::error::FlowError;
use crate::flow::Flow;
pub use handshake::{find_client_random, Message};
use handshake::HANDSHAKE_RECORD;
use keylog::{encode_hex, SecretEntry};
use record::{frame_records, Framing, RawRecord};
use session::CryptoState;

/// Number of leading packets searched for a ClientHello when listing flows.
pub const CLIENT_HELLO_SEARCH_LIMIT: usize = 10;

/// Content-type byte of application data records.
const APPLICATION_DATA: u8 = 0x17;

/// What a packet carried once the TLS layer has been peeled off.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Content {
    /// No transport payload (SYN, ACK, FIN, ...).
    Control,
    /// Payload seen before the TLS handshake started, passed through as is.
    Opaque(Vec<u8>),
    /// Parsed records, decrypted when keys were available.
    Records(Vec<Message>),
}

/// A packet of the flow with its payload replaced by parsed records.
#[derive(Debug, Clone)]
pub struct TlsPacket {
    pub index: u64,
    pub timestamp: SystemTime,
    pub net: NetInfo,
    pub content: Content,
}

impl TlsPacket {
    /// Decrypted application payloads, in record order.
    pub fn application_data(&self) -> impl Iterator<Item = &[u8]> {
        let messages: &[Message] = match &self.content {
            Content::Records(msgs) => msgs,
            _ => &[],
        };
        messages.iter().filter_map(|m| match m {
            Message::ApplicationData(data) => Some(data.as_slice()),
            _ => None,
        })
    }
}

/// Why a buffer could not be turned into messages.
enum RecordError {
    /// The bytes are not (valid) TLS.
    Structure(String),
    Flow(FlowError),
}

impl From<FlowError> for RecordError {
    fn from(e: FlowError) -> Self {
        RecordError::Flow(e)
    }
}

/// Lazy decryption of one flow, one reconstructed packet per pull.
///
/// Each item either carries the next packet with its records parsed (and
/// decrypted once keys exist), or the error that ended the flow. After an
/// error the iterator is exhausted.
pub struct Decrypted {
    packets: std::vec::IntoIter<Packet>,
    /// Opposite-direction packets met while reassembling a record.
    deferred: VecDeque<Packet>,
    master_secret: Zeroizing<Vec<u8>>,
    client_random: Option<[u8; 32]>,
    server_random: Option<[u8; 32]>,
    cipher: Option<TlsCipherSuiteID>,
    crypto: Option<CryptoState>,
    initiator: Option<SocketAddr>,
    finished: bool,
}

impl Decrypted {
    pub fn new(flow: Flow, secret: &SecretEntry) -> Self {
        Decrypted {
            packets: flow.packets.into_iter(),
            deferred: VecDeque::new(),
            master_secret: Zeroizing::new(secret.master_secret.clone()),
            client_random: None,
            server_random: None,
            cipher: None,
            crypto: None,
            initiator: None,
            finished: false,
        }
    }

    /// Sender of the flow's first payload-bearing packet, once seen.
    pub fn initiator(&self) -> Option<SocketAddr> {
        self.initiator
    }

    fn next_packet(&mut self) -> Option<Packet> {
        self.deferred.pop_front().or_else(|| self.packets.next())
    }

    fn process(&mut self, packet: Packet) -> Result<TlsPacket, FlowError> {
        let Some(net) = packet.net else {
            return Err(FlowError::Malformed {
                frame: packet.index,
                reason: "segment without network header".into(),
            });
        };
        let mut reconstructed = TlsPacket {
            index: packet.index,
            timestamp: packet.timestamp,
            net,
            content: Content::Control,
        };
        if packet.payload.is_empty() {
            return Ok(reconstructed);
        }

        let crypto = match self.crypto.take() {
            None => {
                tracing::debug!(initiator = %net.src, peer = %net.dst, "flow initiator fixed");
                self.initiator = Some(net.src);
                CryptoState::new(net.src, net.dst)
            }
            Some(state) if state.expected_sender() != net.src => state.mirror(),
            Some(state) => state,
        };
        self.crypto = Some(crypto);

        let mut buffer = packet.payload;
        let opened = loop {
            let outstanding = match frame_records(&buffer) {
                Framing::Complete(records) => break self.open_records(&records, packet.index),
                Framing::NotTls(reason) => break Err(RecordError::Structure(reason)),
                Framing::Incomplete { outstanding } => outstanding,
            };
            let fragment = self
                .pull_fragment(net.src)
                .ok_or(FlowError::Truncated { outstanding })?;
            tracing::trace!(
                frame = packet.index,
                outstanding,
                appended = fragment.len(),
                "reassembling record"
            );
            buffer.extend_from_slice(&fragment);
        };

        match opened {
            Ok(messages) => {
                reconstructed.content = Content::Records(messages);
                Ok(reconstructed)
            }
            Err(RecordError::Structure(reason)) => self.not_tls(reconstructed, buffer, reason),
            Err(RecordError::Flow(e)) => Err(e),
        }
    }

    /// Before a ClientHello, non-TLS bytes are expected (X.224 negotiation)
    /// and pass through. Afterwards they mean the stream is broken.
    fn not_tls(
        &self,
        mut reconstructed: TlsPacket,
        buffer: Vec<u8>,
        reason: String,
    ) -> Result<TlsPacket, FlowError> {
        if self.client_random.is_some() {
            return Err(FlowError::Malformed {
                frame: reconstructed.index,
                reason,
            });
        }
        reconstructed.content = Content::Opaque(buffer);
        Ok(reconstructed)
    }

    /// Next payload from the same sender. Payload-less segments are dropped,
    /// the other direction's data is kept for later.
    fn pull_fragment(&mut self, sender: SocketAddr) -> Option<Vec<u8>> {
        let mut held = VecDeque::new();
        let found = loop {
            let Some(next) = self.next_packet() else {
                break None;
            };
            if next.payload.is_empty() {
                continue;
            }
            if next.net.map(|n| n.src) == Some(sender) {
                break Some(next.payload);
            }
            held.push_back(next);
        };
        held.extend(self.deferred.drain(..));
        self.deferred = held;
        found
    }

    fn open_records(
        &mut self,
        records: &[RawRecord<'_>],
        frame: u64,
    ) -> Result<Vec<Message>, RecordError> {
        let mut messages = Vec::new();
        for record in records {
            let opened = self.open_record(record, frame)?;
            for message in &opened {
                self.observe(message, frame)?;
            }
            messages.extend(opened);
        }
        Ok(messages)
    }

    fn open_record(
        &mut self,
        record: &RawRecord<'_>,
        frame: u64,
    ) -> Result<Vec<Message>, RecordError> {
        let Some(crypto) = self.crypto.as_mut() else {
            return Err(RecordError::Structure("no crypto context".into()));
        };

        if crypto.read.active {
            let keys = crypto.read.keys.as_mut().ok_or(FlowError::Decrypt {
                frame,
                reason: "cipher active but no keys were derived".into(),
            })?;
            let plaintext = keys
                .open_record(record.content_type, record.version, record.body)
                .map_err(|e| FlowError::Decrypt {
                    frame,
                    reason: e.to_string(),
                })?;
            return Ok(vec![match record.content_type {
                APPLICATION_DATA => Message::ApplicationData(plaintext),
                other => Message::Other {
                    content_type: other,
                },
            }]);
        }

        match record.content_type {
            APPLICATION_DATA if self.client_random.is_some() => Err(FlowError::Decrypt {
                frame,
                reason: "application data before keys were derived".into(),
            }
            .into()),
            // Protected traffic of a handshake this flow does not hold
            APPLICATION_DATA => Ok(vec![Message::Other {
                content_type: APPLICATION_DATA,
            }]),
            HANDSHAKE_RECORD => {
                crypto.read.handshake.extend_from_slice(record.body);
                match handshake::drain_handshake(&mut crypto.read.handshake) {
                    Ok(messages) => Ok(messages),
                    Err(reason) => {
                        crypto.read.handshake.clear();
                        Err(RecordError::Structure(reason))
                    }
                }
            }
            _ => handshake::parse_plaintext(record).map_err(RecordError::Structure),
        }
    }

    /// Track the handshake: randoms, suite, key derivation and cipher
    /// activation.
    fn observe(&mut self, message: &Message, frame: u64) -> Result<(), FlowError> {
        match message {
            Message::ClientHello { random } => {
                tracing::debug!(frame, fingerprint = %encode_hex(random), "ClientHello");
                self.client_random = Some(*random);
                if let Some(crypto) = self.crypto.as_mut() {
                    crypto.mark_client();
                }
            }
            Message::ServerHello { random, cipher } => {
                tracing::debug!(frame, cipher = format!("{:#06x}", cipher.0), "ServerHello");
                self.server_random = Some(*random);
                self.cipher = Some(*cipher);
            }
            Message::SessionTicket => self.derive_keys(frame)?,
            Message::ChangeCipherSpec => {
                self.derive_keys(frame)?;
                if let Some(crypto) = self.crypto.as_mut() {
                    crypto.read.active = true;
                }
            }
            Message::ApplicationData(_) | Message::Other { .. } => {}
        }
        Ok(())
    }

    /// Derive traffic keys for both directions, once per flow.
    fn derive_keys(&mut self, frame: u64) -> Result<(), FlowError> {
        let Some(crypto) = self.crypto.as_mut() else {
            return Ok(());
        };
        if crypto.has_keys() {
            return Ok(());
        }

        let handshake_error = |reason: &str| FlowError::Decrypt {
            frame,
            reason: reason.to_string(),
        };
        let client_random = self
            .client_random
            .ok_or_else(|| handshake_error("handshake finished without a ClientHello"))?;
        let server_random = self
            .server_random
            .ok_or_else(|| handshake_error("handshake finished without a ServerHello"))?;
        let cipher = self
            .cipher
            .ok_or_else(|| handshake_error("no cipher suite negotiated"))?;
        let suite = handshake::suite_params(cipher).ok_or_else(|| FlowError::Decrypt {
            frame,
            reason: format!("unsupported cipher suite {:#06x}", cipher.0),
        })?;

        let (client, server) = decrypt::derive_tls12_keys(
            &self.master_secret,
            &client_random,
            &server_random,
            &suite,
        )
        .map_err(|e| FlowError::Decrypt {
            frame,
            reason: e.to_string(),
        })?;
        crypto.install_keys(client, server);
        tracing::debug!(frame, "derived traffic keys");
        Ok(())
    }
}

impl Iterator for Decrypted {
    type Item = Result<TlsPacket, FlowError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        let packet = self.next_packet()?;
        let result = self.process(packet);
        if result.is_err() {
            self.finished = true;
        }
        Some(result)
    }
}
