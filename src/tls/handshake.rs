use ring::aead;
use ring::hmac;
use tls_parser::*;

use super::record::RawRecord;

/// One message recovered from a TLS record, plaintext or decrypted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    ClientHello { random: [u8; 32] },
    ServerHello {
        random: [u8; 32],
        cipher: TlsCipherSuiteID,
    },
    SessionTicket,
    ChangeCipherSpec,
    ApplicationData(Vec<u8>),
    /// Anything else (certificates, alerts, encrypted Finished, ...).
    Other { content_type: u8 },
}

/// Content type of handshake records.
pub(crate) const HANDSHAKE_RECORD: u8 = 0x16;
const HANDSHAKE_HEADER_LEN: usize = 4;

/// Parse a complete record that travelled in the clear.
pub(crate) fn parse_plaintext(record: &RawRecord<'_>) -> Result<Vec<Message>, String> {
    let (_, parsed) = parse_tls_plaintext(record.bytes)
        .map_err(|e| format!("unparseable {} record: {:?}", record.content_type, e))?;

    parsed
        .msg
        .iter()
        .map(|msg| to_message(msg, record.content_type))
        .collect()
}

/// Take every complete handshake message off the front of `pending`.
///
/// Handshake messages may be fragmented over several records, so the
/// bytes of one direction accumulate here and a trailing partial message
/// stays buffered until the rest arrives.
pub(crate) fn drain_handshake(pending: &mut Vec<u8>) -> Result<Vec<Message>, String> {
    let mut messages = Vec::new();
    let mut consumed = 0;
    while let Some(header) = pending.get(consumed..consumed + HANDSHAKE_HEADER_LEN) {
        let len = u32::from_be_bytes([0, header[1], header[2], header[3]]) as usize;
        let end = consumed + HANDSHAKE_HEADER_LEN + len;
        if pending.len() < end {
            break;
        }
        let (_, parsed) = parse_tls_message_handshake(&pending[consumed..end])
            .map_err(|e| format!("unparseable handshake message {}: {:?}", header[0], e))?;
        messages.push(to_message(&parsed, HANDSHAKE_RECORD)?);
        consumed = end;
    }
    pending.drain(..consumed);
    Ok(messages)
}

fn to_message(msg: &TlsMessage<'_>, content_type: u8) -> Result<Message, String> {
    match msg {
        TlsMessage::Handshake(TlsMessageHandshake::ClientHello(ch)) => Ok(Message::ClientHello {
            random: to_random(ch.random)?,
        }),
        TlsMessage::Handshake(TlsMessageHandshake::ServerHello(sh)) => Ok(Message::ServerHello {
            random: to_random(sh.random)?,
            cipher: sh.cipher,
        }),
        TlsMessage::Handshake(TlsMessageHandshake::NewSessionTicket(_)) => {
            Ok(Message::SessionTicket)
        }
        TlsMessage::ChangeCipherSpec => Ok(Message::ChangeCipherSpec),
        TlsMessage::ApplicationData(data) => Ok(Message::ApplicationData(data.blob.to_vec())),
        _ => Ok(Message::Other { content_type }),
    }
}

fn to_random(bytes: &[u8]) -> Result<[u8; 32], String> {
    bytes
        .try_into()
        .map_err(|_| format!("hello random is {} bytes, expected 32", bytes.len()))
}

/// Algorithms and lengths of a TLS 1.2 AEAD cipher suite.
#[derive(Debug, Clone, Copy)]
pub struct SuiteParams {
    pub aead: &'static aead::Algorithm,
    pub prf: hmac::Algorithm,
    pub key_len: usize,
    /// 4 for AES-GCM (the explicit nonce travels in the record), 12 for ChaCha20.
    pub fixed_iv_len: usize,
}

/// Map a negotiated cipher suite to its decryption parameters.
pub fn suite_params(cipher: TlsCipherSuiteID) -> Option<SuiteParams> {
    let aes128 = SuiteParams {
        aead: &aead::AES_128_GCM,
        prf: hmac::HMAC_SHA256,
        key_len: 16,
        fixed_iv_len: 4,
    };
    let aes256 = SuiteParams {
        aead: &aead::AES_256_GCM,
        prf: hmac::HMAC_SHA384,
        key_len: 32,
        fixed_iv_len: 4,
    };
    let chacha = SuiteParams {
        aead: &aead::CHACHA20_POLY1305,
        prf: hmac::HMAC_SHA256,
        key_len: 32,
        fixed_iv_len: 12,
    };

    match cipher.0 {
        0x009C => Some(aes128), // TLS_RSA_WITH_AES_128_GCM_SHA256
        0x009D => Some(aes256), // TLS_RSA_WITH_AES_256_GCM_SHA384
        0xC02F => Some(aes128), // TLS_ECDHE_RSA_WITH_AES_128_GCM_SHA256
        0xC030 => Some(aes256), // TLS_ECDHE_RSA_WITH_AES_256_GCM_SHA384
        0xC02B => Some(aes128), // TLS_ECDHE_ECDSA_WITH_AES_128_GCM_SHA256
        0xC02C => Some(aes256), // TLS_ECDHE_ECDSA_WITH_AES_256_GCM_SHA384
        0xCCA8 => Some(chacha), // TLS_ECDHE_RSA_WITH_CHACHA20_POLY1305_SHA256
        0xCCA9 => Some(chacha), // TLS_ECDHE_ECDSA_WITH_CHACHA20_POLY1305_SHA256
        _ => None,
    }
}

/// Find the client random of the first ClientHello among the first
/// `limit` packets, as a lowercase hex fingerprint.
pub fn find_client_random(packets: &[crate::capture::Packet], limit: usize) -> Option<String> {
    packets
        .iter()
        .take(limit)
        .filter(|p| !p.payload.is_empty())
        .find_map(|p| {
            let (_, parsed) = parse_tls_plaintext(&p.payload).ok()?;
            parsed.msg.iter().find_map(|msg| match msg {
                TlsMessage::Handshake(TlsMessageHandshake::ClientHello(ch)) => {
                    Some(super::keylog::encode_hex(ch.random))
                }
                _ => None,
            })
        })
}
