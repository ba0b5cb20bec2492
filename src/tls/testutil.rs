//! Builders for synthetic TLS 1.2 conversations used by unit tests.

use std::net::SocketAddr;
use std::time::{Duration, UNIX_EPOCH};

use ring::aead::{Aad, LessSafeKey, Nonce, UnboundKey};
use tls_parser::TlsCipherSuiteID;

use super::decrypt::key_block;
use super::handshake::suite_params;
use crate::capture::{LinkType, NetInfo, Packet};

pub const CLIENT: &str = "10.0.0.1:50000";
pub const SERVER: &str = "10.0.0.2:3389";

pub fn record(content_type: u8, body: &[u8]) -> Vec<u8> {
    let mut r = vec![content_type, 0x03, 0x03];
    r.extend_from_slice(&(body.len() as u16).to_be_bytes());
    r.extend_from_slice(body);
    r
}

fn handshake(msg_type: u8, body: &[u8]) -> Vec<u8> {
    let len = body.len() as u32;
    let mut msg = vec![msg_type];
    msg.extend_from_slice(&len.to_be_bytes()[1..]);
    msg.extend_from_slice(body);
    record(0x16, &msg)
}

pub fn client_hello(random: &[u8; 32]) -> Vec<u8> {
    let mut body = vec![0x03, 0x03];
    body.extend_from_slice(random);
    body.push(0); // session id
    body.extend_from_slice(&[0x00, 0x04, 0xC0, 0x2F, 0xC0, 0x30]);
    body.extend_from_slice(&[0x01, 0x00]); // null compression
    handshake(0x01, &body)
}

pub fn server_hello(random: &[u8; 32], cipher: u16) -> Vec<u8> {
    let mut body = vec![0x03, 0x03];
    body.extend_from_slice(random);
    body.push(0);
    body.extend_from_slice(&cipher.to_be_bytes());
    body.push(0);
    handshake(0x02, &body)
}

pub fn session_ticket() -> Vec<u8> {
    let mut body = 7200u32.to_be_bytes().to_vec();
    body.extend_from_slice(&4u16.to_be_bytes());
    body.extend_from_slice(b"tick");
    handshake(0x04, &body)
}

pub fn change_cipher_spec() -> Vec<u8> {
    record(0x14, &[0x01])
}

/// Seals records the way a real client and server would.
pub struct Sealer {
    client: (LessSafeKey, [u8; 4], u64),
    server: (LessSafeKey, [u8; 4], u64),
}

impl Sealer {
    pub fn new(
        master_secret: &[u8],
        client_random: &[u8; 32],
        server_random: &[u8; 32],
        cipher: u16,
    ) -> Self {
        let suite = suite_params(TlsCipherSuiteID(cipher)).unwrap();
        assert_eq!(suite.fixed_iv_len, 4, "only AES-GCM is sealed in tests");
        let kb = key_block(master_secret, client_random, server_random, &suite);
        let k = suite.key_len;
        let key = |range: std::ops::Range<usize>| {
            LessSafeKey::new(UnboundKey::new(suite.aead, &kb[range]).unwrap())
        };
        let salt = |at: usize| -> [u8; 4] { kb[at..at + 4].try_into().unwrap() };
        Sealer {
            client: (key(0..k), salt(2 * k), 0),
            server: (key(k..2 * k), salt(2 * k + 4), 0),
        }
    }

    pub fn seal(&mut self, from_client: bool, content_type: u8, plaintext: &[u8]) -> Vec<u8> {
        let (key, salt, seq) = if from_client {
            &mut self.client
        } else {
            &mut self.server
        };
        let explicit = seq.to_be_bytes();
        let mut nonce = [0u8; 12];
        nonce[..4].copy_from_slice(salt);
        nonce[4..].copy_from_slice(&explicit);

        let mut aad = seq.to_be_bytes().to_vec();
        aad.push(content_type);
        aad.extend_from_slice(&[0x03, 0x03]);
        aad.extend_from_slice(&(plaintext.len() as u16).to_be_bytes());

        let mut ct = plaintext.to_vec();
        key.seal_in_place_append_tag(Nonce::assume_unique_for_key(nonce), Aad::from(aad), &mut ct)
            .unwrap();
        *seq += 1;

        let mut body = explicit.to_vec();
        body.extend_from_slice(&ct);
        record(content_type, &body)
    }
}

/// Build TCP packets between [`CLIENT`] and [`SERVER`], one second apart.
pub fn packets(specs: &[(bool, Vec<u8>)]) -> Vec<Packet> {
    let client: SocketAddr = CLIENT.parse().unwrap();
    let server: SocketAddr = SERVER.parse().unwrap();
    specs
        .iter()
        .enumerate()
        .map(|(i, (from_client, payload))| {
            let (src, dst) = if *from_client {
                (client, server)
            } else {
                (server, client)
            };
            Packet {
                index: i as u64 + 1,
                timestamp: UNIX_EPOCH + Duration::from_secs(1_700_000_000 + i as u64),
                link: LinkType::Ethernet,
                net: Some(NetInfo { src, dst }),
                payload: payload.clone(),
            }
        })
        .collect()
}
