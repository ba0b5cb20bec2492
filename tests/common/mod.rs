//! Capture and TLS builders shared by the integration tests.
#![allow(dead_code)]

use std::path::Path;

use etherparse::PacketBuilder;
use ring::aead::{Aad, LessSafeKey, Nonce, UnboundKey};
use rdpcarve::tls::decrypt::key_block;
use rdpcarve::tls::handshake::suite_params;
use tls_parser::TlsCipherSuiteID;

pub const LINKTYPE_ETHERNET: u32 = 1;
pub const LINKTYPE_WIRESHARK_UPPER_PDU: u32 = 252;

/// Write a pcap file with the given link type and `(frame, ts_sec, ts_usec)` records.
pub fn write_pcap(path: &Path, network: u32, frames: &[(Vec<u8>, u32, u32)]) {
    let mut out = Vec::new();
    out.extend_from_slice(&0xa1b2c3d4u32.to_le_bytes()); // magic
    out.extend_from_slice(&2u16.to_le_bytes()); // major version
    out.extend_from_slice(&4u16.to_le_bytes()); // minor version
    out.extend_from_slice(&0i32.to_le_bytes()); // thiszone
    out.extend_from_slice(&0u32.to_le_bytes()); // sigfigs
    out.extend_from_slice(&65535u32.to_le_bytes()); // snaplen
    out.extend_from_slice(&network.to_le_bytes());
    for (frame, sec, usec) in frames {
        out.extend_from_slice(&sec.to_le_bytes());
        out.extend_from_slice(&usec.to_le_bytes());
        out.extend_from_slice(&(frame.len() as u32).to_le_bytes());
        out.extend_from_slice(&(frame.len() as u32).to_le_bytes());
        out.extend_from_slice(frame);
    }
    std::fs::write(path, &out).unwrap();
}

pub fn tcp_frame(src: ([u8; 4], u16), dst: ([u8; 4], u16), payload: &[u8]) -> Vec<u8> {
    let builder = PacketBuilder::ethernet2([0; 6], [0; 6])
        .ipv4(src.0, dst.0, 64)
        .tcp(src.1, dst.1, 1, 65535)
        .ack(1)
        .psh();
    let mut buf = Vec::new();
    builder.write(&mut buf, payload).unwrap();
    buf
}

/// Exported PDU record: addresses at 12..16 and 20..24, data from byte 60.
pub fn exported_pdu(src: [u8; 4], dst: [u8; 4], data: &[u8]) -> Vec<u8> {
    let mut record = vec![0u8; 60];
    record[12..16].copy_from_slice(&src);
    record[20..24].copy_from_slice(&dst);
    record.extend_from_slice(data);
    record
}

pub fn record(content_type: u8, body: &[u8]) -> Vec<u8> {
    let mut r = vec![content_type, 0x03, 0x03];
    r.extend_from_slice(&(body.len() as u16).to_be_bytes());
    r.extend_from_slice(body);
    r
}

fn handshake(msg_type: u8, body: &[u8]) -> Vec<u8> {
    let mut msg = vec![msg_type];
    msg.extend_from_slice(&(body.len() as u32).to_be_bytes()[1..]);
    msg.extend_from_slice(body);
    record(0x16, &msg)
}

pub fn client_hello(random: &[u8; 32]) -> Vec<u8> {
    let mut body = vec![0x03, 0x03];
    body.extend_from_slice(random);
    body.push(0);
    body.extend_from_slice(&[0x00, 0x02, 0xC0, 0x2F]);
    body.extend_from_slice(&[0x01, 0x00]);
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
    let mut body = 300u32.to_be_bytes().to_vec();
    body.extend_from_slice(&2u16.to_be_bytes());
    body.extend_from_slice(b"tk");
    handshake(0x04, &body)
}

pub fn change_cipher_spec() -> Vec<u8> {
    record(0x14, &[0x01])
}

/// AES-GCM record sealing for both ends of a TLS 1.2 session.
pub struct Sealer {
    keys: [LessSafeKey; 2],
    salts: [[u8; 4]; 2],
    seqs: [u64; 2],
}

impl Sealer {
    pub fn new(
        master: &[u8],
        client_random: &[u8; 32],
        server_random: &[u8; 32],
        cipher: u16,
    ) -> Self {
        let suite = suite_params(TlsCipherSuiteID(cipher)).unwrap();
        let kb = key_block(master, client_random, server_random, &suite);
        let k = suite.key_len;
        let key = |at: usize| {
            LessSafeKey::new(UnboundKey::new(suite.aead, &kb[at..at + k]).unwrap())
        };
        let salt = |at: usize| -> [u8; 4] { kb[at..at + 4].try_into().unwrap() };
        Sealer {
            keys: [key(0), key(k)],
            salts: [salt(2 * k), salt(2 * k + 4)],
            seqs: [0, 0],
        }
    }

    pub fn seal(&mut self, from_client: bool, content_type: u8, plaintext: &[u8]) -> Vec<u8> {
        let side = if from_client { 0 } else { 1 };
        let seq = self.seqs[side];
        self.seqs[side] += 1;

        let mut nonce = [0u8; 12];
        nonce[..4].copy_from_slice(&self.salts[side]);
        nonce[4..].copy_from_slice(&seq.to_be_bytes());
        let mut aad = seq.to_be_bytes().to_vec();
        aad.extend_from_slice(&[content_type, 0x03, 0x03]);
        aad.extend_from_slice(&(plaintext.len() as u16).to_be_bytes());

        let mut ct = plaintext.to_vec();
        self.keys[side]
            .seal_in_place_append_tag(Nonce::assume_unique_for_key(nonce), Aad::from(aad), &mut ct)
            .unwrap();
        let mut body = seq.to_be_bytes().to_vec();
        body.extend_from_slice(&ct);
        record(content_type, &body)
    }
}

/// One scripted RDP-over-TLS connection.
pub struct Session {
    pub client: ([u8; 4], u16),
    pub server: ([u8; 4], u16),
    pub client_random: [u8; 32],
    pub server_random: [u8; 32],
    pub master: [u8; 48],
}

impl Session {
    pub fn keylog_line(&self) -> String {
        format!(
            "CLIENT_RANDOM {} {}\n",
            hex(&self.client_random),
            hex(&self.master)
        )
    }

    /// Payloads of the connection, `true` when sent by the client. Includes
    /// the X.224 negotiation, a full handshake and two RDP PDUs, the
    /// client's split over two segments.
    pub fn payloads(&self) -> Vec<(bool, Vec<u8>)> {
        let mut sealer =
            Sealer::new(&self.master, &self.client_random, &self.server_random, 0xC02F);
        let finished = [0x14, 0, 0, 12, 0, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11];

        let mut client_finish = change_cipher_spec();
        client_finish.extend(sealer.seal(true, 0x16, &finished));
        let mut server_finish = session_ticket();
        server_finish.extend(change_cipher_spec());
        server_finish.extend(sealer.seal(false, 0x16, &finished));

        let client_pdu = sealer.seal(true, 0x17, &client_pdu());
        let server_pdu = sealer.seal(false, 0x17, &server_pdu());
        let (head, tail) = client_pdu.split_at(20);

        vec![
            (true, vec![0x03, 0x00, 0x00, 0x0b, 0x06, 0xe0, 0, 0, 0, 0, 0]),
            (false, vec![0x03, 0x00, 0x00, 0x0b, 0x06, 0xd0, 0, 0, 0, 0, 0]),
            (true, client_hello(&self.client_random)),
            (false, server_hello(&self.server_random, 0xC02F)),
            (true, client_finish),
            (false, server_finish),
            (true, head.to_vec()),
            (true, tail.to_vec()),
            (false, server_pdu),
        ]
    }

    /// Ethernet frames of the connection, one second apart from `start`.
    pub fn frames(&self, start: u32) -> Vec<(Vec<u8>, u32, u32)> {
        self.payloads()
            .into_iter()
            .enumerate()
            .map(|(i, (from_client, payload))| {
                let frame = if from_client {
                    tcp_frame(self.client, self.server, &payload)
                } else {
                    tcp_frame(self.server, self.client, &payload)
                };
                (frame, start + i as u32, 0)
            })
            .collect()
    }
}

/// Slow-path PDU sent by the client.
pub fn client_pdu() -> Vec<u8> {
    let mut pdu = vec![0x03, 0x00, 0x00, 0x40];
    pdu.extend((0..60u8).map(|b| b.wrapping_mul(7)));
    pdu
}

/// Fast-path PDU sent by the server.
pub fn server_pdu() -> Vec<u8> {
    vec![0x00, 0x06, 0xde, 0xad, 0xbe, 0xef]
}

pub fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}
