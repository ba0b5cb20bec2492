use anyhow::Result;
use ring::aead::{self, LessSafeKey, UnboundKey};
use ring::hmac;
use zeroize::Zeroize;

use super::handshake::SuiteParams;

/// AEAD authentication tag length for every supported suite.
const TAG_LEN: usize = 16;
/// Length of the explicit per-record nonce carried by TLS 1.2 AES-GCM.
const EXPLICIT_NONCE_LEN: usize = 8;

/// Traffic keys for one direction of a TLS 1.2 connection.
///
/// The IV is zeroized on drop. `LessSafeKey` keeps its own copy of the key
/// and cannot be wiped from here.
pub struct DirectionKeys {
    key: LessSafeKey,
    iv: [u8; 12],
    /// 4 for AES-GCM (implicit salt), 12 for ChaCha20-Poly1305.
    fixed_iv_len: usize,
    seq: u64,
}

impl DirectionKeys {
    pub fn new(
        key_bytes: &[u8],
        iv_bytes: &[u8; 12],
        fixed_iv_len: usize,
        algo: &'static aead::Algorithm,
    ) -> Result<Self> {
        let unbound =
            UnboundKey::new(algo, key_bytes).map_err(|_| anyhow::anyhow!("Invalid key"))?;
        Ok(DirectionKeys {
            key: LessSafeKey::new(unbound),
            iv: *iv_bytes,
            fixed_iv_len,
            seq: 0,
        })
    }

    #[cfg(test)]
    pub(crate) fn seq_num(&self) -> u64 {
        self.seq
    }

    /// Decrypt the body of one protected TLS 1.2 record.
    ///
    /// AAD is seq(8) + type(1) + version(2) + plaintext_length(2). The
    /// sequence number only advances when the record authenticates.
    pub fn open_record(&mut self, content_type: u8, version: u16, body: &[u8]) -> Result<Vec<u8>> {
        if self.seq == u64::MAX {
            return Err(anyhow::anyhow!("TLS sequence number overflow"));
        }

        let (nonce, mut ciphertext) = if self.fixed_iv_len == 4 {
            // AES-GCM: explicit nonce, then ciphertext + tag
            if body.len() < EXPLICIT_NONCE_LEN + TAG_LEN {
                return Err(anyhow::anyhow!("record too short for AES-GCM"));
            }
            let mut nonce = [0u8; 12];
            nonce[..4].copy_from_slice(&self.iv[..4]);
            nonce[4..].copy_from_slice(&body[..EXPLICIT_NONCE_LEN]);
            (nonce, body[EXPLICIT_NONCE_LEN..].to_vec())
        } else {
            // ChaCha20-Poly1305: nonce is the IV XOR the sequence number
            if body.len() < TAG_LEN {
                return Err(anyhow::anyhow!("record too short for ChaCha20-Poly1305"));
            }
            (self.build_nonce(), body.to_vec())
        };

        let plaintext_len = ciphertext.len() - TAG_LEN;
        let mut aad = Vec::with_capacity(13);
        aad.extend_from_slice(&self.seq.to_be_bytes());
        aad.push(content_type);
        aad.extend_from_slice(&version.to_be_bytes());
        aad.extend_from_slice(&(plaintext_len as u16).to_be_bytes());

        let nonce = aead::Nonce::try_assume_unique_for_key(&nonce)
            .map_err(|_| anyhow::anyhow!("Invalid nonce"))?;
        let plaintext = self
            .key
            .open_in_place(nonce, aead::Aad::from(&aad), &mut ciphertext)
            .map_err(|_| anyhow::anyhow!("Decryption failed (wrong master secret?)"))?;

        // Only advance sequence number on successful decryption
        self.seq += 1;

        Ok(plaintext.to_vec())
    }

    #[cfg(test)]
    pub(crate) fn iv(&self) -> [u8; 12] {
        self.iv
    }

    fn build_nonce(&self) -> [u8; 12] {
        let mut nonce = self.iv;
        let seq_bytes = self.seq.to_be_bytes();
        // XOR the sequence number into the last 8 bytes of the IV
        for i in 0..8 {
            nonce[12 - 8 + i] ^= seq_bytes[i];
        }
        nonce
    }
}

impl Drop for DirectionKeys {
    fn drop(&mut self) {
        self.iv.zeroize();
    }
}

/// Derive (client_write, server_write) keys from the master secret and the
/// handshake randoms.
pub fn derive_tls12_keys(
    master_secret: &[u8],
    client_random: &[u8],
    server_random: &[u8],
    suite: &SuiteParams,
) -> Result<(DirectionKeys, DirectionKeys)> {
    let key_len = suite.key_len;
    let iv_len = suite.fixed_iv_len;

    // key_block = PRF(master_secret, "key expansion", server_random + client_random)
    // We need: client_write_key + server_write_key + client_write_iv + server_write_iv
    let mut key_block = key_block(master_secret, client_random, server_random, suite);

    let mut offset = 0;
    let client_write_key = &key_block[offset..offset + key_len];
    offset += key_len;
    let server_write_key = &key_block[offset..offset + key_len];
    offset += key_len;

    let mut client_iv = [0u8; 12];
    let mut server_iv = [0u8; 12];
    client_iv[..iv_len].copy_from_slice(&key_block[offset..offset + iv_len]);
    offset += iv_len;
    server_iv[..iv_len].copy_from_slice(&key_block[offset..offset + iv_len]);

    let result = (
        DirectionKeys::new(client_write_key, &client_iv, iv_len, suite.aead),
        DirectionKeys::new(server_write_key, &server_iv, iv_len, suite.aead),
    );
    key_block.zeroize();
    client_iv.zeroize();
    server_iv.zeroize();
    Ok((result.0?, result.1?))
}

/// Expand the master secret into the full key block for `suite`:
/// client key, server key, client IV, server IV.
pub fn key_block(
    master_secret: &[u8],
    client_random: &[u8],
    server_random: &[u8],
    suite: &SuiteParams,
) -> Vec<u8> {
    let mut seed = Vec::with_capacity(server_random.len() + client_random.len());
    seed.extend_from_slice(server_random);
    seed.extend_from_slice(client_random);
    let needed = 2 * suite.key_len + 2 * suite.fixed_iv_len;
    let block = tls12_prf(master_secret, b"key expansion", &seed, needed, suite.prf);
    seed.zeroize();
    block
}

/// TLS 1.2 PRF (RFC 5246 Section 5).
/// `algo` selects the HMAC: SHA-256 for most suites, SHA-384 for AES-256-GCM.
fn tls12_prf(
    secret: &[u8],
    label: &[u8],
    seed: &[u8],
    out_len: usize,
    algo: hmac::Algorithm,
) -> Vec<u8> {
    let key = hmac::Key::new(algo, secret);
    let mut label_seed = Vec::with_capacity(label.len() + seed.len());
    label_seed.extend_from_slice(label);
    label_seed.extend_from_slice(seed);

    // A(0) = label_seed, A(i) = HMAC(secret, A(i-1))
    let mut a = hmac::sign(&key, &label_seed).as_ref().to_vec();
    let mut result = Vec::with_capacity(out_len);

    while result.len() < out_len {
        let mut input = Vec::with_capacity(a.len() + label_seed.len());
        input.extend_from_slice(&a);
        input.extend_from_slice(&label_seed);
        result.extend_from_slice(hmac::sign(&key, &input).as_ref());
        let new_a = hmac::sign(&key, &a).as_ref().to_vec();
        a.zeroize();
        a = new_a;
        input.zeroize();
    }

    label_seed.zeroize();
    a.zeroize();
    result.truncate(out_len);
    result
}
