use anyhow::{Context, Result};
use std::collections::HashMap;
use std::path::Path;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Key-log marker for a master secret keyed by client random.
const CLIENT_RANDOM: &str = "CLIENT_RANDOM";

/// One `CLIENT_RANDOM` line of an SSLKEYLOGFILE.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SecretEntry {
    pub client_random: Vec<u8>,
    pub master_secret: Vec<u8>,
}

impl std::fmt::Debug for SecretEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecretEntry")
            .field("client_random", &encode_hex(&self.client_random))
            .field("master_secret", &"<redacted>")
            .finish()
    }
}

/// Master secrets extracted from an SSLKEYLOGFILE, keyed by the client
/// random exactly as it was written in the file.
#[derive(Default, Debug)]
pub struct SecretStore {
    entries: HashMap<String, SecretEntry>,
}

impl SecretStore {
    /// Maximum keylog file size (50 MB) to prevent excessive memory allocation.
    const MAX_KEYLOG_SIZE: u64 = 50 * 1024 * 1024;

    pub fn from_file(path: &Path) -> Result<Self> {
        let meta = std::fs::metadata(path)
            .context(format!("Failed to stat keylog: {}", path.display()))?;
        if meta.len() > Self::MAX_KEYLOG_SIZE {
            anyhow::bail!(
                "Keylog file too large ({} bytes, max {}): {}",
                meta.len(),
                Self::MAX_KEYLOG_SIZE,
                path.display()
            );
        }
        let contents = std::fs::read_to_string(path)
            .context(format!("Failed to read keylog: {}", path.display()))?;
        let store = Self::parse(&contents);
        tracing::info!(entries = store.len(), "loaded key log {}", path.display());
        Ok(store)
    }

    /// Parse key-log text. Lines that are not exactly
    /// `CLIENT_RANDOM <hex> <hex>` are skipped without error.
    pub fn parse(contents: &str) -> Self {
        let mut store = SecretStore::default();

        for line in contents.lines() {
            let parts: Vec<&str> = line.split_whitespace().collect();
            let [label, fingerprint, secret] = parts[..] else {
                continue;
            };
            if label != CLIENT_RANDOM {
                continue;
            }
            let (Some(client_random), Some(master_secret)) =
                (decode_hex(fingerprint), decode_hex(secret))
            else {
                continue;
            };

            store.entries.insert(
                fingerprint.to_string(),
                SecretEntry {
                    client_random,
                    master_secret,
                },
            );
        }

        store
    }

    pub fn get(&self, fingerprint: &str) -> Option<&SecretEntry> {
        self.entries.get(fingerprint)
    }

    pub fn contains(&self, fingerprint: &str) -> bool {
        self.entries.contains_key(fingerprint)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn decode_hex(s: &str) -> Option<Vec<u8>> {
    if !s.len().is_multiple_of(2) || !s.is_ascii() {
        return None;
    }
    (0..s.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&s[i..i + 2], 16).ok())
        .collect()
}

/// Lowercase hex, the form NSS key logs use for client randoms.
pub(crate) fn encode_hex(bytes: &[u8]) -> String {
    use std::fmt::Write;
    bytes.iter().fold(String::with_capacity(bytes.len() * 2), |mut s, b| {
        let _ = write!(s, "{:02x}", b);
        s
    })
}
