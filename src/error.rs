//! Error types for rdpcarve.
//!
//! Errors are split by blast radius: classification and configuration
//! errors stop the whole run, flow errors abandon a single flow, and
//! finalization errors only produce a warning.

use thiserror::Error;

use crate::flow::FlowKey;

/// The capture cannot be partitioned into flows.
#[derive(Error, Debug)]
#[error("Invalid stream type in frame {frame}: must be TCP/TLS or an exported PDU")]
pub struct ClassificationError {
    pub frame: u64,
}

/// Problems with the command line or its files, reported before any work.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Unknown file extension '{extension}' (supported: .cap, .pcap, .pcapng, .rdpreplay)")]
    UnsupportedInput { extension: String },

    #[error("Invalid output path: {path}")]
    InvalidOutput { path: String },
}

/// Errors that abandon the conversion of one flow.
#[derive(Error, Debug)]
pub enum FlowError {
    #[error("no master secret for client random {fingerprint}")]
    MissingSecret { fingerprint: String },

    #[error("malformed TLS record in frame {frame}: {reason}")]
    Malformed { frame: u64, reason: String },

    #[error("capture ended inside a TLS record ({outstanding} bytes missing)")]
    Truncated { outstanding: usize },

    #[error("decryption failed in frame {frame}: {reason}")]
    Decrypt { frame: u64, reason: String },

    #[error("recording I/O error: {0}")]
    Recording(#[from] std::io::Error),
}

/// Raised when the connection close cannot be recorded cleanly. The partial
/// recording is kept.
#[derive(Error, Debug)]
pub enum FinalizeError {
    #[error("unclean close: {pending} bytes of an incomplete {direction} PDU buffered")]
    Incomplete {
        direction: &'static str,
        pending: usize,
    },

    #[error("could not record the connection close: {0}")]
    Io(#[from] std::io::Error),
}

/// A flow failure together with the endpoints it happened on.
#[derive(Error, Debug)]
#[error("{key}: {source}")]
pub struct FlowFailure {
    pub key: FlowKey,
    #[source]
    pub source: FlowError,
}
