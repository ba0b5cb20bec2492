//! Per-flow crypto context seen from a passive observer.

use std::net::SocketAddr;

use super::decrypt::DirectionKeys;

/// Decryption state for the traffic of one endpoint.
#[derive(Default)]
pub struct CipherState {
    pub keys: Option<DirectionKeys>,
    /// Set once the endpoint sent ChangeCipherSpec.
    pub active: bool,
    /// Plaintext handshake bytes not yet forming a whole message.
    pub handshake: Vec<u8>,
}

/// Read and write sides of a TLS session, oriented toward the endpoint
/// currently sending. `read` always holds the state for traffic coming
/// from `sender`; [`CryptoState::mirror`] flips the orientation.
pub struct CryptoState {
    /// TLS client: the initiator until a ClientHello names it.
    client: SocketAddr,
    sender: SocketAddr,
    peer: SocketAddr,
    pub read: CipherState,
    pub write: CipherState,
}

impl CryptoState {
    /// Context for a flow whose first payload came from `initiator`.
    /// Observing as the server, the read side is the initiator's traffic.
    pub fn new(initiator: SocketAddr, peer: SocketAddr) -> Self {
        CryptoState {
            client: initiator,
            sender: initiator,
            peer,
            read: CipherState::default(),
            write: CipherState::default(),
        }
    }

    pub fn expected_sender(&self) -> SocketAddr {
        self.sender
    }

    #[cfg(test)]
    pub(crate) fn client(&self) -> SocketAddr {
        self.client
    }

    /// The current sender sent the ClientHello.
    pub fn mark_client(&mut self) {
        self.client = self.sender;
    }

    /// Swap roles and sides. Consumes the context so no stale copy of the
    /// pre-mirror orientation can remain in use.
    #[must_use]
    pub fn mirror(self) -> Self {
        CryptoState {
            client: self.client,
            sender: self.peer,
            peer: self.sender,
            read: self.write,
            write: self.read,
        }
    }

    /// Install freshly derived keys on the matching sides.
    pub fn install_keys(&mut self, client: DirectionKeys, server: DirectionKeys) {
        if self.sender == self.client {
            self.read.keys = Some(client);
            self.write.keys = Some(server);
        } else {
            self.read.keys = Some(server);
            self.write.keys = Some(client);
        }
    }

    pub fn has_keys(&self) -> bool {
        self.read.keys.is_some() && self.write.keys.is_some()
    }
}
