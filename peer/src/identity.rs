//! Peer identity derived from a session keypair.
//!
//! Each process generates an ed25519 keypair at startup; the peer id is the
//! first six hex characters of the public key, the same truncated
//! fingerprint every other peer derives for us from the connection
//! handshake. No central allocation, stable for the session's lifetime.

use ed25519_dalek::SigningKey;
use protocol::PeerId;
use rand::rngs::OsRng;

/// Number of hex characters kept from the public-key fingerprint.
pub const ID_LEN: usize = 6;

/// This process's session identity.
#[derive(Debug, Clone)]
pub struct Identity {
    id: PeerId,
    public_key_hex: String,
}

impl Identity {
    /// Generates a fresh keypair. The secret half is only needed at
    /// generation time; signing is not part of the protocol.
    pub fn generate() -> Self {
        let signing_key = SigningKey::generate(&mut OsRng);
        let public_key_hex = hex::encode(signing_key.verifying_key().as_bytes());
        let id = peer_id_from_key_hex(&public_key_hex);
        Self { id, public_key_hex }
    }

    /// The local peer id, computed once and stable for the session.
    pub fn id(&self) -> &PeerId {
        &self.id
    }

    /// Full public key, exchanged during the connection handshake so the
    /// remote side can derive our id.
    pub fn public_key_hex(&self) -> &str {
        &self.public_key_hex
    }
}

/// Derives a peer id from a hex-encoded public key.
pub fn peer_id_from_key_hex(key_hex: &str) -> PeerId {
    PeerId::new(&key_hex[..ID_LEN.min(key_hex.len())])
}

/// Turn order: every open connection's peer id in acceptance order, local
/// id last. Arbitrary but deterministic, and identical on a peer across
/// calls as long as the connection set is unchanged.
pub fn roster_from_connections(connected: &[PeerId], local: &PeerId) -> Vec<PeerId> {
    let mut roster: Vec<PeerId> = connected.to_vec();
    roster.push(local.clone());
    roster
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_id_is_key_prefix() {
        let identity = Identity::generate();
        assert_eq!(identity.id().as_str().len(), ID_LEN);
        assert!(identity.public_key_hex().starts_with(identity.id().as_str()));
        // 32-byte ed25519 public key.
        assert_eq!(identity.public_key_hex().len(), 64);
    }

    #[test]
    fn test_identities_are_distinct() {
        let a = Identity::generate();
        let b = Identity::generate();
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn test_derivation_is_deterministic() {
        let key = "deadbeefdeadbeefdeadbeefdeadbeefdeadbeefdeadbeefdeadbeefdeadbeef";
        assert_eq!(peer_id_from_key_hex(key), peer_id_from_key_hex(key));
        assert_eq!(peer_id_from_key_hex(key).as_str(), "deadbe");
    }

    #[test]
    fn test_roster_order_local_last() {
        let local = PeerId::new("cccccc");
        let connected = vec![PeerId::new("aaaaaa"), PeerId::new("bbbbbb")];
        let roster = roster_from_connections(&connected, &local);
        assert_eq!(
            roster,
            vec![
                PeerId::new("aaaaaa"),
                PeerId::new("bbbbbb"),
                PeerId::new("cccccc"),
            ]
        );
    }
}
