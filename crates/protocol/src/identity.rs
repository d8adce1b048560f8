use ed25519_dalek::{Signature, Signer, SigningKey, VerifyingKey};
use kappa_rpc_types::PeerId;
use rand::rngs::OsRng;

/// Signing key of the local peer. Its verifying key is the [`PeerId`].
#[derive(Clone)]
pub struct PeerIdentity {
    key: SigningKey,
}

impl PeerIdentity {
    pub fn generate() -> Self {
        Self {
            key: SigningKey::generate(&mut OsRng),
        }
    }

    pub fn from_secret_bytes(secret: [u8; 32]) -> Self {
        Self {
            key: SigningKey::from_bytes(&secret),
        }
    }

    pub fn secret_bytes(&self) -> [u8; 32] {
        self.key.to_bytes()
    }

    pub fn peer_id(&self) -> PeerId {
        PeerId::from_bytes(self.key.verifying_key().to_bytes())
    }

    pub fn sign(&self, data: &[u8]) -> [u8; 64] {
        self.key.sign(data).to_bytes()
    }

    pub fn sign_hex(&self, data: &[u8]) -> String {
        hex::encode(self.sign(data))
    }
}

impl std::fmt::Debug for PeerIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeerIdentity").field("peer", &self.peer_id()).finish()
    }
}

/// Checks an ed25519 `signature` over `data` against the key of `author`.
pub fn verify_signature(author: &PeerId, data: &[u8], signature: &[u8]) -> bool {
    let Ok(key) = VerifyingKey::from_bytes(author.as_bytes()) else {
        return false;
    };
    let Ok(signature) = Signature::from_slice(signature) else {
        return false;
    };
    key.verify_strict(data, &signature).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signature_verifies_against_peer_id() {
        let identity = PeerIdentity::generate();
        let signature = identity.sign(b"hello");
        assert!(verify_signature(&identity.peer_id(), b"hello", &signature));
        assert!(!verify_signature(&identity.peer_id(), b"hullo", &signature));
        assert!(!verify_signature(&PeerIdentity::generate().peer_id(), b"hello", &signature));
    }

    #[test]
    fn identity_is_restorable_from_secret() {
        let identity = PeerIdentity::generate();
        let restored = PeerIdentity::from_secret_bytes(identity.secret_bytes());
        assert_eq!(identity.peer_id(), restored.peer_id());
        assert_eq!(identity.sign_hex(b"x").len(), 128);
    }
}
