use bytestring::ByteString;
use kappa_rpc_protocol::PeerIdentity;
use kappa_rpc_types::{MessageId, PeerId};

/// Handed to an executor for the one request it is running.
#[derive(Debug, Clone)]
pub struct Context {
    request_id: MessageId,
    method: ByteString,
    identity: PeerIdentity,
}

impl Context {
    pub(crate) fn new(request_id: MessageId, method: ByteString, identity: PeerIdentity) -> Self {
        Self {
            request_id,
            method,
            identity,
        }
    }

    pub fn request_id(&self) -> MessageId {
        self.request_id
    }

    /// The peer that logged the request.
    pub fn caller(&self) -> PeerId {
        self.request_id.author
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    /// The executing peer.
    pub fn peer_id(&self) -> PeerId {
        self.identity.peer_id()
    }

    pub fn sign(&self, data: &[u8]) -> [u8; 64] {
        self.identity.sign(data)
    }

    pub fn sign_hex(&self, data: &[u8]) -> String {
        self.identity.sign_hex(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kappa_rpc_protocol::verify_signature;

    #[test]
    fn signs_as_executing_peer() {
        let identity = PeerIdentity::generate();
        let caller = PeerIdentity::generate().peer_id();
        let ctx = Context::new(MessageId::new(caller, 4), "createReplicate".into(), identity.clone());

        assert_eq!(ctx.caller(), caller);
        assert_eq!(ctx.peer_id(), identity.peer_id());
        assert_eq!(ctx.method(), "createReplicate");
        assert!(verify_signature(&ctx.peer_id(), b"payload", &ctx.sign(b"payload")));
    }
}
