//! KappaRPC wire codec
//!
//! Byte-level encoding of [`kappa_rpc_types::Message`]: a versioned protobuf
//! envelope around the message body, optionally signed by the author's
//! ed25519 key.

mod codec;
mod identity;
pub mod wire;

pub use codec::{CodecError, Decoder, Encoder, PROTOCOL_VERSION};
pub use identity::{verify_signature, PeerIdentity};
