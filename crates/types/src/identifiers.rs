use std::{fmt, str::FromStr};

use serde::{de, Deserialize, Deserializer, Serialize, Serializer};

use crate::errors::Error;

/// Position of a message within its author's log.
pub type Sequence = u64;

/// Identity of a peer and of the single log it writes.
///
/// This is the peer's 32-byte ed25519 verifying key, so a signature carried by
/// a message can always be checked against its author.
#[derive(Eq, Hash, PartialEq, PartialOrd, Ord, Clone, Copy, derive_more::From, derive_more::Into)]
pub struct PeerId([u8; 32]);

impl PeerId {
    pub const LEN: usize = 32;

    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self, Error> {
        let bytes: [u8; 32] = bytes
            .try_into()
            .map_err(|_| Error::MalformedMessage(format!("peer id must be 32 bytes, got {}", bytes.len())))?;
        Ok(Self(bytes))
    }

    /// First four bytes in hex, enough to tell peers apart in logs.
    pub fn short(&self) -> String {
        hex::encode(&self.0[..4])
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PeerId({})", self.short())
    }
}

impl FromStr for PeerId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = hex::decode(s).map_err(|e| Error::MalformedMessage(format!("peer id '{s}': {e}")))?;
        Self::from_slice(&bytes)
    }
}

impl Serialize for PeerId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for PeerId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(de::Error::custom)
    }
}

/// Id of a logged message: its author plus a per-author sequence number.
///
/// Authors never reuse a sequence number, so ids are unique across every log
/// of an address without any coordination between peers.
#[derive(Eq, Hash, PartialEq, PartialOrd, Ord, Clone, Copy, Debug)]
pub struct MessageId {
    pub author: PeerId,
    pub seq: Sequence,
}

impl MessageId {
    pub fn new(author: PeerId, seq: Sequence) -> Self {
        Self { author, seq }
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.author, self.seq)
    }
}

impl FromStr for MessageId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (author, seq) = s
            .split_once('/')
            .ok_or_else(|| Error::MalformedMessage(format!("message id '{s}' has no sequence")))?;
        let seq = seq
            .parse()
            .map_err(|e| Error::MalformedMessage(format!("message id '{s}': {e}")))?;
        Ok(Self::new(author.parse()?, seq))
    }
}

impl Serialize for MessageId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for MessageId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_id_text_form() {
        let id = MessageId::new(PeerId::from_bytes([7; 32]), 42);
        let text = id.to_string();
        assert!(text.ends_with("/42"));
        assert_eq!(text.parse::<MessageId>().unwrap(), id);
    }

    #[test]
    fn rejects_short_peer_id() {
        assert!(matches!("abcd".parse::<PeerId>(), Err(Error::MalformedMessage(_))));
    }

    #[test]
    fn ids_order_by_author_then_sequence() {
        let a = PeerId::from_bytes([1; 32]);
        let b = PeerId::from_bytes([2; 32]);
        assert!(MessageId::new(a, 9) < MessageId::new(b, 0));
        assert!(MessageId::new(a, 1) < MessageId::new(a, 2));
    }
}
