//! KappaRPC Core API
//!
//! The seams between the engine and its collaborators: the replicated log
//! aggregate it reads and appends to, and the executors it invokes.

use std::{collections::BTreeMap, future::Future};

use bytes::Bytes;
use futures::stream::BoxStream;
use kappa_rpc_types::{LogError, PeerId, Sequence};

/// Trait to represent a method executor
pub trait MethodHandler<Ctx, Input>: Fn(Ctx, Input) -> Self::OutputFuture {
    /// Output type of the async function
    type Output;
    /// Future of the output
    type OutputFuture: Future<Output = <Self as MethodHandler<Ctx, Input>>::Output> + Send + 'static;
}

impl<F: ?Sized, Fut, Ctx, Input> MethodHandler<Ctx, Input> for F
where
    F: Fn(Ctx, Input) -> Fut,
    Fut: Future + Send + 'static,
{
    type Output = Fut::Output;
    type OutputFuture = Fut;
}

/// One entry of one peer's log, as delivered by the aggregate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    pub log: PeerId,
    pub sequence: Sequence,
    pub data: Bytes,
}

/// Read position across the logs of an aggregate: the next sequence to read
/// from each log. Logs absent from the cursor are read from the start.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Cursor(BTreeMap<PeerId, Sequence>);

impl Cursor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn position(&self, log: &PeerId) -> Sequence {
        self.0.get(log).copied().unwrap_or(0)
    }

    /// Moves past `sequence` of `log`. Never moves backwards.
    pub fn advance(&mut self, log: PeerId, sequence: Sequence) {
        let next = self.0.entry(log).or_insert(0);
        *next = (*next).max(sequence + 1);
    }

    pub fn set(&mut self, log: PeerId, next: Sequence) {
        self.0.insert(log, next);
    }

    /// Whether every entry below `heads` has been read.
    pub fn covers(&self, heads: &Cursor) -> bool {
        heads.0.iter().all(|(log, head)| self.position(log) >= *head)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&PeerId, &Sequence)> {
        self.0.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<(PeerId, Sequence)> for Cursor {
    fn from_iter<T: IntoIterator<Item = (PeerId, Sequence)>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// The replicated, multi-writer log view for one address.
///
/// Each peer writes only its own log; every other log is read-only. The
/// subscription yields entries of each log in that log's order, while the
/// interleaving across logs is unspecified.
pub trait LogAggregate: Send + Sync + 'static {
    /// The log this peer appends to.
    fn local_log(&self) -> PeerId;

    /// Length of every log known right now.
    fn heads(&self) -> Cursor;

    /// Appends to the local log and returns the sequence it was written at.
    fn append(&self, data: Bytes) -> impl Future<Output = Result<Sequence, LogError>> + Send;

    /// Infinite stream of entries at or after `from`, live-tailing once caught up.
    fn subscribe(&self, from: Cursor) -> BoxStream<'static, LogEntry>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cursor_only_moves_forward() {
        let log = PeerId::from_bytes([1; 32]);
        let mut cursor = Cursor::new();
        cursor.advance(log, 4);
        cursor.advance(log, 2);
        assert_eq!(cursor.position(&log), 5);
    }

    #[test]
    fn cursor_covers_heads() {
        let a = PeerId::from_bytes([1; 32]);
        let b = PeerId::from_bytes([2; 32]);
        let heads: Cursor = [(a, 2), (b, 1)].into_iter().collect();
        let mut cursor = Cursor::new();
        assert!(!cursor.covers(&heads));
        cursor.advance(a, 1);
        assert!(!cursor.covers(&heads));
        cursor.advance(b, 0);
        assert!(cursor.covers(&heads));
        assert!(cursor.covers(&Cursor::new()));
    }
}
