//! In-process log aggregate.
//!
//! [`MemoryLogs`] holds one append-only log per peer. Each peer gets a
//! [`MemoryAggregate`] handle on the shared logs that appends to its own log
//! only. Dropping a peer and starting it again on a new handle replays the same
//! history, which is how restarts are exercised.

use std::{collections::BTreeMap, sync::Arc};

use async_stream::stream;
use bytes::Bytes;
use futures::stream::BoxStream;
use kappa_rpc_core::{Cursor, LogAggregate, LogEntry};
use kappa_rpc_types::{LogError, PeerId, Sequence};
use parking_lot::Mutex;
use tokio::sync::watch;

#[derive(Clone)]
pub struct MemoryLogs {
    logs: Arc<Mutex<BTreeMap<PeerId, Vec<Bytes>>>>,
    version: Arc<watch::Sender<u64>>,
}

impl Default for MemoryLogs {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryLogs {
    pub fn new() -> Self {
        Self {
            logs: Default::default(),
            version: Arc::new(watch::Sender::new(0)),
        }
    }

    /// Handle that appends to the log of `local`.
    pub fn aggregate(&self, local: PeerId) -> MemoryAggregate {
        MemoryAggregate {
            local,
            logs: self.clone(),
        }
    }

    /// Appends raw bytes to any log, bypassing its owner.
    pub fn inject(&self, log: PeerId, data: Bytes) -> Sequence {
        let sequence = {
            let mut logs = self.logs.lock();
            let entries = logs.entry(log).or_default();
            entries.push(data);
            entries.len() as Sequence - 1
        };
        self.version.send_modify(|version| *version += 1);
        sequence
    }

    pub fn entries(&self, log: &PeerId) -> Vec<Bytes> {
        self.logs.lock().get(log).cloned().unwrap_or_default()
    }

    fn heads(&self) -> Cursor {
        self.logs
            .lock()
            .iter()
            .map(|(log, entries)| (*log, entries.len() as Sequence))
            .collect()
    }

    fn read_from(&self, cursor: &Cursor) -> Vec<LogEntry> {
        let logs = self.logs.lock();
        let mut batch = Vec::new();
        for (log, entries) in logs.iter() {
            let from = cursor.position(log) as usize;
            for (offset, data) in entries.iter().enumerate().skip(from) {
                batch.push(LogEntry {
                    log: *log,
                    sequence: offset as Sequence,
                    data: data.clone(),
                });
            }
        }
        batch
    }
}

#[derive(Clone)]
pub struct MemoryAggregate {
    local: PeerId,
    logs: MemoryLogs,
}

impl LogAggregate for MemoryAggregate {
    fn local_log(&self) -> PeerId {
        self.local
    }

    fn heads(&self) -> Cursor {
        self.logs.heads()
    }

    async fn append(&self, data: Bytes) -> Result<Sequence, LogError> {
        Ok(self.logs.inject(self.local, data))
    }

    fn subscribe(&self, from: Cursor) -> BoxStream<'static, LogEntry> {
        let logs = self.logs.clone();
        let mut changes = logs.version.subscribe();
        Box::pin(stream! {
            let mut cursor = from;
            loop {
                let _ = changes.borrow_and_update();
                let batch = logs.read_from(&cursor);
                if batch.is_empty() {
                    if changes.changed().await.is_err() {
                        break;
                    }
                    continue;
                }
                for entry in batch {
                    cursor.advance(entry.log, entry.sequence);
                    yield entry;
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use std::time::Duration;

    #[tokio::test]
    async fn subscription_replays_then_tails() {
        let logs = MemoryLogs::new();
        let a = PeerId::from_bytes([1; 32]);
        let b = PeerId::from_bytes([2; 32]);
        let aggregate = logs.aggregate(a);
        aggregate.append(Bytes::from_static(b"a0")).await.unwrap();
        logs.inject(b, Bytes::from_static(b"b0"));

        let mut stream = aggregate.subscribe(Cursor::new());
        let mut seen = vec![stream.next().await.unwrap(), stream.next().await.unwrap()];
        seen.sort_by_key(|entry| entry.log);
        assert_eq!(seen[0].data, Bytes::from_static(b"a0"));
        assert_eq!(seen[1].data, Bytes::from_static(b"b0"));

        let pending = tokio::time::timeout(Duration::from_millis(20), stream.next()).await;
        assert!(pending.is_err());

        assert_eq!(aggregate.append(Bytes::from_static(b"a1")).await.unwrap(), 1);
        let next = stream.next().await.unwrap();
        assert_eq!((next.log, next.sequence), (a, 1));
    }

    #[tokio::test]
    async fn subscription_starts_at_cursor() {
        let logs = MemoryLogs::new();
        let a = PeerId::from_bytes([1; 32]);
        for data in [&b"0"[..], b"1", b"2"] {
            logs.inject(a, Bytes::copy_from_slice(data));
        }
        let aggregate = logs.aggregate(a);
        assert_eq!(aggregate.heads().position(&a), 3);

        let mut from = Cursor::new();
        from.set(a, 2);
        let entry = aggregate.subscribe(from).next().await.unwrap();
        assert_eq!(entry.sequence, 2);
    }
}
