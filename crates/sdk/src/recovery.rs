use futures::{stream::BoxStream, StreamExt};
use kappa_rpc_core::{Cursor, LogAggregate, LogEntry};
use kappa_rpc_types::Error;
use tracing::{debug, info, info_span, Instrument};

use crate::machine::StateMachine;

/// Outcome of replaying the history present at startup.
pub(crate) struct Recovered {
    /// Positioned right after the replayed entries, ready for live tailing.
    pub stream: BoxStream<'static, LogEntry>,
    pub replayed: usize,
}

/// Indexes every entry below the heads the aggregate reports right now,
/// before anything is dispatched.
pub(crate) async fn replay<A: LogAggregate>(aggregate: &A, machine: &mut StateMachine) -> Result<Recovered, Error> {
    let heads = aggregate.heads();
    let local = aggregate.local_log();
    let span = info_span!("recovery", peer = %local.short(), replay = true);
    async move {
        info!("Replaying {} log(s)", heads.iter().count());
        let mut stream = aggregate.subscribe(Cursor::new());
        let mut replayed = 0;
        while !machine.indexer().cursor().covers(&heads) {
            let Some(entry) = stream.next().await else {
                return Err(Error::Closed);
            };
            let events = machine.handle_entry(&entry);
            debug!("Replayed {}/{}: {:?}", entry.log.short(), entry.sequence, events);
            replayed += 1;
        }
        info!(
            "Replayed {} entries, {} own request(s) still pending",
            replayed,
            machine.indexer().own_pending_requests().len()
        );
        Ok(Recovered { stream, replayed })
    }
    .instrument(span)
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{indexer::Indexer, memory::MemoryLogs};
    use bytes::Bytes;
    use kappa_rpc_protocol::{Decoder, Encoder, PeerIdentity};
    use kappa_rpc_types::{message::RequestEntry, Message, MessageBody, MessageId};
    use serde_json::json;
    use tracing_test::traced_test;

    #[traced_test]
    #[tokio::test]
    async fn replays_up_to_heads() {
        let identity = PeerIdentity::generate();
        let local = identity.peer_id();
        let logs = MemoryLogs::new();
        let encoder = Encoder::signed(identity);
        for seq in 0..3 {
            let message = Message::new(
                MessageId::new(local, seq),
                MessageBody::Request(RequestEntry {
                    method: "createReplicate".into(),
                    payload: json!(null),
                    target: None,
                    created_at: 0,
                }),
            );
            logs.inject(local, encoder.encode(&message).unwrap());
        }
        logs.inject(PeerIdentity::generate().peer_id(), Bytes::from_static(b"junk"));

        let mut machine = StateMachine::new(Indexer::new(local, Decoder::default()));
        let recovered = replay(&logs.aggregate(local), &mut machine).await.unwrap();

        assert_eq!(recovered.replayed, 4);
        assert_eq!(machine.indexer().next_local_seq(), 3);
        assert_eq!(machine.indexer().own_pending_requests().len(), 3);
        assert!(logs_contain("Skipping entry"));
    }

    #[tokio::test]
    async fn empty_history_replays_nothing() {
        let local = PeerIdentity::generate().peer_id();
        let logs = MemoryLogs::new();
        let mut machine = StateMachine::new(Indexer::new(local, Decoder::default()));
        let recovered = replay(&logs.aggregate(local), &mut machine).await.unwrap();
        assert_eq!(recovered.replayed, 0);
        assert_eq!(machine.indexer().next_local_seq(), 0);
    }
}
