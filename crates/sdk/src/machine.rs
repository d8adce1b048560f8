use kappa_rpc_core::LogEntry;
use kappa_rpc_types::MessageId;
use tracing::{debug, info};

use crate::{
    correlator::{Correlator, ResponseFuture},
    indexer::{IndexEvent, Indexer},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum Phase {
    /// Indexing history up to the heads seen at startup. Nothing is dispatched.
    Replaying,
    Processing,
    Closed,
}

/// Indexer and correlator of one peer, mutated under a single lock so that a
/// subscription can never miss a response indexed concurrently.
pub(crate) struct StateMachine {
    indexer: Indexer,
    correlator: Correlator,
    phase: Phase,
}

impl StateMachine {
    pub fn new(indexer: Indexer) -> Self {
        Self {
            indexer,
            correlator: Correlator::default(),
            phase: Phase::Replaying,
        }
    }

    pub fn handle_entry(&mut self, entry: &LogEntry) -> Vec<IndexEvent> {
        if self.phase == Phase::Closed {
            return Vec::new();
        }
        let events = self.indexer.apply(entry);
        for event in &events {
            if let IndexEvent::Responded(request) = event {
                if let Some(record) = self.indexer.response(request) {
                    let delivered = self.correlator.resolve(request, &record.result);
                    if delivered > 0 {
                        debug!("Resolved {} subscription(s) for request {}", delivered, request);
                    }
                }
            }
        }
        events
    }

    pub fn subscribe(&mut self, request: MessageId) -> ResponseFuture {
        let existing = self.indexer.response(&request).map(|record| &record.result);
        self.correlator.subscribe(request, existing)
    }

    fn transition(&mut self, phase: Phase) {
        // Closed is terminal.
        if self.phase != Phase::Closed {
            self.phase = phase;
        }
        info!("Peer {} state: {}", self.indexer.local().short(), self.phase);
    }

    pub fn start_processing(&mut self) {
        self.transition(Phase::Processing);
    }

    pub fn close(&mut self) {
        self.transition(Phase::Closed);
        debug!("Dropping {} waiting subscription(s)", self.correlator.len());
        self.correlator.close();
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn is_processing(&self) -> bool {
        self.phase == Phase::Processing
    }

    pub fn indexer(&self) -> &Indexer {
        &self.indexer
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kappa_rpc_protocol::{Decoder, Encoder, PeerIdentity};
    use kappa_rpc_types::{message::ResponseEntry, Message, MessageBody, PeerId, ResponseResult};
    use serde_json::json;
    use tokio_test::{assert_pending, task};

    #[test]
    fn response_resolves_subscription_and_later_subscribers() {
        let local = PeerIdentity::generate().peer_id();
        let responder = PeerIdentity::generate().peer_id();
        let request = MessageId::new(local, 0);
        let response = Message::new(
            MessageId::new(responder, 0),
            MessageBody::Response(ResponseEntry {
                method: "createReplicate".into(),
                in_reply_to: request,
                result: ResponseResult::Success(json!("ok")),
            }),
        );
        let entry = LogEntry {
            log: responder,
            sequence: 0,
            data: Encoder::new().encode(&response).unwrap(),
        };

        let mut machine = StateMachine::new(Indexer::new(local, Decoder::default()));
        machine.start_processing();
        let mut waiting = task::spawn(machine.subscribe(request));
        assert_pending!(waiting.poll());

        assert_eq!(machine.handle_entry(&entry), vec![IndexEvent::Responded(request)]);
        assert!(matches!(waiting.poll(), std::task::Poll::Ready(Ok(v)) if v == json!("ok")));

        let mut late = task::spawn(machine.subscribe(request));
        assert!(matches!(late.poll(), std::task::Poll::Ready(Ok(v)) if v == json!("ok")));
    }

    #[test]
    fn competing_responses_settle_on_lowest_id() {
        let local = PeerIdentity::generate().peer_id();
        let request = MessageId::new(local, 0);
        let mut responders = [PeerIdentity::generate().peer_id(), PeerIdentity::generate().peer_id()];
        responders.sort();
        let entry = |responder: PeerId, value: &str| LogEntry {
            log: responder,
            sequence: 0,
            data: Encoder::new()
                .encode(&Message::new(
                    MessageId::new(responder, 0),
                    MessageBody::Response(ResponseEntry {
                        method: "createReplicate".into(),
                        in_reply_to: request,
                        result: ResponseResult::Success(json!(value)),
                    }),
                ))
                .unwrap(),
        };

        let mut machine = StateMachine::new(Indexer::new(local, Decoder::default()));
        machine.start_processing();
        let mut live = task::spawn(machine.subscribe(request));
        machine.handle_entry(&entry(responders[1], "higher"));
        machine.handle_entry(&entry(responders[0], "lower"));

        assert!(matches!(live.poll(), std::task::Poll::Ready(Ok(v)) if v == json!("higher")));
        let mut late = task::spawn(machine.subscribe(request));
        assert!(matches!(late.poll(), std::task::Poll::Ready(Ok(v)) if v == json!("lower")));
    }

    #[test]
    fn closed_is_terminal() {
        let mut machine = StateMachine::new(Indexer::new(PeerIdentity::generate().peer_id(), Decoder::default()));
        assert_eq!(machine.phase(), Phase::Replaying);
        machine.close();
        machine.start_processing();
        assert_eq!(machine.phase(), Phase::Closed);
        assert!(!machine.is_processing());
    }
}
