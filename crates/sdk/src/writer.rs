//! Single writer of the local log.
//!
//! Ids are assigned when a message is submitted, in submission order, and the
//! background task appends in that same order.

use std::sync::Arc;

use futures::StreamExt;
use kappa_rpc_core::LogAggregate;
use kappa_rpc_protocol::Encoder;
use kappa_rpc_types::{Error, Message, MessageBody, MessageId, PeerId, Sequence};
use parking_lot::Mutex;
use tokio::{
    sync::{
        mpsc::{unbounded_channel, UnboundedSender},
        oneshot,
    },
    task::JoinHandle,
};
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn, Instrument};

/// Log sequence the message was appended at.
pub(crate) type Ack = oneshot::Receiver<Result<Sequence, Error>>;

struct Outbound {
    message: Message,
    ack: oneshot::Sender<Result<Sequence, Error>>,
}

#[derive(Clone)]
pub(crate) struct LogWriter {
    author: PeerId,
    next_seq: Arc<Mutex<Sequence>>,
    outbound_tx: UnboundedSender<Outbound>,
}

impl LogWriter {
    pub fn spawn<A: LogAggregate>(
        aggregate: Arc<A>,
        encoder: Encoder,
        next_seq: Sequence,
        token: CancellationToken,
    ) -> (Self, JoinHandle<()>) {
        let author = aggregate.local_log();
        let (outbound_tx, outbound_rx) = unbounded_channel::<Outbound>();
        let span = tracing::info_span!("writer", peer = %author.short(), replay = false);
        let handle = tokio::spawn(
            async move {
                let mut outbound = UnboundedReceiverStream::new(outbound_rx);
                loop {
                    tokio::select! {
                        _ = token.cancelled() => break,
                        next = outbound.next() => {
                            let Some(Outbound { message, ack }) = next else { break };
                            let result = match encoder.encode(&message) {
                                Ok(data) => aggregate.append(data).await.map_err(Error::from),
                                Err(err) => Err(Error::from(err)),
                            };
                            match &result {
                                Ok(sequence) => debug!("Appended {} {} at {}", message.kind(), message.id, sequence),
                                Err(err) => warn!("Failed to append {} {}: {}", message.kind(), message.id, err),
                            }
                            let _ = ack.send(result);
                        }
                    }
                }
                debug!("Writer stopped");
            }
            .instrument(span),
        );
        (
            Self {
                author,
                next_seq: Arc::new(Mutex::new(next_seq)),
                outbound_tx,
            },
            handle,
        )
    }

    /// Assigns the next id to `body` and queues it for appending.
    pub fn submit(&self, body: MessageBody) -> Result<(MessageId, Ack), Error> {
        let (ack, rx) = oneshot::channel();
        let mut next_seq = self.next_seq.lock();
        let id = MessageId::new(self.author, *next_seq);
        self.outbound_tx
            .send(Outbound {
                message: Message::new(id, body),
                ack,
            })
            .map_err(|_| Error::Closed)?;
        *next_seq += 1;
        Ok((id, rx))
    }

    /// Submits `body` and waits until it is in the log.
    pub async fn append(&self, body: MessageBody) -> Result<MessageId, Error> {
        let (id, ack) = self.submit(body)?;
        ack.await.map_err(|_| Error::Closed)??;
        Ok(id)
    }
}
