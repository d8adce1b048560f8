use std::sync::Arc;

use futures::{stream::BoxStream, StreamExt};
use kappa_rpc_core::{LogAggregate, LogEntry};
use kappa_rpc_protocol::{Decoder, Encoder, PeerIdentity};
use kappa_rpc_types::{Error, LogError, MessageBody, PeerId};
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, Instrument};

use crate::{
    api::Api,
    dispatcher::{Dispatcher, PendingExecution},
    indexer::{IndexEvent, IndexSnapshot, Indexer},
    machine::{Phase, StateMachine},
    options::PeerOptions,
    recovery,
    registry::Registry,
    writer::LogWriter,
};

/// A running peer on one log aggregate.
///
/// Dropping the peer stops its background tasks; [`Peer::shutdown`] also
/// waits for them.
pub struct Peer {
    api: Api,
    machine: Arc<Mutex<StateMachine>>,
    dispatcher: Arc<Dispatcher>,
    token: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Peer {
    /// Replays the existing history, then starts dispatching and live tailing.
    ///
    /// Returns once the history present at call time is indexed and the local
    /// declaration, when it changed, is in the log.
    pub async fn start<A: LogAggregate>(
        aggregate: A,
        identity: PeerIdentity,
        registry: Registry,
        options: PeerOptions,
    ) -> Result<Self, Error> {
        let local = identity.peer_id();
        if aggregate.local_log() != local {
            return Err(LogError::Rejected(format!("log {} is not owned by peer {}", aggregate.local_log(), local)).into());
        }
        let aggregate = Arc::new(aggregate);
        let registry = Arc::new(registry);
        let token = CancellationToken::new();
        debug!("Starting peer {} with {:?} and {:?}", local, options, registry);

        // step 1: rebuild the derived views from history
        let mut machine = StateMachine::new(Indexer::new(local, Decoder::new(options.verify_signatures)));
        let recovered = recovery::replay(aggregate.as_ref(), &mut machine).await?;
        debug!("Recovered {} from {} entries", machine.indexer().cursor().iter().count(), recovered.replayed);
        let next_seq = machine.indexer().next_local_seq();
        let backlog = machine.indexer().unanswered_requests();
        let announced = machine.indexer().declaration_of(&local).cloned();
        machine.start_processing();
        let machine = Arc::new(Mutex::new(machine));

        // step 2: the single writer of the local log
        let encoder = if options.sign_messages {
            Encoder::signed(identity.clone())
        } else {
            Encoder::new()
        };
        let (writer, writer_task) = LogWriter::spawn(aggregate.clone(), encoder, next_seq, token.clone());

        // step 3: answer what arrived while this peer was away
        let dispatcher = Arc::new(Dispatcher::new(
            identity,
            registry.clone(),
            machine.clone(),
            writer.clone(),
            options.execution_guard,
            token.clone(),
        ));
        for request in backlog {
            dispatcher.dispatch(request);
        }

        // step 4: announce capabilities
        let declaration = registry.declaration();
        let unchanged = match &announced {
            Some(announced) => *announced == declaration,
            None => declaration.types.is_empty() && declaration.methods.is_empty(),
        };
        if options.announce && !unchanged {
            let id = writer.append(MessageBody::Declaration(declaration)).await?;
            info!("Announced declaration {}", id);
        }

        // step 5: live tailing
        let span = info_span!("indexer", peer = %local.short(), replay = false);
        let indexer_task = tokio::spawn(
            index_live(recovered.stream, machine.clone(), dispatcher.clone(), token.clone()).instrument(span),
        );

        Ok(Self {
            api: Api::new(registry, machine.clone(), writer),
            machine,
            dispatcher,
            token,
            tasks: Mutex::new(vec![writer_task, indexer_task]),
        })
    }

    pub fn api(&self) -> Api {
        self.api.clone()
    }

    pub fn peer_id(&self) -> PeerId {
        self.api.peer_id()
    }

    pub fn phase(&self) -> Phase {
        self.machine.lock().phase()
    }

    pub fn snapshot(&self) -> IndexSnapshot {
        self.machine.lock().indexer().snapshot()
    }

    /// Executions started by this process.
    pub fn executions(&self) -> Vec<PendingExecution> {
        self.dispatcher.executions()
    }

    /// Stops indexing, writing and running executors. Waiting response
    /// futures resolve with [`Error::Closed`]; logged requests stay logged.
    pub async fn shutdown(&self) {
        self.close();
        let tasks = std::mem::take(&mut *self.tasks.lock());
        for task in tasks {
            let _ = task.await;
        }
        info!("Peer {} stopped", self.peer_id().short());
    }

    fn close(&self) {
        self.token.cancel();
        self.machine.lock().close();
    }
}

impl Drop for Peer {
    fn drop(&mut self) {
        self.close();
    }
}

async fn index_live(
    mut stream: BoxStream<'static, LogEntry>,
    machine: Arc<Mutex<StateMachine>>,
    dispatcher: Arc<Dispatcher>,
    token: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            entry = stream.next() => {
                let Some(entry) = entry else { break };
                let events = machine.lock().handle_entry(&entry);
                for event in events {
                    match event {
                        IndexEvent::Requested(request) => dispatcher.dispatch(request),
                        IndexEvent::Declared(peer) => debug!("Peer {} declared its capabilities", peer.short()),
                        IndexEvent::Responded(request) => debug!("Request {} answered", request),
                    }
                }
            }
        }
    }
    debug!("Indexing stopped");
}
