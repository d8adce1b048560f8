//! Runs locally implemented methods for indexed requests.
//!
//! A request is claimed in an in-process table before anything else happens,
//! so however often the same logged request is delivered its executor starts
//! at most once per process. With [`ExecutionGuard::Durable`] an execution
//! marker in the local log extends that guarantee across restarts.

use std::{
    panic::AssertUnwindSafe,
    sync::Arc,
    time::{SystemTime, UNIX_EPOCH},
};

use bytestring::ByteString;
use dashmap::{mapref::entry::Entry, DashMap};
use futures::FutureExt;
use kappa_rpc_protocol::PeerIdentity;
use kappa_rpc_types::{
    errors::codes,
    message::{ExecutionEntry, RequestEntry, ResponseEntry},
    Error, InvocationError, MessageBody, MessageId, PeerId, ResponseResult,
};
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info_span, warn, Instrument};

use crate::{
    context::Context, indexer::Indexer, machine::StateMachine, options::ExecutionGuard, registry::Registry,
    writer::LogWriter,
};

/// Callee-side record of a request whose execution has started.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingExecution {
    pub request_id: MessageId,
    pub method: ByteString,
    /// Milliseconds since the unix epoch.
    pub executed_at: u64,
}

#[derive(Debug)]
enum Decision {
    Skip,
    /// A marker from an earlier run exists but no response was logged.
    Interrupted(ByteString),
    Execute(RequestEntry),
}

pub(crate) struct Dispatcher {
    local: PeerId,
    identity: PeerIdentity,
    registry: Arc<Registry>,
    machine: Arc<Mutex<StateMachine>>,
    writer: LogWriter,
    guard: ExecutionGuard,
    executions: DashMap<MessageId, PendingExecution>,
    token: CancellationToken,
}

impl Dispatcher {
    pub fn new(
        identity: PeerIdentity,
        registry: Arc<Registry>,
        machine: Arc<Mutex<StateMachine>>,
        writer: LogWriter,
        guard: ExecutionGuard,
        token: CancellationToken,
    ) -> Self {
        Self {
            local: identity.peer_id(),
            identity,
            registry,
            machine,
            writer,
            guard,
            executions: DashMap::new(),
            token,
        }
    }

    /// Reacts to an indexed request. Does nothing while replaying, for methods
    /// this peer does not implement, or for requests it must not answer.
    #[tracing::instrument(level = "trace", skip(self), fields(peer = %self.local.short()))]
    pub fn dispatch(self: &Arc<Self>, request_id: MessageId) {
        let decision = {
            let machine = self.machine.lock();
            if !machine.is_processing() {
                return;
            }
            self.decide(machine.indexer(), &request_id)
        };
        let method = match &decision {
            Decision::Skip => return,
            Decision::Interrupted(method) => method.clone(),
            Decision::Execute(request) => request.method.clone(),
        };

        match self.executions.entry(request_id) {
            Entry::Occupied(_) => {
                debug!("Suppressed: {}", Error::DuplicateExecutionRisk(request_id));
                return;
            }
            Entry::Vacant(vacant) => {
                vacant.insert(PendingExecution {
                    request_id,
                    method,
                    executed_at: now_millis(),
                });
            }
        }

        let dispatcher = self.clone();
        match decision {
            Decision::Skip => {}
            Decision::Interrupted(method) => {
                tokio::spawn(async move {
                    warn!("Request {} was interrupted by a restart, answering with a failure", request_id);
                    dispatcher
                        .respond(request_id, method, InvocationError::interrupted().into())
                        .await;
                });
            }
            Decision::Execute(request) => {
                let span = info_span!("execute", request = %request_id, method = %request.method, replay = false);
                tokio::spawn(dispatcher.execute(request_id, request).instrument(span));
            }
        }
    }

    fn decide(&self, index: &Indexer, request_id: &MessageId) -> Decision {
        let Some(request) = index.request(request_id) else {
            return Decision::Skip;
        };
        if !self.registry.is_locally_implemented(&request.method) {
            return Decision::Skip;
        }
        match request.target {
            Some(target) if target != self.local => return Decision::Skip,
            None if index.response(request_id).is_some() => return Decision::Skip,
            _ => {}
        }
        if index.has_answered_locally(request_id) {
            return Decision::Skip;
        }
        if index.has_executed_locally(request_id) {
            return Decision::Interrupted(request.method.clone());
        }
        Decision::Execute(request.clone())
    }

    async fn execute(self: Arc<Self>, request_id: MessageId, request: RequestEntry) {
        if self.guard == ExecutionGuard::Durable {
            let marker = MessageBody::Execution(ExecutionEntry {
                method: request.method.clone(),
                in_reply_to: request_id,
            });
            if let Err(err) = self.writer.append(marker).await {
                warn!("Could not log execution marker, not executing: {}", err);
                return;
            }
        }

        let method = request.method.clone();
        let result = tokio::select! {
            _ = self.token.cancelled() => {
                debug!("Execution cancelled");
                return;
            }
            result = self.run(request_id, request) => result,
        };
        self.respond(request_id, method, result).await;
    }

    async fn run(&self, request_id: MessageId, request: RequestEntry) -> ResponseResult {
        if let Err(err) = self.registry.validate_params(&request.method, &request.payload) {
            return InvocationError::new(codes::INVALID_ARGUMENT, err.to_string()).into();
        }
        let Some(executor) = self.registry.executor(&request.method) else {
            return InvocationError::internal(Error::UnknownName(request.method.to_string())).into();
        };
        let ctx = Context::new(request_id, request.method.clone(), self.identity.clone());

        let payload = request.payload;
        let invocation = async move { executor(ctx, payload).await };
        let value = match AssertUnwindSafe(invocation).catch_unwind().await {
            Ok(Ok(value)) => value,
            Ok(Err(failure)) => return failure.into(),
            Err(panic) => {
                let reason = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                return InvocationError::internal(format!("executor panicked: {reason}")).into();
            }
        };
        if let Err(err) = self.registry.validate_returns(&request.method, &value) {
            return InvocationError::new(codes::INVALID_RESULT, err.to_string()).into();
        }
        ResponseResult::Success(value)
    }

    async fn respond(&self, request_id: MessageId, method: ByteString, result: ResponseResult) {
        let success = result.is_success();
        let response = MessageBody::Response(ResponseEntry {
            method,
            in_reply_to: request_id,
            result,
        });
        match self.writer.append(response).await {
            Ok(id) => debug!("Answered {} with {} (success: {})", request_id, id, success),
            Err(err) => warn!("Could not log response to {}: {}", request_id, err),
        }
    }

    pub fn executions(&self) -> Vec<PendingExecution> {
        self.executions.iter().map(|entry| entry.value().clone()).collect()
    }
}

pub(crate) fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as u64)
        .unwrap_or_default()
}
