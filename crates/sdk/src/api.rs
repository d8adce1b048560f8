//! Caller-facing surface of a running peer.

use std::{
    collections::BTreeMap,
    future::{Future, IntoFuture},
    sync::Arc,
};

use bytestring::ByteString;
use kappa_rpc_types::{message::RequestEntry, Declaration, Error, MessageBody, MessageId, PeerId, Sequence};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use crate::{
    correlator::ResponseFuture,
    dispatcher::now_millis,
    indexer::PendingRequest,
    machine::{Phase, StateMachine},
    registry::{Registry, ShapeDescriptor},
    writer::{Ack, LogWriter},
};

/// Confirmation that a request is in the local log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Accepted {
    pub id: MessageId,
    pub sequence: Sequence,
    pub payload: Value,
}

enum Acceptance {
    Waiting(Ack),
    Done(Result<Accepted, Error>),
}

/// Handle of one issued request.
///
/// Exposes the two events of a call: [`CallHandle::accepted`] once the request
/// is appended and the response, by awaiting the handle itself or the future
/// from [`CallHandle::response`].
pub struct CallHandle {
    id: MessageId,
    payload: Value,
    acceptance: Acceptance,
    response: ResponseFuture,
}

impl CallHandle {
    pub fn id(&self) -> MessageId {
        self.id
    }

    pub async fn accepted(&mut self) -> Result<Accepted, Error> {
        if let Acceptance::Waiting(ack) = &mut self.acceptance {
            let result = match ack.await {
                Ok(Ok(sequence)) => Ok(Accepted {
                    id: self.id,
                    sequence,
                    payload: self.payload.clone(),
                }),
                Ok(Err(err)) => Err(err),
                Err(_) => Err(Error::Closed),
            };
            self.acceptance = Acceptance::Done(result);
        }
        match &self.acceptance {
            Acceptance::Done(result) => result.clone(),
            Acceptance::Waiting(_) => Err(Error::Closed),
        }
    }

    pub fn response(self) -> ResponseFuture {
        self.response
    }
}

impl IntoFuture for CallHandle {
    type Output = <ResponseFuture as Future>::Output;
    type IntoFuture = ResponseFuture;

    fn into_future(self) -> Self::IntoFuture {
        self.response
    }
}

impl std::fmt::Debug for CallHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallHandle").field("id", &self.id).finish()
    }
}

#[derive(Clone)]
pub struct Api {
    local: PeerId,
    registry: Arc<Registry>,
    machine: Arc<Mutex<StateMachine>>,
    writer: LogWriter,
}

impl Api {
    pub(crate) fn new(registry: Arc<Registry>, machine: Arc<Mutex<StateMachine>>, writer: LogWriter) -> Self {
        let local = machine.lock().indexer().local();
        Self {
            local,
            registry,
            machine,
            writer,
        }
    }

    pub fn peer_id(&self) -> PeerId {
        self.local
    }

    /// Validates `payload` against the shape of `method` and logs a request
    /// any implementing peer may execute.
    pub fn call<T: Serialize>(&self, method: &str, payload: T) -> Result<CallHandle, Error> {
        self.request(method, payload, None)
    }

    /// Like [`Api::call`], but only `target` executes the request.
    pub fn call_on<T: Serialize>(&self, target: PeerId, method: &str, payload: T) -> Result<CallHandle, Error> {
        self.request(method, payload, Some(target))
    }

    /// Client bound to one method, failing with [`Error::UnknownName`] when no
    /// shape is known for it locally or remotely.
    pub fn method(&self, name: &str) -> Result<MethodClient, Error> {
        match self.describe(name)? {
            ShapeDescriptor::Method(_) => Ok(MethodClient {
                api: self.clone(),
                name: name.into(),
                target: None,
            }),
            ShapeDescriptor::Type(_) => Err(Error::UnknownName(name.to_string())),
        }
    }

    #[tracing::instrument(level = "debug", skip(self, payload), fields(peer = %self.local.short()))]
    fn request<T: Serialize>(&self, method: &str, payload: T, target: Option<PeerId>) -> Result<CallHandle, Error> {
        if self.machine.lock().phase() == Phase::Closed {
            return Err(Error::Closed);
        }
        let payload = serde_json::to_value(payload).map_err(|err| Error::schema(method, err.to_string()))?;
        self.validate(method, &payload, target)?;

        let (id, ack) = self.writer.submit(MessageBody::Request(RequestEntry {
            method: method.into(),
            payload: payload.clone(),
            target,
            created_at: now_millis(),
        }))?;
        debug!("Submitted request {}", id);
        let response = self.subscribe(id);
        Ok(CallHandle {
            id,
            payload,
            acceptance: Acceptance::Waiting(ack),
            response,
        })
    }

    fn validate(&self, method: &str, payload: &Value, target: Option<PeerId>) -> Result<(), Error> {
        if self.registry.method(method).is_some() {
            return self.registry.validate_params(method, payload);
        }
        let machine = self.machine.lock();
        let declaration = machine
            .indexer()
            .declaration_for(method, target)
            .ok_or_else(|| Error::UnknownName(method.to_string()))?;
        declaration.validate_params(method, payload)
    }

    /// Response of any request by id. Resolves right away when the response is
    /// already indexed, so it also re-attaches to requests issued before a
    /// restart.
    pub fn subscribe(&self, request: MessageId) -> ResponseFuture {
        self.machine.lock().subscribe(request)
    }

    /// Shape of a method or type, from the local registry first and then from
    /// remote declarations.
    pub fn describe(&self, name: &str) -> Result<ShapeDescriptor, Error> {
        match self.registry.describe(name) {
            Err(Error::UnknownName(_)) => {}
            other => return other,
        }
        let machine = self.machine.lock();
        machine
            .indexer()
            .capabilities()
            .into_values()
            .find_map(|declaration| describe_remote(&declaration, name))
            .ok_or_else(|| Error::UnknownName(name.to_string()))
    }

    /// Requests this peer issued that have no response yet.
    pub fn pending_requests(&self) -> Vec<PendingRequest> {
        self.machine.lock().indexer().own_pending_requests()
    }

    /// Latest declaration of every peer, this one included.
    pub fn capabilities(&self) -> BTreeMap<PeerId, Declaration> {
        self.machine.lock().indexer().capabilities()
    }
}

fn describe_remote(declaration: &Declaration, name: &str) -> Option<ShapeDescriptor> {
    declaration
        .method(name)
        .cloned()
        .map(ShapeDescriptor::Method)
        .or_else(|| declaration.types.get(name).cloned().map(ShapeDescriptor::Type))
}

/// `api.method("m")?.call(payload)`
#[derive(Clone)]
pub struct MethodClient {
    api: Api,
    name: ByteString,
    target: Option<PeerId>,
}

impl MethodClient {
    pub fn on(mut self, target: PeerId) -> Self {
        self.target = Some(target);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn call<T: Serialize>(&self, payload: T) -> Result<CallHandle, Error> {
        self.api.request(&self.name, payload, self.target)
    }
}
