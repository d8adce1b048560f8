//! Derived views over the log aggregate.
//!
//! Every view is keyed by message id and every update is a set or a merge, so
//! indexing the same entry twice, or the whole history again from the start,
//! leaves the views unchanged.

use std::collections::{BTreeMap, BTreeSet};

use bytestring::ByteString;
use kappa_rpc_core::{Cursor, LogEntry};
use kappa_rpc_protocol::Decoder;
use kappa_rpc_types::{
    message::RequestEntry, Declaration, Error, Message, MessageBody, MessageId, PeerId, ResponseResult, Sequence,
};
use tracing::{debug, warn};

/// A logged request and whether any response to it has been indexed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingRequest {
    pub id: MessageId,
    pub method: ByteString,
    pub target: Option<PeerId>,
    pub created_at: u64,
    pub resolved: bool,
}

/// The response kept for a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseRecord {
    pub id: MessageId,
    pub result: ResponseResult,
}

/// Latest declaration seen from one peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeclaredCapability {
    /// Author-local sequence of the declaring message.
    pub seq: Sequence,
    pub declaration: Declaration,
}

/// Comparable copy of the derived views.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IndexSnapshot {
    pub pending_requests: BTreeMap<MessageId, PendingRequest>,
    pub pending_responses: BTreeMap<MessageId, ResponseRecord>,
    pub declared_methods_by_peer: BTreeMap<PeerId, DeclaredCapability>,
}

/// What changed when a message was indexed for the first time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexEvent {
    Declared(PeerId),
    Requested(MessageId),
    /// First response to the given request.
    Responded(MessageId),
}

pub struct Indexer {
    local: PeerId,
    decoder: Decoder,
    cursor: Cursor,
    seen: BTreeSet<MessageId>,
    requests: BTreeMap<MessageId, PendingRequest>,
    payloads: BTreeMap<MessageId, RequestEntry>,
    responses: BTreeMap<MessageId, ResponseRecord>,
    declarations: BTreeMap<PeerId, DeclaredCapability>,
    executed_locally: BTreeSet<MessageId>,
    answered_locally: BTreeSet<MessageId>,
    next_local_seq: Sequence,
}

impl Indexer {
    pub fn new(local: PeerId, decoder: Decoder) -> Self {
        Self {
            local,
            decoder,
            cursor: Cursor::new(),
            seen: BTreeSet::new(),
            requests: BTreeMap::new(),
            payloads: BTreeMap::new(),
            responses: BTreeMap::new(),
            declarations: BTreeMap::new(),
            executed_locally: BTreeSet::new(),
            answered_locally: BTreeSet::new(),
            next_local_seq: 0,
        }
    }

    /// Decodes and indexes one log entry. Malformed entries advance the cursor
    /// and are otherwise skipped.
    #[tracing::instrument(level = "trace", skip(self, entry), fields(log = %entry.log.short(), sequence = entry.sequence))]
    pub fn apply(&mut self, entry: &LogEntry) -> Vec<IndexEvent> {
        self.cursor.advance(entry.log, entry.sequence);
        let message = match self.decoder.decode(entry.data.clone()) {
            Ok(message) => message,
            Err(err) => {
                warn!("Skipping entry {}/{}: {}", entry.log, entry.sequence, Error::from(err));
                return Vec::new();
            }
        };
        if message.author() != entry.log {
            warn!(
                "Skipping entry {}/{}: authored by {} but carried by another log",
                entry.log,
                entry.sequence,
                message.author()
            );
            return Vec::new();
        }
        self.index(message)
    }

    /// Indexes an already decoded message.
    pub fn index(&mut self, message: Message) -> Vec<IndexEvent> {
        let id = message.id;
        if !self.seen.insert(id) {
            debug!("Message {} already indexed", id);
            return Vec::new();
        }
        let author = message.author();
        if author == self.local {
            self.next_local_seq = self.next_local_seq.max(id.seq + 1);
        }

        let mut events = Vec::new();
        match message.body {
            MessageBody::Declaration(declaration) => {
                let newer = self
                    .declarations
                    .get(&author)
                    .map_or(true, |current| current.seq < id.seq);
                if newer {
                    self.declarations.insert(
                        author,
                        DeclaredCapability {
                            seq: id.seq,
                            declaration,
                        },
                    );
                    events.push(IndexEvent::Declared(author));
                }
            }
            MessageBody::Request(request) => {
                self.requests.insert(
                    id,
                    PendingRequest {
                        id,
                        method: request.method.clone(),
                        target: request.target,
                        created_at: request.created_at,
                        resolved: self.responses.contains_key(&id),
                    },
                );
                self.payloads.insert(id, request);
                events.push(IndexEvent::Requested(id));
            }
            MessageBody::Response(response) => {
                let request = response.in_reply_to;
                if author == self.local {
                    self.answered_locally.insert(request);
                }
                if let Some(pending) = self.requests.get_mut(&request) {
                    pending.resolved = true;
                }
                match self.responses.get(&request) {
                    None => {
                        self.responses.insert(
                            request,
                            ResponseRecord {
                                id,
                                result: response.result,
                            },
                        );
                        events.push(IndexEvent::Responded(request));
                    }
                    // Several peers may answer an untargeted request. The lowest
                    // response id wins so every peer converges on the same one.
                    Some(current) if id < current.id => {
                        self.responses.insert(
                            request,
                            ResponseRecord {
                                id,
                                result: response.result,
                            },
                        );
                    }
                    Some(_) => {}
                }
            }
            MessageBody::Execution(execution) => {
                if author == self.local {
                    self.executed_locally.insert(execution.in_reply_to);
                }
            }
        }
        events
    }

    pub fn local(&self) -> PeerId {
        self.local
    }

    pub fn cursor(&self) -> &Cursor {
        &self.cursor
    }

    /// Sequence for the next message this peer writes.
    pub fn next_local_seq(&self) -> Sequence {
        self.next_local_seq
    }

    pub fn request(&self, id: &MessageId) -> Option<&RequestEntry> {
        self.payloads.get(id)
    }

    pub fn response(&self, request: &MessageId) -> Option<&ResponseRecord> {
        self.responses.get(request)
    }

    pub fn has_executed_locally(&self, request: &MessageId) -> bool {
        self.executed_locally.contains(request)
    }

    pub fn has_answered_locally(&self, request: &MessageId) -> bool {
        self.answered_locally.contains(request)
    }

    /// Requests this peer has not answered yet, in id order.
    pub fn unanswered_requests(&self) -> Vec<MessageId> {
        self.requests
            .keys()
            .filter(|id| !self.answered_locally.contains(id))
            .copied()
            .collect()
    }

    /// Requests authored by this peer that have no response yet.
    pub fn own_pending_requests(&self) -> Vec<PendingRequest> {
        self.requests
            .values()
            .filter(|request| request.id.author == self.local && !request.resolved)
            .cloned()
            .collect()
    }

    pub fn declaration_of(&self, peer: &PeerId) -> Option<&Declaration> {
        self.declarations.get(peer).map(|capability| &capability.declaration)
    }

    /// A remote declaration of `method`: the target's if one is given, else
    /// the first peer in id order that declares it.
    pub fn declaration_for(&self, method: &str, target: Option<PeerId>) -> Option<&Declaration> {
        match target {
            Some(target) => self
                .declaration_of(&target)
                .filter(|declaration| declaration.method(method).is_some()),
            None => self
                .declarations
                .values()
                .map(|capability| &capability.declaration)
                .find(|declaration| declaration.method(method).is_some()),
        }
    }

    pub fn capabilities(&self) -> BTreeMap<PeerId, Declaration> {
        self.declarations
            .iter()
            .map(|(peer, capability)| (*peer, capability.declaration.clone()))
            .collect()
    }

    pub fn snapshot(&self) -> IndexSnapshot {
        IndexSnapshot {
            pending_requests: self.requests.clone(),
            pending_responses: self.responses.clone(),
            declared_methods_by_peer: self.declarations.clone(),
        }
    }
}
