//! KappaRPC engine
//!
//! Peers call each other's methods by appending requests and responses to
//! their own logs in a shared log aggregate. A [`Peer`] indexes every log,
//! runs the methods its [`Registry`] implements for requests it observes,
//! and resolves the [`CallHandle`]s of requests it issued. All of its state is
//! rebuilt from the logs when it starts.

mod api;
mod correlator;
mod dispatcher;
mod indexer;
mod machine;
mod memory;
mod options;
mod peer;
mod recovery;
mod registry;
mod writer;

pub mod context;
#[cfg(feature = "logger")]
pub mod logger;

pub use api::{Accepted, Api, CallHandle, MethodClient};
pub use context::Context;
pub use correlator::ResponseFuture;
pub use dispatcher::PendingExecution;
pub use indexer::{DeclaredCapability, IndexSnapshot, PendingRequest, ResponseRecord};
pub use machine::Phase;
pub use memory::{MemoryAggregate, MemoryLogs};
pub use options::{ExecutionGuard, PeerOptions, PeerOptionsBuilder};
pub use peer::Peer;
pub use registry::{Registry, RegistryBuilder, ShapeDescriptor};

pub use kappa_rpc_core::{Cursor, LogAggregate, LogEntry};
pub use kappa_rpc_protocol::PeerIdentity;
pub use kappa_rpc_types::{
    errors::codes, Declaration, Error, InvocationError, LogError, MessageId, MethodShape, PeerId, ResponseResult,
    Shape,
};
