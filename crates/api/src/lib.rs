//! KappaRPC API
//!
//! Everything an application needs to run a peer and call methods on others.

pub use anyhow::Error as ExecutorError;
pub use bytes::Bytes;
pub use kappa_rpc::{
    codes, Accepted, Api, CallHandle, Context, Cursor, Declaration, Error, ExecutionGuard, InvocationError,
    LogAggregate, LogEntry, LogError, MemoryAggregate, MemoryLogs, MessageId, MethodClient, MethodShape, Peer, PeerId,
    PeerIdentity, PeerOptions, PeerOptionsBuilder, PendingRequest, Phase, Registry, RegistryBuilder, ResponseFuture,
    ResponseResult, Shape, ShapeDescriptor,
};
#[cfg(feature = "logger")]
pub use kappa_rpc::logger;
pub use kappa_rpc_protocol::{verify_signature, PROTOCOL_VERSION};
pub use serde_json::{json, Value};
