//! KappaRPC data model
//!
//! Identifiers, the logged [`message::Message`] shapes, schema descriptors and
//! the error taxonomy shared by every kappa-rpc crate.

pub mod errors;
pub mod identifiers;
pub mod invocation;
pub mod message;
pub mod shape;

pub use errors::{Error, InvocationError, LogError};
pub use identifiers::{MessageId, PeerId, Sequence};
pub use invocation::ResponseResult;
pub use message::{Declaration, Message, MessageBody, MessageKind, MethodShape};
pub use shape::{Shape, TypeTable};
