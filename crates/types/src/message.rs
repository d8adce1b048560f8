//! Messages appended to a peer's log.
//!
//! A [`Message`] is created once, appended to exactly one log and never
//! mutated afterwards. Every derived view in the engine is rebuilt from these.

use std::collections::BTreeMap;

use bytes::Bytes;
use bytestring::ByteString;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    errors::Error,
    identifiers::{MessageId, PeerId},
    invocation::ResponseResult,
    shape::{Shape, TypeTable},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::EnumString, strum::AsRefStr)]
pub enum MessageKind {
    Declaration,
    Request,
    Response,
    Execution,
}

/// Parameter and return type names of a method.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MethodShape {
    pub params: Vec<String>,
    pub returns: Vec<String>,
}

impl MethodShape {
    pub fn new<P, R>(params: P, returns: R) -> Self
    where
        P: IntoIterator,
        P::Item: Into<String>,
        R: IntoIterator,
        R::Item: Into<String>,
    {
        Self {
            params: params.into_iter().map(Into::into).collect(),
            returns: returns.into_iter().map(Into::into).collect(),
        }
    }

    pub fn params_shape(&self) -> Shape {
        Shape::for_signature(&self.params)
    }

    pub fn returns_shape(&self) -> Shape {
        Shape::for_signature(&self.returns)
    }
}

/// Capability announcement: the methods a peer executes and the types they use.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Declaration {
    pub types: BTreeMap<String, Shape>,
    pub methods: BTreeMap<String, MethodShape>,
}

impl Declaration {
    pub fn method(&self, name: &str) -> Option<&MethodShape> {
        self.methods.get(name)
    }

    /// Checks `payload` against the params of `method` as declared here.
    pub fn validate_params(&self, method: &str, payload: &Value) -> Result<(), Error> {
        let shape = self
            .method(method)
            .ok_or_else(|| Error::UnknownName(method.to_string()))?;
        shape
            .params_shape()
            .validate(payload, &self.types)
            .map_err(|e| Error::schema(method, e.to_string()))
    }
}

impl TypeTable for Declaration {
    fn resolve(&self, name: &str) -> Option<&Shape> {
        self.types.get(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestEntry {
    pub method: ByteString,
    pub payload: Value,
    /// Only this peer may execute the request, when set.
    pub target: Option<PeerId>,
    /// Author's wall clock in milliseconds. Informational only.
    pub created_at: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseEntry {
    pub method: ByteString,
    pub in_reply_to: MessageId,
    pub result: ResponseResult,
}

/// Written by the executing peer before it runs a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionEntry {
    pub method: ByteString,
    pub in_reply_to: MessageId,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageBody {
    Declaration(Declaration),
    Request(RequestEntry),
    Response(ResponseEntry),
    Execution(ExecutionEntry),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub id: MessageId,
    pub body: MessageBody,
    pub signature: Option<Bytes>,
}

impl Message {
    pub fn new(id: MessageId, body: MessageBody) -> Self {
        Self {
            id,
            body,
            signature: None,
        }
    }

    pub fn author(&self) -> PeerId {
        self.id.author
    }

    pub fn kind(&self) -> MessageKind {
        match &self.body {
            MessageBody::Declaration(_) => MessageKind::Declaration,
            MessageBody::Request(_) => MessageKind::Request,
            MessageBody::Response(_) => MessageKind::Response,
            MessageBody::Execution(_) => MessageKind::Execution,
        }
    }

    pub fn method(&self) -> Option<&str> {
        match &self.body {
            MessageBody::Declaration(_) => None,
            MessageBody::Request(request) => Some(&*request.method),
            MessageBody::Response(response) => Some(&*response.method),
            MessageBody::Execution(execution) => Some(&*execution.method),
        }
    }

    pub fn in_reply_to(&self) -> Option<MessageId> {
        match &self.body {
            MessageBody::Response(response) => Some(response.in_reply_to),
            MessageBody::Execution(execution) => Some(execution.in_reply_to),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn declaration() -> Declaration {
        Declaration {
            types: BTreeMap::from([(
                "ReplicateRequest".to_string(),
                Shape::object([("peerId", Shape::String), ("address", Shape::String)]),
            )]),
            methods: BTreeMap::from([(
                "createReplicate".to_string(),
                MethodShape::new(["ReplicateRequest"], ["string"]),
            )]),
        }
    }

    #[test]
    fn validates_against_declared_types() {
        let declaration = declaration();
        declaration
            .validate_params("createReplicate", &json!({"peerId": "a", "address": "b"}))
            .unwrap();
        assert!(matches!(
            declaration.validate_params("createReplicate", &json!({"peerId": "a"})),
            Err(Error::SchemaViolation { .. })
        ));
        assert!(matches!(
            declaration.validate_params("dropReplicate", &json!(null)),
            Err(Error::UnknownName(name)) if name == "dropReplicate"
        ));
    }

    #[test]
    fn kind_and_reply_reference() {
        let author = PeerId::from_bytes([3; 32]);
        let request_id = MessageId::new(PeerId::from_bytes([4; 32]), 0);
        let message = Message::new(
            MessageId::new(author, 1),
            MessageBody::Response(ResponseEntry {
                method: "createReplicate".into(),
                in_reply_to: request_id,
                result: ResponseResult::Success(json!("ok")),
            }),
        );
        assert_eq!(message.kind(), MessageKind::Response);
        assert_eq!(message.kind().to_string(), "Response");
        assert_eq!(message.author(), author);
        assert_eq!(message.in_reply_to(), Some(request_id));
        assert_eq!(message.method(), Some("createReplicate"));
    }
}
