use bytes::Bytes;
use kappa_rpc_types::{
    message::{ExecutionEntry, RequestEntry, ResponseEntry},
    Declaration, Error, InvocationError, Message, MessageBody, MessageId, MethodShape, PeerId, ResponseResult,
};
use prost::Message as _;
use tracing::trace;

use crate::{
    identity::{verify_signature, PeerIdentity},
    wire::{
        body_message, response_message, BodyMessage, DeclarationMessage, EnvelopeMessage, ExecutionMessage, Failure,
        MessageRef, MethodDeclaration, RequestMessage, ResponseMessage, TypeDeclaration,
    },
};

/// Version written into every envelope. Entries with any other version are rejected.
pub const PROTOCOL_VERSION: u32 = 1;

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("protobuf decode: {0}")]
    Decode(#[from] prost::DecodeError),
    #[error("unsupported protocol version {0}")]
    UnsupportedVersion(u32),
    #[error("missing field '{0}'")]
    MissingField(&'static str),
    #[error("invalid json in '{field}': {source}")]
    Json {
        field: &'static str,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid peer id in '{0}'")]
    PeerId(&'static str),
    #[error("failure code {0} out of range")]
    FailureCode(u32),
    #[error("signature does not verify against author {0}")]
    BadSignature(PeerId),
}

impl From<CodecError> for Error {
    fn from(value: CodecError) -> Self {
        Error::MalformedMessage(value.to_string())
    }
}

/// Turns messages into log entry bytes, signing the ones authored by the
/// configured identity.
#[derive(Debug, Clone, Default)]
pub struct Encoder {
    signer: Option<PeerIdentity>,
}

impl Encoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn signed(identity: PeerIdentity) -> Self {
        Self { signer: Some(identity) }
    }

    pub fn encode(&self, message: &Message) -> Result<Bytes, CodecError> {
        let body: Bytes = body_to_wire(message)?.encode_to_vec().into();
        let signature = match (&message.signature, &self.signer) {
            (Some(signature), _) => Some(signature.clone()),
            (None, Some(signer)) if signer.peer_id() == message.author() => {
                Some(Bytes::copy_from_slice(&signer.sign(&body)))
            }
            _ => None,
        };
        trace!("Encoded {} {} signed: {}", message.kind(), message.id, signature.is_some());
        Ok(EnvelopeMessage {
            version: PROTOCOL_VERSION,
            body,
            signature,
        }
        .encode_to_vec()
        .into())
    }
}

/// Turns log entry bytes back into messages. Either the whole entry decodes or
/// an error is returned; there is no partial result.
#[derive(Debug, Clone, Copy)]
pub struct Decoder {
    verify_signatures: bool,
}

impl Default for Decoder {
    fn default() -> Self {
        Self {
            verify_signatures: true,
        }
    }
}

impl Decoder {
    pub fn new(verify_signatures: bool) -> Self {
        Self { verify_signatures }
    }

    pub fn decode(&self, data: Bytes) -> Result<Message, CodecError> {
        let envelope = EnvelopeMessage::decode(data)?;
        if envelope.version != PROTOCOL_VERSION {
            return Err(CodecError::UnsupportedVersion(envelope.version));
        }
        let body = BodyMessage::decode(envelope.body.clone())?;
        let author = peer_id(&body.author, "author")?;
        let seq = body.seq;
        if let (true, Some(signature)) = (self.verify_signatures, envelope.signature.as_ref()) {
            if !verify_signature(&author, &envelope.body, signature) {
                return Err(CodecError::BadSignature(author));
            }
        }
        let kind = body.kind.ok_or(CodecError::MissingField("kind"))?;
        let body = match kind {
            body_message::Kind::Declaration(declaration) => MessageBody::Declaration(declaration_from_wire(declaration)?),
            body_message::Kind::Request(request) => MessageBody::Request(RequestEntry {
                method: request.method.into(),
                payload: json_from_wire(&request.payload, "payload")?,
                target: request.target.as_deref().map(|t| peer_id(t, "target")).transpose()?,
                created_at: request.created_at,
            }),
            body_message::Kind::Response(response) => {
                let result = match response.result.ok_or(CodecError::MissingField("result"))? {
                    response_message::Result::Value(value) => ResponseResult::Success(json_from_wire(&value, "value")?),
                    response_message::Result::Failure(failure) => {
                        let code = u16::try_from(failure.code).map_err(|_| CodecError::FailureCode(failure.code))?;
                        ResponseResult::Failure(InvocationError::new(code, failure.message))
                    }
                };
                MessageBody::Response(ResponseEntry {
                    method: response.method.into(),
                    in_reply_to: message_ref_from_wire(response.in_reply_to)?,
                    result,
                })
            }
            body_message::Kind::Execution(execution) => MessageBody::Execution(ExecutionEntry {
                method: execution.method.into(),
                in_reply_to: message_ref_from_wire(execution.in_reply_to)?,
            }),
        };
        Ok(Message {
            id: MessageId::new(author, seq),
            body,
            signature: envelope.signature,
        })
    }
}

fn body_to_wire(message: &Message) -> Result<BodyMessage, CodecError> {
    let kind = match &message.body {
        MessageBody::Declaration(declaration) => body_message::Kind::Declaration(declaration_to_wire(declaration)?),
        MessageBody::Request(request) => body_message::Kind::Request(RequestMessage {
            method: request.method.to_string(),
            payload: json_to_wire(&request.payload, "payload")?,
            target: request
                .target
                .map(|target| Bytes::copy_from_slice(target.as_bytes())),
            created_at: request.created_at,
        }),
        MessageBody::Response(response) => body_message::Kind::Response(ResponseMessage {
            method: response.method.to_string(),
            in_reply_to: Some(message_ref_to_wire(&response.in_reply_to)),
            result: Some(match &response.result {
                ResponseResult::Success(value) => response_message::Result::Value(json_to_wire(value, "value")?),
                ResponseResult::Failure(failure) => response_message::Result::Failure(Failure {
                    code: failure.code.into(),
                    message: failure.message.to_string(),
                }),
            }),
        }),
        MessageBody::Execution(execution) => body_message::Kind::Execution(ExecutionMessage {
            method: execution.method.to_string(),
            in_reply_to: Some(message_ref_to_wire(&execution.in_reply_to)),
        }),
    };
    Ok(BodyMessage {
        author: Bytes::copy_from_slice(message.id.author.as_bytes()),
        seq: message.id.seq,
        kind: Some(kind),
    })
}

fn declaration_to_wire(declaration: &Declaration) -> Result<DeclarationMessage, CodecError> {
    let types = declaration
        .types
        .iter()
        .map(|(name, shape)| {
            let shape = serde_json::to_vec(shape).map_err(|source| CodecError::Json { field: "shape", source })?;
            Ok(TypeDeclaration {
                name: name.clone(),
                shape: shape.into(),
            })
        })
        .collect::<Result<Vec<_>, CodecError>>()?;
    let methods = declaration
        .methods
        .iter()
        .map(|(name, shape)| MethodDeclaration {
            name: name.clone(),
            params: shape.params.clone(),
            returns: shape.returns.clone(),
        })
        .collect();
    Ok(DeclarationMessage { types, methods })
}

fn declaration_from_wire(message: DeclarationMessage) -> Result<Declaration, CodecError> {
    let mut declaration = Declaration::default();
    for ty in message.types {
        let shape = serde_json::from_slice(&ty.shape).map_err(|source| CodecError::Json { field: "shape", source })?;
        declaration.types.insert(ty.name, shape);
    }
    for method in message.methods {
        declaration.methods.insert(
            method.name,
            MethodShape {
                params: method.params,
                returns: method.returns,
            },
        );
    }
    Ok(declaration)
}

fn message_ref_to_wire(id: &MessageId) -> MessageRef {
    MessageRef {
        author: Bytes::copy_from_slice(id.author.as_bytes()),
        seq: id.seq,
    }
}

fn message_ref_from_wire(reference: Option<MessageRef>) -> Result<MessageId, CodecError> {
    let reference = reference.ok_or(CodecError::MissingField("in_reply_to"))?;
    Ok(MessageId::new(peer_id(&reference.author, "in_reply_to")?, reference.seq))
}

fn peer_id(bytes: &[u8], field: &'static str) -> Result<PeerId, CodecError> {
    PeerId::from_slice(bytes).map_err(|_| CodecError::PeerId(field))
}

fn json_to_wire(value: &serde_json::Value, field: &'static str) -> Result<Bytes, CodecError> {
    serde_json::to_vec(value)
        .map(Bytes::from)
        .map_err(|source| CodecError::Json { field, source })
}

fn json_from_wire(bytes: &[u8], field: &'static str) -> Result<serde_json::Value, CodecError> {
    serde_json::from_slice(bytes).map_err(|source| CodecError::Json { field, source })
}

#[cfg(test)]
mod tests {
    use super::*;

    use assert2::{check, let_assert};
    use kappa_rpc_types::Shape;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::collections::BTreeMap;

    fn request(author: PeerId) -> Message {
        Message::new(
            MessageId::new(author, 7),
            MessageBody::Request(RequestEntry {
                method: "createReplicate".into(),
                payload: json!({"peerId": "4eeb77c9", "address": "b03d6e7f"}),
                target: None,
                created_at: 1_700_000_000_000,
            }),
        )
    }

    #[test]
    fn signed_request_is_verified_on_decode() {
        let identity = PeerIdentity::generate();
        let bytes = Encoder::signed(identity.clone()).encode(&request(identity.peer_id())).unwrap();

        let decoded = Decoder::default().decode(bytes).unwrap();
        check!(decoded.signature.is_some());
        check!(decoded.id == MessageId::new(identity.peer_id(), 7));
        assert_eq!(decoded.body, request(identity.peer_id()).body);
    }

    #[test]
    fn foreign_messages_are_not_signed() {
        let identity = PeerIdentity::generate();
        let other = PeerIdentity::generate().peer_id();
        let bytes = Encoder::signed(identity).encode(&request(other)).unwrap();
        check!(Decoder::default().decode(bytes).unwrap().signature.is_none());
    }

    #[test]
    fn tampered_body_fails_verification() {
        let identity = PeerIdentity::generate();
        let bytes = Encoder::signed(identity.clone()).encode(&request(identity.peer_id())).unwrap();
        let mut envelope = EnvelopeMessage::decode(bytes).unwrap();
        let mut body = BodyMessage::decode(envelope.body.clone()).unwrap();
        body.seq = 8;
        envelope.body = body.encode_to_vec().into();
        let tampered: Bytes = envelope.encode_to_vec().into();

        let_assert!(Err(CodecError::BadSignature(author)) = Decoder::default().decode(tampered.clone()));
        check!(author == identity.peer_id());
        // Verification can be switched off.
        check!(Decoder::new(false).decode(tampered).is_ok());
    }

    #[test]
    fn declaration_keeps_shapes() {
        let author = PeerId::from_bytes([9; 32]);
        let declaration = Declaration {
            types: BTreeMap::from([(
                "ReplicateRequest".to_string(),
                Shape::object([("peerId", Shape::String), ("address", Shape::String)]),
            )]),
            methods: BTreeMap::from([(
                "createReplicate".to_string(),
                MethodShape::new(["ReplicateRequest"], ["Signature"]),
            )]),
        };
        let message = Message::new(MessageId::new(author, 0), MessageBody::Declaration(declaration.clone()));
        let decoded = Decoder::default().decode(Encoder::new().encode(&message).unwrap()).unwrap();
        let_assert!(MessageBody::Declaration(decoded) = decoded.body);
        assert_eq!(decoded, declaration);
    }

    #[test]
    fn failure_response_keeps_code() {
        let author = PeerId::from_bytes([9; 32]);
        let message = Message::new(
            MessageId::new(author, 3),
            MessageBody::Response(ResponseEntry {
                method: "createReplicate".into(),
                in_reply_to: MessageId::new(PeerId::from_bytes([1; 32]), 0),
                result: ResponseResult::Failure(InvocationError::interrupted()),
            }),
        );
        let decoded = Decoder::default().decode(Encoder::new().encode(&message).unwrap()).unwrap();
        assert_eq!(decoded, message);
    }

    #[test]
    fn rejects_unknown_version() {
        let bytes: Bytes = EnvelopeMessage {
            version: 9,
            body: Bytes::new(),
            signature: None,
        }
        .encode_to_vec()
        .into();
        let_assert!(Err(CodecError::UnsupportedVersion(9)) = Decoder::default().decode(bytes));
    }

    #[test]
    fn response_without_reference_is_malformed() {
        let body = BodyMessage {
            author: Bytes::copy_from_slice(&[1; 32]),
            seq: 0,
            kind: Some(body_message::Kind::Response(ResponseMessage {
                method: "m".to_string(),
                in_reply_to: None,
                result: Some(response_message::Result::Value(Bytes::from_static(b"null"))),
            })),
        };
        let bytes: Bytes = EnvelopeMessage {
            version: PROTOCOL_VERSION,
            body: body.encode_to_vec().into(),
            signature: None,
        }
        .encode_to_vec()
        .into();
        let_assert!(Err(err @ CodecError::MissingField("in_reply_to")) = Decoder::default().decode(bytes));
        check!(matches!(Error::from(err), Error::MalformedMessage(_)));
    }

    #[test]
    fn garbage_is_rejected() {
        let_assert!(Err(CodecError::Decode(_)) = Decoder::default().decode(Bytes::from_static(&[0xff, 0xff, 0xff])));
    }
}
