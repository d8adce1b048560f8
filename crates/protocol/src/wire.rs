//! Protobuf messages of the log entry format.
//!
//! Payloads and shapes travel as JSON bytes inside the protobuf fields.

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct EnvelopeMessage {
    #[prost(uint32, tag = "1")]
    pub version: u32,
    /// Encoded [`BodyMessage`]. The signature covers exactly these bytes.
    #[prost(bytes = "bytes", tag = "2")]
    pub body: ::prost::bytes::Bytes,
    #[prost(bytes = "bytes", optional, tag = "3")]
    pub signature: ::core::option::Option<::prost::bytes::Bytes>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct BodyMessage {
    #[prost(bytes = "bytes", tag = "1")]
    pub author: ::prost::bytes::Bytes,
    #[prost(uint64, tag = "2")]
    pub seq: u64,
    #[prost(oneof = "body_message::Kind", tags = "3, 4, 5, 6")]
    pub kind: ::core::option::Option<body_message::Kind>,
}

pub mod body_message {
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum Kind {
        #[prost(message, tag = "3")]
        Declaration(super::DeclarationMessage),
        #[prost(message, tag = "4")]
        Request(super::RequestMessage),
        #[prost(message, tag = "5")]
        Response(super::ResponseMessage),
        #[prost(message, tag = "6")]
        Execution(super::ExecutionMessage),
    }
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct DeclarationMessage {
    #[prost(message, repeated, tag = "1")]
    pub types: ::prost::alloc::vec::Vec<TypeDeclaration>,
    #[prost(message, repeated, tag = "2")]
    pub methods: ::prost::alloc::vec::Vec<MethodDeclaration>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct TypeDeclaration {
    #[prost(string, tag = "1")]
    pub name: ::prost::alloc::string::String,
    #[prost(bytes = "bytes", tag = "2")]
    pub shape: ::prost::bytes::Bytes,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct MethodDeclaration {
    #[prost(string, tag = "1")]
    pub name: ::prost::alloc::string::String,
    #[prost(string, repeated, tag = "2")]
    pub params: ::prost::alloc::vec::Vec<::prost::alloc::string::String>,
    #[prost(string, repeated, tag = "3")]
    pub returns: ::prost::alloc::vec::Vec<::prost::alloc::string::String>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct RequestMessage {
    #[prost(string, tag = "1")]
    pub method: ::prost::alloc::string::String,
    #[prost(bytes = "bytes", tag = "2")]
    pub payload: ::prost::bytes::Bytes,
    #[prost(bytes = "bytes", optional, tag = "3")]
    pub target: ::core::option::Option<::prost::bytes::Bytes>,
    #[prost(uint64, tag = "4")]
    pub created_at: u64,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct MessageRef {
    #[prost(bytes = "bytes", tag = "1")]
    pub author: ::prost::bytes::Bytes,
    #[prost(uint64, tag = "2")]
    pub seq: u64,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Failure {
    #[prost(uint32, tag = "1")]
    pub code: u32,
    #[prost(string, tag = "2")]
    pub message: ::prost::alloc::string::String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ResponseMessage {
    #[prost(string, tag = "1")]
    pub method: ::prost::alloc::string::String,
    #[prost(message, optional, tag = "2")]
    pub in_reply_to: ::core::option::Option<MessageRef>,
    #[prost(oneof = "response_message::Result", tags = "3, 4")]
    pub result: ::core::option::Option<response_message::Result>,
}

pub mod response_message {
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum Result {
        #[prost(bytes = "bytes", tag = "3")]
        Value(::prost::bytes::Bytes),
        #[prost(message, tag = "4")]
        Failure(super::Failure),
    }
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ExecutionMessage {
    #[prost(string, tag = "1")]
    pub method: ::prost::alloc::string::String,
    #[prost(message, optional, tag = "2")]
    pub in_reply_to: ::core::option::Option<MessageRef>,
}
