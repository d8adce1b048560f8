//! Local method and type declarations.
//!
//! Built once at startup with [`Registry::builder`] and frozen afterwards.
//! Methods registered through [`RegistryBuilder::implement`] carry an executor
//! and are the only ones the dispatcher reacts to. Methods registered through
//! [`RegistryBuilder::declare`] are known by shape only, so the peer can call
//! them and announce them.

use std::{
    collections::{BTreeMap, BTreeSet},
    sync::Arc,
};

use futures::{future::BoxFuture, FutureExt};
use kappa_rpc_core::MethodHandler;
use kappa_rpc_types::{
    errors::codes, Declaration, Error, InvocationError, MethodShape, Shape, TypeTable,
};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;

use crate::context::Context;

pub(crate) type Executor = Arc<dyn Fn(Context, Value) -> BoxFuture<'static, Result<Value, InvocationError>> + Send + Sync>;

/// What [`Registry::describe`] returns for a name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShapeDescriptor {
    Method(MethodShape),
    Type(Shape),
}

struct MethodRecord {
    shape: MethodShape,
    executor: Option<Executor>,
}

pub struct Registry {
    types: BTreeMap<String, Shape>,
    methods: BTreeMap<String, MethodRecord>,
}

#[derive(Default)]
pub struct RegistryBuilder {
    types: BTreeMap<String, Shape>,
    methods: BTreeMap<String, MethodRecord>,
}

impl RegistryBuilder {
    pub fn with_type(mut self, name: impl Into<String>, shape: Shape) -> Self {
        self.types.insert(name.into(), shape);
        self
    }

    /// Declares a method this peer knows the shape of but does not execute.
    pub fn declare(mut self, name: impl Into<String>, shape: MethodShape) -> Self {
        self.methods.insert(name.into(), MethodRecord { shape, executor: None });
        self
    }

    /// Declares a method and the executor that runs it on this peer.
    ///
    /// The payload is deserialized into `I`. A payload that does not
    /// deserialize fails with `INVALID_ARGUMENT`, an executor error with
    /// `INTERNAL`.
    pub fn implement<F, I, O>(mut self, name: impl Into<String>, shape: MethodShape, handler: F) -> Self
    where
        F: MethodHandler<Context, I, Output = anyhow::Result<O>> + Send + Sync + 'static,
        I: DeserializeOwned + Send + 'static,
        O: Serialize + Send + 'static,
    {
        let handler = Arc::new(handler);
        let executor: Executor = Arc::new(move |ctx: Context, payload: Value| {
            let handler = handler.clone();
            // The handler is only called once the future is polled, so a
            // panic while it builds its future unwinds into the poller.
            async move {
                let input = serde_json::from_value::<I>(payload)
                    .map_err(|err| InvocationError::new(codes::INVALID_ARGUMENT, err.to_string()))?;
                let output = handler(ctx, input)
                    .await
                    .map_err(|err| InvocationError::internal(format!("{err:#}")))?;
                serde_json::to_value(output).map_err(|err| InvocationError::new(codes::INVALID_RESULT, err.to_string()))
            }
            .boxed()
        });
        self.methods.insert(
            name.into(),
            MethodRecord {
                shape,
                executor: Some(executor),
            },
        );
        self
    }

    /// Freezes the registry. Every type name referenced by a method or another
    /// type must be declared or builtin.
    pub fn build(self) -> Result<Registry, Error> {
        let mut references = BTreeSet::new();
        for shape in self.types.values() {
            shape.references(&mut references);
        }
        for record in self.methods.values() {
            record.shape.params_shape().references(&mut references);
            record.shape.returns_shape().references(&mut references);
        }
        if let Some(missing) = references.into_iter().find(|name| !self.types.contains_key(name)) {
            return Err(Error::UnknownName(missing));
        }
        Ok(Registry {
            types: self.types,
            methods: self.methods,
        })
    }
}

impl Registry {
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::default()
    }

    /// Shape of a declared method or type. Builtin type names always resolve.
    pub fn describe(&self, name: &str) -> Result<ShapeDescriptor, Error> {
        if let Some(record) = self.methods.get(name) {
            return Ok(ShapeDescriptor::Method(record.shape.clone()));
        }
        if let Some(shape) = self.types.get(name) {
            return Ok(ShapeDescriptor::Type(shape.clone()));
        }
        Shape::builtin(name)
            .map(ShapeDescriptor::Type)
            .ok_or_else(|| Error::UnknownName(name.to_string()))
    }

    pub fn is_locally_implemented(&self, method: &str) -> bool {
        self.methods.get(method).is_some_and(|record| record.executor.is_some())
    }

    pub fn method(&self, name: &str) -> Option<&MethodShape> {
        self.methods.get(name).map(|record| &record.shape)
    }

    pub(crate) fn executor(&self, method: &str) -> Option<Executor> {
        self.methods.get(method).and_then(|record| record.executor.clone())
    }

    pub fn validate_params(&self, method: &str, payload: &Value) -> Result<(), Error> {
        let shape = self.method(method).ok_or_else(|| Error::UnknownName(method.to_string()))?;
        shape
            .params_shape()
            .validate(payload, self)
            .map_err(|err| Error::schema(method, err.to_string()))
    }

    pub fn validate_returns(&self, method: &str, value: &Value) -> Result<(), Error> {
        let shape = self.method(method).ok_or_else(|| Error::UnknownName(method.to_string()))?;
        shape
            .returns_shape()
            .validate(value, self)
            .map_err(|err| Error::schema(method, err.to_string()))
    }

    /// The declaration this peer announces: every registered type and method.
    pub fn declaration(&self) -> Declaration {
        Declaration {
            types: self.types.clone(),
            methods: self
                .methods
                .iter()
                .map(|(name, record)| (name.clone(), record.shape.clone()))
                .collect(),
        }
    }
}

impl TypeTable for Registry {
    fn resolve(&self, name: &str) -> Option<&Shape> {
        self.types.get(name)
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("types", &self.types.keys().collect::<Vec<_>>())
            .field("methods", &self.methods.keys().collect::<Vec<_>>())
            .finish()
    }
}
