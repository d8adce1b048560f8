//! Structural payload descriptions.
//!
//! A [`Shape`] only validates; it says nothing about how a payload is framed on
//! the wire. Named shapes are resolved through a [`TypeTable`], which is either
//! the local registry or the type table of a remote declaration.

use std::{
    collections::{BTreeMap, BTreeSet, HashMap},
    fmt,
};

use serde::{Deserialize, Serialize};
use serde_json::Value;

const MAX_DEPTH: usize = 128;

pub const BUILTIN_TYPES: [&str; 6] = ["any", "null", "bool", "integer", "number", "string"];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "of", rename_all = "lowercase")]
pub enum Shape {
    Any,
    Null,
    Bool,
    Integer,
    Number,
    String,
    Array(Box<Shape>),
    Tuple(Vec<Shape>),
    Optional(Box<Shape>),
    Object(BTreeMap<String, Shape>),
    Named(String),
}

pub trait TypeTable {
    fn resolve(&self, name: &str) -> Option<&Shape>;
}

impl TypeTable for BTreeMap<String, Shape> {
    fn resolve(&self, name: &str) -> Option<&Shape> {
        self.get(name)
    }
}

impl TypeTable for HashMap<String, Shape> {
    fn resolve(&self, name: &str) -> Option<&Shape> {
        self.get(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShapeMismatch {
    pub path: String,
    pub expected: String,
}

impl fmt::Display for ShapeMismatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "at {}: expected {}", self.path, self.expected)
    }
}

impl std::error::Error for ShapeMismatch {}

impl Shape {
    pub fn object<I, K>(fields: I) -> Self
    where
        I: IntoIterator<Item = (K, Shape)>,
        K: Into<String>,
    {
        Shape::Object(fields.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    pub fn named(name: impl Into<String>) -> Self {
        Shape::Named(name.into())
    }

    pub fn optional(inner: Shape) -> Self {
        Shape::Optional(Box::new(inner))
    }

    pub fn array(item: Shape) -> Self {
        Shape::Array(Box::new(item))
    }

    pub fn builtin(name: &str) -> Option<Shape> {
        match name {
            "any" => Some(Shape::Any),
            "null" => Some(Shape::Null),
            "bool" => Some(Shape::Bool),
            "integer" => Some(Shape::Integer),
            "number" => Some(Shape::Number),
            "string" => Some(Shape::String),
            _ => None,
        }
    }

    /// Payload shape of a method taking (or returning) the given type names.
    ///
    /// `[]` is `null`, `[T]` is `T` itself, anything longer is a tuple.
    pub fn for_signature(type_names: &[String]) -> Shape {
        match type_names {
            [] => Shape::Null,
            [single] => Shape::Named(single.clone()),
            many => Shape::Tuple(many.iter().cloned().map(Shape::Named).collect()),
        }
    }

    /// Type names this shape refers to, excluding builtins.
    pub fn references(&self, out: &mut BTreeSet<String>) {
        match self {
            Shape::Named(name) => {
                if Shape::builtin(name).is_none() {
                    out.insert(name.clone());
                }
            }
            Shape::Array(inner) | Shape::Optional(inner) => inner.references(out),
            Shape::Tuple(items) => items.iter().for_each(|s| s.references(out)),
            Shape::Object(fields) => fields.values().for_each(|s| s.references(out)),
            _ => {}
        }
    }

    pub fn validate(&self, value: &Value, types: &dyn TypeTable) -> Result<(), ShapeMismatch> {
        self.check(value, types, &mut String::from("$"), 0)
    }

    fn check(&self, value: &Value, types: &dyn TypeTable, path: &mut String, depth: usize) -> Result<(), ShapeMismatch> {
        if depth > MAX_DEPTH {
            return Err(mismatch(path, "a shape with bounded nesting"));
        }
        match (self, value) {
            (Shape::Any, _) => Ok(()),
            (Shape::Null, Value::Null) => Ok(()),
            (Shape::Bool, Value::Bool(_)) => Ok(()),
            (Shape::Integer, Value::Number(n)) if n.is_i64() || n.is_u64() => Ok(()),
            (Shape::Number, Value::Number(_)) => Ok(()),
            (Shape::String, Value::String(_)) => Ok(()),
            (Shape::Optional(_), Value::Null) => Ok(()),
            (Shape::Optional(inner), value) => inner.check(value, types, path, depth + 1),
            (Shape::Array(item), Value::Array(values)) => {
                for (i, value) in values.iter().enumerate() {
                    nested(path, &format!("[{i}]"), |path| item.check(value, types, path, depth + 1))?;
                }
                Ok(())
            }
            (Shape::Tuple(items), Value::Array(values)) => {
                if items.len() != values.len() {
                    return Err(mismatch(path, &format!("{} elements, got {}", items.len(), values.len())));
                }
                for (i, (item, value)) in items.iter().zip(values).enumerate() {
                    nested(path, &format!("[{i}]"), |path| item.check(value, types, path, depth + 1))?;
                }
                Ok(())
            }
            (Shape::Object(fields), Value::Object(map)) => {
                for (name, field) in fields {
                    match map.get(name) {
                        Some(value) => {
                            nested(path, &format!(".{name}"), |path| field.check(value, types, path, depth + 1))?
                        }
                        None if field.may_be_absent(types, depth + 1) => {}
                        None => return Err(mismatch(path, &format!("required field '{name}'"))),
                    }
                }
                if let Some(extra) = map.keys().find(|k| !fields.contains_key(k.as_str())) {
                    return Err(mismatch(path, &format!("no field '{extra}'")));
                }
                Ok(())
            }
            (Shape::Named(name), value) => match Shape::builtin(name) {
                Some(builtin) => builtin.check(value, types, path, depth + 1),
                None => match types.resolve(name) {
                    Some(shape) => shape.check(value, types, path, depth + 1),
                    None => Err(mismatch(path, &format!("declared type '{name}'"))),
                },
            },
            (expected, _) => Err(mismatch(path, &expected.to_string())),
        }
    }
}

impl Shape {
    /// Whether an object field of this shape may be left out, following
    /// named types to what they resolve to.
    fn may_be_absent(&self, types: &dyn TypeTable, depth: usize) -> bool {
        match self {
            Shape::Optional(_) => true,
            Shape::Named(name) if depth <= MAX_DEPTH => types
                .resolve(name)
                .is_some_and(|shape| shape.may_be_absent(types, depth + 1)),
            _ => false,
        }
    }
}

fn nested<F>(path: &mut String, segment: &str, f: F) -> Result<(), ShapeMismatch>
where
    F: FnOnce(&mut String) -> Result<(), ShapeMismatch>,
{
    let len = path.len();
    path.push_str(segment);
    let result = f(path);
    path.truncate(len);
    result
}

fn mismatch(path: &str, expected: &str) -> ShapeMismatch {
    ShapeMismatch {
        path: path.to_string(),
        expected: expected.to_string(),
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Shape::Any => f.write_str("any"),
            Shape::Null => f.write_str("null"),
            Shape::Bool => f.write_str("bool"),
            Shape::Integer => f.write_str("integer"),
            Shape::Number => f.write_str("number"),
            Shape::String => f.write_str("string"),
            Shape::Array(item) => write!(f, "[{item}]"),
            Shape::Tuple(items) => {
                f.write_str("(")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str(")")
            }
            Shape::Optional(inner) => write!(f, "{inner}?"),
            Shape::Object(fields) => {
                f.write_str("{")?;
                for (i, (name, shape)) in fields.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{name}: {shape}")?;
                }
                f.write_str("}")
            }
            Shape::Named(name) => f.write_str(name),
        }
    }
}
