//! Field descriptors for graph nodes.
//!
//! Each node class declares its reference fields and property fields once,
//! statically, through [`OwnedFields`](crate::graph::OwnedFields). The graph
//! stores the field values; the descriptors tell it how to account for them.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// How a reference field contributes to its target's lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Ownership {
    /// The holder is meant to be the only owner; deep-copied when the holder is cloned.
    Exclusive,
    /// One of possibly many owners; the target lives as long as its longest holder.
    Shared,
    /// Relation only. Does not keep the target alive and may form cycles.
    Weak,
}

impl Ownership {
    #[inline]
    pub fn is_owning(self) -> bool {
        !matches!(self, Ownership::Weak)
    }
}

/// Static description of one reference field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReferenceFieldDescriptor {
    pub name: &'static str,
    pub ownership: Ownership,
    /// Ordered list of targets instead of a single optional target.
    pub is_vector: bool,
    /// Emit a propagating `TargetChanged` on the holder after every mutation.
    pub notifies_change: bool,
}

impl ReferenceFieldDescriptor {
    pub const fn single(name: &'static str, ownership: Ownership) -> Self {
        Self {
            name,
            ownership,
            is_vector: false,
            notifies_change: false,
        }
    }

    pub const fn vector(name: &'static str, ownership: Ownership) -> Self {
        Self {
            name,
            ownership,
            is_vector: true,
            notifies_change: false,
        }
    }

    pub const fn change_notifying(self) -> Self {
        Self {
            notifies_change: true,
            ..self
        }
    }
}

/// Plain value stored in a property field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PropertyValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl PropertyValue {
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            PropertyValue::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            PropertyValue::Int(v) => Some(*v),
            _ => None,
        }
    }

    /// Floats, with integers widened.
    pub fn as_float(&self) -> Option<f64> {
        match self {
            PropertyValue::Float(v) => Some(*v),
            PropertyValue::Int(v) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            PropertyValue::Text(v) => Some(v),
            _ => None,
        }
    }

    /// Whether both values carry the same variant.
    pub fn same_kind(&self, other: &PropertyValue) -> bool {
        std::mem::discriminant(self) == std::mem::discriminant(other)
    }
}

impl fmt::Display for PropertyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PropertyValue::Bool(v) => write!(f, "{}", v),
            PropertyValue::Int(v) => write!(f, "{}", v),
            PropertyValue::Float(v) => write!(f, "{}", v),
            PropertyValue::Text(v) => write!(f, "{:?}", v),
        }
    }
}

/// Compile-time default for a property field.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PropertyDefault {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(&'static str),
}

impl PropertyDefault {
    pub fn to_value(self) -> PropertyValue {
        match self {
            PropertyDefault::Bool(v) => PropertyValue::Bool(v),
            PropertyDefault::Int(v) => PropertyValue::Int(v),
            PropertyDefault::Float(v) => PropertyValue::Float(v),
            PropertyDefault::Text(v) => PropertyValue::Text(v.to_string()),
        }
    }
}

/// Static description of one property field.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PropertyFieldDescriptor {
    pub name: &'static str,
    pub default: PropertyDefault,
    pub notifies_change: bool,
}

impl PropertyFieldDescriptor {
    pub const fn new(name: &'static str, default: PropertyDefault) -> Self {
        Self {
            name,
            default,
            notifies_change: true,
        }
    }

    /// Changes to this property do not emit `TargetChanged`.
    pub const fn silent(self) -> Self {
        Self {
            notifies_change: false,
            ..self
        }
    }
}

/// Owned snapshot of a node's property values.
///
/// Algorithms running on worker threads receive one of these instead of
/// reaching back into the graph.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PropertyMap {
    values: BTreeMap<String, PropertyValue>,
}

impl PropertyMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, value: PropertyValue) {
        self.values.insert(name.into(), value);
    }

    pub fn get(&self, name: &str) -> Option<&PropertyValue> {
        self.values.get(name)
    }

    pub fn bool_or(&self, name: &str, fallback: bool) -> bool {
        self.get(name).and_then(PropertyValue::as_bool).unwrap_or(fallback)
    }

    pub fn int_or(&self, name: &str, fallback: i64) -> i64 {
        self.get(name).and_then(PropertyValue::as_int).unwrap_or(fallback)
    }

    pub fn float_or(&self, name: &str, fallback: f64) -> f64 {
        self.get(name).and_then(PropertyValue::as_float).unwrap_or(fallback)
    }

    pub fn text_or<'a>(&'a self, name: &str, fallback: &'a str) -> &'a str {
        self.get(name).and_then(PropertyValue::as_text).unwrap_or(fallback)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &PropertyValue)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v))
    }
}
