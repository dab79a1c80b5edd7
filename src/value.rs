// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Script value representation.
//!
//! Values are the currency exchanged through module bindings. Objects and
//! namespaces are reference types: cloning a [`Value::Object`] clones the
//! handle, not the properties, and equality on them is identity.

use crate::module_system::ModuleNamespace;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// A script value.
#[derive(Debug, Clone, Default)]
pub enum Value {
    /// undefined
    #[default]
    Undefined,
    /// null
    Null,
    /// Boolean value
    Boolean(bool),
    /// Number (IEEE 754 double)
    Number(f64),
    /// String
    String(String),
    /// Array of values
    Array(Vec<Value>),
    /// Ordinary object reference
    Object(Object),
    /// Module exports namespace reference
    Namespace(ModuleNamespace),
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Undefined, Value::Undefined) => true,
            (Value::Null, Value::Null) => true,
            (Value::Boolean(a), Value::Boolean(b)) => a == b,
            // NaN never equals itself
            (Value::Number(a), Value::Number(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Array(a), Value::Array(b)) => a == b,
            (Value::Object(a), Value::Object(b)) => a.ptr_eq(b),
            (Value::Namespace(a), Value::Namespace(b)) => a.ptr_eq(b),
            _ => false,
        }
    }
}

impl Value {
    /// Returns true if this value is undefined.
    pub fn is_undefined(&self) -> bool {
        matches!(self, Value::Undefined)
    }

    /// Returns true if this value is null or undefined.
    pub fn is_nullish(&self) -> bool {
        matches!(self, Value::Undefined | Value::Null)
    }

    /// Returns the number if this is a number value.
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// Returns the string slice if this is a string value.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the object handle if this is an object value.
    pub fn as_object(&self) -> Option<&Object> {
        match self {
            Value::Object(obj) => Some(obj),
            _ => None,
        }
    }

    /// Returns the namespace handle if this value passes the namespace brand
    /// check.
    pub fn as_namespace(&self) -> Option<&ModuleNamespace> {
        match self {
            Value::Namespace(ns) => Some(ns),
            _ => None,
        }
    }

    /// Returns the type of this value as a string.
    pub fn type_of(&self) -> &'static str {
        match self {
            Value::Undefined => "undefined",
            Value::Boolean(_) => "boolean",
            Value::Number(_) => "number",
            Value::String(_) => "string",
            Value::Null | Value::Array(_) | Value::Object(_) | Value::Namespace(_) => "object",
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Undefined => write!(f, "undefined"),
            Value::Null => write!(f, "null"),
            Value::Boolean(b) => write!(f, "{}", b),
            Value::Number(n) => write!(f, "{}", n),
            Value::String(s) => write!(f, "{}", s),
            Value::Array(items) => {
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ",")?;
                    }
                    write!(f, "{}", item)?;
                }
                Ok(())
            }
            Value::Object(_) => write!(f, "[object Object]"),
            Value::Namespace(_) => write!(f, "[object Module]"),
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Boolean(b)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Number(f64::from(n))
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<Object> for Value {
    fn from(obj: Object) -> Self {
        Value::Object(obj)
    }
}

impl From<ModuleNamespace> for Value {
    fn from(ns: ModuleNamespace) -> Self {
        Value::Namespace(ns)
    }
}

struct ObjectInner {
    properties: RwLock<BTreeMap<String, Value>>,
    frozen: AtomicBool,
}

/// A shared, mutable property bag with reference identity.
///
/// Objects have no prototype; every object behaves like one created from a
/// null prototype.
#[derive(Clone)]
pub struct Object {
    inner: Arc<ObjectInner>,
}

impl Object {
    /// Create an empty object
    pub fn new() -> Self {
        Self::from_map(BTreeMap::new())
    }

    /// Create an object owning the given properties
    pub fn from_map(properties: BTreeMap<String, Value>) -> Self {
        Self {
            inner: Arc::new(ObjectInner {
                properties: RwLock::new(properties),
                frozen: AtomicBool::new(false),
            }),
        }
    }

    /// Get a property
    pub fn get(&self, name: &str) -> Option<Value> {
        self.inner.properties.read().get(name).cloned()
    }

    /// Set a property. Returns false if the object is frozen.
    pub fn set(&self, name: impl Into<String>, value: impl Into<Value>) -> bool {
        if self.is_frozen() {
            return false;
        }
        self.inner.properties.write().insert(name.into(), value.into());
        true
    }

    /// Check whether a property exists
    pub fn has(&self, name: &str) -> bool {
        self.inner.properties.read().contains_key(name)
    }

    /// Property names in sorted order
    pub fn keys(&self) -> Vec<String> {
        self.inner.properties.read().keys().cloned().collect()
    }

    /// Copy of the current properties
    pub fn entries(&self) -> BTreeMap<String, Value> {
        self.inner.properties.read().clone()
    }

    /// Number of properties
    pub fn len(&self) -> usize {
        self.inner.properties.read().len()
    }

    /// Check if the object has no properties
    pub fn is_empty(&self) -> bool {
        self.inner.properties.read().is_empty()
    }

    /// Prevent further property writes
    pub fn freeze(&self) {
        self.inner.frozen.store(true, Ordering::Release);
    }

    /// Whether [`Object::freeze`] was called
    pub fn is_frozen(&self) -> bool {
        self.inner.frozen.load(Ordering::Acquire)
    }

    /// Identity comparison
    pub fn ptr_eq(&self, other: &Object) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Default for Object {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Object {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Object")
            .field("keys", &self.keys())
            .field("frozen", &self.is_frozen())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_object_identity() {
        let a = Object::new();
        let b = a.clone();
        let c = Object::new();
        assert_eq!(Value::Object(a.clone()), Value::Object(b));
        assert_ne!(Value::Object(a), Value::Object(c));
    }

    #[test]
    fn test_frozen_object_rejects_writes() {
        let obj = Object::new();
        assert!(obj.set("x", 1));
        obj.freeze();
        assert!(!obj.set("x", 2));
        assert_eq!(obj.get("x"), Some(Value::Number(1.0)));
    }

    #[test]
    fn test_nan_is_not_equal() {
        assert_ne!(Value::Number(f64::NAN), Value::Number(f64::NAN));
        assert_eq!(Value::from(3), Value::Number(3.0));
    }

    #[test]
    fn test_display() {
        assert_eq!(Value::Array(vec![1.into(), "a".into()]).to_string(), "1,a");
        assert_eq!(Value::Null.to_string(), "null");
        assert_eq!(Value::Object(Object::new()).to_string(), "[object Object]");
    }
}
