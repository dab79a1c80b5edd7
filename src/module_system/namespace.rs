// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Live binding slots, environment records and exports namespaces
//!
//! A [`Slot`] is one level of indirection around a value. Linking never copies
//! values: an import, an export and a re-export of the same binding all hold
//! the same slot, so a later assignment is observed everywhere.

use crate::error::{CompartmentError, Result};
use crate::value::{Object, Value};
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// A shared, possibly uninitialized value cell.
#[derive(Clone, Default)]
pub struct Slot(Arc<RwLock<Option<Value>>>);

impl Slot {
    /// Create an uninitialized slot
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a slot holding `value`
    pub fn with_value(value: Value) -> Self {
        Self(Arc::new(RwLock::new(Some(value))))
    }

    /// Current value, or `None` while uninitialized
    pub fn get(&self) -> Option<Value> {
        self.0.read().clone()
    }

    /// Current value of the binding `name` held by this slot
    pub fn read(&self, name: &str) -> Result<Value> {
        self.get().ok_or_else(|| CompartmentError::Uninitialized {
            name: name.to_string(),
        })
    }

    /// Assign the slot
    pub fn set(&self, value: Value) {
        *self.0.write() = Some(value);
    }

    /// Whether the slot was ever assigned
    pub fn is_initialized(&self) -> bool {
        self.0.read().is_some()
    }

    /// Identity comparison
    pub fn ptr_eq(&self, other: &Slot) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.get() {
            Some(value) => write!(f, "Slot({:?})", value),
            None => write!(f, "Slot(<uninitialized>)"),
        }
    }
}

#[derive(Clone)]
struct EnvEntry {
    slot: Slot,
    writable: bool,
}

/// Per-module scope mapping local names to live slots.
///
/// Imported names are read-only. Assigning an unknown name declares a new
/// local binding.
#[derive(Clone, Default)]
pub struct Environment {
    bindings: Arc<RwLock<FxHashMap<String, EnvEntry>>>,
}

impl Environment {
    /// Create an empty environment
    pub fn new() -> Self {
        Self::default()
    }

    /// Read a binding
    pub fn get(&self, name: &str) -> Result<Value> {
        let slot = self
            .slot(name)
            .ok_or_else(|| CompartmentError::UnknownBinding {
                name: name.to_string(),
            })?;
        slot.read(name)
    }

    /// Assign a local binding, declaring it if needed
    pub fn set(&self, name: &str, value: impl Into<Value>) -> Result<()> {
        let mut bindings = self.bindings.write();
        match bindings.get(name) {
            Some(entry) if !entry.writable => Err(CompartmentError::ReadOnlyBinding {
                name: name.to_string(),
            }),
            Some(entry) => {
                entry.slot.set(value.into());
                Ok(())
            }
            None => {
                bindings.insert(
                    name.to_string(),
                    EnvEntry {
                        slot: Slot::with_value(value.into()),
                        writable: true,
                    },
                );
                Ok(())
            }
        }
    }

    /// Check whether `name` is bound
    pub fn has(&self, name: &str) -> bool {
        self.bindings.read().contains_key(name)
    }

    /// Whether `name` is an imported, read-only binding
    pub fn is_import(&self, name: &str) -> bool {
        self.bindings
            .read()
            .get(name)
            .map(|entry| !entry.writable)
            .unwrap_or(false)
    }

    /// Bound names in sorted order
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.bindings.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// The slot behind `name`
    pub fn slot(&self, name: &str) -> Option<Slot> {
        self.bindings.read().get(name).map(|entry| entry.slot.clone())
    }

    /// Install a writable local slot
    pub(crate) fn declare(&self, name: &str, slot: Slot) {
        self.bindings
            .write()
            .entry(name.to_string())
            .or_insert(EnvEntry {
                slot,
                writable: true,
            });
    }

    /// Install a read-only slot shared with another module
    pub(crate) fn bind_import(&self, name: &str, slot: Slot) {
        self.bindings.write().insert(
            name.to_string(),
            EnvEntry {
                slot,
                writable: false,
            },
        );
    }
}

impl fmt::Debug for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Environment")
            .field("names", &self.names())
            .finish()
    }
}

struct NamespaceInner {
    key: String,
    exports: RwLock<BTreeMap<String, Slot>>,
    snapshot: bool,
}

/// The identity-stable object through which a module's exports are observed.
///
/// Property reads go through the exporter's slots, so they are live. A
/// snapshot namespace (see [`ModuleNamespace::snapshot`]) holds private copies
/// instead.
#[derive(Clone)]
pub struct ModuleNamespace {
    inner: Arc<NamespaceInner>,
}

impl ModuleNamespace {
    /// Create an empty namespace for `key`
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(NamespaceInner {
                key: key.into(),
                exports: RwLock::new(BTreeMap::new()),
                snapshot: false,
            }),
        }
    }

    /// Freeze the current properties of `object` into a namespace.
    ///
    /// Later writes to `object` are not observed.
    pub fn snapshot(key: impl Into<String>, object: &Object) -> Self {
        let exports = object
            .entries()
            .into_iter()
            .map(|(name, value)| (name, Slot::with_value(value)))
            .collect();
        Self {
            inner: Arc::new(NamespaceInner {
                key: key.into(),
                exports: RwLock::new(exports),
                snapshot: true,
            }),
        }
    }

    /// Key of the module that owns this namespace
    pub fn key(&self) -> &str {
        &self.inner.key
    }

    /// Read an export. Absent names read as undefined.
    pub fn get(&self, name: &str) -> Result<Value> {
        match self.slot(name) {
            Some(slot) => slot.read(name),
            None => Ok(Value::Undefined),
        }
    }

    /// Check whether `name` is exported
    pub fn has(&self, name: &str) -> bool {
        self.inner.exports.read().contains_key(name)
    }

    /// Exported names in sorted order
    pub fn keys(&self) -> Vec<String> {
        self.inner.exports.read().keys().cloned().collect()
    }

    /// Number of exports
    pub fn len(&self) -> usize {
        self.inner.exports.read().len()
    }

    /// Whether nothing is exported
    pub fn is_empty(&self) -> bool {
        self.inner.exports.read().is_empty()
    }

    /// The live slot behind an export
    pub fn slot(&self, name: &str) -> Option<Slot> {
        self.inner.exports.read().get(name).cloned()
    }

    /// Whether this namespace was frozen from a plain object
    pub fn is_snapshot(&self) -> bool {
        self.inner.snapshot
    }

    /// Identity comparison
    pub fn ptr_eq(&self, other: &ModuleNamespace) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub(crate) fn define(&self, name: &str, slot: Slot) {
        self.inner.exports.write().insert(name.to_string(), slot);
    }
}

impl fmt::Debug for ModuleNamespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Exports may be cyclic through nested namespaces; print names only.
        f.debug_struct("ModuleNamespace")
            .field("key", &self.inner.key)
            .field("exports", &self.keys())
            .finish()
    }
}
