// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Module records
//!
//! A record is one module instance inside one compartment. It carries the
//! resolved dependency list, the environment record, the exports namespace and
//! the lifecycle phase. Records are shared by handle and never evicted.

use crate::error::{CompartmentError, Result};
use crate::module_system::descriptor::Initializer;
use crate::module_system::namespace::{Environment, ModuleNamespace};
use crate::module_system::Binding;
use crate::value::Value;
use futures::future::{BoxFuture, Shared};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Memoized completion of a record's execution
pub(crate) type ReadyFuture = Shared<BoxFuture<'static, Result<()>>>;

/// Lifecycle phase of a module record.
///
/// Transitions only move forward: `Loaded → Linking → Linked → Executing →
/// Ready | Failed`. Any non-terminal phase may move to `Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Phase {
    /// Dependencies resolved, nothing bound yet
    Loaded,
    /// Bindings are being resolved
    Linking,
    /// Bindings are live, body not run
    Linked,
    /// Body is running
    Executing,
    /// Body completed
    Ready,
    /// Linking or execution failed
    Failed,
}

impl Phase {
    /// Whether no further transition is possible
    pub fn is_terminal(self) -> bool {
        matches!(self, Phase::Ready | Phase::Failed)
    }

    /// Lowercase phase name
    pub fn as_str(self) -> &'static str {
        match self {
            Phase::Loaded => "loaded",
            Phase::Linking => "linking",
            Phase::Linked => "linked",
            Phase::Executing => "executing",
            Phase::Ready => "ready",
            Phase::Failed => "failed",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a record was built from
#[derive(Clone)]
pub(crate) enum RecordSource {
    /// Bindings plus a body
    Module {
        bindings: Vec<Binding>,
        initializer: Initializer,
        needs_import: bool,
        needs_import_meta: bool,
        import_meta: BTreeMap<String, Value>,
    },
    /// An aliased namespace; nothing to link or run
    Namespace,
}

struct RecordState {
    phase: Phase,
    error: Option<CompartmentError>,
    ready: Option<ReadyFuture>,
}

struct RecordInner {
    key: String,
    compartment: String,
    source: RecordSource,
    requests: Vec<(String, String)>,
    environment: Environment,
    namespace: ModuleNamespace,
    state: Mutex<RecordState>,
}

/// Handle to a module instance.
#[derive(Clone)]
pub struct ModuleRecord {
    inner: Arc<RecordInner>,
}

impl ModuleRecord {
    pub(crate) fn new(
        key: &str,
        compartment: &str,
        source: RecordSource,
        requests: Vec<(String, String)>,
    ) -> Self {
        Self {
            inner: Arc::new(RecordInner {
                key: key.to_string(),
                compartment: compartment.to_string(),
                source,
                requests,
                environment: Environment::new(),
                namespace: ModuleNamespace::new(key),
                state: Mutex::new(RecordState {
                    phase: Phase::Loaded,
                    error: None,
                    ready: None,
                }),
            }),
        }
    }

    /// A record that only exposes an existing namespace. It is born `Ready`.
    pub(crate) fn from_namespace(key: &str, compartment: &str, namespace: ModuleNamespace) -> Self {
        Self {
            inner: Arc::new(RecordInner {
                key: key.to_string(),
                compartment: compartment.to_string(),
                source: RecordSource::Namespace,
                requests: Vec::new(),
                environment: Environment::new(),
                namespace,
                state: Mutex::new(RecordState {
                    phase: Phase::Ready,
                    error: None,
                    ready: None,
                }),
            }),
        }
    }

    /// Canonical key
    pub fn key(&self) -> &str {
        &self.inner.key
    }

    /// Name of the owning compartment
    pub fn compartment_name(&self) -> &str {
        &self.inner.compartment
    }

    /// Current phase
    pub fn phase(&self) -> Phase {
        self.inner.state.lock().phase
    }

    /// Terminal error, if the record failed
    pub fn error(&self) -> Option<CompartmentError> {
        self.inner.state.lock().error.clone()
    }

    /// Exports namespace. Its identity never changes.
    pub fn namespace(&self) -> &ModuleNamespace {
        &self.inner.namespace
    }

    /// Environment record
    pub fn environment(&self) -> &Environment {
        &self.inner.environment
    }

    /// Declared bindings (empty for namespace aliases)
    pub fn bindings(&self) -> &[Binding] {
        match &self.inner.source {
            RecordSource::Module { bindings, .. } => bindings,
            RecordSource::Namespace => &[],
        }
    }

    /// Resolved requests as `(specifier, key)` pairs in first-mention order
    pub fn requests(&self) -> &[(String, String)] {
        &self.inner.requests
    }

    /// Canonical key a specifier was resolved to at load time
    pub fn requested_key(&self, specifier: &str) -> Option<&str> {
        self.inner
            .requests
            .iter()
            .find(|(s, _)| s == specifier)
            .map(|(_, key)| key.as_str())
    }

    /// Keys of the direct dependencies
    pub fn dependency_keys(&self) -> Vec<String> {
        self.inner.requests.iter().map(|(_, key)| key.clone()).collect()
    }

    /// Whether running this record's body may suspend
    pub fn has_async_initializer(&self) -> bool {
        match &self.inner.source {
            RecordSource::Module { initializer, .. } => initializer.is_async(),
            RecordSource::Namespace => false,
        }
    }

    /// Identity comparison
    pub fn ptr_eq(&self, other: &ModuleRecord) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub(crate) fn id(&self) -> usize {
        Arc::as_ptr(&self.inner) as usize
    }

    pub(crate) fn source(&self) -> &RecordSource {
        &self.inner.source
    }

    /// Move to `to` if that is a forward step. Returns whether it moved.
    pub(crate) fn transition(&self, to: Phase) -> bool {
        let mut state = self.inner.state.lock();
        if state.phase.is_terminal() || to <= state.phase {
            return false;
        }
        tracing::trace!("{}: {} -> {}", self.inner.key, state.phase, to);
        state.phase = to;
        true
    }

    /// Mark the record failed. The first error sticks.
    pub(crate) fn fail(&self, error: CompartmentError) {
        let mut state = self.inner.state.lock();
        if state.phase.is_terminal() {
            return;
        }
        tracing::debug!("{}: failed: {}", self.inner.key, error);
        state.phase = Phase::Failed;
        state.error = Some(error);
    }

    pub(crate) fn ready(&self) -> Option<ReadyFuture> {
        self.inner.state.lock().ready.clone()
    }

    pub(crate) fn set_ready(&self, ready: ReadyFuture) {
        self.inner.state.lock().ready = Some(ready);
    }
}

impl fmt::Debug for ModuleRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleRecord")
            .field("key", &self.inner.key)
            .field("compartment", &self.inner.compartment)
            .field("phase", &self.phase())
            .finish()
    }
}
