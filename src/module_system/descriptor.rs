// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Module descriptors and the hooks that produce them
//!
//! A descriptor tells a compartment how to obtain the module behind a
//! canonical key:
//! - `Compiled` wraps a compiler artifact
//! - `Virtual` is a user-supplied binding list plus initializer
//! - `RecordAlias` defers to an ancestor compartment
//! - `InstanceAlias` shares an existing module instance
//! - `NamespaceAlias` exposes an existing object as a module

use crate::module_system::Binding;
use crate::module_system::compartment::Compartment;
use crate::module_system::executor::ModuleScope;
use crate::value::{Object, Value};
use async_trait::async_trait;
use futures::FutureExt;
use futures::future::BoxFuture;
use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

/// Completion of an asynchronous initializer
pub type InitFuture = BoxFuture<'static, std::result::Result<(), Value>>;

type SyncInit = dyn Fn(ModuleScope) -> std::result::Result<(), Value> + Send + Sync;
type AsyncInit = dyn Fn(ModuleScope) -> InitFuture + Send + Sync;

/// Module body entry point. Errors are thrown script values.
#[derive(Clone, Default)]
pub enum Initializer {
    /// Does nothing
    #[default]
    Noop,
    /// Runs to completion without suspending
    Synchronous(Arc<SyncInit>),
    /// Deferred completion (top-level await)
    Asynchronous(Arc<AsyncInit>),
}

impl Initializer {
    /// Wrap a synchronous initializer
    pub fn sync<F>(f: F) -> Self
    where
        F: Fn(ModuleScope) -> std::result::Result<(), Value> + Send + Sync + 'static,
    {
        Self::Synchronous(Arc::new(f))
    }

    /// Wrap an asynchronous initializer
    pub fn asynchronous<F, Fut>(f: F) -> Self
    where
        F: Fn(ModuleScope) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<(), Value>> + Send + 'static,
    {
        Self::Asynchronous(Arc::new(move |scope| f(scope).boxed()))
    }

    /// Whether running this initializer may suspend
    pub fn is_async(&self) -> bool {
        matches!(self, Self::Asynchronous(_))
    }
}

impl fmt::Debug for Initializer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Noop => write!(f, "Initializer::Noop"),
            Self::Synchronous(_) => write!(f, "Initializer::Synchronous"),
            Self::Asynchronous(_) => write!(f, "Initializer::Asynchronous"),
        }
    }
}

/// An opaque compiled module produced by an external compiler.
pub trait CompiledModule: Send + Sync {
    /// Static binding summary in declaration order
    fn bindings(&self) -> &[Binding];

    /// Whether the body reads `import.meta`
    fn uses_import_meta(&self) -> bool {
        false
    }

    /// Whether the body calls dynamic `import()`
    fn uses_dynamic_import(&self) -> bool {
        false
    }

    /// The module body
    fn initializer(&self) -> Initializer;
}

/// A module whose loading and execution protocol is supplied by user code.
#[derive(Debug, Clone, Default)]
pub struct VirtualSource {
    /// Bindings in declaration order
    pub bindings: Vec<Binding>,
    /// Module body
    pub execute: Initializer,
    /// Pass an [`Importer`](crate::module_system::Importer) to the body
    pub needs_import: bool,
    /// Pass an `import.meta` object to the body
    pub needs_import_meta: bool,
    /// Properties copied onto `import.meta`
    pub import_meta: BTreeMap<String, Value>,
}

impl VirtualSource {
    /// Create an empty virtual source
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the binding list
    pub fn with_bindings(mut self, bindings: impl IntoIterator<Item = Binding>) -> Self {
        self.bindings = bindings.into_iter().collect();
        self
    }

    /// Append one binding
    pub fn with_binding(mut self, binding: Binding) -> Self {
        self.bindings.push(binding);
        self
    }

    /// Set the module body
    pub fn with_execute(mut self, execute: Initializer) -> Self {
        self.execute = execute;
        self
    }

    /// Request a dynamic import handle
    pub fn with_import(mut self) -> Self {
        self.needs_import = true;
        self
    }

    /// Request an `import.meta` object
    pub fn with_import_meta(mut self) -> Self {
        self.needs_import_meta = true;
        self
    }

    /// Add an `import.meta` property
    pub fn with_meta(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.import_meta.insert(name.into(), value.into());
        self
    }
}

/// How a compartment obtains the module behind a canonical key.
#[derive(Clone)]
pub enum ModuleDescriptor {
    /// A compiler artifact plus `import.meta` overrides
    Compiled {
        /// The compiled module
        module: Arc<dyn CompiledModule>,
        /// Properties copied onto `import.meta`
        import_meta: BTreeMap<String, Value>,
    },
    /// A user-supplied module
    Virtual(VirtualSource),
    /// The module at `key` in the nearest ancestor compartment that has it
    RecordAlias {
        /// Key in the ancestor
        key: String,
    },
    /// The existing instance at `key` in `compartment` (this one if `None`)
    InstanceAlias {
        /// Key of the shared instance
        key: String,
        /// Owning compartment
        compartment: Option<Compartment>,
    },
    /// An existing namespace, or an object frozen into one
    NamespaceAlias(Value),
}

impl ModuleDescriptor {
    /// Wrap a compiled module
    pub fn compiled(module: impl CompiledModule + 'static) -> Self {
        Self::Compiled {
            module: Arc::new(module),
            import_meta: BTreeMap::new(),
        }
    }

    /// Defer to an ancestor compartment
    pub fn record_alias(key: impl Into<String>) -> Self {
        Self::RecordAlias { key: key.into() }
    }

    /// Share the instance at `key` in this compartment
    pub fn instance_alias(key: impl Into<String>) -> Self {
        Self::InstanceAlias {
            key: key.into(),
            compartment: None,
        }
    }

    /// Share the instance at `key` in `compartment`
    pub fn instance_alias_in(key: impl Into<String>, compartment: &Compartment) -> Self {
        Self::InstanceAlias {
            key: key.into(),
            compartment: Some(compartment.clone()),
        }
    }

    /// Expose a namespace or object as a module
    pub fn namespace(value: impl Into<Value>) -> Self {
        Self::NamespaceAlias(value.into())
    }

    /// Short name of the variant
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Compiled { .. } => "compiled",
            Self::Virtual(_) => "virtual",
            Self::RecordAlias { .. } => "record-alias",
            Self::InstanceAlias { .. } => "instance-alias",
            Self::NamespaceAlias(_) => "namespace-alias",
        }
    }
}

impl From<VirtualSource> for ModuleDescriptor {
    fn from(source: VirtualSource) -> Self {
        Self::Virtual(source)
    }
}

impl fmt::Debug for ModuleDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Compiled { module, import_meta } => f
                .debug_struct("Compiled")
                .field("bindings", &module.bindings())
                .field("import_meta", import_meta)
                .finish(),
            Self::Virtual(source) => f.debug_tuple("Virtual").field(source).finish(),
            Self::RecordAlias { key } => f.debug_struct("RecordAlias").field("key", key).finish(),
            Self::InstanceAlias { key, compartment } => f
                .debug_struct("InstanceAlias")
                .field("key", key)
                .field("compartment", &compartment.as_ref().map(|c| c.name().to_string()))
                .finish(),
            Self::NamespaceAlias(value) => f.debug_tuple("NamespaceAlias").field(value).finish(),
        }
    }
}

/// Asynchronous descriptor source consulted for keys missing from the
/// static table.
///
/// `Ok(None)` means "not found"; `Err` is a hook failure. Neither outcome is
/// memoized, so a later load may ask again.
#[async_trait]
pub trait LoadHook: Send + Sync {
    /// Produce the descriptor for `key`
    async fn load(&self, key: &str) -> std::result::Result<Option<ModuleDescriptor>, String>;
}

#[async_trait]
impl<F, Fut> LoadHook for F
where
    F: Fn(String) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = std::result::Result<Option<ModuleDescriptor>, String>> + Send + 'static,
{
    async fn load(&self, key: &str) -> std::result::Result<Option<ModuleDescriptor>, String> {
        self(key.to_string()).await
    }
}

/// Synchronous descriptor source used by `load_now` / `import_now`
pub type ImportNowHook = Arc<dyn Fn(&str) -> Option<ModuleDescriptor> + Send + Sync>;

/// Called with each fresh `import.meta` object before the body sees it
pub type ImportMetaHook = Arc<dyn Fn(&str, &Object) + Send + Sync>;

/// Evaluates source text in the context of a compartment.
pub trait Evaluator: Send + Sync {
    /// Evaluate `source`; `Err` carries the thrown value
    fn evaluate(
        &self,
        compartment: &Compartment,
        source: &str,
    ) -> std::result::Result<Value, Value>;
}

impl<F> Evaluator for F
where
    F: Fn(&Compartment, &str) -> std::result::Result<Value, Value> + Send + Sync,
{
    fn evaluate(
        &self,
        compartment: &Compartment,
        source: &str,
    ) -> std::result::Result<Value, Value> {
        self(compartment, source)
    }
}
