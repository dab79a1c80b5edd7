// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! The module registry
//!
//! A [`Compartment`] owns the memo of canonical key to module record and
//! drives the two phases of module loading:
//!
//! - **load**: resolve specifiers, obtain descriptors and create records for
//!   the transitive closure of a key, without running anything
//! - **import**: load, then link the closure and execute it in dependency
//!   order
//!
//! All memo inserts and phase transitions are synchronous. The only
//! suspension points are the load hook, asynchronous module bodies, and
//! waiting on other modules.

use crate::config::CompartmentConfig;
use crate::error::{CompartmentError, Result};
use crate::module_system::descriptor::{
    Evaluator, ImportMetaHook, ImportNowHook, LoadHook, ModuleDescriptor,
};
use crate::module_system::executor;
use crate::module_system::linker;
use crate::module_system::namespace::ModuleNamespace;
use crate::module_system::record::{ModuleRecord, Phase, RecordSource};
use crate::module_system::resolver::{PathResolver, ResolveHook};
use crate::module_system::binding::requested_specifiers;
use crate::value::{Object, Value};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use futures::future::{self, BoxFuture, Shared};
use futures::stream::FuturesUnordered;
use futures::{FutureExt, StreamExt};
use parking_lot::Mutex;
use rustc_hash::{FxHashMap, FxHashSet};
use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

type DescriptorJob = Shared<BoxFuture<'static, Result<Option<ModuleDescriptor>>>>;
type LoadJob = Shared<BoxFuture<'static, Result<Shallow>>>;

/// A key in a particular compartment
pub(crate) type Node = (Compartment, String);

/// Serializes linking and scheduling. Batches may span compartments.
static LINK_LOCK: Mutex<()> = Mutex::new(());

/// A memo entry: a record this compartment owns, or one it borrows.
#[derive(Clone)]
pub(crate) enum RecordRef {
    /// Owned here. Same-compartment aliases point at the target's record.
    Local(ModuleRecord),
    /// Owned by `compartment` under `key`; linked and run there.
    Foreign {
        compartment: Compartment,
        key: String,
        record: ModuleRecord,
    },
}

impl RecordRef {
    pub(crate) fn record(&self) -> &ModuleRecord {
        match self {
            RecordRef::Local(record) => record,
            RecordRef::Foreign { record, .. } => record,
        }
    }
}

/// Result of a shallow load: the entry for one key and the keys its closure
/// continues with.
#[derive(Clone)]
struct Shallow {
    entry: RecordRef,
    deps: Vec<Node>,
    memoized: bool,
}

/// Outcome of interpreting one descriptor
enum Realized {
    Entry(RecordRef),
    Alias { owner: Compartment, key: String },
}

/// Records created by a synchronous load, committed only on success
#[derive(Default)]
struct Staged {
    order: Vec<Node>,
    entries: FxHashMap<(usize, String), RecordRef>,
}

impl Staged {
    fn insert(&mut self, compartment: &Compartment, key: String, entry: RecordRef) {
        self.entries.insert((compartment.id(), key.clone()), entry);
        self.order.push((compartment.clone(), key));
    }

    fn get(&self, compartment: &Compartment, key: &str) -> Option<&RecordRef> {
        self.entries.get(&(compartment.id(), key.to_string()))
    }
}

/// An entry held back until its direct dependencies have loaded
struct Waiting {
    compartment: Compartment,
    key: String,
    entry: RecordRef,
    remaining: usize,
}

/// Memoization bookkeeping for one closure load
#[derive(Default)]
struct Settling {
    settled: FxHashSet<(usize, String)>,
    waiting: FxHashMap<(usize, String), Waiting>,
    waiters: FxHashMap<(usize, String), Vec<(usize, String)>>,
}

impl Settling {
    /// Record that the shallow load of `key` finished, memoizing every entry
    /// whose direct dependencies have now all finished.
    fn settle(&mut self, compartment: Compartment, key: String, shallow: Shallow) {
        let id = (compartment.id(), key.clone());
        self.settled.insert(id.clone());

        if !shallow.memoized {
            let mut blockers = FxHashSet::default();
            for (owner, dep) in &shallow.deps {
                let dep_id = (owner.id(), dep.clone());
                if !self.settled.contains(&dep_id) && blockers.insert(dep_id.clone()) {
                    self.waiters.entry(dep_id).or_default().push(id.clone());
                }
            }
            if blockers.is_empty() {
                compartment.memoize(&key, shallow.entry);
            } else {
                self.waiting.insert(
                    id.clone(),
                    Waiting {
                        compartment,
                        key,
                        entry: shallow.entry,
                        remaining: blockers.len(),
                    },
                );
            }
        }

        for waiter in self.waiters.remove(&id).unwrap_or_default() {
            let Some(waiting) = self.waiting.get_mut(&waiter) else {
                continue;
            };
            waiting.remaining -= 1;
            if waiting.remaining == 0 {
                if let Some(done) = self.waiting.remove(&waiter) {
                    done.compartment.memoize(&done.key, done.entry);
                }
            }
        }
    }

    /// The closure failed; what did load is memoized anyway
    fn abandon(self) {
        for (_, waiting) in self.waiting {
            waiting.compartment.memoize(&waiting.key, waiting.entry);
        }
    }
}

struct CompartmentInner {
    config: CompartmentConfig,
    parent: Option<Compartment>,
    resolver: Arc<dyn ResolveHook>,
    table: FxHashMap<String, ModuleDescriptor>,
    load_hook: Option<Arc<dyn LoadHook>>,
    import_now_hook: Option<ImportNowHook>,
    import_meta_hook: Option<ImportMetaHook>,
    evaluator: Option<Arc<dyn Evaluator>>,
    /// Load hook results by key
    descriptors: DashMap<String, DescriptorJob>,
    /// Shallow loads by key, kept until the key is memoized
    loading: DashMap<String, LoadJob>,
    /// Key to record memo. Never shrinks.
    records: DashMap<String, RecordRef>,
}

/// A module registry with its own memo, descriptors and hooks.
///
/// Cloning a compartment clones the handle.
#[derive(Clone)]
pub struct Compartment {
    inner: Arc<CompartmentInner>,
}

impl Compartment {
    /// A compartment with default configuration, the path resolver and no
    /// descriptors
    pub fn new() -> Self {
        CompartmentBuilder::new().build()
    }

    /// Start configuring a compartment
    pub fn builder() -> CompartmentBuilder {
        CompartmentBuilder::new()
    }

    /// Compartment name
    pub fn name(&self) -> &str {
        &self.inner.config.name
    }

    /// Configuration
    pub fn config(&self) -> &CompartmentConfig {
        &self.inner.config
    }

    /// Parent compartment
    pub fn parent(&self) -> Option<&Compartment> {
        self.inner.parent.as_ref()
    }

    /// Identity comparison
    pub fn ptr_eq(&self, other: &Compartment) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub(crate) fn id(&self) -> usize {
        Arc::as_ptr(&self.inner) as usize
    }

    /// Resolve `specifier` as imported by the module keyed `referrer`
    pub fn resolve(&self, specifier: &str, referrer: &str) -> Result<String> {
        self.inner
            .resolver
            .resolve(specifier, referrer)
            .map_err(|reason| CompartmentError::resolution(specifier, referrer, reason))
    }

    /// Load the transitive closure of `key` without executing anything.
    pub fn load(&self, key: &str) -> BoxFuture<'static, Result<()>> {
        let this = self.clone();
        let key = key.to_string();
        async move { this.load_closure(&key).await }.boxed()
    }

    /// Load, link and execute `key`, resolving to its exports namespace.
    ///
    /// Repeated imports of one key resolve to the same namespace and never run
    /// a module body twice.
    pub fn import(&self, key: &str) -> BoxFuture<'static, Result<ModuleNamespace>> {
        let this = self.clone();
        let key = key.to_string();
        async move {
            this.load_closure(&key).await?;
            let ready = this.prepare(&key)?;
            ready.await?;
            this.namespace_of(&key)
        }
        .boxed()
    }

    /// Synchronous [`load`](Self::load).
    ///
    /// Fails with [`CompartmentError::SynchronousUnavailable`] and leaves the
    /// memo untouched if any module in the closure needs the load hook or is
    /// loading asynchronously.
    pub fn load_now(&self, key: &str) -> Result<()> {
        let staged = self.stage(key)?;
        Self::commit(staged);
        Ok(())
    }

    /// Synchronous [`import`](Self::import).
    ///
    /// Additionally fails without side effects if a module that still has to
    /// run has an asynchronous body, or is running right now.
    pub fn import_now(&self, key: &str) -> Result<ModuleNamespace> {
        let staged = self.stage(key)?;
        self.check_synchronous(key, Some(&staged))?;
        Self::commit(staged);

        let ready = self.prepare(key)?;
        match ready.now_or_never() {
            Some(Ok(())) => self.namespace_of(key),
            Some(Err(err)) => Err(err),
            None => Err(CompartmentError::unavailable(
                key,
                "module graph did not settle synchronously",
            )),
        }
    }

    /// Evaluate source text with the configured evaluator
    pub fn evaluate(&self, source: &str) -> Result<Value> {
        let evaluator =
            self.inner
                .evaluator
                .as_ref()
                .ok_or_else(|| CompartmentError::EvaluatorUnavailable {
                    compartment: self.name().to_string(),
                })?;
        evaluator
            .evaluate(self, source)
            .map_err(CompartmentError::Evaluation)
    }

    /// The record memoized under `key`
    pub fn record(&self, key: &str) -> Option<ModuleRecord> {
        self.lookup(key)
    }

    /// Phase of the record memoized under `key`
    pub fn phase(&self, key: &str) -> Option<Phase> {
        self.lookup(key).map(|record| record.phase())
    }

    /// Namespace of a loaded record, whether or not it has run
    pub fn namespace(&self, key: &str) -> Option<ModuleNamespace> {
        self.lookup(key).map(|record| record.namespace().clone())
    }

    /// Memoized keys in sorted order
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self
            .inner
            .records
            .iter()
            .map(|entry| entry.key().clone())
            .collect();
        keys.sort();
        keys
    }

    pub(crate) fn lookup(&self, key: &str) -> Option<ModuleRecord> {
        self.inner
            .records
            .get(key)
            .map(|entry| entry.value().record().clone())
    }

    fn entry(&self, key: &str) -> Result<RecordRef> {
        self.inner
            .records
            .get(key)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| CompartmentError::not_found(key, self.name()))
    }

    /// Memo entries of a local record's direct dependencies
    pub(crate) fn dependencies(&self, record: &ModuleRecord) -> Vec<RecordRef> {
        record
            .dependency_keys()
            .iter()
            .filter_map(|key| self.inner.records.get(key).map(|entry| entry.value().clone()))
            .collect()
    }

    /// Keys an entry of this compartment pulls into a closure. A borrowed
    /// entry continues in its owner.
    fn edges(&self, entry: &RecordRef) -> Vec<Node> {
        match entry {
            RecordRef::Local(record) => record
                .dependency_keys()
                .into_iter()
                .map(|key| (self.clone(), key))
                .collect(),
            RecordRef::Foreign {
                compartment, key, ..
            } => vec![(compartment.clone(), key.clone())],
        }
    }

    pub(crate) fn decorate_import_meta(&self, key: &str, meta: &Object) {
        if let Some(hook) = &self.inner.import_meta_hook {
            hook(key, meta);
        }
    }

    fn namespace_of(&self, key: &str) -> Result<ModuleNamespace> {
        Ok(self.entry(key)?.record().namespace().clone())
    }

    // ----- load phase -----

    /// Worklist over the closure of `root`, following borrowed entries into
    /// their owners. Shallow loads run concurrently.
    async fn load_closure(&self, root: &str) -> Result<()> {
        let limit = self.inner.config.max_concurrent_loads;
        let mut settling = Settling::default();
        let mut seen = FxHashSet::default();
        let mut backlog: VecDeque<Node> = VecDeque::new();
        let mut in_flight = FuturesUnordered::new();

        seen.insert((self.id(), root.to_string()));
        backlog.push_back((self.clone(), root.to_string()));

        loop {
            while limit == 0 || in_flight.len() < limit {
                match backlog.pop_front() {
                    Some((compartment, key)) => in_flight.push(
                        async move {
                            let outcome = compartment.load_entry(&key).await;
                            (compartment, key, outcome)
                        }
                        .boxed(),
                    ),
                    None => break,
                }
            }
            let Some((compartment, key, outcome)) = in_flight.next().await else {
                break;
            };
            let shallow = match outcome {
                Ok(shallow) => shallow,
                Err(err) => {
                    settling.abandon();
                    return Err(err);
                }
            };
            for (owner, dep) in &shallow.deps {
                if seen.insert((owner.id(), dep.clone())) {
                    backlog.push_back((owner.clone(), dep.clone()));
                }
            }
            settling.settle(compartment, key, shallow);
        }

        tracing::trace!(
            "Loaded {} module(s) for '{}' in compartment '{}'",
            seen.len(),
            root,
            self.name()
        );
        Ok(())
    }

    /// Shallow load of one key. Concurrent callers share one job.
    fn load_entry(&self, key: &str) -> BoxFuture<'static, Result<Shallow>> {
        if let Some(shallow) = self.memoized(key) {
            return future::ready(Ok(shallow)).boxed();
        }

        let job = match self.inner.loading.entry(key.to_string()) {
            Entry::Occupied(entry) => entry.get().clone(),
            Entry::Vacant(entry) => {
                let this = self.clone();
                let key = key.to_string();
                let job = async move {
                    let outcome = this.instantiate(&key).await;
                    if outcome.is_err() {
                        this.inner.loading.remove(&key);
                    }
                    outcome
                }
                .boxed()
                .shared();
                entry.insert(job.clone());
                job
            }
        };
        job.boxed()
    }

    fn memoized(&self, key: &str) -> Option<Shallow> {
        let entry = self.inner.records.get(key).map(|entry| entry.value().clone())?;
        Some(Shallow {
            deps: self.edges(&entry),
            entry,
            memoized: true,
        })
    }

    async fn instantiate(&self, key: &str) -> Result<Shallow> {
        if let Some(shallow) = self.memoized(key) {
            return Ok(shallow);
        }

        let descriptor = self.descriptor(key).await?;
        tracing::trace!("Instantiating '{}' from a {} descriptor", key, descriptor.kind());

        match self.realize(key, descriptor)? {
            Realized::Entry(entry) => Ok(Shallow {
                deps: self.edges(&entry),
                entry,
                memoized: false,
            }),
            Realized::Alias { owner, key: target } => {
                let (owner, target) = self.follow_aliases(key, owner, target).await?;
                let loaded = owner.load_entry(&target).await?;
                let entry = if owner.ptr_eq(self) {
                    loaded.entry
                } else {
                    owner.lend(&loaded.entry)
                };
                Ok(Shallow {
                    entry,
                    deps: vec![(owner, target)],
                    memoized: false,
                })
            }
        }
    }

    /// Descriptor lookup: static table, then load hook, then import-now hook.
    async fn descriptor(&self, key: &str) -> Result<ModuleDescriptor> {
        if let Some(descriptor) = self.inner.table.get(key) {
            return Ok(descriptor.clone());
        }

        if let Some(hook) = &self.inner.load_hook {
            let job = self.descriptor_job(key, hook.clone());
            let outcome = job.clone().await;
            match outcome {
                Ok(Some(descriptor)) => return Ok(descriptor),
                Ok(None) => self.forget_descriptor(key, &job),
                Err(err) => {
                    self.forget_descriptor(key, &job);
                    return Err(err);
                }
            }
        }

        self.import_now_descriptor(key)
            .ok_or_else(|| CompartmentError::not_found(key, self.name()))
    }

    fn descriptor_job(&self, key: &str, hook: Arc<dyn LoadHook>) -> DescriptorJob {
        match self.inner.descriptors.entry(key.to_string()) {
            Entry::Occupied(entry) => entry.get().clone(),
            Entry::Vacant(entry) => {
                let key = key.to_string();
                let name = self.name().to_string();
                let job = async move {
                    tracing::debug!("Invoking load hook for '{}' in compartment '{}'", key, name);
                    hook.load(&key)
                        .await
                        .map_err(|reason| CompartmentError::LoadHook {
                            key: key.clone(),
                            reason,
                        })
                }
                .boxed()
                .shared();
                entry.insert(job.clone());
                job
            }
        }
    }

    /// Drop a settled hook result that must not be memoized
    fn forget_descriptor(&self, key: &str, job: &DescriptorJob) {
        self.inner
            .descriptors
            .remove_if(key, |_, current| current.ptr_eq(job));
    }

    fn import_now_descriptor(&self, key: &str) -> Option<ModuleDescriptor> {
        self.inner.import_now_hook.as_ref().and_then(|hook| hook(key))
    }

    /// Follow instance and record aliases, across compartments, to the key
    /// that owns a record.
    ///
    /// Only descriptors are consulted on the way, never another key's load,
    /// so two aliases pointing at each other cannot wait on each other.
    async fn follow_aliases(
        &self,
        origin: &str,
        mut owner: Compartment,
        mut target: String,
    ) -> Result<Node> {
        let mut visited = FxHashSet::default();
        visited.insert((self.id(), origin.to_string()));
        loop {
            if !visited.insert((owner.id(), target.clone())) {
                return Err(CompartmentError::AliasCycle { key: target });
            }
            if owner.inner.records.contains_key(&target) {
                return Ok((owner, target));
            }
            let descriptor = owner.descriptor(&target).await?;
            match owner.alias_target(&target, &descriptor)? {
                Some(next) => (owner, target) = next,
                None => return Ok((owner, target)),
            }
        }
    }

    /// Where an alias descriptor registered under `key` points
    fn alias_target(&self, key: &str, descriptor: &ModuleDescriptor) -> Result<Option<Node>> {
        match descriptor {
            ModuleDescriptor::InstanceAlias {
                key: target,
                compartment,
            } => {
                let owner = compartment.clone().unwrap_or_else(|| self.clone());
                Ok(Some((owner, target.clone())))
            }
            ModuleDescriptor::RecordAlias { key: target } => {
                let owner = self.record_alias_owner(key, target)?;
                Ok(Some((owner, target.clone())))
            }
            _ => Ok(None),
        }
    }

    fn record_alias_owner(&self, key: &str, target: &str) -> Result<Compartment> {
        self.ancestor_for(target)
            .ok_or_else(|| CompartmentError::InvalidDescriptor {
                key: key.to_string(),
                reason: "a record alias needs a parent compartment".to_string(),
            })
    }

    /// Interpret a descriptor without suspending
    fn realize(&self, key: &str, descriptor: ModuleDescriptor) -> Result<Realized> {
        match descriptor {
            ModuleDescriptor::Compiled {
                module,
                import_meta,
            } => self.build_record(
                key,
                RecordSource::Module {
                    bindings: module.bindings().to_vec(),
                    initializer: module.initializer(),
                    needs_import: module.uses_dynamic_import(),
                    needs_import_meta: module.uses_import_meta(),
                    import_meta,
                },
            ),
            ModuleDescriptor::Virtual(source) => self.build_record(
                key,
                RecordSource::Module {
                    bindings: source.bindings,
                    initializer: source.execute,
                    needs_import: source.needs_import,
                    needs_import_meta: source.needs_import_meta,
                    import_meta: source.import_meta,
                },
            ),
            ModuleDescriptor::NamespaceAlias(value) => {
                let namespace = match value {
                    Value::Namespace(namespace) => namespace,
                    Value::Object(object) => ModuleNamespace::snapshot(key, &object),
                    other => {
                        return Err(CompartmentError::InvalidDescriptor {
                            key: key.to_string(),
                            reason: format!(
                                "cannot use a {} value as a module namespace",
                                other.type_of()
                            ),
                        });
                    }
                };
                let record = ModuleRecord::from_namespace(key, self.name(), namespace);
                Ok(Realized::Entry(RecordRef::Local(record)))
            }
            ModuleDescriptor::InstanceAlias {
                key: target,
                compartment,
            } => match compartment {
                Some(owner) => Ok(Realized::Alias { owner, key: target }),
                None if target == key => Err(CompartmentError::AliasCycle { key: target }),
                None => Ok(Realized::Alias {
                    owner: self.clone(),
                    key: target,
                }),
            },
            ModuleDescriptor::RecordAlias { key: target } => Ok(Realized::Alias {
                owner: self.record_alias_owner(key, &target)?,
                key: target,
            }),
        }
    }

    fn build_record(&self, key: &str, source: RecordSource) -> Result<Realized> {
        let specifiers = match &source {
            RecordSource::Module { bindings, .. } => requested_specifiers(bindings),
            RecordSource::Namespace => Vec::new(),
        };
        let mut requests = Vec::with_capacity(specifiers.len());
        for specifier in specifiers {
            let resolved = self.resolve(&specifier, key)?;
            requests.push((specifier, resolved));
        }
        let record = ModuleRecord::new(key, self.name(), source, requests);
        Ok(Realized::Entry(RecordRef::Local(record)))
    }

    /// Nearest ancestor that already knows `key`, else the nearest one with a
    /// hook, else the parent
    fn ancestor_for(&self, key: &str) -> Option<Compartment> {
        let mut fallback = None;
        let mut current = self.parent();
        while let Some(ancestor) = current {
            let inner = &ancestor.inner;
            if inner.records.contains_key(key) || inner.table.contains_key(key) {
                return Some(ancestor.clone());
            }
            if fallback.is_none() && (inner.load_hook.is_some() || inner.import_now_hook.is_some()) {
                fallback = Some(ancestor.clone());
            }
            current = ancestor.parent();
        }
        fallback.or_else(|| self.parent().cloned())
    }

    /// One of this compartment's entries, as seen from another compartment
    fn lend(&self, entry: &RecordRef) -> RecordRef {
        match entry {
            RecordRef::Local(record) => RecordRef::Foreign {
                compartment: self.clone(),
                key: record.key().to_string(),
                record: record.clone(),
            },
            foreign => foreign.clone(),
        }
    }

    /// Insert unless another task got there first, and retire the key's load
    fn memoize(&self, key: &str, entry: RecordRef) {
        if let Entry::Vacant(slot) = self.inner.records.entry(key.to_string()) {
            tracing::debug!("Loaded '{}' in compartment '{}'", key, self.name());
            slot.insert(entry);
        }
        self.inner.loading.remove(key);
    }

    // ----- synchronous staging -----

    /// Build the closure of `root` without touching any memo
    fn stage(&self, root: &str) -> Result<Staged> {
        let mut staged = Staged::default();
        let mut aliases = Vec::new();
        let mut seen = FxHashSet::default();
        let mut queue: VecDeque<Node> = VecDeque::new();
        seen.insert((self.id(), root.to_string()));
        queue.push_back((self.clone(), root.to_string()));

        while let Some((compartment, key)) = queue.pop_front() {
            let deps = match compartment.memoized(&key) {
                Some(shallow) => shallow.deps,
                None => {
                    let pending = compartment
                        .inner
                        .loading
                        .get(&key)
                        .map(|job| job.value().clone());
                    if let Some(job) = pending {
                        let Some(Ok(shallow)) = job.peek() else {
                            return Err(CompartmentError::unavailable(
                                &key,
                                "module is being loaded asynchronously",
                            ));
                        };
                        let deps = shallow.deps.clone();
                        staged.insert(&compartment, key, shallow.entry.clone());
                        deps
                    } else {
                        let descriptor = compartment.descriptor_now(&key)?;
                        match compartment.realize(&key, descriptor)? {
                            Realized::Entry(entry) => {
                                let deps = compartment.edges(&entry);
                                staged.insert(&compartment, key, entry);
                                deps
                            }
                            Realized::Alias { owner, key: target } => {
                                let target = compartment.follow_aliases_now(&key, owner, target)?;
                                aliases.push((compartment.clone(), key, target.clone()));
                                vec![target]
                            }
                        }
                    }
                }
            };
            for (owner, dep) in deps {
                if seen.insert((owner.id(), dep.clone())) {
                    queue.push_back((owner, dep));
                }
            }
        }

        for (compartment, key, (owner, target)) in aliases {
            let entry = match staged.get(&owner, &target) {
                Some(entry) => entry.clone(),
                None => owner.entry(&target)?,
            };
            let entry = if owner.ptr_eq(&compartment) {
                entry
            } else {
                owner.lend(&entry)
            };
            staged.insert(&compartment, key, entry);
        }
        Ok(staged)
    }

    fn descriptor_now(&self, key: &str) -> Result<ModuleDescriptor> {
        if let Some(descriptor) = self.inner.table.get(key) {
            return Ok(descriptor.clone());
        }
        let settled = self
            .inner
            .descriptors
            .get(key)
            .map(|entry| entry.value().clone());
        if let Some(job) = settled {
            if let Some(Ok(Some(descriptor))) = job.peek() {
                return Ok(descriptor.clone());
            }
        }
        if let Some(descriptor) = self.import_now_descriptor(key) {
            return Ok(descriptor);
        }
        if self.inner.load_hook.is_some() {
            return Err(CompartmentError::unavailable(
                key,
                "descriptor requires the asynchronous load hook",
            ));
        }
        Err(CompartmentError::not_found(key, self.name()))
    }

    fn follow_aliases_now(
        &self,
        origin: &str,
        mut owner: Compartment,
        mut target: String,
    ) -> Result<Node> {
        let mut visited = FxHashSet::default();
        visited.insert((self.id(), origin.to_string()));
        loop {
            if !visited.insert((owner.id(), target.clone())) {
                return Err(CompartmentError::AliasCycle { key: target });
            }
            if owner.inner.records.contains_key(&target) {
                return Ok((owner, target));
            }
            let descriptor = owner.descriptor_now(&target)?;
            match owner.alias_target(&target, &descriptor)? {
                Some(next) => (owner, target) = next,
                None => return Ok((owner, target)),
            }
        }
    }

    fn commit(staged: Staged) {
        let Staged { order, mut entries } = staged;
        for (compartment, key) in order {
            if let Some(entry) = entries.remove(&(compartment.id(), key.clone())) {
                compartment.memoize(&key, entry);
            }
        }
    }

    /// Fail if running the closure of `root` could suspend
    fn check_synchronous(&self, root: &str, staged: Option<&Staged>) -> Result<()> {
        for (_, record) in self.walk(root, staged) {
            match record.phase() {
                Phase::Executing => {
                    return Err(CompartmentError::unavailable(
                        record.key(),
                        "module is still executing",
                    ));
                }
                Phase::Loaded | Phase::Linking | Phase::Linked if record.has_async_initializer() => {
                    return Err(CompartmentError::unavailable(
                        record.key(),
                        "module has an asynchronous initializer",
                    ));
                }
                _ => {}
            }
        }
        Ok(())
    }

    // ----- link and execute -----

    /// Records of the closure of `root` with their owners, breadth first.
    /// Borrowed entries are followed into the compartments that own them.
    fn walk(&self, root: &str, staged: Option<&Staged>) -> Vec<(Compartment, ModuleRecord)> {
        let lookup = |compartment: &Compartment, key: &str| {
            staged
                .and_then(|staged| staged.get(compartment, key).cloned())
                .or_else(|| {
                    compartment
                        .inner
                        .records
                        .get(key)
                        .map(|entry| entry.value().clone())
                })
        };

        let mut closure = Vec::new();
        let mut seen_keys = FxHashSet::default();
        let mut seen_records = FxHashSet::default();
        let mut queue: VecDeque<Node> = VecDeque::new();
        seen_keys.insert((self.id(), root.to_string()));
        queue.push_back((self.clone(), root.to_string()));

        while let Some((compartment, key)) = queue.pop_front() {
            let Some(entry) = lookup(&compartment, &key) else {
                continue;
            };
            for (owner, dep) in compartment.edges(&entry) {
                if seen_keys.insert((owner.id(), dep.clone())) {
                    queue.push_back((owner, dep));
                }
            }
            if let RecordRef::Local(record) = entry {
                if seen_records.insert(record.id()) {
                    closure.push((compartment, record));
                }
            }
        }
        closure
    }

    /// Link the closure of `key` and return its ready future
    fn prepare(&self, key: &str) -> Result<BoxFuture<'static, Result<()>>> {
        let entry = self.entry(key)?;
        if let Some(ready) = entry.record().ready() {
            return Ok(ready.boxed());
        }

        let _guard = LINK_LOCK.lock();
        let batch: Vec<(Compartment, ModuleRecord)> = self
            .walk(key, None)
            .into_iter()
            .filter(|(_, record)| record.phase() == Phase::Loaded)
            .collect();
        if !batch.is_empty() {
            linker::link(&batch);
        }
        Ok(executor::schedule(self, &entry))
    }
}

impl Default for Compartment {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Compartment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Compartment")
            .field("name", &self.name())
            .field("parent", &self.parent().map(|p| p.name().to_string()))
            .field("records", &self.inner.records.len())
            .finish()
    }
}

/// Builder for [`Compartment`].
#[derive(Default)]
pub struct CompartmentBuilder {
    config: CompartmentConfig,
    parent: Option<Compartment>,
    resolver: Option<Arc<dyn ResolveHook>>,
    table: FxHashMap<String, ModuleDescriptor>,
    load_hook: Option<Arc<dyn LoadHook>>,
    import_now_hook: Option<ImportNowHook>,
    import_meta_hook: Option<ImportMetaHook>,
    evaluator: Option<Arc<dyn Evaluator>>,
}

impl CompartmentBuilder {
    /// Create a builder with default configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the compartment name
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.config.name = name.into();
        self
    }

    /// Replace the configuration
    pub fn config(mut self, config: CompartmentConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the parent compartment consulted by record aliases
    pub fn parent(mut self, parent: &Compartment) -> Self {
        self.parent = Some(parent.clone());
        self
    }

    /// Set the specifier resolver. Defaults to [`PathResolver`].
    pub fn resolver(mut self, resolver: impl ResolveHook + 'static) -> Self {
        self.resolver = Some(Arc::new(resolver));
        self
    }

    /// Use a closure as the specifier resolver
    pub fn resolve_with<F>(self, resolve: F) -> Self
    where
        F: Fn(&str, &str) -> std::result::Result<String, String> + Send + Sync + 'static,
    {
        self.resolver(resolve)
    }

    /// Add a static descriptor
    pub fn module(mut self, key: impl Into<String>, descriptor: impl Into<ModuleDescriptor>) -> Self {
        self.table.insert(key.into(), descriptor.into());
        self
    }

    /// Add several static descriptors
    pub fn modules<K, D>(mut self, modules: impl IntoIterator<Item = (K, D)>) -> Self
    where
        K: Into<String>,
        D: Into<ModuleDescriptor>,
    {
        for (key, descriptor) in modules {
            self.table.insert(key.into(), descriptor.into());
        }
        self
    }

    /// Set the asynchronous load hook
    pub fn load_hook(mut self, hook: impl LoadHook + 'static) -> Self {
        self.load_hook = Some(Arc::new(hook));
        self
    }

    /// Set the synchronous descriptor hook
    pub fn import_now_hook<F>(mut self, hook: F) -> Self
    where
        F: Fn(&str) -> Option<ModuleDescriptor> + Send + Sync + 'static,
    {
        self.import_now_hook = Some(Arc::new(hook));
        self
    }

    /// Set the hook that decorates each `import.meta` object
    pub fn import_meta_hook<F>(mut self, hook: F) -> Self
    where
        F: Fn(&str, &Object) + Send + Sync + 'static,
    {
        self.import_meta_hook = Some(Arc::new(hook));
        self
    }

    /// Set the evaluator used by [`Compartment::evaluate`]
    pub fn evaluator(mut self, evaluator: impl Evaluator + 'static) -> Self {
        self.evaluator = Some(Arc::new(evaluator));
        self
    }

    /// Build the compartment
    pub fn build(self) -> Compartment {
        tracing::debug!(
            "Creating compartment '{}' with {} static module(s)",
            self.config.name,
            self.table.len()
        );
        Compartment {
            inner: Arc::new(CompartmentInner {
                config: self.config,
                parent: self.parent,
                resolver: self.resolver.unwrap_or_else(|| Arc::new(PathResolver::new())),
                table: self.table,
                load_hook: self.load_hook,
                import_now_hook: self.import_now_hook,
                import_meta_hook: self.import_meta_hook,
                evaluator: self.evaluator,
                descriptors: DashMap::new(),
                loading: DashMap::new(),
                records: DashMap::new(),
            }),
        }
    }
}
