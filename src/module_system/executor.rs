// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Module execution
//!
//! Linked records are grouped into strongly connected components, possibly
//! spanning compartments. One driver runs each component once the components
//! it depends on have settled, members one after another in depth-first
//! completion order. Every component gets a shared ready future fed by the
//! driver. An asynchronous body only delays its own component and whatever
//! waits on it.

use crate::error::{CompartmentError, Result};
use crate::module_system::compartment::{Compartment, RecordRef};
use crate::module_system::descriptor::Initializer;
use crate::module_system::namespace::{Environment, ModuleNamespace};
use crate::module_system::record::{ModuleRecord, Phase, ReadyFuture, RecordSource};
use crate::value::{Object, Value};
use futures::channel::oneshot;
use futures::future::{self, BoxFuture, Either};
use futures::stream::FuturesUnordered;
use futures::{FutureExt, StreamExt};
use rustc_hash::{FxHashMap, FxHashSet};
use std::fmt;

/// What a module body receives when it runs.
#[derive(Clone)]
pub struct ModuleScope {
    key: String,
    environment: Environment,
    importer: Option<Importer>,
    import_meta: Option<Object>,
}

impl ModuleScope {
    /// Key of the running module
    pub fn key(&self) -> &str {
        &self.key
    }

    /// The module's environment record
    pub fn environment(&self) -> &Environment {
        &self.environment
    }

    /// Read a binding from the environment
    pub fn get(&self, name: &str) -> Result<Value> {
        self.environment.get(name)
    }

    /// Assign a local binding
    pub fn set(&self, name: &str, value: impl Into<Value>) -> Result<()> {
        self.environment.set(name, value)
    }

    /// Dynamic import handle, present if the module asked for one
    pub fn importer(&self) -> Option<&Importer> {
        self.importer.as_ref()
    }

    /// `import.meta`, present if the module asked for it
    pub fn import_meta(&self) -> Option<&Object> {
        self.import_meta.as_ref()
    }
}

impl fmt::Debug for ModuleScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleScope")
            .field("key", &self.key)
            .field("environment", &self.environment)
            .field("importer", &self.importer.is_some())
            .field("import_meta", &self.import_meta)
            .finish()
    }
}

/// Dynamic `import()` bound to the module that requested it.
#[derive(Clone)]
pub struct Importer {
    compartment: Compartment,
    referrer: String,
}

impl Importer {
    pub(crate) fn new(compartment: Compartment, referrer: &str) -> Self {
        Self {
            compartment,
            referrer: referrer.to_string(),
        }
    }

    /// Key of the importing module
    pub fn referrer(&self) -> &str {
        &self.referrer
    }

    /// The compartment imports go through
    pub fn compartment(&self) -> &Compartment {
        &self.compartment
    }

    /// Resolve `specifier` relative to the importing module
    pub fn resolve(&self, specifier: &str) -> Result<String> {
        self.compartment.resolve(specifier, &self.referrer)
    }

    /// `import(specifier)`
    pub fn import(&self, specifier: &str) -> BoxFuture<'static, Result<ModuleNamespace>> {
        match self.resolve(specifier) {
            Ok(key) => self.compartment.import(&key),
            Err(err) => future::ready(Err(err)).boxed(),
        }
    }

    /// Synchronous `import(specifier)`
    pub fn import_now(&self, specifier: &str) -> Result<ModuleNamespace> {
        let key = self.resolve(specifier)?;
        self.compartment.import_now(&key)
    }
}

impl fmt::Debug for Importer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Importer")
            .field("compartment", &self.compartment.name())
            .field("referrer", &self.referrer)
            .finish()
    }
}

/// Future that settles when `record` has finished executing.
fn readiness(record: &ModuleRecord) -> BoxFuture<'static, Result<()>> {
    if let Some(ready) = record.ready() {
        return ready.boxed();
    }
    match record.phase() {
        Phase::Failed => future::ready(Err(failure_of(record))).boxed(),
        _ => future::ready(Ok(())).boxed(),
    }
}

fn failure_of(record: &ModuleRecord) -> CompartmentError {
    record.error().unwrap_or_else(|| {
        CompartmentError::binding(record.key(), "module failed without an error")
    })
}

/// A record with the compartment that owns it
type Node = (Compartment, ModuleRecord);

/// The record behind a memo entry of `compartment`, with its owner
fn node_of(compartment: &Compartment, entry: &RecordRef) -> Node {
    match entry {
        RecordRef::Local(record) => (compartment.clone(), record.clone()),
        RecordRef::Foreign {
            compartment,
            record,
            ..
        } => (compartment.clone(), record.clone()),
    }
}

fn dependencies((compartment, record): &Node) -> Vec<Node> {
    compartment
        .dependencies(record)
        .iter()
        .map(|entry| node_of(compartment, entry))
        .collect()
}

fn is_pending(record: &ModuleRecord) -> bool {
    record.phase() == Phase::Linked && record.ready().is_none()
}

/// Install ready futures for every linked, unscheduled record reachable from
/// `root` and return the future for `root`.
///
/// Must be called with the link lock held.
pub(crate) fn schedule(compartment: &Compartment, root: &RecordRef) -> BoxFuture<'static, Result<()>> {
    let (owner, record) = node_of(compartment, root);
    if is_pending(&record) {
        let components = Tarjan::run((owner, record.clone()));
        install(components);
    }
    readiness(&record)
}

/// One record on the traversal stack, with the dependencies left to visit
struct Frame {
    id: usize,
    deps: std::vec::IntoIter<Node>,
}

/// Tarjan's strongly connected components over pending records, driven by an
/// explicit stack. Components come out dependencies first.
#[derive(Default)]
struct Tarjan {
    next_index: usize,
    index: FxHashMap<usize, usize>,
    lowlink: FxHashMap<usize, usize>,
    finished: FxHashMap<usize, usize>,
    on_stack: FxHashSet<usize>,
    stack: Vec<Node>,
    frames: Vec<Frame>,
    components: Vec<Vec<Node>>,
}

impl Tarjan {
    fn run(root: Node) -> Vec<Vec<Node>> {
        let mut tarjan = Tarjan::default();
        tarjan.enter(root);

        loop {
            let Some(frame) = tarjan.frames.last_mut() else {
                break;
            };
            let id = frame.id;
            match frame.deps.next() {
                Some(dep) => {
                    let dep_id = dep.1.id();
                    if !tarjan.index.contains_key(&dep_id) {
                        tarjan.enter(dep);
                    } else if tarjan.on_stack.contains(&dep_id) {
                        let low = tarjan.lowlink[&id].min(tarjan.index[&dep_id]);
                        tarjan.lowlink.insert(id, low);
                    }
                }
                None => {
                    tarjan.frames.pop();
                    tarjan.leave(id);
                    if let Some(parent) = tarjan.frames.last() {
                        let parent_id = parent.id;
                        let low = tarjan.lowlink[&parent_id].min(tarjan.lowlink[&id]);
                        tarjan.lowlink.insert(parent_id, low);
                    }
                }
            }
        }
        tarjan.components
    }

    fn enter(&mut self, node: Node) {
        let id = node.1.id();
        self.index.insert(id, self.next_index);
        self.lowlink.insert(id, self.next_index);
        self.next_index += 1;
        self.on_stack.insert(id);

        let deps: Vec<Node> = dependencies(&node)
            .into_iter()
            .filter(|(_, dep)| is_pending(dep))
            .collect();
        self.stack.push(node);
        self.frames.push(Frame {
            id,
            deps: deps.into_iter(),
        });
    }

    fn leave(&mut self, id: usize) {
        self.finished.insert(id, self.finished.len());
        if self.lowlink[&id] != self.index[&id] {
            return;
        }

        let mut members = Vec::new();
        while let Some(member) = self.stack.pop() {
            self.on_stack.remove(&member.1.id());
            let done = member.1.id() == id;
            members.push(member);
            if done {
                break;
            }
        }
        // Members run in depth-first completion order.
        members.sort_by_key(|(_, member)| self.finished[&member.id()]);
        self.components.push(members);
    }
}

/// A component as the driver sees it
struct Component {
    members: Vec<Node>,
    /// Dependencies that have not settled yet
    waiting: usize,
    dependents: Vec<usize>,
    outside: Vec<BoxFuture<'static, Result<()>>>,
    outcome: Option<oneshot::Sender<Result<()>>>,
    settled: bool,
}

enum Event {
    /// A dependency scheduled earlier settled
    Outside(usize, Result<()>),
    /// A component finished running
    Finished(usize, Result<()>),
}

/// Give every component a shared ready future, all backed by one driver.
fn install(components: Vec<Vec<Node>>) {
    let mut owner: FxHashMap<usize, usize> = FxHashMap::default();
    for (index, members) in components.iter().enumerate() {
        for (_, member) in members {
            owner.insert(member.id(), index);
        }
    }

    let mut plans: Vec<Component> = Vec::with_capacity(components.len());
    let mut receivers = Vec::with_capacity(components.len());
    for (index, members) in components.into_iter().enumerate() {
        let mut seen = FxHashSet::default();
        let mut inside = Vec::new();
        let mut outside = Vec::new();
        for node in &members {
            for (_, dep) in dependencies(node) {
                match owner.get(&dep.id()) {
                    Some(&other) if other == index => {}
                    Some(&other) => {
                        if seen.insert(dep.id()) && !inside.contains(&other) {
                            inside.push(other);
                        }
                    }
                    None => {
                        if seen.insert(dep.id()) {
                            outside.push(readiness(&dep));
                        }
                    }
                }
            }
        }
        for &other in &inside {
            plans[other].dependents.push(index);
        }

        tracing::trace!(
            "Scheduled component [{}]",
            members
                .iter()
                .map(|(_, member)| member.key())
                .collect::<Vec<_>>()
                .join(", ")
        );

        let (sender, receiver) = oneshot::channel();
        receivers.push(receiver);
        plans.push(Component {
            members,
            waiting: inside.len() + outside.len(),
            dependents: Vec::new(),
            outside,
            outcome: Some(sender),
            settled: false,
        });
    }

    let members: Vec<Vec<ModuleRecord>> = plans
        .iter()
        .map(|plan| plan.members.iter().map(|(_, record)| record.clone()).collect())
        .collect();
    let driver = drive(plans).boxed().shared();

    for (records, receiver) in members.into_iter().zip(receivers) {
        let Some(first) = records.first().cloned() else {
            continue;
        };
        let driver = driver.clone();
        let ready: ReadyFuture = async move {
            let outcome = match future::select(driver, receiver).await {
                Either::Left(((), receiver)) => receiver.await,
                Either::Right((outcome, _)) => outcome,
            };
            outcome.unwrap_or_else(|_| Err(failure_of(&first)))
        }
        .boxed()
        .shared();
        for record in &records {
            record.set_ready(ready.clone());
        }
    }
}

/// Run components as their dependencies settle. Independent components run
/// concurrently; nothing here nests one component's future inside another's.
async fn drive(mut components: Vec<Component>) {
    let mut events: FuturesUnordered<BoxFuture<'static, Event>> = FuturesUnordered::new();
    for (index, component) in components.iter_mut().enumerate() {
        for wait in component.outside.drain(..) {
            events.push(async move { Event::Outside(index, wait.await) }.boxed());
        }
        if component.waiting == 0 {
            events.push(run(index, component.members.clone()));
        }
    }

    while let Some(event) = events.next().await {
        match event {
            Event::Outside(index, Ok(())) => release(&mut components, index, &mut events),
            Event::Outside(index, Err(err)) | Event::Finished(index, Err(err)) => {
                fail(&mut components, index, err);
            }
            Event::Finished(index, Ok(())) => {
                let component = &mut components[index];
                component.settled = true;
                if let Some(outcome) = component.outcome.take() {
                    let _ = outcome.send(Ok(()));
                }
                for dependent in component.dependents.clone() {
                    release(&mut components, dependent, &mut events);
                }
            }
        }
    }
}

/// One dependency of `index` settled
fn release(
    components: &mut [Component],
    index: usize,
    events: &mut FuturesUnordered<BoxFuture<'static, Event>>,
) {
    let component = &mut components[index];
    if component.settled {
        return;
    }
    component.waiting -= 1;
    if component.waiting == 0 {
        events.push(run(index, component.members.clone()));
    }
}

/// Fail `index` and everything that depends on it
fn fail(components: &mut [Component], index: usize, err: CompartmentError) {
    let mut failing = vec![index];
    while let Some(index) = failing.pop() {
        let component = &mut components[index];
        if component.settled {
            continue;
        }
        component.settled = true;
        for (_, member) in &component.members {
            member.fail(err.clone());
        }
        if let Some(outcome) = component.outcome.take() {
            let _ = outcome.send(Err(err.clone()));
        }
        failing.extend(component.dependents.iter().copied());
    }
}

/// Execute a component's members one after another
fn run(index: usize, members: Vec<Node>) -> BoxFuture<'static, Event> {
    async move {
        for (position, (compartment, record)) in members.iter().enumerate() {
            if let Err(err) = execute(compartment, record).await {
                for (_, rest) in &members[position + 1..] {
                    rest.fail(err.clone());
                }
                return Event::Finished(index, Err(err));
            }
        }
        Event::Finished(index, Ok(()))
    }
    .boxed()
}

/// Run one record's body.
async fn execute(compartment: &Compartment, record: &ModuleRecord) -> Result<()> {
    if !record.transition(Phase::Executing) {
        // Already failed through a sibling.
        return match record.phase() {
            Phase::Failed => Err(failure_of(record)),
            _ => Ok(()),
        };
    }

    let RecordSource::Module {
        initializer,
        needs_import,
        needs_import_meta,
        import_meta,
        ..
    } = record.source()
    else {
        record.transition(Phase::Ready);
        return Ok(());
    };

    let scope = ModuleScope {
        key: record.key().to_string(),
        environment: record.environment().clone(),
        importer: needs_import.then(|| Importer::new(compartment.clone(), record.key())),
        import_meta: needs_import_meta.then(|| {
            let meta = Object::new();
            for (name, value) in import_meta {
                meta.set(name.clone(), value.clone());
            }
            compartment.decorate_import_meta(record.key(), &meta);
            meta
        }),
    };

    tracing::debug!("Executing module '{}'", record.key());
    let outcome = match initializer {
        Initializer::Noop => Ok(()),
        Initializer::Synchronous(body) => body(scope),
        Initializer::Asynchronous(body) => body(scope).await,
    };

    match outcome {
        Ok(()) => {
            record.transition(Phase::Ready);
            Ok(())
        }
        Err(error) => {
            let err = CompartmentError::Initialization {
                key: record.key().to_string(),
                error,
            };
            tracing::warn!("{}", err);
            record.fail(err.clone());
            Err(err)
        }
    }
}
