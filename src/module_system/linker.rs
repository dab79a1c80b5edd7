// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Binding linker
//!
//! Links a batch of `Loaded` records in three steps:
//! 1. allocate a slot for every local name a record exports
//! 2. resolve every import and export to a slot, touching no namespace
//! 3. commit environments and namespaces, then mark records `Linked`
//!
//! A record that fails to resolve, and every batch record that depends on it,
//! ends up `Failed` with the same error. Unrelated records still link.

use crate::error::{CompartmentError, Result};
use crate::module_system::compartment::Compartment;
use crate::module_system::namespace::Slot;
use crate::module_system::record::{ModuleRecord, Phase};
use crate::module_system::Binding;
use crate::value::Value;
use rustc_hash::{FxHashMap, FxHashSet};

/// Slots one record contributes once committed
#[derive(Default)]
struct Plan {
    imports: Vec<(String, Slot)>,
    exports: Vec<(String, Slot)>,
}

/// Where an explicitly exported name leads
enum Export {
    Slot(Slot),
    /// `export { x as y } from`: may come up empty
    Forward(ModuleRecord, String),
    /// An exported import; it must resolve
    Import {
        target: ModuleRecord,
        name: String,
        from: String,
    },
    Missing,
}

/// Work item of an export resolution
enum Step {
    Resolve(ModuleRecord, String),
    /// Reached once everything above it came up empty
    Require(CompartmentError),
}

struct Linker {
    batch: FxHashMap<usize, (Compartment, ModuleRecord)>,
    locals: FxHashMap<usize, FxHashMap<String, Slot>>,
}

/// Link `batch`, each record paired with the compartment that owns it.
/// Records not in phase `Loaded` are ignored.
pub(crate) fn link(batch: &[(Compartment, ModuleRecord)]) {
    let batch: Vec<(Compartment, ModuleRecord)> = batch
        .iter()
        .filter(|(_, record)| record.transition(Phase::Linking))
        .cloned()
        .collect();
    if batch.is_empty() {
        return;
    }
    tracing::debug!("Linking {} module(s)", batch.len());

    let mut linker = Linker {
        batch: batch
            .iter()
            .map(|(compartment, record)| (record.id(), (compartment.clone(), record.clone())))
            .collect(),
        locals: FxHashMap::default(),
    };

    for (_, record) in &batch {
        linker.declare_locals(record);
    }

    let mut plans: FxHashMap<usize, Plan> = FxHashMap::default();
    let mut failed: FxHashMap<usize, CompartmentError> = FxHashMap::default();
    for (_, record) in &batch {
        match linker.plan(record) {
            Ok(plan) => {
                plans.insert(record.id(), plan);
            }
            Err(err) => {
                tracing::debug!("Failed to link '{}': {}", record.key(), err);
                failed.insert(record.id(), err);
            }
        }
    }

    // Dependents of a failed record fail with its error.
    let mut dependents: FxHashMap<usize, Vec<usize>> = FxHashMap::default();
    for (compartment, record) in &batch {
        for key in record.dependency_keys() {
            if let Some(dep) = compartment.lookup(&key) {
                dependents.entry(dep.id()).or_default().push(record.id());
            }
        }
    }
    let mut spread: Vec<usize> = failed.keys().copied().collect();
    while let Some(id) = spread.pop() {
        let Some(err) = failed.get(&id).cloned() else {
            continue;
        };
        for dependent in dependents.get(&id).into_iter().flatten() {
            if !failed.contains_key(dependent) {
                failed.insert(*dependent, err.clone());
                spread.push(*dependent);
            }
        }
    }

    for (_, record) in &batch {
        if let Some(err) = failed.remove(&record.id()) {
            record.fail(err);
            continue;
        }
        let Some(plan) = plans.remove(&record.id()) else {
            continue;
        };
        let environment = record.environment();
        if let Some(locals) = linker.locals.get(&record.id()) {
            for (name, slot) in locals {
                environment.declare(name, slot.clone());
            }
        }
        for (name, slot) in plan.imports {
            environment.bind_import(&name, slot);
        }
        for (name, slot) in plan.exports {
            record.namespace().define(&name, slot);
        }
        record.transition(Phase::Linked);
    }
}

impl Linker {
    /// Slots for every exported local that is not itself an import
    fn declare_locals(&mut self, record: &ModuleRecord) {
        let bindings = record.bindings();
        let mut locals = FxHashMap::default();
        for binding in bindings {
            let name = match binding {
                Binding::Export { name } | Binding::ExportAs { name, .. } => name,
                _ => continue,
            };
            let imported = bindings
                .iter()
                .any(|b| b.is_import() && b.local_name() == Some(name.as_str()));
            if !imported {
                locals.entry(name.clone()).or_insert_with(Slot::new);
            }
        }
        self.locals.insert(record.id(), locals);
    }

    fn plan(&self, record: &ModuleRecord) -> Result<Plan> {
        let bindings = record.bindings();
        check_duplicates(record.key(), bindings)?;

        for (_, key) in record.requests() {
            let target = self.target_by_key(record, key)?;
            if target.phase() == Phase::Failed && !self.batch.contains_key(&target.id()) {
                return Err(failure_of(&target));
            }
        }

        let mut plan = Plan::default();
        for binding in bindings {
            match binding {
                Binding::Import { name, from } => {
                    let slot = self.import_slot(record, name, from)?;
                    plan.imports.push((name.clone(), slot));
                }
                Binding::ImportAs { name, alias, from } => {
                    let slot = self.import_slot(record, name, from)?;
                    plan.imports.push((alias.clone(), slot));
                }
                Binding::ImportAll { alias, from } => {
                    let target = self.target(record, from)?;
                    plan.imports.push((alias.clone(), namespace_slot(&target)));
                }
                _ => {}
            }
        }

        for name in self.exported_names(record)? {
            match self.resolve_export(record, &name)? {
                Some(slot) => plan.exports.push((name, slot)),
                None => {
                    // Explicit re-exports must resolve; unresolvable star
                    // names are dropped.
                    if let Some(Binding::ExportAsFrom { name: remote, from, .. }) = bindings
                        .iter()
                        .find(|b| b.exported_name() == Some(name.as_str()))
                    {
                        return Err(CompartmentError::missing_export(record.key(), from, remote));
                    }
                }
            }
        }

        Ok(plan)
    }

    /// Slot of `name` exported by the module `from` refers to
    fn import_slot(&self, record: &ModuleRecord, name: &str, from: &str) -> Result<Slot> {
        let target = self.target(record, from)?;
        self.resolve_export(&target, name)?
            .ok_or_else(|| CompartmentError::missing_export(record.key(), from, name))
    }

    /// Resolve the slot `record` exports as `name`.
    ///
    /// Explicit exports are checked first, then `export *` bindings from the
    /// last declared to the first. `Ok(None)` means the name is not exported.
    fn resolve_export(&self, record: &ModuleRecord, name: &str) -> Result<Option<Slot>> {
        let mut visited = FxHashSet::default();
        let mut pending = vec![Step::Resolve(record.clone(), name.to_string())];

        while let Some(step) = pending.pop() {
            let (record, name) = match step {
                Step::Resolve(record, name) => (record, name),
                Step::Require(err) => return Err(err),
            };
            if !self.batch.contains_key(&record.id()) {
                if record.phase() == Phase::Failed {
                    return Err(failure_of(&record));
                }
                match record.namespace().slot(&name) {
                    Some(slot) => return Ok(Some(slot)),
                    None => continue,
                }
            }
            if !visited.insert((record.id(), name.clone())) {
                continue;
            }

            match self.explicit_export(&record, &name)? {
                Some(Export::Slot(slot)) => return Ok(Some(slot)),
                Some(Export::Forward(target, remote)) => {
                    pending.push(Step::Resolve(target, remote));
                }
                Some(Export::Import { target, name: remote, from }) => {
                    pending.push(Step::Require(CompartmentError::missing_export(
                        record.key(),
                        &from,
                        &remote,
                    )));
                    pending.push(Step::Resolve(target, remote));
                }
                Some(Export::Missing) => {}
                None if name == self.default_export(&record) => {}
                None => {
                    // Pushed in declaration order so the last one is tried first.
                    for binding in record.bindings() {
                        if let Binding::ExportAll { from } = binding {
                            let target = self.target(&record, from)?;
                            pending.push(Step::Resolve(target, name.clone()));
                        }
                    }
                }
            }
        }
        Ok(None)
    }

    /// The explicit export of `name`, if `record` declares one
    fn explicit_export(&self, record: &ModuleRecord, name: &str) -> Result<Option<Export>> {
        for binding in record.bindings() {
            match binding {
                Binding::Export { name: local } if local == name => {
                    return self.local_export(record, local).map(Some);
                }
                Binding::ExportAs { name: local, alias } if alias == name => {
                    return self.local_export(record, local).map(Some);
                }
                Binding::ExportAsFrom {
                    name: remote,
                    alias,
                    from,
                } if alias == name => {
                    let target = self.target(record, from)?;
                    return Ok(Some(Export::Forward(target, remote.clone())));
                }
                Binding::ExportAllAs { alias, from } if alias == name => {
                    let target = self.target(record, from)?;
                    return Ok(Some(Export::Slot(namespace_slot(&target))));
                }
                _ => {}
            }
        }
        Ok(None)
    }

    /// An exported local: an import passes through to its source module
    fn local_export(&self, record: &ModuleRecord, local: &str) -> Result<Export> {
        for binding in record.bindings() {
            match binding {
                Binding::Import { name, from } if name == local => {
                    return self.imported(record, name, from);
                }
                Binding::ImportAs { name, alias, from } if alias == local => {
                    return self.imported(record, name, from);
                }
                Binding::ImportAll { alias, from } if alias == local => {
                    let target = self.target(record, from)?;
                    return Ok(Export::Slot(namespace_slot(&target)));
                }
                _ => {}
            }
        }
        Ok(self
            .locals
            .get(&record.id())
            .and_then(|locals| locals.get(local))
            .cloned()
            .map_or(Export::Missing, Export::Slot))
    }

    fn imported(&self, record: &ModuleRecord, name: &str, from: &str) -> Result<Export> {
        Ok(Export::Import {
            target: self.target(record, from)?,
            name: name.to_string(),
            from: from.to_string(),
        })
    }

    /// Every name `record` exports, sorted
    fn exported_names(&self, record: &ModuleRecord) -> Result<Vec<String>> {
        let default_export = self.default_export(record);
        let mut names: Vec<String> = record
            .bindings()
            .iter()
            .filter_map(|b| b.exported_name().map(str::to_string))
            .collect();

        let mut visited = FxHashSet::default();
        visited.insert(record.id());
        let mut pending = self.star_targets(record)?;
        while let Some(target) = pending.pop() {
            if !self.batch.contains_key(&target.id()) {
                if target.phase() == Phase::Failed {
                    return Err(failure_of(&target));
                }
                for name in target.namespace().keys() {
                    if name != default_export && !names.contains(&name) {
                        names.push(name);
                    }
                }
                continue;
            }
            if !visited.insert(target.id()) {
                continue;
            }
            for name in target.bindings().iter().filter_map(|b| b.exported_name()) {
                if name != default_export && !names.iter().any(|n| n == name) {
                    names.push(name.to_string());
                }
            }
            pending.extend(self.star_targets(&target)?);
        }

        names.sort();
        Ok(names)
    }

    fn star_targets(&self, record: &ModuleRecord) -> Result<Vec<ModuleRecord>> {
        let mut targets = Vec::new();
        for binding in record.bindings() {
            if let Binding::ExportAll { from } = binding {
                targets.push(self.target(record, from)?);
            }
        }
        Ok(targets)
    }

    fn default_export(&self, record: &ModuleRecord) -> &str {
        self.batch
            .get(&record.id())
            .map(|(compartment, _)| compartment.config().default_export.as_str())
            .unwrap_or(crate::config::DEFAULT_EXPORT)
    }

    fn target(&self, record: &ModuleRecord, specifier: &str) -> Result<ModuleRecord> {
        let key = record.requested_key(specifier).ok_or_else(|| {
            CompartmentError::binding(
                record.key(),
                format!("specifier '{}' was never resolved", specifier),
            )
        })?;
        self.target_by_key(record, key)
    }

    fn target_by_key(&self, record: &ModuleRecord, key: &str) -> Result<ModuleRecord> {
        let target = self
            .batch
            .get(&record.id())
            .and_then(|(compartment, _)| compartment.lookup(key))
            .ok_or_else(|| {
                CompartmentError::binding(record.key(), format!("module '{}' is not loaded", key))
            })?;
        Ok(self
            .batch
            .get(&target.id())
            .map(|(_, record)| record.clone())
            .unwrap_or(target))
    }
}

fn namespace_slot(record: &ModuleRecord) -> Slot {
    Slot::with_value(Value::Namespace(record.namespace().clone()))
}

fn failure_of(record: &ModuleRecord) -> CompartmentError {
    record.error().unwrap_or_else(|| {
        CompartmentError::binding(record.key(), "module failed without an error")
    })
}

/// Reject duplicate local import names and duplicate explicit export names
fn check_duplicates(key: &str, bindings: &[Binding]) -> Result<()> {
    let mut imported = FxHashSet::default();
    let mut exported = FxHashSet::default();
    for binding in bindings {
        if binding.is_import() {
            if let Some(local) = binding.local_name() {
                if !imported.insert(local) {
                    return Err(CompartmentError::binding(
                        key,
                        format!("duplicate import binding '{}'", local),
                    ));
                }
            }
        }
        if let Some(name) = binding.exported_name() {
            if !exported.insert(name) {
                return Err(CompartmentError::binding(
                    key,
                    format!("duplicate export '{}'", name),
                ));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duplicate_import() {
        let bindings = vec![
            Binding::import("x", "./a.js"),
            Binding::import_as("y", "x", "./b.js"),
        ];
        let err = check_duplicates("m.js", &bindings).unwrap_err();
        assert!(matches!(err, CompartmentError::Binding { .. }));
    }

    #[test]
    fn test_duplicate_export() {
        let bindings = vec![Binding::export("x"), Binding::export_as("y", "x")];
        assert!(check_duplicates("m.js", &bindings).is_err());

        let bindings = vec![Binding::import("x", "./a.js"), Binding::export("x")];
        assert!(check_duplicates("m.js", &bindings).is_ok());
    }
}
