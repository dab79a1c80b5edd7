// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Aliases and compartment hierarchies

mod common;

use common::{RunLog, TableHook, init_tracing};
use compartment::{
    Compartment, CompartmentConfig, CompartmentError, ModuleDescriptor, Phase, Value,
    VirtualSource,
};
use compartment_macros::{assert_err, assert_matches, assert_ok, assert_some, bindings};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

#[tokio::test]
async fn test_compartments_are_isolated() {
    init_tracing();
    let log = RunLog::new();
    let source = log.module(bindings! { export x; }, &[("x", Value::from(1))]);
    let first = Compartment::builder().name("first").module("m.js", source.clone()).build();
    let second = Compartment::builder().name("second").module("m.js", source).build();

    let a = assert_ok!(first.import("m.js").await);
    let b = assert_ok!(second.import("m.js").await);
    assert!(!a.ptr_eq(&b));
    assert_eq!(log.count("m.js"), 2);
    assert_eq!(first.record("m.js").unwrap().compartment_name(), "first");
}

#[tokio::test]
async fn test_instance_alias_shares_record() {
    let log = RunLog::new();
    let compartment = Compartment::builder()
        .module("real.js", log.module(bindings! { export x; }, &[("x", Value::from("real"))]))
        .module("alias.js", ModuleDescriptor::instance_alias("real.js"))
        .module("alias2.js", ModuleDescriptor::instance_alias("alias.js"))
        .module(
            "user.js",
            VirtualSource::new().with_bindings(bindings! {
                import x from "./alias2.js";
                import x as y from "./real.js";
            }),
        )
        .build();

    let via_alias = assert_ok!(compartment.import("alias2.js").await);
    let real = assert_ok!(compartment.import("real.js").await);
    assert!(via_alias.ptr_eq(&real));
    assert!(
        compartment
            .record("alias2.js")
            .unwrap()
            .ptr_eq(&compartment.record("real.js").unwrap())
    );
    assert_eq!(log.count("real.js"), 1);

    assert_ok!(compartment.import("user.js").await);
    let user = compartment.record("user.js").unwrap();
    assert!(
        user.environment()
            .slot("x")
            .unwrap()
            .ptr_eq(&user.environment().slot("y").unwrap())
    );
}

#[tokio::test]
async fn test_alias_cycles_are_rejected() {
    let compartment = Compartment::builder()
        .module("a.js", ModuleDescriptor::instance_alias("b.js"))
        .module("b.js", ModuleDescriptor::instance_alias("a.js"))
        .module("self.js", ModuleDescriptor::instance_alias("self.js"))
        .build();

    let err = assert_err!(compartment.import("a.js").await);
    assert_matches!(err, CompartmentError::AliasCycle { .. });
    let err = assert_err!(compartment.load("self.js").await);
    assert_eq!(err, CompartmentError::AliasCycle { key: "self.js".to_string() });
    let err = assert_err!(compartment.load_now("b.js"));
    assert_matches!(err, CompartmentError::AliasCycle { .. });
    assert!(compartment.keys().is_empty());
}

#[tokio::test]
async fn test_record_alias_uses_parent_instance() {
    init_tracing();
    let log = RunLog::new();
    let parent = Compartment::builder()
        .name("parent")
        .module("lib.js", log.module(bindings! { export version; }, &[("version", Value::from(3))]))
        .build();
    let child = Compartment::builder()
        .name("child")
        .parent(&parent)
        .module("lib.js", ModuleDescriptor::record_alias("lib.js"))
        .module("main.js", log.module(bindings! { import version from "./lib.js"; export version; }, &[]))
        .build();

    let main = assert_ok!(child.import("main.js").await);
    assert_eq!(main.get("version").unwrap(), Value::from(3));

    let from_child = assert_ok!(child.import("lib.js").await);
    let from_parent = assert_ok!(parent.import("lib.js").await);
    assert!(from_child.ptr_eq(&from_parent));
    assert_eq!(log.entries(), vec!["lib.js", "main.js"]);

    // The record lives in the parent; the child only borrows it.
    assert_eq!(child.record("lib.js").unwrap().compartment_name(), "parent");
    assert!(child.parent().unwrap().ptr_eq(&parent));
}

#[tokio::test]
async fn test_record_alias_searches_ancestors() {
    let log = RunLog::new();
    let hook = TableHook::new([(
        "std:fs",
        log.module(bindings! { export read; }, &[("read", Value::from("fs.read"))]),
    )]);
    let root = Compartment::builder().name("root").load_hook(hook.clone()).build();
    let middle = Compartment::builder().name("middle").parent(&root).build();
    let leaf = Compartment::builder()
        .name("leaf")
        .parent(&middle)
        .module("std:fs", ModuleDescriptor::record_alias("std:fs"))
        .build();

    let fs = assert_ok!(leaf.import("std:fs").await);
    assert_eq!(fs.get("read").unwrap(), Value::from("fs.read"));
    assert_eq!(root.phase("std:fs"), Some(Phase::Ready));
    assert_eq!(middle.phase("std:fs"), None);
    assert_eq!(hook.calls("std:fs"), 1);
}

#[tokio::test]
async fn test_record_alias_needs_parent() {
    let compartment = Compartment::builder()
        .module("lib.js", ModuleDescriptor::record_alias("lib.js"))
        .build();

    let err = assert_err!(compartment.import("lib.js").await);
    assert_matches!(err, CompartmentError::InvalidDescriptor { ref key, .. } if key == "lib.js");
}

#[tokio::test]
async fn test_instance_alias_into_other_compartment() {
    let log = RunLog::new();
    let owner = Compartment::builder()
        .name("owner")
        .module("state.js", log.module(bindings! { export count; }, &[("count", Value::from(0))]))
        .build();
    let guest = Compartment::builder()
        .config(CompartmentConfig::named("guest"))
        .module("shared/state.js", ModuleDescriptor::instance_alias_in("state.js", &owner))
        .module(
            "shared/user.js",
            log.module(bindings! { import count from "./state.js"; }, &[]),
        )
        .build();

    assert_ok!(guest.import("shared/user.js").await);
    let guest_state = assert_some!(guest.namespace("shared/state.js"));
    let owner_state = assert_some!(owner.namespace("state.js"));
    assert!(guest_state.ptr_eq(&owner_state));
    assert_eq!(owner.phase("state.js"), Some(Phase::Ready));
    assert_eq!(log.entries(), vec!["state.js", "shared/user.js"]);

    // The synchronous path crosses compartments too.
    let again = assert_ok!(guest.import_now("shared/state.js"));
    assert!(again.ptr_eq(&owner_state));
}

#[test]
fn test_invalid_namespace_alias() {
    let compartment = Compartment::builder()
        .module("n", ModuleDescriptor::namespace(42))
        .build();

    let err = assert_err!(compartment.import_now("n"));
    assert_matches!(err, CompartmentError::InvalidDescriptor { ref reason, .. } if reason.contains("number"));
}

/// `x` in the first compartment aliases `y` in the second, which aliases
/// `x` in the first again
fn crossed_aliases() -> (Compartment, Compartment) {
    let first_cell: Arc<OnceLock<Compartment>> = Arc::default();
    let cell = first_cell.clone();
    let second = Compartment::builder()
        .name("second")
        .import_now_hook(move |key| match (key, cell.get()) {
            ("y", Some(first)) => Some(ModuleDescriptor::instance_alias_in("x", first)),
            _ => None,
        })
        .build();
    let first = Compartment::builder()
        .name("first")
        .module("x", ModuleDescriptor::instance_alias_in("y", &second))
        .build();
    let _ = first_cell.set(first.clone());
    (first, second)
}

#[tokio::test]
async fn test_alias_cycle_across_compartments() {
    init_tracing();
    let (first, second) = crossed_aliases();

    let outcome = assert_ok!(tokio::time::timeout(Duration::from_secs(5), first.import("x")).await);
    let err = assert_err!(outcome);
    assert_eq!(err, CompartmentError::AliasCycle { key: "x".to_string() });

    let err = assert_err!(second.load("y").await);
    assert_eq!(err, CompartmentError::AliasCycle { key: "y".to_string() });
    assert!(first.keys().is_empty());
    assert!(second.keys().is_empty());
}

#[test]
fn test_alias_cycle_across_compartments_synchronously() {
    let (first, second) = crossed_aliases();

    let err = assert_err!(first.load_now("x"));
    assert_matches!(err, CompartmentError::AliasCycle { ref key } if key == "x");
    let err = assert_err!(second.import_now("y"));
    assert_matches!(err, CompartmentError::AliasCycle { ref key } if key == "y");
    assert!(first.keys().is_empty());
    assert!(second.keys().is_empty());
}

#[tokio::test]
async fn test_module_cycle_across_compartments() {
    let log = RunLog::new();
    let first_cell: Arc<OnceLock<Compartment>> = Arc::default();
    let cell = first_cell.clone();
    let second = Compartment::builder()
        .name("second")
        .module(
            "b.js",
            log.module(bindings! { import a from "./a.js"; export b; }, &[("b", Value::from("b"))]),
        )
        .import_now_hook(move |key| match (key, cell.get()) {
            ("a.js", Some(first)) => Some(ModuleDescriptor::instance_alias_in("a.js", first)),
            _ => None,
        })
        .build();
    let first = Compartment::builder()
        .name("first")
        .module(
            "a.js",
            log.module(bindings! { import b from "./b.js"; export a; }, &[("a", Value::from("a"))]),
        )
        .module("b.js", ModuleDescriptor::instance_alias_in("b.js", &second))
        .build();
    let _ = first_cell.set(first.clone());

    let a = assert_ok!(first.import("a.js").await);
    assert_eq!(a.get("a").unwrap(), Value::from("a"));
    assert_eq!(log.entries(), vec!["b.js", "a.js"]);
    assert_eq!(second.phase("b.js"), Some(Phase::Ready));

    let record = assert_some!(first.record("a.js"));
    assert_eq!(record.environment().get("b").unwrap(), Value::from("b"));
    let b = assert_ok!(second.import("b.js").await);
    assert!(b.ptr_eq(&assert_some!(first.namespace("b.js"))));
}
