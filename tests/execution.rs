// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Executor: ordering, cycles, failures and asynchronous bodies

mod common;

use common::{RunLog, init_tracing};
use compartment::{
    Binding, CompiledModule, Compartment, CompartmentError, Initializer, ModuleDescriptor,
    Object, Phase, Value, VirtualSource,
};
use compartment_macros::{assert_err, assert_matches, assert_ok, assert_some, bindings};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

fn chain(log: &RunLog) -> Compartment {
    Compartment::builder()
        .module(
            "main.js",
            log.module(
                bindings! { import a from "./a.js"; import b from "./b.js"; },
                &[],
            ),
        )
        .module(
            "a.js",
            log.module(bindings! { import c from "./c.js"; export a; }, &[("a", Value::from(1))]),
        )
        .module("b.js", log.module(bindings! { export b; }, &[("b", Value::from(2))]))
        .module("c.js", log.module(bindings! { export c; }, &[("c", Value::from(3))]))
        .build()
}

#[tokio::test]
async fn test_dependencies_run_first() {
    init_tracing();
    let log = RunLog::new();
    let compartment = chain(&log);

    assert_ok!(compartment.import("main.js").await);

    let at = |key: &str| assert_some!(log.position(key));
    assert!(at("c.js") < at("a.js"));
    assert!(at("a.js") < at("main.js"));
    assert!(at("b.js") < at("main.js"));
    assert_eq!(log.entries().len(), 4);
    for key in ["main.js", "a.js", "b.js", "c.js"] {
        assert_eq!(compartment.phase(key), Some(Phase::Ready));
    }
}

#[tokio::test]
async fn test_importing_a_dependency_first() {
    let log = RunLog::new();
    let compartment = chain(&log);

    assert_ok!(compartment.import("a.js").await);
    assert_eq!(log.entries(), vec!["c.js", "a.js"]);
    assert_eq!(compartment.phase("main.js"), None);

    assert_ok!(compartment.import("main.js").await);
    assert_eq!(log.entries(), vec!["c.js", "a.js", "b.js", "main.js"]);
}

fn cycle(log: &RunLog) -> Compartment {
    Compartment::builder()
        .module("a.js", log.module(bindings! { import b from "./b.js"; export a; }, &[]))
        .module("b.js", log.module(bindings! { import a from "./a.js"; export b; }, &[]))
        .build()
}

#[tokio::test]
async fn test_cycle_runs_in_completion_order() {
    init_tracing();
    let log = RunLog::new();
    let compartment = cycle(&log);
    assert_ok!(compartment.import("a.js").await);
    assert_eq!(log.entries(), vec!["b.js", "a.js"]);

    let log = RunLog::new();
    let compartment = cycle(&log);
    assert_ok!(compartment.import("b.js").await);
    assert_eq!(log.entries(), vec!["a.js", "b.js"]);

    // Importing the other member afterwards runs nothing.
    assert_ok!(compartment.import("a.js").await);
    assert_eq!(log.entries().len(), 2);
}

#[tokio::test]
async fn test_cycle_reads_before_initialization() {
    let compartment = Compartment::builder()
        .module(
            "a.js",
            VirtualSource::new()
                .with_bindings(bindings! { import b from "./b.js"; export a; })
                .with_execute(Initializer::sync(|scope| {
                    scope.set("a", "a")?;
                    Ok(())
                })),
        )
        .module(
            "b.js",
            VirtualSource::new()
                .with_bindings(bindings! { import a from "./a.js"; export b; })
                .with_execute(Initializer::sync(|scope| {
                    // a.js has not run yet.
                    let a = scope.get("a")?;
                    scope.set("b", a)?;
                    Ok(())
                })),
        )
        .build();

    let err = assert_err!(compartment.import("a.js").await);
    assert_matches!(
        err,
        CompartmentError::Initialization { ref key, ref error }
            if key == "b.js" && error.as_str().is_some_and(|s| s.contains("before initialization"))
    );
    // The rest of the component fails with the same error without running.
    assert_eq!(compartment.record("a.js").unwrap().error(), Some(err));
}

#[tokio::test]
async fn test_failure_is_permanent() {
    init_tracing();
    let log = RunLog::new();
    let compartment = Compartment::builder()
        .module("bad.js", log.throwing(bindings! { export x; }, "boom"))
        .module("main.js", log.module(bindings! { import x from "./bad.js"; }, &[]))
        .module("other.js", log.module(bindings! { import x from "./bad.js"; }, &[]))
        .build();

    let expected = CompartmentError::Initialization {
        key: "bad.js".to_string(),
        error: Value::from("boom"),
    };
    assert_eq!(assert_err!(compartment.import("main.js").await), expected);
    assert_eq!(assert_err!(compartment.import("main.js").await), expected);
    assert_eq!(assert_err!(compartment.import("bad.js").await), expected);
    assert_eq!(assert_err!(compartment.import("other.js").await), expected);

    assert_eq!(log.entries(), vec!["bad.js"]);
    assert_eq!(compartment.phase("bad.js"), Some(Phase::Failed));
    assert_eq!(compartment.phase("main.js"), Some(Phase::Failed));
}

#[tokio::test]
async fn test_async_body_only_delays_dependents() {
    init_tracing();
    let log = RunLog::new();
    let gate = Arc::new(Notify::new());
    let slow = {
        let gate = gate.clone();
        let log = log.clone();
        VirtualSource::new()
            .with_binding(Binding::export("done"))
            .with_execute(Initializer::asynchronous(move |scope| {
                let gate = gate.clone();
                let log = log.clone();
                async move {
                    gate.notified().await;
                    log.push(scope.key());
                    scope.set("done", true)?;
                    Ok(())
                }
            }))
    };
    let compartment = Compartment::builder()
        .module("slow.js", slow)
        .module("fast.js", log.module(bindings! { export ok; }, &[("ok", Value::from(true))]))
        .module(
            "main.js",
            log.module(
                bindings! { import done from "./slow.js"; import ok from "./fast.js"; },
                &[],
            ),
        )
        .build();

    let task = tokio::spawn(compartment.import("main.js"));

    tokio::time::timeout(Duration::from_secs(5), async {
        while compartment.phase("fast.js") != Some(Phase::Ready) {
            tokio::task::yield_now().await;
        }
    })
    .await
    .expect("fast.js must not wait for slow.js");

    assert_eq!(compartment.phase("slow.js"), Some(Phase::Executing));
    assert_eq!(compartment.phase("main.js"), Some(Phase::Linked));

    // Unrelated imports complete while slow.js is suspended.
    assert_ok!(compartment.import("fast.js").await);
    let err = assert_err!(compartment.import_now("slow.js"));
    assert!(err.is_unavailable());

    gate.notify_one();
    let main = assert_ok!(task.await.expect("import task panicked"));
    assert!(main.is_empty());
    assert_eq!(log.entries(), vec!["fast.js", "slow.js", "main.js"]);
}

#[tokio::test]
async fn test_async_body_failure() {
    let compartment = Compartment::builder()
        .module(
            "remote.js",
            VirtualSource::new().with_execute(Initializer::asynchronous(|_scope| async {
                tokio::task::yield_now().await;
                Err(Value::from("rejected"))
            })),
        )
        .module(
            "main.js",
            VirtualSource::new().with_binding(Binding::import_all("remote", "./remote.js")),
        )
        .build();

    let err = assert_err!(compartment.import("main.js").await);
    assert_matches!(err, CompartmentError::Initialization { ref key, .. } if key == "remote.js");
    assert_eq!(compartment.phase("main.js"), Some(Phase::Failed));
}

#[tokio::test]
async fn test_import_meta() {
    let compartment = Compartment::builder()
        .import_meta_hook(|key: &str, meta: &Object| {
            meta.set("main", key == "entry.js");
        })
        .module(
            "entry.js",
            VirtualSource::new()
                .with_bindings(bindings! { export url; export main; })
                .with_import_meta()
                .with_meta("url", "file:///entry.js")
                .with_execute(Initializer::sync(|scope| {
                    let meta = scope.import_meta().cloned().ok_or("import.meta missing")?;
                    scope.set("url", meta.get("url").unwrap_or_default())?;
                    scope.set("main", meta.get("main").unwrap_or_default())?;
                    Ok(())
                })),
        )
        .module(
            "plain.js",
            VirtualSource::new()
                .with_binding(Binding::export("has_meta"))
                .with_execute(Initializer::sync(|scope| {
                    scope.set("has_meta", scope.import_meta().is_some())?;
                    Ok(())
                })),
        )
        .build();

    let entry = assert_ok!(compartment.import("entry.js").await);
    assert_eq!(entry.get("url").unwrap(), Value::from("file:///entry.js"));
    assert_eq!(entry.get("main").unwrap(), Value::Boolean(true));

    let plain = assert_ok!(compartment.import("plain.js").await);
    assert_eq!(plain.get("has_meta").unwrap(), Value::Boolean(false));
}

#[tokio::test]
async fn test_dynamic_import() {
    init_tracing();
    let log = RunLog::new();
    let compartment = Compartment::builder()
        .module(
            "lib/lazy.js",
            log.module(bindings! { export value; }, &[("value", Value::from(42))]),
        )
        .module(
            "lib/loader.js",
            VirtualSource::new()
                .with_binding(Binding::export("lazy"))
                .with_import()
                .with_execute(Initializer::asynchronous(|scope| async move {
                    let importer = scope.importer().cloned().ok_or("no importer")?;
                    let lazy = importer.import("./lazy.js").await?;
                    scope.set("lazy", lazy)?;
                    Ok(())
                })),
        )
        .module(
            "lib/eager.js",
            VirtualSource::new()
                .with_binding(Binding::export("value"))
                .with_import()
                .with_execute(Initializer::sync(|scope| {
                    let importer = scope.importer().cloned().ok_or("no importer")?;
                    let lazy = importer.import_now("./lazy.js")?;
                    scope.set("value", lazy.get("value")?)?;
                    Ok(())
                })),
        )
        .build();

    let loader = assert_ok!(compartment.import("lib/loader.js").await);
    let lazy = loader.get("lazy").unwrap();
    let lazy = assert_some!(lazy.as_namespace());
    assert_eq!(lazy.key(), "lib/lazy.js");
    assert_eq!(lazy.get("value").unwrap(), Value::from(42));

    let eager = assert_ok!(compartment.import("lib/eager.js").await);
    assert_eq!(eager.get("value").unwrap(), Value::from(42));
    assert_eq!(log.count("lib/lazy.js"), 1);
}

struct Compiled {
    bindings: Vec<Binding>,
}

impl CompiledModule for Compiled {
    fn bindings(&self) -> &[Binding] {
        &self.bindings
    }

    fn uses_import_meta(&self) -> bool {
        true
    }

    fn initializer(&self) -> Initializer {
        Initializer::sync(|scope| {
            let meta = scope.import_meta().cloned().unwrap_or_default();
            scope.set("origin", meta.get("origin").unwrap_or_default())?;
            Ok(())
        })
    }
}

#[tokio::test]
async fn test_compiled_module() {
    let descriptor = match ModuleDescriptor::compiled(Compiled {
        bindings: bindings! { export origin; },
    }) {
        ModuleDescriptor::Compiled { module, mut import_meta } => {
            import_meta.insert("origin".to_string(), Value::from("compiler"));
            ModuleDescriptor::Compiled {
                module,
                import_meta,
            }
        }
        other => other,
    };
    let compartment = Compartment::builder().module("compiled.js", descriptor).build();

    let ns = assert_ok!(compartment.import("compiled.js").await);
    assert_eq!(ns.get("origin").unwrap(), Value::from("compiler"));
}

#[test]
fn test_evaluate() {
    let plain = Compartment::builder().name("plain").build();
    let err = assert_err!(plain.evaluate("1 + 1"));
    assert_eq!(
        err,
        CompartmentError::EvaluatorUnavailable {
            compartment: "plain".to_string()
        }
    );

    let compartment = Compartment::builder()
        .module("answer.js", VirtualSource::new().with_bindings(bindings! { export n; }).with_execute(
            Initializer::sync(|scope| {
                scope.set("n", 42)?;
                Ok(())
            }),
        ))
        .evaluator(|compartment: &Compartment, source: &str| -> Result<Value, Value> {
            match source.strip_prefix("import ") {
                Some(key) => Ok(compartment.import_now(key)?.get("n")?),
                None => Err(Value::from(format!("SyntaxError: {}", source))),
            }
        })
        .build();

    assert_eq!(compartment.evaluate("import answer.js").unwrap(), Value::from(42));
    let err = assert_err!(compartment.evaluate("1 +"));
    assert_eq!(err, CompartmentError::Evaluation(Value::from("SyntaxError: 1 +")));
}

/// `m0.js` imports `m1.js`, which imports `m2.js`, and so on
fn deep_chain(log: &RunLog, len: usize) -> Compartment {
    let modules = (0..len).map(|i| {
        let mut bindings = vec![Binding::export("x")];
        if i + 1 < len {
            bindings.push(Binding::import_as("x", "y", format!("./m{}.js", i + 1)));
        }
        (format!("m{}.js", i), log.module(bindings, &[("x", Value::from(i as i32))]))
    });
    Compartment::builder().modules(modules).build()
}

#[tokio::test]
async fn test_deep_import_chain() {
    let log = RunLog::new();
    let compartment = deep_chain(&log, 10_000);

    let first = assert_ok!(compartment.import("m0.js").await);
    assert_eq!(first.get("x").unwrap(), Value::from(0));

    let entries = log.entries();
    assert_eq!(entries.len(), 10_000);
    assert_eq!(entries.first().map(String::as_str), Some("m9999.js"));
    assert_eq!(entries.last().map(String::as_str), Some("m0.js"));

    let middle = assert_some!(compartment.record("m5000.js"));
    assert_eq!(middle.phase(), Phase::Ready);
    assert_eq!(middle.environment().get("y").unwrap(), Value::from(5001));
}

#[test]
fn test_deep_import_chain_synchronously() {
    let log = RunLog::new();
    let compartment = deep_chain(&log, 10_000);

    let first = assert_ok!(compartment.import_now("m0.js"));
    assert_eq!(first.get("x").unwrap(), Value::from(0));
    assert_eq!(log.count("m9999.js"), 1);
    assert_eq!(compartment.keys().len(), 10_000);
}
