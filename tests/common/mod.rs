// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Shared helpers for the integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use compartment::{Binding, Initializer, LoadHook, ModuleDescriptor, Value, VirtualSource};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// Install a test subscriber once; `RUST_LOG=compartment=trace` shows the
/// loader's decisions.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Records which module bodies ran, in order.
#[derive(Clone, Default)]
pub struct RunLog(Arc<Mutex<Vec<String>>>);

impl RunLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, key: &str) {
        self.0.lock().push(key.to_string());
    }

    pub fn entries(&self) -> Vec<String> {
        self.0.lock().clone()
    }

    pub fn count(&self, key: &str) -> usize {
        self.0.lock().iter().filter(|k| *k == key).count()
    }

    pub fn position(&self, key: &str) -> Option<usize> {
        self.0.lock().iter().position(|k| k == key)
    }

    /// A module that logs its key, then assigns each of `exports`
    pub fn module(&self, bindings: Vec<Binding>, exports: &[(&str, Value)]) -> VirtualSource {
        let log = self.clone();
        let exports: Vec<(String, Value)> = exports
            .iter()
            .map(|(name, value)| (name.to_string(), value.clone()))
            .collect();
        VirtualSource::new()
            .with_bindings(bindings)
            .with_execute(Initializer::sync(move |scope| {
                log.push(scope.key());
                for (name, value) in &exports {
                    scope.set(name, value.clone())?;
                }
                Ok(())
            }))
    }

    /// A module that logs its key, then throws `message`
    pub fn throwing(&self, bindings: Vec<Binding>, message: &str) -> VirtualSource {
        let log = self.clone();
        let message = message.to_string();
        VirtualSource::new()
            .with_bindings(bindings)
            .with_execute(Initializer::sync(move |scope| {
                log.push(scope.key());
                Err(Value::from(message.as_str()))
            }))
    }
}

/// Load hook backed by a fixed table. Counts calls per key and tracks how
/// many calls were in flight at once.
#[derive(Clone, Default)]
pub struct TableHook {
    modules: Arc<HashMap<String, ModuleDescriptor>>,
    calls: Arc<Mutex<Vec<String>>>,
    in_flight: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
}

impl TableHook {
    pub fn new<K, D>(modules: impl IntoIterator<Item = (K, D)>) -> Self
    where
        K: Into<String>,
        D: Into<ModuleDescriptor>,
    {
        Self {
            modules: Arc::new(
                modules
                    .into_iter()
                    .map(|(key, descriptor)| (key.into(), descriptor.into()))
                    .collect(),
            ),
            ..Self::default()
        }
    }

    pub fn calls(&self, key: &str) -> usize {
        self.calls.lock().iter().filter(|k| *k == key).count()
    }

    pub fn total_calls(&self) -> usize {
        self.calls.lock().len()
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LoadHook for TableHook {
    async fn load(&self, key: &str) -> Result<Option<ModuleDescriptor>, String> {
        self.calls.lock().push(key.to_string());
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(5)).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        Ok(self.modules.get(key).cloned())
    }
}
