// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Module system implementation
//!
//! ## Loading
//! - Specifier resolution through a [`ResolveHook`]
//! - Descriptors from a static table, an async [`LoadHook`] or a sync hook
//! - Concurrent, memoized loading of cyclic graphs
//!
//! ## Linking and execution
//! - Live bindings through shared slots
//! - `export *` forwarding with last-declared-wins conflicts
//! - Strongly connected components executed in dependency order
//! - Asynchronous module bodies
//!
//! ## Synthetic modules
//! - JSON and text modules
//! - Aliases to instances, ancestor records and namespaces

mod binding;
mod compartment;
mod descriptor;
mod executor;
mod json;
mod linker;
mod namespace;
mod record;
mod resolver;

pub use binding::{Binding, requested_specifiers};
pub use compartment::{Compartment, CompartmentBuilder};
pub use descriptor::{
    CompiledModule, Evaluator, ImportMetaHook, ImportNowHook, InitFuture, Initializer, LoadHook,
    ModuleDescriptor, VirtualSource,
};
pub use executor::{Importer, ModuleScope};
pub use json::{json_module, json_value, text_module};
pub use namespace::{Environment, ModuleNamespace, Slot};
pub use record::{ModuleRecord, Phase};
pub use resolver::{PathResolver, ResolveHook};
