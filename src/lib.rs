// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! # compartment
//!
//! A module registry and loader core for script engines.
//!
//! A [`Compartment`] resolves import specifiers to canonical keys, obtains a
//! [`ModuleDescriptor`] for each key, and builds, links and executes the
//! module graph behind an import:
//!
//! - concurrent loading with a per-key memo, tolerant of cycles
//! - live bindings between module environments and exports namespaces
//! - execution in dependency order, exactly once per module
//! - asynchronous module bodies that only delay their dependents
//! - synchronous `load_now` / `import_now` that fail cleanly instead of blocking
//! - several compartments per process, sharing modules only through aliases
//!
//! Compiling source text is left to the embedder: a compiler hands the
//! compartment a [`CompiledModule`] exposing its bindings and initializer, or
//! the embedder writes a [`VirtualSource`] directly.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use compartment::{Binding, Compartment, Initializer, VirtualSource};
//!
//! #[tokio::main]
//! async fn main() -> compartment::Result<()> {
//!     let compartment = Compartment::builder()
//!         .module(
//!             "math.js",
//!             VirtualSource::new()
//!                 .with_binding(Binding::export("pi"))
//!                 .with_execute(Initializer::sync(|scope| {
//!                     scope.set("pi", 3.14)?;
//!                     Ok(())
//!                 })),
//!         )
//!         .module(
//!             "main.js",
//!             VirtualSource::new().with_binding(Binding::import("pi", "./math.js")),
//!         )
//!         .build();
//!
//!     let math = compartment.import("math.js").await?;
//!     assert_eq!(math.get("pi")?, 3.14.into());
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod error;
pub mod module_system;
pub mod value;

// Re-exports
pub use config::CompartmentConfig;
pub use error::{CompartmentError, Result};
pub use module_system::{
    Binding, CompiledModule, Compartment, CompartmentBuilder, Environment, Evaluator, Importer,
    Initializer, LoadHook, ModuleDescriptor, ModuleNamespace, ModuleRecord, ModuleScope,
    PathResolver, Phase, ResolveHook, Slot, VirtualSource, json_module, text_module,
};
pub use value::{Object, Value};

/// Version of the compartment crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
