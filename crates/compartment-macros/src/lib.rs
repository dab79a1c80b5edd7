// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Declarative macros for the compartment module loader.
//!
//! # Macros Overview
//!
//! ## Module descriptors
//! - [`bindings!`] - Write a module's import/export table in source-like syntax
//! - [`object!`] - Create a `compartment::Object` literal
//!
//! ## Collections
//! - [`btreemap!`] - Create a BTreeMap literal
//!
//! ## Testing
//! - [`assert_matches!`] - Assert that a value matches a pattern
//! - [`assert_ok!`] / [`assert_err!`] - Unwrap or reject a `Result`
//! - [`assert_some!`] - Unwrap an `Option`
//!
//! The descriptor macros expand to paths under `::compartment`, so they are
//! meant to be used from crates that depend on `compartment`:
//!
//! ```ignore
//! use compartment::VirtualSource;
//! use compartment_macros::bindings;
//!
//! let source = VirtualSource::new().with_bindings(bindings! {
//!     import * as fs from "./fs.js";
//!     import read as readFile from "./fs.js";
//!     export readFile;
//!     export * from "./path.js";
//! });
//! ```

#![warn(missing_docs)]

mod collections;
mod descriptor;
mod testing;
