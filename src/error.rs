// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Error types for the module registry

use crate::value::Value;
use thiserror::Error;

/// Result type for registry operations
pub type Result<T> = std::result::Result<T, CompartmentError>;

/// Errors that can occur while loading, linking or executing modules.
///
/// Errors are `Clone` because a single failure is handed to every task
/// awaiting the same load or import.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum CompartmentError {
    /// The specifier resolver could not produce a canonical key
    #[error("Cannot resolve '{specifier}' from '{referrer}': {reason}")]
    Resolution {
        /// Raw import specifier
        specifier: String,
        /// Key of the importing module
        referrer: String,
        /// Reason reported by the resolver
        reason: String,
    },

    /// No descriptor in the memo, the static table or any hook
    #[error("Cannot find module '{key}' in compartment '{compartment}'")]
    DescriptorNotFound {
        /// Canonical key
        key: String,
        /// Name of the compartment that was asked
        compartment: String,
    },

    /// The load hook itself failed
    #[error("Load hook failed for '{key}': {reason}")]
    LoadHook {
        /// Canonical key
        key: String,
        /// Reason reported by the hook
        reason: String,
    },

    /// A descriptor cannot be turned into a module record
    #[error("Invalid descriptor for '{key}': {reason}")]
    InvalidDescriptor {
        /// Canonical key
        key: String,
        /// Why the descriptor was rejected
        reason: String,
    },

    /// A chain of instance aliases leads back to itself
    #[error("Alias cycle detected at '{key}'")]
    AliasCycle {
        /// Key at which the cycle closed
        key: String,
    },

    /// A binding cannot be linked
    #[error("SyntaxError in module '{module}': {reason}")]
    Binding {
        /// Module whose bindings failed to link
        module: String,
        /// Description of the failing binding
        reason: String,
    },

    /// A module initializer threw or its asynchronous completion rejected
    #[error("Module '{key}' failed to initialize: {error}")]
    Initialization {
        /// Canonical key of the failed module
        key: String,
        /// The thrown value
        error: Value,
    },

    /// A synchronous operation cannot complete without suspending
    #[error("Cannot complete '{key}' synchronously: {reason}")]
    SynchronousUnavailable {
        /// Key that blocked synchronous completion
        key: String,
        /// Why it would have to suspend
        reason: String,
    },

    /// Read of a live binding that was never assigned
    #[error("ReferenceError: cannot access '{name}' before initialization")]
    Uninitialized {
        /// Binding name
        name: String,
    },

    /// Access to a name the environment does not declare
    #[error("ReferenceError: '{name}' is not defined")]
    UnknownBinding {
        /// Binding name
        name: String,
    },

    /// Assignment to an imported binding
    #[error("TypeError: assignment to read-only binding '{name}'")]
    ReadOnlyBinding {
        /// Binding name
        name: String,
    },

    /// `evaluate` without a configured evaluator
    #[error("No evaluator configured for compartment '{compartment}'")]
    EvaluatorUnavailable {
        /// Compartment name
        compartment: String,
    },

    /// The evaluator threw
    #[error("Evaluation failed: {0}")]
    Evaluation(Value),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// JSON parsing error
    #[error("JSON parse error: {0}")]
    Json(String),
}

impl CompartmentError {
    /// Create a resolution error
    pub fn resolution(
        specifier: impl Into<String>,
        referrer: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::Resolution {
            specifier: specifier.into(),
            referrer: referrer.into(),
            reason: reason.into(),
        }
    }

    /// Create a descriptor-not-found error
    pub fn not_found(key: impl Into<String>, compartment: impl Into<String>) -> Self {
        Self::DescriptorNotFound {
            key: key.into(),
            compartment: compartment.into(),
        }
    }

    /// Create a binding error
    pub fn binding(module: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Binding {
            module: module.into(),
            reason: reason.into(),
        }
    }

    /// Binding error for an import or re-export of a name the target lacks
    pub fn missing_export(importer: &str, module: &str, name: &str) -> Self {
        Self::binding(
            importer,
            format!("the requested module '{}' does not provide an export named '{}'", module, name),
        )
    }

    /// Create a synchronous-unavailable error
    pub fn unavailable(key: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::SynchronousUnavailable {
            key: key.into(),
            reason: reason.into(),
        }
    }

    /// Returns true for errors raised because an operation could not finish
    /// synchronously.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, Self::SynchronousUnavailable { .. })
    }
}

impl From<serde_json::Error> for CompartmentError {
    fn from(err: serde_json::Error) -> Self {
        CompartmentError::Json(err.to_string())
    }
}

impl From<CompartmentError> for Value {
    fn from(err: CompartmentError) -> Self {
        match err {
            CompartmentError::Initialization { error, .. } | CompartmentError::Evaluation(error) => error,
            other => Value::String(other.to_string()),
        }
    }
}
