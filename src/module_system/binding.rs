// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Import and export binding declarations

use serde::{Deserialize, Serialize};

/// One import or export linkage declared by a module source.
///
/// Declaration order is significant: among colliding `ExportAll` bindings the
/// later one wins. `from` is a raw specifier, resolved relative to the module
/// that declares the binding.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum Binding {
    /// `import { name } from "from"`
    Import {
        /// Imported and local name
        name: String,
        /// Source specifier
        from: String,
    },
    /// `import { name as alias } from "from"`
    ImportAs {
        /// Name exported by the source
        name: String,
        /// Local name
        alias: String,
        /// Source specifier
        from: String,
    },
    /// `export { name }`
    Export {
        /// Local and exported name
        name: String,
    },
    /// `export { name as alias }`
    ExportAs {
        /// Local name
        name: String,
        /// Exported name
        alias: String,
    },
    /// `export { name as alias } from "from"`
    ExportAsFrom {
        /// Name exported by the source
        name: String,
        /// Exported name
        alias: String,
        /// Source specifier
        from: String,
    },
    /// `import * as alias from "from"`
    ImportAll {
        /// Local name bound to the source namespace
        alias: String,
        /// Source specifier
        from: String,
    },
    /// `export * from "from"`
    ExportAll {
        /// Source specifier
        from: String,
    },
    /// `export * as alias from "from"`
    ExportAllAs {
        /// Exported name bound to the source namespace
        alias: String,
        /// Source specifier
        from: String,
    },
}

impl Binding {
    /// `import { name } from "from"`
    pub fn import(name: impl Into<String>, from: impl Into<String>) -> Self {
        Self::Import {
            name: name.into(),
            from: from.into(),
        }
    }

    /// `import { name as alias } from "from"`
    pub fn import_as(
        name: impl Into<String>,
        alias: impl Into<String>,
        from: impl Into<String>,
    ) -> Self {
        Self::ImportAs {
            name: name.into(),
            alias: alias.into(),
            from: from.into(),
        }
    }

    /// `export { name }`
    pub fn export(name: impl Into<String>) -> Self {
        Self::Export { name: name.into() }
    }

    /// `export { name as alias }`
    pub fn export_as(name: impl Into<String>, alias: impl Into<String>) -> Self {
        Self::ExportAs {
            name: name.into(),
            alias: alias.into(),
        }
    }

    /// `export { name as alias } from "from"`
    pub fn export_as_from(
        name: impl Into<String>,
        alias: impl Into<String>,
        from: impl Into<String>,
    ) -> Self {
        Self::ExportAsFrom {
            name: name.into(),
            alias: alias.into(),
            from: from.into(),
        }
    }

    /// `import * as alias from "from"`
    pub fn import_all(alias: impl Into<String>, from: impl Into<String>) -> Self {
        Self::ImportAll {
            alias: alias.into(),
            from: from.into(),
        }
    }

    /// `export * from "from"`
    pub fn export_all(from: impl Into<String>) -> Self {
        Self::ExportAll { from: from.into() }
    }

    /// `export * as alias from "from"`
    pub fn export_all_as(alias: impl Into<String>, from: impl Into<String>) -> Self {
        Self::ExportAllAs {
            alias: alias.into(),
            from: from.into(),
        }
    }

    /// The remote specifier, if this binding references another module
    pub fn specifier(&self) -> Option<&str> {
        match self {
            Self::Import { from, .. }
            | Self::ImportAs { from, .. }
            | Self::ExportAsFrom { from, .. }
            | Self::ImportAll { from, .. }
            | Self::ExportAll { from }
            | Self::ExportAllAs { from, .. } => Some(from),
            Self::Export { .. } | Self::ExportAs { .. } => None,
        }
    }

    /// Name of the environment slot this binding introduces or reads
    pub fn local_name(&self) -> Option<&str> {
        match self {
            Self::Import { name, .. } => Some(name),
            Self::ImportAs { alias, .. } | Self::ImportAll { alias, .. } => Some(alias),
            Self::Export { name } | Self::ExportAs { name, .. } => Some(name),
            Self::ExportAsFrom { .. } | Self::ExportAll { .. } | Self::ExportAllAs { .. } => None,
        }
    }

    /// Name this binding places on the exports namespace
    pub fn exported_name(&self) -> Option<&str> {
        match self {
            Self::Export { name } => Some(name),
            Self::ExportAs { alias, .. }
            | Self::ExportAsFrom { alias, .. }
            | Self::ExportAllAs { alias, .. } => Some(alias),
            _ => None,
        }
    }

    /// Whether this binding introduces an imported environment slot
    pub fn is_import(&self) -> bool {
        matches!(
            self,
            Self::Import { .. } | Self::ImportAs { .. } | Self::ImportAll { .. }
        )
    }
}

/// Remote specifiers in first-mention order, without duplicates.
pub fn requested_specifiers(bindings: &[Binding]) -> Vec<String> {
    let mut specifiers: Vec<String> = Vec::new();
    for from in bindings.iter().filter_map(Binding::specifier) {
        if !specifiers.iter().any(|s| s == from) {
            specifiers.push(from.to_string());
        }
    }
    specifiers
}
