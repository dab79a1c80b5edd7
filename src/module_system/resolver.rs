// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Import specifier resolution
//!
//! A resolver maps `(specifier, referrer key)` to a canonical key. It must be
//! pure: the compartment records each resolved request once and never asks
//! again.

/// Maps an import specifier to a canonical key.
pub trait ResolveHook: Send + Sync {
    /// Resolve `specifier` as requested by the module keyed `referrer`.
    fn resolve(&self, specifier: &str, referrer: &str) -> std::result::Result<String, String>;
}

impl<F> ResolveHook for F
where
    F: Fn(&str, &str) -> std::result::Result<String, String> + Send + Sync,
{
    fn resolve(&self, specifier: &str, referrer: &str) -> std::result::Result<String, String> {
        self(specifier, referrer)
    }
}

/// Path-style resolver.
///
/// - `./x` and `../x` are joined onto the referrer's directory
/// - `/x` is normalized as-is
/// - anything else is a bare specifier and resolves to itself
#[derive(Debug, Clone, Copy, Default)]
pub struct PathResolver;

impl PathResolver {
    /// Create a path resolver
    pub fn new() -> Self {
        Self
    }

    /// Check if a specifier is relative to its referrer
    pub fn is_relative(specifier: &str) -> bool {
        specifier == "."
            || specifier == ".."
            || specifier.starts_with("./")
            || specifier.starts_with("../")
    }

    /// Check if a specifier is a bare name
    pub fn is_bare(specifier: &str) -> bool {
        !Self::is_relative(specifier) && !specifier.starts_with('/')
    }
}

impl ResolveHook for PathResolver {
    fn resolve(&self, specifier: &str, referrer: &str) -> std::result::Result<String, String> {
        if specifier.is_empty() {
            return Err("empty specifier".to_string());
        }

        if specifier.starts_with('/') {
            return normalize(specifier, true);
        }

        if !Self::is_relative(specifier) {
            return Ok(specifier.to_string());
        }

        let directory = match referrer.rfind('/') {
            Some(index) => &referrer[..index],
            None => "",
        };
        let joined = if directory.is_empty() {
            specifier.to_string()
        } else {
            format!("{}/{}", directory, specifier)
        };
        normalize(&joined, referrer.starts_with('/'))
    }
}

/// Collapse `.` and `..` segments and repeated separators.
fn normalize(path: &str, absolute: bool) -> std::result::Result<String, String> {
    let mut segments: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                if segments.pop().is_none() {
                    return Err(format!("'{}' escapes the module root", path));
                }
            }
            other => segments.push(other),
        }
    }

    let joined = segments.join("/");
    Ok(if absolute {
        format!("/{}", joined)
    } else {
        joined
    })
}
