// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Testing helper macros.

/// Assert that an expression matches a pattern.
///
/// # Example
///
/// ```
/// use compartment_macros::assert_matches;
///
/// #[derive(Debug)]
/// enum Phase { Loaded, Failed(String) }
///
/// assert_matches!(Phase::Failed("boom".into()), Phase::Failed(msg) if msg == "boom");
/// assert_matches!(Phase::Loaded, Phase::Loaded);
/// ```
#[macro_export]
macro_rules! assert_matches {
    ($expr:expr, $pat:pat) => {
        match $expr {
            $pat => {}
            ref e => panic!(
                "assertion failed: `{}` does not match pattern `{}`\n  value: {:?}",
                stringify!($expr),
                stringify!($pat),
                e
            ),
        }
    };
    ($expr:expr, $pat:pat if $guard:expr) => {
        match $expr {
            $pat if $guard => {}
            ref e => panic!(
                "assertion failed: `{}` does not match pattern `{} if {}`\n  value: {:?}",
                stringify!($expr),
                stringify!($pat),
                stringify!($guard),
                e
            ),
        }
    };
}

/// Assert that a Result is Ok and extract the value.
///
/// # Example
///
/// ```
/// use compartment_macros::assert_ok;
///
/// let key: Result<&str, String> = Ok("/src/a.js");
/// assert_eq!(assert_ok!(key), "/src/a.js");
/// ```
#[macro_export]
macro_rules! assert_ok {
    ($expr:expr) => {
        match $expr {
            Ok(v) => v,
            Err(e) => panic!(
                "assertion failed: expected Ok, got Err\n  expression: `{}`\n  error: {:?}",
                stringify!($expr),
                e
            ),
        }
    };
}

/// Assert that a Result is Err and extract the error.
///
/// # Example
///
/// ```
/// use compartment_macros::assert_err;
///
/// let key: Result<&str, String> = Err("cannot resolve '../x'".into());
/// let err = assert_err!(key);
/// assert!(err.contains("../x"));
/// ```
#[macro_export]
macro_rules! assert_err {
    ($expr:expr) => {
        match $expr {
            Ok(v) => panic!(
                "assertion failed: expected Err, got Ok\n  expression: `{}`\n  value: {:?}",
                stringify!($expr),
                v
            ),
            Err(e) => e,
        }
    };
}

/// Assert that an Option is Some and extract the value.
///
/// # Example
///
/// ```
/// use compartment_macros::assert_some;
///
/// let export = Some(42);
/// assert_eq!(assert_some!(export), 42);
/// ```
#[macro_export]
macro_rules! assert_some {
    ($expr:expr) => {
        match $expr {
            Some(v) => v,
            None => panic!(
                "assertion failed: expected Some, got None\n  expression: `{}`",
                stringify!($expr)
            ),
        }
    };
}
