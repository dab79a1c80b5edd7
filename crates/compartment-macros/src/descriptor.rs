// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Module descriptor macros.

/// Builds a `Vec<compartment::Binding>` from import/export statements.
///
/// Each statement ends with `;`. Names are identifiers and module
/// specifiers are string literals:
///
/// | Statement                         | Binding            |
/// |-----------------------------------|--------------------|
/// | `import x from "m";`              | `Import`           |
/// | `import x as y from "m";`         | `ImportAs`         |
/// | `import * as ns from "m";`        | `ImportAll`        |
/// | `export x;`                       | `Export`           |
/// | `export x as y;`                  | `ExportAs`         |
/// | `export x as y from "m";`         | `ExportAsFrom`     |
/// | `export * from "m";`              | `ExportAll`        |
/// | `export * as ns from "m";`        | `ExportAllAs`      |
///
/// # Example
///
/// ```ignore
/// use compartment::Binding;
/// use compartment_macros::bindings;
///
/// let table = bindings! {
///     import default as config from "./config.json";
///     export config;
/// };
/// assert_eq!(table[1], Binding::export("config"));
/// ```
#[macro_export]
macro_rules! bindings {
    (@acc [$($out:expr),*]) => {
        ::std::vec![$($out),*]
    };
    (@acc [$($out:expr),*] import * as $alias:ident from $from:literal; $($rest:tt)*) => {
        $crate::bindings!(@acc [$($out,)* ::compartment::Binding::import_all(
            ::std::stringify!($alias), $from
        )] $($rest)*)
    };
    (@acc [$($out:expr),*] import $name:ident as $alias:ident from $from:literal; $($rest:tt)*) => {
        $crate::bindings!(@acc [$($out,)* ::compartment::Binding::import_as(
            ::std::stringify!($name), ::std::stringify!($alias), $from
        )] $($rest)*)
    };
    (@acc [$($out:expr),*] import $name:ident from $from:literal; $($rest:tt)*) => {
        $crate::bindings!(@acc [$($out,)* ::compartment::Binding::import(
            ::std::stringify!($name), $from
        )] $($rest)*)
    };
    (@acc [$($out:expr),*] export * as $alias:ident from $from:literal; $($rest:tt)*) => {
        $crate::bindings!(@acc [$($out,)* ::compartment::Binding::export_all_as(
            ::std::stringify!($alias), $from
        )] $($rest)*)
    };
    (@acc [$($out:expr),*] export * from $from:literal; $($rest:tt)*) => {
        $crate::bindings!(@acc [$($out,)* ::compartment::Binding::export_all($from)] $($rest)*)
    };
    (@acc [$($out:expr),*] export $name:ident as $alias:ident from $from:literal; $($rest:tt)*) => {
        $crate::bindings!(@acc [$($out,)* ::compartment::Binding::export_as_from(
            ::std::stringify!($name), ::std::stringify!($alias), $from
        )] $($rest)*)
    };
    (@acc [$($out:expr),*] export $name:ident as $alias:ident; $($rest:tt)*) => {
        $crate::bindings!(@acc [$($out,)* ::compartment::Binding::export_as(
            ::std::stringify!($name), ::std::stringify!($alias)
        )] $($rest)*)
    };
    (@acc [$($out:expr),*] export $name:ident; $($rest:tt)*) => {
        $crate::bindings!(@acc [$($out,)* ::compartment::Binding::export(
            ::std::stringify!($name)
        )] $($rest)*)
    };
    ($($body:tt)*) => {
        $crate::bindings!(@acc [] $($body)*)
    };
}

/// Creates a `compartment::Object` from key-value pairs.
///
/// Values go through `Into<compartment::Value>`.
///
/// # Example
///
/// ```ignore
/// use compartment_macros::object;
///
/// let meta = object! {
///     "url" => "file:///main.js",
///     "main" => true,
/// };
/// assert_eq!(meta.len(), 2);
/// ```
#[macro_export]
macro_rules! object {
    () => {
        ::compartment::Object::new()
    };
    ($($key:expr => $value:expr),+ $(,)?) => {{
        let object = ::compartment::Object::new();
        $(object.set($key, $value);)+
        object
    }};
}
