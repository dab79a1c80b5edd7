// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Collection creation macros.

/// Creates a BTreeMap from key-value pairs (sorted by key).
///
/// Handy for `import.meta` overrides on a virtual source.
///
/// # Example
///
/// ```
/// use compartment_macros::btreemap;
///
/// let map = btreemap! {
///     "url" => "file:///b.js",
///     "main" => "false",
/// };
/// let keys: Vec<_> = map.keys().collect();
/// assert_eq!(keys, vec![&"main", &"url"]);
/// ```
#[macro_export]
macro_rules! btreemap {
    () => {
        ::std::collections::BTreeMap::new()
    };
    ($($key:expr => $value:expr),+ $(,)?) => {{
        let mut map = ::std::collections::BTreeMap::new();
        $(map.insert($key, $value);)+
        map
    }};
}
