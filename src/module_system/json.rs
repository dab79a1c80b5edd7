// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! JSON and text modules expressed as virtual sources

use crate::config::DEFAULT_EXPORT;
use crate::error::Result;
use crate::module_system::descriptor::{Initializer, ModuleDescriptor, VirtualSource};
use crate::module_system::Binding;
use crate::value::{Object, Value};

/// Convert parsed JSON into a script value
pub fn json_value(json: &serde_json::Value) -> Value {
    match json {
        serde_json::Value::Null => Value::Null,
        serde_json::Value::Bool(b) => Value::Boolean(*b),
        serde_json::Value::Number(n) => Value::Number(n.as_f64().unwrap_or(f64::NAN)),
        serde_json::Value::String(s) => Value::String(s.clone()),
        serde_json::Value::Array(items) => Value::Array(items.iter().map(json_value).collect()),
        serde_json::Value::Object(map) => Value::Object(Object::from_map(
            map.iter()
                .map(|(k, v)| (k.clone(), json_value(v)))
                .collect(),
        )),
    }
}

/// A module whose default export is the parsed JSON document.
///
/// The text is parsed eagerly; malformed JSON is reported here rather than at
/// import time. Each instance gets its own copy of the value.
pub fn json_module(text: &str) -> Result<ModuleDescriptor> {
    let json: serde_json::Value = serde_json::from_str(text)?;
    Ok(default_export_module(move || json_value(&json)))
}

/// A module whose default export is `text`
pub fn text_module(text: impl Into<String>) -> ModuleDescriptor {
    let text = text.into();
    default_export_module(move || Value::String(text.clone()))
}

fn default_export_module<F>(produce: F) -> ModuleDescriptor
where
    F: Fn() -> Value + Send + Sync + 'static,
{
    VirtualSource::new()
        .with_binding(Binding::export(DEFAULT_EXPORT))
        .with_execute(Initializer::sync(move |scope| {
            scope.set(DEFAULT_EXPORT, produce())?;
            Ok(())
        }))
        .into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_value() {
        let json = serde_json::json!({"name": "pkg", "tags": ["a", 1], "private": true});
        let value = json_value(&json);
        let object = value.as_object().unwrap();
        assert_eq!(object.get("name"), Some(Value::from("pkg")));
        assert_eq!(object.get("private"), Some(Value::Boolean(true)));
        assert_eq!(
            object.get("tags"),
            Some(Value::Array(vec![Value::from("a"), Value::from(1)]))
        );
    }

    #[test]
    fn test_json_module_rejects_bad_input() {
        assert!(json_module("{\"a\": ").is_err());
        assert_eq!(json_module("[1, 2]").unwrap().kind(), "virtual");
    }
}
