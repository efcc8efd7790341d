// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Cache keys for constructed providers.

use serde_json::Value;

use crate::types::ConfigMap;

/// Serialize a JSON value with object keys sorted at every level.
pub fn stable_serialize(value: &Value) -> String {
    let mut out = String::new();
    write_stable(value, &mut out);
    out
}

fn write_stable(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(key.clone()).to_string());
                out.push(':');
                write_stable(&map[key], out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_stable(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

/// `type` without config, else `"{type}:{stable config}"`.
pub fn cache_key(provider_type: &str, config: Option<&ConfigMap>) -> String {
    match config {
        None => provider_type.to_string(),
        Some(config) => {
            let mut key = String::with_capacity(provider_type.len() + 1 + 64);
            key.push_str(provider_type);
            key.push(':');
            write_stable(&Value::Object(config.clone()), &mut key);
            key
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_stable_serialize_sorts_nested_keys() {
        let a = json!({"b": 1, "a": {"z": [1, {"y": 2, "x": 1}], "c": null}});
        assert_eq!(
            stable_serialize(&a),
            r#"{"a":{"c":null,"z":[1,{"x":1,"y":2}]},"b":1}"#
        );
    }

    #[test]
    fn test_stable_serialize_escapes_strings() {
        assert_eq!(stable_serialize(&json!({"k\"": "v\n"})), r#"{"k\"":"v\n"}"#);
    }

    #[test]
    fn test_cache_key() {
        assert_eq!(cache_key("alpha", None), "alpha");

        let one = json!({"model": "m", "timeout": 5});
        let two = json!({"timeout": 5, "model": "m"});
        let key_one = cache_key("alpha", one.as_object());
        assert_eq!(key_one, r#"alpha:{"model":"m","timeout":5}"#);
        assert_eq!(key_one, cache_key("alpha", two.as_object()));
        assert_ne!(key_one, cache_key("beta", one.as_object()));
    }
}
