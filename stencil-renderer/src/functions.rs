//! Template filters for configuration work: key rewriting, environment to
//! properties conversion, validation and format round-tripping.
//!
//! Every filter receives its data explicitly (usually the piped value); none
//! reads process state.
//!
//! ```text
//! {% for k, v in Env|env_to_props("KAFKA_", "kafka.", "KAFKA_VERSION")|items %}
//! {{ k }}={{ v }}
//! {% endfor %}
//! ```

use std::collections::BTreeMap;

use minijinja::value::{Rest, Value, ValueKind};
use minijinja::{Environment, Error, ErrorKind};
use serde_json::{Map, Value as JsonValue};

use crate::decode::{decode_properties, decode_toml};

pub fn register_filters(env: &mut Environment<'static>) {
    env.add_filter("with_prefix", with_prefix);
    env.add_filter("exclude_keys", exclude_keys);
    env.add_filter("replace_key_prefix", replace_key_prefix);
    env.add_filter("to_properties_key", to_properties_key);
    env.add_filter("env_to_props", env_to_props);
    env.add_filter("kv_csv_to_map", kv_csv_to_map);
    env.add_filter("filter_has_prefix", filter_has_prefix);
    env.add_filter("required", required);
    env.add_filter("to_yaml", to_yaml);
    env.add_filter("from_yaml", from_yaml);
    env.add_filter("to_json", to_json);
    env.add_filter("from_json", from_json);
    env.add_filter("to_toml", to_toml);
    env.add_filter("from_toml", from_toml);
    env.add_filter("to_properties", to_properties);
    env.add_filter("from_properties", from_properties);
}

fn invalid(msg: impl Into<String>) -> Error {
    Error::new(ErrorKind::InvalidOperation, msg.into())
}

fn to_json_value(value: &Value) -> Result<JsonValue, Error> {
    serde_json::to_value(value).map_err(|e| invalid(e.to_string()))
}

fn map_arg(value: &Value, filter: &str) -> Result<Map<String, JsonValue>, Error> {
    match to_json_value(value)? {
        JsonValue::Object(map) => Ok(map),
        _ => Err(invalid(format!(
            "{filter} requires a map but was {}",
            value.kind()
        ))),
    }
}

fn from_map(map: Map<String, JsonValue>) -> Value {
    Value::from_serialize(JsonValue::Object(map))
}

/// Display form used wherever a value has to become a key or list entry.
fn plain_string(value: &JsonValue) -> String {
    match value {
        JsonValue::Null => String::new(),
        JsonValue::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn flat_strings(values: &[Value]) -> Result<Vec<String>, Error> {
    fn collect(value: &JsonValue, out: &mut Vec<String>) {
        match value {
            JsonValue::Array(items) => items.iter().for_each(|v| collect(v, out)),
            JsonValue::Null => {}
            other => out.push(plain_string(other)),
        }
    }
    let mut out = Vec::new();
    for value in values {
        collect(&to_json_value(value)?, &mut out);
    }
    Ok(out)
}

// ---------------------------------------------------------------------------
// Map filters
// ---------------------------------------------------------------------------

/// Entries whose key starts with `prefix`.
pub fn with_prefix(value: Value, prefix: String) -> Result<Value, Error> {
    let map = map_arg(&value, "with_prefix")?;
    Ok(from_map(
        map.into_iter().filter(|(k, _)| k.starts_with(&prefix)).collect(),
    ))
}

/// Drop the named keys. Names may be given as strings or (nested) lists.
pub fn exclude_keys(value: Value, exclude: Rest<Value>) -> Result<Value, Error> {
    let map = map_arg(&value, "exclude_keys")?;
    let exclude = flat_strings(&exclude)?;
    Ok(from_map(
        map.into_iter().filter(|(k, _)| !exclude.contains(k)).collect(),
    ))
}

/// Replace `prefix` at the start of each key with `replacement`. Keys that
/// do not carry the prefix still get the replacement prepended.
pub fn replace_key_prefix(value: Value, prefix: String, replacement: String) -> Result<Value, Error> {
    let map = map_arg(&value, "replace_key_prefix")?;
    Ok(from_map(
        map.into_iter()
            .map(|(k, v)| {
                let rest = k.strip_prefix(prefix.as_str()).unwrap_or(&k);
                (format!("{replacement}{rest}"), v)
            })
            .collect(),
    ))
}

/// Rewrite environment-style keys as property keys.
pub fn to_properties_key(value: Value) -> Result<Value, Error> {
    let map = map_arg(&value, "to_properties_key")?;
    Ok(from_map(
        map.into_iter().map(|(k, v)| (property_key(&k), v)).collect(),
    ))
}

/// `SOME_KEY` becomes `some.key`; `__` becomes `_` and `___` becomes `-`.
pub fn property_key(key: &str) -> String {
    let chars: Vec<char> = key.to_lowercase().chars().collect();
    let dotted: String = chars
        .iter()
        .enumerate()
        .map(|(i, &c)| {
            let lone = c == '_'
                && i > 0
                && i + 1 < chars.len()
                && chars[i - 1] != '_'
                && chars[i + 1] != '_';
            if lone {
                '.'
            } else {
                c
            }
        })
        .collect();
    dotted.replace("___", "-").replace("__", "_")
}

/// Select the entries of an environment map starting with `env_prefix`, drop
/// `exclude`, swap the prefix for `prop_prefix` and convert the remainder to
/// property keys.
pub fn env_to_props(
    value: Value,
    env_prefix: String,
    prop_prefix: String,
    exclude: Rest<Value>,
) -> Result<Value, Error> {
    let selected = with_prefix(value, env_prefix.clone())?;
    let kept = exclude_keys(selected, exclude)?;
    let map = map_arg(&kept, "env_to_props")?;
    Ok(from_map(
        map.into_iter()
            .map(|(k, v)| {
                let rest = k.strip_prefix(env_prefix.as_str()).unwrap_or(&k);
                (format!("{prop_prefix}{}", property_key(rest)), v)
            })
            .collect(),
    ))
}

// ---------------------------------------------------------------------------
// String and list filters
// ---------------------------------------------------------------------------

/// `"a=1,b=2"` becomes `{"a": "1", "b": "2"}`. Pairs without `=` are skipped.
pub fn kv_csv_to_map(value: String) -> Value {
    let map: BTreeMap<String, String> = value
        .split(',')
        .filter_map(|pair| pair.split_once('='))
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    Value::from(map)
}

/// Entries of a (possibly nested) list that start with `prefix`. A plain
/// string is kept or dropped as a whole.
pub fn filter_has_prefix(value: Value, prefix: String) -> Result<Value, Error> {
    fn keep(value: &JsonValue, prefix: &str) -> Result<Option<JsonValue>, Error> {
        match value {
            JsonValue::Array(items) => {
                let mut out = Vec::new();
                for item in items {
                    if let Some(kept) = keep(item, prefix)? {
                        out.push(kept);
                    }
                }
                Ok(Some(JsonValue::Array(out)))
            }
            JsonValue::String(s) => Ok(s.starts_with(prefix).then(|| value.clone())),
            JsonValue::Null => Ok(None),
            other => Err(invalid(format!(
                "filter_has_prefix requires a list or string but was {other}"
            ))),
        }
    }
    let json = to_json_value(&value)?;
    Ok(match keep(&json, &prefix)? {
        Some(kept) => Value::from_serialize(kept),
        None => Value::from(()),
    })
}

/// Fail with `message` when the value is undefined, none or an empty string.
pub fn required(value: Value, message: String) -> Result<Value, Error> {
    let missing = value.is_undefined()
        || value.is_none()
        || (value.kind() == ValueKind::String && value.as_str().map_or(true, str::is_empty));
    if missing {
        Err(invalid(message))
    } else {
        Ok(value)
    }
}

// ---------------------------------------------------------------------------
// Format filters
// ---------------------------------------------------------------------------

pub fn to_yaml(value: Value) -> Result<String, Error> {
    let json = to_json_value(&value)?;
    let text = serde_yaml::to_string(&json).map_err(|e| invalid(e.to_string()))?;
    Ok(text.trim_end_matches('\n').to_string())
}

pub fn from_yaml(text: String) -> Result<Value, Error> {
    let json: JsonValue = serde_yaml::from_str(&text).map_err(|e| invalid(e.to_string()))?;
    Ok(Value::from_serialize(json))
}

pub fn to_json(value: Value, indent: Option<String>) -> Result<String, Error> {
    let json = to_json_value(&value)?;
    let text = match indent {
        None => serde_json::to_string(&json),
        Some(_) => serde_json::to_string_pretty(&json),
    };
    text.map_err(|e| invalid(e.to_string()))
}

pub fn from_json(text: String) -> Result<Value, Error> {
    let json: JsonValue = serde_json::from_str(&text).map_err(|e| invalid(e.to_string()))?;
    Ok(Value::from_serialize(json))
}

pub fn to_toml(value: Value) -> Result<String, Error> {
    let json = to_json_value(&value)?;
    toml::to_string(&json).map_err(|e| invalid(e.to_string()))
}

pub fn from_toml(text: String) -> Result<Value, Error> {
    decode_toml(&text)
        .map(Value::from_serialize)
        .map_err(invalid)
}

/// Flatten a map into `key=value` lines, sorted by key. Lists and nested
/// maps become comma separated values.
pub fn to_properties(value: Value) -> Result<String, Error> {
    let props = properties_map(&to_json_value(&value)?);
    let mut out = Vec::new();
    {
        let mut writer = java_properties::PropertiesWriter::new(&mut out);
        for (k, v) in &props {
            writer.write(k, v).map_err(|e| invalid(e.to_string()))?;
        }
        writer.finish().map_err(|e| invalid(e.to_string()))?;
    }
    String::from_utf8(out).map_err(|e| invalid(e.to_string()))
}

pub fn from_properties(text: String) -> Result<Value, Error> {
    decode_properties(&text)
        .map(Value::from_serialize)
        .map_err(invalid)
}

fn properties_map(value: &JsonValue) -> BTreeMap<String, String> {
    match value {
        JsonValue::Null => BTreeMap::new(),
        JsonValue::Object(map) => map
            .iter()
            .map(|(k, v)| (k.clone(), properties_value(v)))
            .collect(),
        JsonValue::Array(items) => items.iter().flat_map(properties_map).collect(),
        scalar => BTreeMap::from([(plain_string(scalar), String::new())]),
    }
}

fn properties_value(value: &JsonValue) -> String {
    match value {
        JsonValue::Object(map) => map
            .iter()
            .map(|(k, v)| format!("{k}={}", properties_value(v)))
            .collect::<Vec<_>>()
            .join(","),
        JsonValue::Array(items) => items
            .iter()
            .map(properties_value)
            .collect::<Vec<_>>()
            .join(","),
        scalar => plain_string(scalar),
    }
}
