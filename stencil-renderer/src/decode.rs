//! Format decoders, keyed by file type tag (`.json`, `.yaml`, ...).

use std::collections::BTreeMap;
use std::path::Path;

use serde_json::{Map, Value as JsonValue};

use crate::error::RenderError;

/// A decoder turns raw text into a structured value, or explains why not.
pub type DecodeFn = fn(&str) -> Result<JsonValue, String>;

/// Type tag to decoder. Tags carry their leading dot and are lowercase.
#[derive(Debug, Clone)]
pub struct DecoderRegistry {
    decoders: BTreeMap<String, DecodeFn>,
}

impl Default for DecoderRegistry {
    fn default() -> Self {
        let mut registry = DecoderRegistry::empty();
        registry.register(".json", decode_json);
        registry.register(".yaml", decode_yaml);
        registry.register(".yml", decode_yaml);
        registry.register(".toml", decode_toml);
        registry.register(".properties", decode_properties);
        registry
    }
}

impl DecoderRegistry {
    /// A registry without any decoders.
    pub fn empty() -> Self {
        DecoderRegistry {
            decoders: BTreeMap::new(),
        }
    }

    /// Register (or replace) the decoder for `tag`.
    pub fn register(&mut self, tag: impl Into<String>, decoder: DecodeFn) {
        self.decoders.insert(normalize_tag(&tag.into()), decoder);
    }

    /// Registered tags, sorted.
    pub fn supported_types(&self) -> Vec<String> {
        self.decoders.keys().cloned().collect()
    }

    pub fn decode(&self, format: &str, name: &str, content: &str) -> Result<JsonValue, RenderError> {
        let tag = normalize_tag(format);
        let decoder = self
            .decoders
            .get(&tag)
            .ok_or_else(|| RenderError::UnsupportedFormat {
                format: tag.clone(),
                supported: self.supported_types(),
            })?;
        decoder(content).map_err(|message| RenderError::Decode {
            name: name.to_string(),
            format: tag,
            message,
        })
    }
}

/// The type tag of a source name: its lowercased extension with a leading
/// dot, or an empty string when there is none.
pub fn format_of(name: &str) -> String {
    Path::new(name)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| format!(".{}", ext.to_lowercase()))
        .unwrap_or_default()
}

fn normalize_tag(tag: &str) -> String {
    let lower = tag.trim().to_lowercase();
    if lower.is_empty() || lower.starts_with('.') {
        lower
    } else {
        format!(".{lower}")
    }
}

// ---------------------------------------------------------------------------
// Built-in decoders
// ---------------------------------------------------------------------------

pub fn decode_json(text: &str) -> Result<JsonValue, String> {
    serde_json::from_str(text).map_err(|e| e.to_string())
}

/// An empty or comment-only document decodes to `null`.
pub fn decode_yaml(text: &str) -> Result<JsonValue, String> {
    if text.lines().all(|l| {
        let l = l.trim();
        l.is_empty() || l.starts_with('#') || l == "---"
    }) {
        return Ok(JsonValue::Null);
    }
    serde_yaml::from_str(text).map_err(|e| e.to_string())
}

pub fn decode_toml(text: &str) -> Result<JsonValue, String> {
    let table: toml::Table = toml::from_str(text).map_err(|e| e.to_string())?;
    Ok(toml_to_json(toml::Value::Table(table)))
}

/// Properties decode to a flat map of dotted keys to strings.
pub fn decode_properties(text: &str) -> Result<JsonValue, String> {
    let props = java_properties::read(text.as_bytes()).map_err(|e| e.to_string())?;
    let map: Map<String, JsonValue> = props
        .into_iter()
        .map(|(k, v)| (k, JsonValue::String(v)))
        .collect();
    Ok(JsonValue::Object(map))
}

/// TOML datetimes have no JSON counterpart and become their string form.
pub(crate) fn toml_to_json(value: toml::Value) -> JsonValue {
    match value {
        toml::Value::String(s) => JsonValue::String(s),
        toml::Value::Integer(i) => JsonValue::from(i),
        toml::Value::Float(f) => serde_json::Number::from_f64(f)
            .map(JsonValue::Number)
            .unwrap_or(JsonValue::Null),
        toml::Value::Boolean(b) => JsonValue::Bool(b),
        toml::Value::Datetime(dt) => JsonValue::String(dt.to_string()),
        toml::Value::Array(items) => JsonValue::Array(items.into_iter().map(toml_to_json).collect()),
        toml::Value::Table(table) => JsonValue::Object(
            table
                .into_iter()
                .map(|(k, v)| (k, toml_to_json(v)))
                .collect(),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decodes_every_builtin_format() {
        let registry = DecoderRegistry::default();
        let expected = json!({"port": 5432});
        assert_eq!(registry.decode(".json", "v.json", r#"{"port": 5432}"#).unwrap(), expected);
        assert_eq!(registry.decode(".yaml", "v.yaml", "port: 5432\n").unwrap(), expected);
        assert_eq!(registry.decode(".yml", "v.yml", "port: 5432\n").unwrap(), expected);
        assert_eq!(registry.decode(".toml", "v.toml", "port = 5432\n").unwrap(), expected);
        assert_eq!(
            registry.decode(".properties", "v.properties", "port=5432\n").unwrap(),
            json!({"port": "5432"})
        );
    }

    #[test]
    fn properties_keep_dotted_keys_flat() {
        let value = decode_properties("a.b.c=1\n# comment\nname = demo\n").unwrap();
        assert_eq!(value, json!({"a.b.c": "1", "name": "demo"}));
    }

    #[test]
    fn toml_datetimes_become_strings() {
        let value = decode_toml("when = 1979-05-27T07:32:00Z\n").unwrap();
        assert_eq!(value, json!({"when": "1979-05-27T07:32:00Z"}));
    }

    #[test]
    fn empty_yaml_is_null() {
        assert_eq!(decode_yaml("").unwrap(), JsonValue::Null);
        assert_eq!(decode_yaml("# nothing here\n").unwrap(), JsonValue::Null);
    }

    #[test]
    fn unsupported_format_lists_sorted_tags() {
        let err = DecoderRegistry::default()
            .decode(".ini", "a.ini", "x=1")
            .unwrap_err();
        assert_eq!(
            err,
            RenderError::UnsupportedFormat {
                format: ".ini".to_string(),
                supported: vec![
                    ".json".to_string(),
                    ".properties".to_string(),
                    ".toml".to_string(),
                    ".yaml".to_string(),
                    ".yml".to_string(),
                ],
            }
        );
    }

    #[test]
    fn malformed_content_is_a_decode_error() {
        let err = DecoderRegistry::default()
            .decode("JSON", "broken.json", "{")
            .unwrap_err();
        assert!(matches!(err, RenderError::Decode { ref format, .. } if format == ".json"));
    }

    #[test]
    fn custom_tags_can_be_registered() {
        let mut registry = DecoderRegistry::empty();
        registry.register("csv", |text| Ok(JsonValue::String(text.to_uppercase())));
        assert_eq!(registry.supported_types(), vec![".csv"]);
        assert_eq!(registry.decode(".csv", "x.csv", "a").unwrap(), json!("A"));
    }

    #[test]
    fn format_is_taken_from_the_extension() {
        assert_eq!(format_of("conf/values.YAML"), ".yaml");
        assert_eq!(format_of("Makefile"), "");
    }
}
