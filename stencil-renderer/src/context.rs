//! Layered context assembly: [`ContextBuilder`] and the immutable [`Context`].
//!
//! Layers are folded left to right. Two mappings under the same key merge
//! recursively; anything else is replaced by the later layer, except that a
//! `null` never overrides an existing value. Sequences are leaves.

use std::collections::BTreeMap;
use std::sync::Arc;

use minijinja::Value;
use serde_json::{Map, Value as JsonValue};
use tracing::debug;

use crate::decode::{format_of, DecoderRegistry};
use crate::error::RenderError;
use crate::files::FileBundle;

/// Scope holding structured values files.
pub const VALUES: &str = "Values";
/// Scope holding the raw file bundle.
pub const FILES: &str = "Files";
/// Scope holding the environment snapshot.
pub const ENV: &str = "Env";

#[derive(Debug, Clone)]
struct Layer {
    name: String,
    value: JsonValue,
}

/// Collects layers in precedence order and folds them into a [`Context`].
#[derive(Debug, Clone, Default)]
pub struct ContextBuilder {
    decoders: DecoderRegistry,
    layers: Vec<Layer>,
}

impl ContextBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_decoders(decoders: DecoderRegistry) -> Self {
        ContextBuilder {
            decoders,
            layers: Vec::new(),
        }
    }

    pub fn decoders(&self) -> &DecoderRegistry {
        &self.decoders
    }

    /// Decode `content` as `format` and append it, wrapped under `scope`
    /// when one is given.
    pub fn add_layer(
        &mut self,
        format: &str,
        name: &str,
        content: &str,
        scope: Option<&str>,
    ) -> Result<&mut Self, RenderError> {
        let value = self.decoders.decode(format, name, content)?;
        Ok(self.add_value(name, value, scope))
    }

    /// Like [`add_layer`](Self::add_layer), with the format taken from
    /// `name`'s extension.
    pub fn add_layer_by_name(
        &mut self,
        name: &str,
        content: &str,
        scope: Option<&str>,
    ) -> Result<&mut Self, RenderError> {
        self.add_layer(&format_of(name), name, content, scope)
    }

    /// Append an already structured layer.
    pub fn add_value(&mut self, name: &str, value: JsonValue, scope: Option<&str>) -> &mut Self {
        let value = match scope {
            Some(scope) => {
                let mut wrapped = Map::new();
                wrapped.insert(scope.to_string(), value);
                JsonValue::Object(wrapped)
            }
            None => value,
        };
        debug!(layer = name, index = self.layers.len(), "context layer added");
        self.layers.push(Layer {
            name: name.to_string(),
            value,
        });
        self
    }

    /// Append an environment snapshot as a flat string map.
    pub fn add_env<I, K, V>(&mut self, snapshot: I, scope: Option<&str>) -> &mut Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let env: Map<String, JsonValue> = snapshot
            .into_iter()
            .map(|(k, v)| (k.into(), JsonValue::String(v.into())))
            .collect();
        self.add_value("environment", JsonValue::Object(env), scope)
    }

    pub fn layer_count(&self) -> usize {
        self.layers.len()
    }

    /// Fold every layer into one context.
    pub fn build(&self) -> Result<Context, RenderError> {
        let mut root = Map::new();
        for layer in &self.layers {
            match &layer.value {
                JsonValue::Null => {}
                JsonValue::Object(map) => deep_merge(&mut root, map.clone()),
                other => {
                    return Err(RenderError::Merge(format!(
                        "layer {} is {} and not a mapping",
                        layer.name,
                        kind_of(other)
                    )))
                }
            }
        }
        Ok(Context::from_json(JsonValue::Object(root)))
    }
}

/// Merge `src` into `dst`, recursing where both sides hold a mapping.
pub fn deep_merge(dst: &mut Map<String, JsonValue>, src: Map<String, JsonValue>) {
    for (key, incoming) in src {
        match (dst.get_mut(&key), incoming) {
            (Some(JsonValue::Object(existing)), JsonValue::Object(nested)) => {
                deep_merge(existing, nested)
            }
            (Some(_), JsonValue::Null) => {}
            (_, incoming) => {
                dst.insert(key, incoming);
            }
        }
    }
}

fn kind_of(value: &JsonValue) -> &'static str {
    match value {
        JsonValue::Null => "null",
        JsonValue::Bool(_) => "a boolean",
        JsonValue::Number(_) => "a number",
        JsonValue::String(_) => "a string",
        JsonValue::Array(_) => "a sequence",
        JsonValue::Object(_) => "a mapping",
    }
}

// ---------------------------------------------------------------------------
// Context
// ---------------------------------------------------------------------------

/// The merged, read-only data every template renders against.
///
/// Cloning is cheap: both representations are reference counted.
#[derive(Debug, Clone)]
pub struct Context {
    json: Arc<JsonValue>,
    value: Value,
}

impl Context {
    pub fn from_json(json: JsonValue) -> Self {
        let value = template_value(&json);
        Context {
            json: Arc::new(json),
            value,
        }
    }

    pub fn empty() -> Self {
        Context::from_json(JsonValue::Object(Map::new()))
    }

    /// Look up a dotted path such as `Values.db.port`.
    pub fn get(&self, path: &str) -> Option<&JsonValue> {
        path.split('.')
            .try_fold(self.json.as_ref(), |node, segment| node.get(segment))
    }

    pub fn as_json(&self) -> &JsonValue {
        &self.json
    }

    /// The context as handed to the template engine.
    pub fn as_value(&self) -> &Value {
        &self.value
    }
}

impl Default for Context {
    fn default() -> Self {
        Context::empty()
    }
}

fn template_value(json: &JsonValue) -> Value {
    let JsonValue::Object(map) = json else {
        return Value::from_serialize(json);
    };
    let root: BTreeMap<String, Value> = map
        .iter()
        .map(|(key, value)| {
            let value = if key == FILES {
                Value::from_object(FileBundle::from_json(value))
            } else {
                Value::from_serialize(value)
            };
            (key.clone(), value)
        })
        .collect();
    Value::from(root)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn later_layers_override_leaves() {
        let mut builder = ContextBuilder::new();
        builder.add_value("one", json!({"a": {"x": 1, "y": 2}}), None);
        builder.add_value("two", json!({"a": {"y": 3, "z": 4}}), None);
        let ctx = builder.build().unwrap();
        assert_eq!(ctx.as_json(), &json!({"a": {"x": 1, "y": 3, "z": 4}}));
    }

    #[test]
    fn type_changing_override_is_allowed() {
        let mut builder = ContextBuilder::new();
        builder.add_value("one", json!({"a": {"x": 1}}), None);
        builder.add_value("two", json!({"a": "flat"}), None);
        assert_eq!(builder.build().unwrap().as_json(), &json!({"a": "flat"}));
    }

    #[test]
    fn null_does_not_wipe_earlier_values() {
        let mut builder = ContextBuilder::new();
        builder
            .add_layer(".yaml", "base.yaml", "port: 1\n", Some(VALUES))
            .unwrap();
        builder
            .add_layer(".yaml", "empty.yaml", "", Some(VALUES))
            .unwrap();
        builder.add_value("nulls", json!({"Values": {"port": null}}), None);
        assert_eq!(builder.build().unwrap().get("Values.port"), Some(&json!(1)));
    }

    #[test]
    fn sequences_are_replaced_not_merged() {
        let mut builder = ContextBuilder::new();
        builder.add_value("one", json!({"hosts": ["a", "b"]}), None);
        builder.add_value("two", json!({"hosts": ["c"]}), None);
        assert_eq!(builder.build().unwrap().get("hosts"), Some(&json!(["c"])));
    }

    #[test]
    fn unscoped_scalar_layer_is_a_merge_error() {
        let mut builder = ContextBuilder::new();
        builder.add_layer(".json", "n.json", "42", None).unwrap();
        let err = builder.build().unwrap_err();
        assert!(matches!(err, RenderError::Merge(ref msg) if msg.contains("n.json")));
    }

    #[test]
    fn env_is_wrapped_under_scope() {
        let mut builder = ContextBuilder::new();
        builder.add_env([("HOST", "db1")], Some(ENV));
        let ctx = builder.build().unwrap();
        assert_eq!(ctx.get("Env.HOST"), Some(&json!("db1")));
        assert_eq!(ctx.get("Env.MISSING"), None);
    }
}
