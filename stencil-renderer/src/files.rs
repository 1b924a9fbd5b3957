//! The `Files` object exposed to templates.
//!
//! ```text
//! {{ Files.get("conf/jvm.options") }}
//! {% for line in Files.lines("hosts") %}{{ line }}{% endfor %}
//! {% for name in Files.glob("conf/*.xml").keys() %}{{ name }}{% endfor %}
//! ```

use std::collections::BTreeMap;
use std::sync::Arc;

use glob::{MatchOptions, Pattern};
use minijinja::value::{from_args, Enumerator, Object, Value};
use minijinja::{Error, ErrorKind, State};
use serde_json::Value as JsonValue;

/// Raw file contents keyed by name. Lookups of absent names yield `""`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileBundle {
    files: BTreeMap<String, String>,
}

impl FileBundle {
    pub fn new(files: BTreeMap<String, String>) -> Self {
        FileBundle { files }
    }

    /// Build from the `Files` scope of a context. Non-string entries keep
    /// their JSON text.
    pub fn from_json(value: &JsonValue) -> Self {
        let files = match value {
            JsonValue::Object(map) => map
                .iter()
                .map(|(name, content)| {
                    let text = match content {
                        JsonValue::String(s) => s.clone(),
                        other => other.to_string(),
                    };
                    (name.clone(), text)
                })
                .collect(),
            _ => BTreeMap::new(),
        };
        FileBundle { files }
    }

    pub fn get(&self, name: &str) -> &str {
        self.files.get(name).map(String::as_str).unwrap_or("")
    }

    /// The named file split on `\n`; empty for absent or empty files.
    pub fn lines(&self, name: &str) -> Vec<String> {
        match self.get(name) {
            "" => Vec::new(),
            content => content.split('\n').map(str::to_string).collect(),
        }
    }

    /// A new bundle holding only the files matching `pattern`. `*` does not
    /// cross `/`, `**` does. An invalid pattern matches everything.
    pub fn glob(&self, pattern: &str) -> FileBundle {
        let Ok(pattern) = Pattern::new(pattern) else {
            return self.clone();
        };
        let options = MatchOptions {
            require_literal_separator: true,
            ..MatchOptions::new()
        };
        FileBundle {
            files: self
                .files
                .iter()
                .filter(|(name, _)| pattern.matches_with(name, options))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        }
    }

    pub fn keys(&self) -> Vec<String> {
        self.files.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

impl Object for FileBundle {
    fn get_value(self: &Arc<Self>, key: &Value) -> Option<Value> {
        key.as_str()
            .and_then(|name| self.files.get(name))
            .map(|content| Value::from(content.as_str()))
    }

    fn enumerate(self: &Arc<Self>) -> Enumerator {
        Enumerator::Values(self.files.keys().map(|k| Value::from(k.as_str())).collect())
    }

    fn call_method(
        self: &Arc<Self>,
        _state: &State<'_, '_>,
        method: &str,
        args: &[Value],
    ) -> Result<Value, Error> {
        match method {
            "get" => {
                let (name,): (&str,) = from_args(args)?;
                Ok(Value::from(self.get(name)))
            }
            "lines" => {
                let (name,): (&str,) = from_args(args)?;
                Ok(Value::from(self.lines(name)))
            }
            "glob" => {
                let (pattern,): (&str,) = from_args(args)?;
                Ok(Value::from_object(self.glob(pattern)))
            }
            "keys" => {
                if !args.is_empty() {
                    return Err(Error::from(ErrorKind::TooManyArguments));
                }
                Ok(Value::from(self.keys()))
            }
            _ => Err(Error::from(ErrorKind::UnknownMethod)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bundle() -> FileBundle {
        FileBundle::new(BTreeMap::from([
            ("conf/a.xml".to_string(), "<a/>".to_string()),
            ("conf/nested/b.xml".to_string(), "<b/>".to_string()),
            ("hosts".to_string(), "db1\ndb2".to_string()),
        ]))
    }

    #[test]
    fn missing_files_are_empty() {
        assert_eq!(bundle().get("nope"), "");
        assert!(bundle().lines("nope").is_empty());
    }

    #[test]
    fn lines_split_on_newline() {
        assert_eq!(bundle().lines("hosts"), vec!["db1", "db2"]);
    }

    #[test]
    fn single_star_stays_in_one_directory() {
        assert_eq!(bundle().glob("conf/*.xml").keys(), vec!["conf/a.xml"]);
        assert!(bundle()
            .glob("conf/**/*.xml")
            .keys()
            .contains(&"conf/nested/b.xml".to_string()));
    }

    #[test]
    fn invalid_pattern_keeps_everything() {
        assert_eq!(bundle().glob("[").len(), 3);
    }
}
