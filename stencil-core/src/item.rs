//! The unit of work moved through every pipeline stage.

use crate::error::ItemError;

/// A named piece of content, possibly carrying the failure that stopped it.
///
/// Items are never mutated in place by a stage; the helpers below consume
/// an item and return the next one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Item {
    /// Stable identifier: a file path, glob match, or synthetic key.
    pub name: String,
    pub content: String,
    pub error: Option<ItemError>,
}

impl Item {
    pub fn new(name: impl Into<String>, content: impl Into<String>) -> Self {
        Item {
            name: name.into(),
            content: content.into(),
            error: None,
        }
    }

    /// An item that failed before it had any content.
    pub fn failed(name: impl Into<String>, error: ItemError) -> Self {
        Item {
            name: name.into(),
            content: String::new(),
            error: Some(error),
        }
    }

    pub fn is_failed(&self) -> bool {
        self.error.is_some()
    }

    /// Same name, new content.
    pub fn with_content(self, content: impl Into<String>) -> Self {
        Item {
            content: content.into(),
            ..self
        }
    }

    /// Same name and content, now failed with `error`.
    pub fn fail(self, error: impl Into<ItemError>) -> Self {
        Item {
            error: Some(error.into()),
            ..self
        }
    }

    /// Keep the item as is on `Ok`, attach the error on `Err`.
    pub fn with_result<E: Into<ItemError>>(self, result: Result<(), E>) -> Self {
        match result {
            Ok(()) => self,
            Err(err) => self.fail(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn with_result_keeps_content_on_error() {
        let item = Item::new("values.yaml", "a: 1")
            .with_result(Err(ItemError::Merge("nope".to_string())));
        assert!(item.is_failed());
        assert_eq!(item.content, "a: 1");
        assert_eq!(item.name, "values.yaml");
    }

    #[test]
    fn with_content_preserves_name() {
        let item = Item::new("in.tpl", "{{ x }}").with_content("1");
        assert_eq!(item, Item::new("in.tpl", "1"));
    }
}
