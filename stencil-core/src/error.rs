//! Error types for stencil-core.

use std::fmt;

use thiserror::Error;

/// Failure attached to a single pipeline [`Item`](crate::Item).
///
/// Errors travel with the item that caused them, so every variant is
/// `Clone` and carries rendered messages rather than source errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ItemError {
    /// A values or file source did not parse under its declared format.
    #[error("could not decode {name} as {format}: {message}")]
    Decode {
        name: String,
        format: String,
        message: String,
    },

    /// No decoder is registered for the source's type tag.
    #[error("file type unknown, it was '{format}' but requires one of [{}]", .supported.join(", "))]
    UnsupportedFormat {
        format: String,
        supported: Vec<String>,
    },

    /// Layers could not be folded into one context.
    #[error("could not create context, merge was not possible: {0}")]
    Merge(String),

    /// A reference or input template failed to parse.
    #[error("could not parse {name}: {message}")]
    TemplateSyntax { name: String, message: String },

    /// Strict rendering referenced an absent key.
    #[error("missing key '{key}' while rendering {name}")]
    MissingKey { name: String, key: String },

    /// Nested template rendering exceeded the depth bound.
    #[error("render depth limit of {limit} exceeded")]
    RecursionLimit { limit: usize },

    /// Any other template evaluation failure.
    #[error("could not render {name}: {message}")]
    Render { name: String, message: String },

    /// A sink failed to persist output.
    #[error("could not write {target}: {message}")]
    SinkWrite { target: String, message: String },

    /// A producer failed to read its backing content.
    #[error("could not read {source_name}: {message}")]
    SourceRead {
        source_name: String,
        message: String,
    },

    /// The task processing the item panicked or was cancelled.
    #[error("task aborted: {0}")]
    TaskAborted(String),
}

/// One failed item, as reported by [`PipelineFailure`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Failure {
    pub name: String,
    pub error: ItemError,
}

/// Every failed item of one drained stream, reported as a single error.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub struct PipelineFailure {
    pub failures: Vec<Failure>,
}

impl PipelineFailure {
    /// Names of the failed items, in the order they were observed.
    pub fn names(&self) -> Vec<&str> {
        self.failures.iter().map(|f| f.name.as_str()).collect()
    }
}

impl fmt::Display for PipelineFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "failed to complete {} inputs:", self.failures.len())?;
        for failure in &self.failures {
            write!(
                f,
                "\n\t{} was not completed successfully: {}",
                failure.name, failure.error
            )?;
        }
        Ok(())
    }
}
