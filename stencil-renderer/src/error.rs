//! Error types for stencil-renderer.

use stencil_core::ItemError;
use thiserror::Error;

/// All errors that can arise while building a context or rendering.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RenderError {
    /// A layer's content did not parse under its format.
    #[error("could not decode {name} as {format}: {message}")]
    Decode {
        name: String,
        format: String,
        message: String,
    },

    /// No decoder is registered for the given type tag.
    #[error("file type unknown, it was '{format}' but requires one of [{}]", .supported.join(", "))]
    UnsupportedFormat {
        format: String,
        supported: Vec<String>,
    },

    /// Layers could not be folded together.
    #[error("could not create context, merge was not possible: {0}")]
    Merge(String),

    #[error("could not parse {name}: {message}")]
    TemplateSyntax { name: String, message: String },

    #[error("missing key '{key}' while rendering {name}")]
    MissingKey { name: String, key: String },

    #[error("render depth limit of {limit} exceeded")]
    RecursionLimit { limit: usize },

    /// Any other evaluation failure reported by the template engine.
    #[error("could not render {name}: {message}")]
    Render { name: String, message: String },
}

impl From<RenderError> for ItemError {
    fn from(err: RenderError) -> Self {
        match err {
            RenderError::Decode {
                name,
                format,
                message,
            } => ItemError::Decode {
                name,
                format,
                message,
            },
            RenderError::UnsupportedFormat { format, supported } => {
                ItemError::UnsupportedFormat { format, supported }
            }
            RenderError::Merge(msg) => ItemError::Merge(msg),
            RenderError::TemplateSyntax { name, message } => {
                ItemError::TemplateSyntax { name, message }
            }
            RenderError::MissingKey { name, key } => ItemError::MissingKey { name, key },
            RenderError::RecursionLimit { limit } => ItemError::RecursionLimit { limit },
            RenderError::Render { name, message } => ItemError::Render { name, message },
        }
    }
}
