//! Error types for stencil-sync.

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

use stencil_core::PipelineFailure;
use stencil_renderer::RenderError;

/// The barrier-separated states of one render run, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    RegisterReferences,
    BuildValues,
    CollectFiles,
    Finalize,
    RenderAndSink,
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            PipelineState::RegisterReferences => "registering reference templates",
            PipelineState::BuildValues => "building values",
            PipelineState::CollectFiles => "collecting files",
            PipelineState::Finalize => "building the context",
            PipelineState::RenderAndSink => "rendering",
        })
    }
}

/// All errors that can arise from sources, sinks and pipeline runs.
#[derive(Debug, Error)]
pub enum SyncError {
    /// An error from the rendering engine.
    #[error("render error: {0}")]
    Render(#[from] RenderError),

    /// An I/O error, with annotated path for context.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A glob pattern could not be parsed.
    #[error("invalid pattern '{pattern}': {message}")]
    Pattern { pattern: String, message: String },

    /// An input pattern did not match a single file.
    #[error("no files match '{pattern}'")]
    NoMatch { pattern: String },

    /// One pipeline state finished with failed items.
    #[error("{state} failed: {failure}")]
    Stage {
        state: PipelineState,
        failure: PipelineFailure,
    },
}

impl SyncError {
    /// The aggregated item failures, when this error came from a pipeline run.
    pub fn failure(&self) -> Option<&PipelineFailure> {
        match self {
            SyncError::Stage { failure, .. } => Some(failure),
            _ => None,
        }
    }
}

/// Convenience constructor for [`SyncError::Io`].
pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> SyncError {
    SyncError::Io {
        path: path.into(),
        source,
    }
}
