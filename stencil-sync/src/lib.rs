//! # stencil-sync
//!
//! Sources, sinks and the render pipeline that connects them.
//!
//! Build a [`Renderer`] from producers (see [`source`]) and sink stages
//! (see [`sink`]), then `render().await` it. Sinks write through the
//! hash-gated [`atomic_write`].

pub mod diff;
pub mod error;
pub mod pipeline;
pub mod sink;
pub mod source;
pub mod writer;

pub use error::{PipelineState, SyncError};
pub use pipeline::{EnvSource, RenderSummary, Renderer};
pub use sink::{dir_sink, file_sink, output_name, writer_sink};
pub use source::{dir_source, file_source, glob_file_names, glob_required, reader_source};
pub use writer::{atomic_write, WriteLog, WriteOptions, WriteResult};
