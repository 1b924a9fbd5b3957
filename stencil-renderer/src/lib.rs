//! # stencil-renderer
//!
//! Turns typed data sources into one layered [`Context`] and renders
//! minijinja templates against it.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use stencil_renderer::{ContextBuilder, EngineConfig, TemplateEngine, ENV, VALUES};
//!
//! fn render_demo() -> Result<String, stencil_renderer::RenderError> {
//!     let mut builder = ContextBuilder::new();
//!     builder.add_layer(".yaml", "values.yaml", "port: 5432\n", Some(VALUES))?;
//!     builder.add_env([("HOST", "db1")], Some(ENV));
//!     let context = builder.build()?;
//!
//!     let engine = TemplateEngine::new(EngineConfig::default());
//!     engine.render("db.conf", "host={{ Env.HOST }}\nport={{ Values.port }}", &context)
//! }
//! ```

pub mod context;
pub mod decode;
pub mod engine;
pub mod error;
pub mod files;
pub mod functions;
pub mod network;

pub use context::{deep_merge, Context, ContextBuilder, ENV, FILES, VALUES};
pub use decode::{format_of, DecodeFn, DecoderRegistry};
pub use engine::{EngineConfig, MissingKeyPolicy, TemplateEngine, DEFAULT_MAX_DEPTH};
pub use error::RenderError;
pub use files::FileBundle;
