//! Stencil core library: pipeline items, stream operators, error taxonomy.
//!
//! Public API surface:
//! - [`item`]: the [`Item`] unit of work
//! - [`stream`]: [`Producer`], [`Stage`], merge operators and stage runners
//! - [`error`]: [`ItemError`] and the aggregated [`PipelineFailure`]

pub mod error;
pub mod item;
pub mod stream;

pub use error::{Failure, ItemError, PipelineFailure};
pub use item::Item;
pub use stream::{
    concat_merge, concurrent_apply, concurrent_apply_limited, fan_out, interleave_merge,
    sequential_apply, wait_until_done, ItemSender, ItemStream, Producer, Stage,
};
