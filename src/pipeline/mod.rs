//! The forwarding pipeline: filter evaluation, content transformation,
//! duplicate detection, delivery dispatch.

pub mod dedup;
pub mod dispatch;
pub mod engine;
pub mod filters;
pub mod transform;
pub mod types;

pub use dispatch::DeliveryDispatcher;
pub use engine::ForwardEngine;
pub use filters::FilterPipeline;
pub use transform::TransformPipeline;
pub use types::{FilterVerdict, ForwardOutcome, SkipStage};
