// Composition
// Operators that combine phases into larger phases

pub mod pipeline;
pub mod routing;

pub use pipeline::{pipeline, pipeline_with_loader, PIPELINE_PHASE};
pub use routing::{routing_phase, ROUTE_IN_KEY, ROUTE_OUT_KEY};

use crate::types::TypeMismatch;

use thiserror::Error;

/// Errors raised while composing phases, before any data flows
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CompositionError {
    #[error("a pipeline needs at least one phase")]
    EmptyPipeline,

    #[error("phase '{upstream}' cannot feed phase '{downstream}': {source}")]
    TypeMismatch {
        upstream: String,
        downstream: String,
        #[source]
        source: TypeMismatch,
    },
}
