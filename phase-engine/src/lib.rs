// Phase Engine Library
// Composable phases over tagged data streams, with fan-out, ordered fan-in and routing

pub mod composition;
pub mod config;
pub mod error;
pub mod execution;
pub mod phase;
pub mod registry;
pub mod stream;
pub mod trace;
pub mod types;

// Re-export commonly used types
pub use error::{PhaseError, PhaseResult};

// Re-export stream types
pub use stream::{
    FrameMarker, Item, PhaseRef, Selector, Stream, StreamId, TagLedger, TagValue, FLOW_KEY,
    FRAME_KEY, FROM_KEY,
};

// Re-export phase types
pub use phase::{
    Aggregator, Arity, AsyncExpander, AsyncTransform, Command, CommandKind, Expander,
    Implementation, Phase, PhaseInfo, PhaseRuntime, PhaseTask, PortLayout, ResumeToken, Router,
    Source, Transform,
};

// Re-export type layer
pub use types::{DataType, PortSpec, StreamType, TypeEnv, TypeMismatch, TypeVar};

// Re-export composition operators
pub use composition::{pipeline, pipeline_with_loader, routing_phase, CompositionError};

// Re-export execution types
pub use execution::{
    progress_channel, DriverConfig, EventSender, ExecutionEvent, ProgressReceiver,
    ProgressSender, StageLoader,
};

// Re-export registry types
pub use registry::{
    OptionError, OptionKind, OptionSchema, PhaseDefinition, PhaseOptions, PhaseRegistry,
    RegistryError,
};

// Re-export configuration types
pub use config::{ConfigError, EngineConfig, PhaseConfig, PipelineConfig, TraceConfig};
