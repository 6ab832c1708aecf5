// Phase
// Unit of computation: declared ports, bound arity strategy and the commands it returns

mod aggregate;
pub mod command;
pub mod implementation;
pub mod info;
pub mod runtime;
mod strategy;
pub mod task;

pub use command::{Command, CommandKind, ResumeToken};
pub use implementation::{
    Aggregator, AsyncExpander, AsyncTransform, Expander, Implementation, Router, Source, Transform,
};
pub use info::{Arity, PhaseInfo, PortLayout};
pub use runtime::PhaseRuntime;
pub use task::PhaseTask;

use crate::error::{PhaseError, PhaseResult};
use crate::registry::PhaseOptions;
use crate::stream::{PhaseRef, Selector, Stream, TagValue, FROM_KEY};
use crate::trace;
use crate::types::{PortSpec, StreamType};
use runtime::PhaseCore;
use strategy::Strategy;

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::trace as log_trace;

static NEXT_PHASE_ID: AtomicU64 = AtomicU64::new(1);

/// A constructed phase, reusable across any number of invocations
pub struct Phase {
    core: Arc<PhaseCore>,
    strategy: Strategy,
}

impl Phase {
    /// Build a phase with no options
    ///
    /// # Panics
    ///
    /// See [`Phase::with_options`].
    pub fn new(info: PhaseInfo, implementation: Implementation) -> Self {
        Self::with_options(info, implementation, PhaseOptions::new())
    }

    /// Build a phase, binding the strategy for its arity.
    ///
    /// The id is taken from `info` or generated.
    ///
    /// # Panics
    ///
    /// Panics when a 0:N, 1:1 or 1:N phase is declared with named ports,
    /// when `is_async` is set on an arity other than 1:1 or 1:N, or when the
    /// implementation kind does not match the arity.
    pub fn with_options(info: PhaseInfo, implementation: Implementation, options: PhaseOptions) -> Self {
        if info.arity.needs_single_ports() {
            assert!(
                info.input.single().is_some() && info.output.single().is_some(),
                "{} phase '{}' needs a single input and output type",
                info.arity,
                info.name
            );
        }

        let id = info
            .id
            .unwrap_or_else(|| NEXT_PHASE_ID.fetch_add(1, Ordering::Relaxed).to_string());
        let phase = PhaseRef::new(info.name, id);
        let strategy = Strategy::bind(&phase.name, info.arity, info.is_async, implementation);

        let core = PhaseCore {
            input_selector: Selector::any(FROM_KEY),
            output_selector: Selector::exact(FROM_KEY, phase.clone()),
            phase,
            arity: info.arity,
            is_async: info.is_async,
            input: info.input,
            output: info.output,
            options,
        };

        Self {
            core: Arc::new(core),
            strategy,
        }
    }

    pub fn name(&self) -> &str {
        &self.core.phase.name
    }

    pub fn id(&self) -> &str {
        &self.core.phase.id
    }

    pub fn phase_ref(&self) -> &PhaseRef {
        &self.core.phase
    }

    pub fn arity(&self) -> Arity {
        self.core.arity
    }

    pub fn is_async(&self) -> bool {
        self.core.is_async
    }

    pub fn options(&self) -> &PhaseOptions {
        &self.core.options
    }

    pub fn input_layout(&self) -> &PortLayout {
        &self.core.input
    }

    pub fn output_layout(&self) -> &PortLayout {
        &self.core.output
    }

    pub fn input_selector(&self) -> &Selector {
        &self.core.input_selector
    }

    pub fn output_selector(&self) -> &Selector {
        &self.core.output_selector
    }

    /// Stream type this phase reads
    pub fn input_type(&self) -> StreamType {
        stream_type(&self.core.input, &self.core.input_selector)
    }

    /// Stream type this phase writes
    pub fn output_type(&self) -> StreamType {
        stream_type(&self.core.output, &self.core.output_selector)
    }

    /// Rebind the input selector; `None` matches every item.
    ///
    /// # Panics
    ///
    /// Panics when the phase reads through named ports.
    pub fn set_input(&mut self, key: impl Into<String>, value: Option<TagValue>) {
        self.assert_single("input", &self.core.input);
        Arc::make_mut(&mut self.core).input_selector = Selector::new(key, value);
    }

    /// Rebind the output tag written on every put.
    ///
    /// # Panics
    ///
    /// Panics when the phase writes through named ports.
    pub fn set_output(&mut self, key: impl Into<String>, value: impl Into<TagValue>) {
        self.assert_single("output", &self.core.output);
        Arc::make_mut(&mut self.core).output_selector = Selector::exact(key, value);
    }

    fn assert_single(&self, side: &str, layout: &PortLayout) {
        assert!(
            layout.single().is_some(),
            "phase '{}' has named {} ports and no single selector",
            self.core.phase.name,
            side
        );
    }

    /// Run the phase on `stream`
    pub fn execute(&mut self, stream: Stream) -> PhaseResult<Command> {
        let span = trace::start(&self.core.span_info().with_arg("stream_id", stream.id()));
        let command = self.strategy.execute(&self.core, stream)?;
        log_trace!(phase = %self.core.phase, command = %command.kind(), "phase executed");
        span.end();
        Ok(command)
    }

    /// Continue after a [`Command::Yield`] issued by this phase
    pub fn resume(&mut self, token: ResumeToken) -> PhaseResult<Command> {
        if token.phase_id != self.core.phase.id {
            return Err(PhaseError::ForeignResumeToken {
                phase: self.core.phase.name.clone(),
                issued_by: token.phase_id,
            });
        }
        let span = trace::start(&self.core.span_named("resume"));
        let command = match self.strategy.resume(&self.core, token) {
            Some(result) => result?,
            None => {
                return Err(PhaseError::Scheduler {
                    phase: self.core.phase.name.clone(),
                    message: format!("{} phase cannot resume", self.core.arity),
                })
            }
        };
        span.end();
        Ok(command)
    }
}

fn stream_type(layout: &PortLayout, selector: &Selector) -> StreamType {
    match layout {
        PortLayout::Single(ty) => StreamType::new(vec![PortSpec::new(
            selector.key.clone(),
            selector.value.clone(),
            ty.clone(),
        )]),
        PortLayout::Named(ports) => StreamType::new(ports.clone()),
    }
}

impl fmt::Debug for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Phase")
            .field("phase", &self.core.phase)
            .field("arity", &self.core.arity)
            .field("is_async", &self.core.is_async)
            .finish()
    }
}
