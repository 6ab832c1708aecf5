// Arity Strategies
// How a phase turns one input stream into a command, per arity and async-ness

use crate::error::PhaseResult;
use crate::phase::aggregate::Aggregation;
use crate::phase::command::{Command, ResumeToken};
use crate::phase::implementation::{
    AsyncExpander, AsyncTransform, Expander, Implementation, Router, Source, Transform,
};
use crate::phase::info::Arity;
use crate::phase::runtime::{PhaseCore, PhaseRuntime, SequenceCounter};
use crate::phase::task::PhaseTask;
use crate::stream::{Item, Stream};

use std::collections::VecDeque;
use std::sync::Arc;
use tracing::debug;

/// Strategy bound to a phase at construction; only the aggregation and
/// expansion variants carry state between calls
pub(crate) enum Strategy {
    Init(Arc<dyn Source>),
    Transform(Arc<dyn Transform>),
    AsyncTransform(Arc<dyn AsyncTransform>),
    Expand {
        implementation: Arc<dyn Expander>,
        sequence: SequenceCounter,
    },
    AsyncExpand {
        implementation: Arc<dyn AsyncExpander>,
        sequence: SequenceCounter,
    },
    Aggregate(Aggregation),
    Route(Arc<dyn Router>),
}

impl Strategy {
    /// Pick the strategy for a declared arity.
    ///
    /// # Panics
    ///
    /// Panics when the implementation kind does not match the arity, or when
    /// `is_async` is set on an arity without an async variant.
    pub(crate) fn bind(name: &str, arity: Arity, is_async: bool, implementation: Implementation) -> Self {
        let kind = implementation.kind();
        match (arity, is_async, implementation) {
            (Arity::Init, false, Implementation::Source(source)) => Strategy::Init(source),
            (Arity::OneToOne, false, Implementation::Transform(transform)) => {
                Strategy::Transform(transform)
            }
            (Arity::OneToOne, true, Implementation::AsyncTransform(transform)) => {
                Strategy::AsyncTransform(transform)
            }
            (Arity::OneToMany, false, Implementation::Expander(implementation)) => Strategy::Expand {
                implementation,
                sequence: SequenceCounter::default(),
            },
            (Arity::OneToMany, true, Implementation::AsyncExpander(implementation)) => {
                Strategy::AsyncExpand {
                    implementation,
                    sequence: SequenceCounter::default(),
                }
            }
            (Arity::ManyToOne, false, Implementation::Aggregator(aggregator)) => {
                Strategy::Aggregate(Aggregation::new(aggregator))
            }
            (Arity::ManyToMany, false, Implementation::Router(router)) => Strategy::Route(router),
            (arity, is_async, _) => panic!(
                "phase '{}' declared {}{} cannot run a {} implementation",
                name,
                if is_async { "async " } else { "" },
                arity,
                kind
            ),
        }
    }

    pub(crate) fn execute(&mut self, core: &Arc<PhaseCore>, stream: Stream) -> PhaseResult<Command> {
        match self {
            Strategy::Init(source) => run_init(core, source.as_ref()),
            Strategy::Transform(transform) => {
                let pending: VecDeque<Item> = stream.get(&core.input_selector).into();
                run_transform(core, transform.as_ref(), stream, pending)
            }
            Strategy::AsyncTransform(transform) => Ok(run_async_transform(core, transform, stream)),
            Strategy::Expand {
                implementation,
                sequence,
            } => run_expand(core, implementation.as_ref(), sequence, stream),
            Strategy::AsyncExpand {
                implementation,
                sequence,
            } => Ok(run_async_expand(core, implementation, sequence, stream)),
            Strategy::Aggregate(aggregation) => aggregation.execute(core, stream),
            Strategy::Route(router) => run_route(core, router.as_ref(), stream),
        }
    }

    /// Continue a yielded 1:1 pass into a fresh stream
    pub(crate) fn resume(&mut self, core: &Arc<PhaseCore>, token: ResumeToken) -> Option<PhaseResult<Command>> {
        match self {
            Strategy::Transform(transform) => Some(run_transform(
                core,
                transform.as_ref(),
                Stream::new(),
                token.pending,
            )),
            _ => None,
        }
    }
}

fn run_init(core: &Arc<PhaseCore>, source: &dyn Source) -> PhaseResult<Command> {
    let output = Stream::new();
    let mut runtime = PhaseRuntime::new(Arc::clone(core), output.clone()).resetting_tags();
    source
        .generate(&mut runtime)
        .map_err(|e| core.failure(e))?;
    Ok(Command::Done(runtime.into_stream()))
}

/// Process `pending` in order, appending to `output`; stops early with a
/// resume token when the implementation requests a yield
fn run_transform(
    core: &Arc<PhaseCore>,
    transform: &dyn Transform,
    output: Stream,
    mut pending: VecDeque<Item>,
) -> PhaseResult<Command> {
    let mut runtime = PhaseRuntime::new(Arc::clone(core), output);

    while let Some(item) = pending.pop_front() {
        runtime.record_get(&item.tags);
        runtime.set_tags(item.tags);
        let result = transform
            .transform(item.data, &mut runtime)
            .map_err(|e| core.failure(e))?;
        runtime.put(result);

        if runtime.take_yield_request() && !pending.is_empty() {
            debug!(phase = %core.phase, remaining = pending.len(), "transform yielding");
            let written = runtime.into_stream();
            return Ok(Command::Yield {
                stream: written,
                resume: ResumeToken::new(core.phase.id.clone(), pending),
            });
        }
    }

    Ok(Command::Done(runtime.into_stream()))
}

fn run_async_transform(
    core: &Arc<PhaseCore>,
    transform: &Arc<dyn AsyncTransform>,
    stream: Stream,
) -> Command {
    let tasks = stream
        .get(&core.input_selector)
        .into_iter()
        .map(|item| {
            let mut runtime = PhaseRuntime::new(Arc::clone(core), stream.clone());
            runtime.record_get(&item.tags);
            runtime.set_tags(item.tags);
            PhaseTask::transform(Arc::clone(transform), item.data, runtime)
        })
        .collect();
    Command::Par { stream, tasks }
}

fn run_expand(
    core: &Arc<PhaseCore>,
    implementation: &dyn Expander,
    sequence: &SequenceCounter,
    stream: Stream,
) -> PhaseResult<Command> {
    let mut runtime = PhaseRuntime::new(Arc::clone(core), stream.clone()).framed(sequence.clone());

    for item in stream.get(&core.input_selector) {
        runtime.record_get(&item.tags);
        runtime.set_tags(item.tags);
        runtime.open_frame();
        implementation
            .expand(item.data, &mut runtime)
            .map_err(|e| core.failure(e))?;
        runtime.close_frame();
    }

    Ok(Command::Done(runtime.into_stream()))
}

fn run_async_expand(
    core: &Arc<PhaseCore>,
    implementation: &Arc<dyn AsyncExpander>,
    sequence: &SequenceCounter,
    stream: Stream,
) -> Command {
    let tasks = stream
        .get(&core.input_selector)
        .into_iter()
        .map(|item| {
            let mut runtime =
                PhaseRuntime::new(Arc::clone(core), stream.clone()).framed(sequence.clone());
            runtime.record_get(&item.tags);
            runtime.set_tags(item.tags);
            PhaseTask::expand(Arc::clone(implementation), item.data, runtime)
        })
        .collect();
    Command::Par { stream, tasks }
}

fn run_route(core: &Arc<PhaseCore>, router: &dyn Router, stream: Stream) -> PhaseResult<Command> {
    let mut runtime = PhaseRuntime::new(Arc::clone(core), stream);
    router.route(&mut runtime).map_err(|e| core.failure(e))?;
    Ok(Command::Done(runtime.into_stream()))
}
