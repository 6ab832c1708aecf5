// Phase Runtime
// Per-invocation context: port bindings, current tags, framing and yield requests

use crate::error::PhaseError;
use crate::phase::info::{Arity, PortLayout};
use crate::registry::PhaseOptions;
use crate::stream::{
    FrameMarker, PhaseRef, Selector, Stream, StreamId, TagLedger, TagValue, FLOW_KEY, FRAME_KEY,
};
use crate::trace::{self, SpanInfo};

use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Immutable description of a phase shared with every runtime it spawns
#[derive(Debug, Clone)]
pub(crate) struct PhaseCore {
    pub(crate) phase: PhaseRef,
    pub(crate) arity: Arity,
    pub(crate) is_async: bool,
    pub(crate) input: PortLayout,
    pub(crate) output: PortLayout,
    pub(crate) input_selector: Selector,
    pub(crate) output_selector: Selector,
    pub(crate) options: PhaseOptions,
}

impl PhaseCore {
    pub(crate) fn span_info(&self) -> SpanInfo {
        SpanInfo::new("phase", self.phase.name.clone()).with_arg("phase_id", &self.phase.id)
    }

    pub(crate) fn span_named(&self, prefix: &str) -> SpanInfo {
        SpanInfo::new("phase", format!("{}:{}", prefix, self.phase.name))
    }

    /// Wrap an implementation error with this phase's identity
    pub(crate) fn failure(&self, source: anyhow::Error) -> PhaseError {
        PhaseError::Implementation {
            phase: self.phase.name.clone(),
            source: source.into(),
        }
    }
}

/// Monotonic per-phase sequence shared by all runtimes of one 1:N phase
#[derive(Debug, Clone, Default)]
pub(crate) struct SequenceCounter(Arc<AtomicU64>);

impl SequenceCounter {
    /// Reserve `n` consecutive numbers, returning the first
    pub(crate) fn reserve(&self, n: u64) -> u64 {
        self.0.fetch_add(n, Ordering::Relaxed)
    }
}

/// Outputs of one input item, held until its frame closes so the group
/// gets a contiguous run of sequence numbers
#[derive(Debug)]
struct Framing {
    sequence: SequenceCounter,
    buffered: Vec<(Value, TagLedger)>,
}

/// Execution context handed to phase implementations.
///
/// One runtime exists per `execute` call, or per task for async phases.
#[derive(Debug)]
pub struct PhaseRuntime {
    core: Arc<PhaseCore>,
    stream: Stream,
    tags: TagLedger,
    framing: Option<Framing>,
    reset_tags_after_put: bool,
    yield_requested: bool,
}

impl PhaseRuntime {
    pub(crate) fn new(core: Arc<PhaseCore>, stream: Stream) -> Self {
        Self {
            core,
            stream,
            tags: TagLedger::new(),
            framing: None,
            reset_tags_after_put: false,
            yield_requested: false,
        }
    }

    /// Stamp every put with a frame marker drawn from `sequence`
    pub(crate) fn framed(mut self, sequence: SequenceCounter) -> Self {
        self.framing = Some(Framing {
            sequence,
            buffered: Vec::new(),
        });
        self
    }

    /// Start every put after the first from an empty ledger
    pub(crate) fn resetting_tags(mut self) -> Self {
        self.reset_tags_after_put = true;
        self
    }

    pub fn phase(&self) -> &PhaseRef {
        &self.core.phase
    }

    pub fn options(&self) -> &PhaseOptions {
        &self.core.options
    }

    /// Tags of the item being processed
    pub fn tags(&self) -> &TagLedger {
        &self.tags
    }

    /// Tag the item being processed; carried onto subsequent puts
    pub fn tag(&mut self, key: impl Into<String>, value: impl Into<TagValue>) {
        self.tags.tag(key, value);
    }

    pub fn stream_id(&self) -> StreamId {
        self.stream.id()
    }

    /// Emit `data` on the phase's output with the current tags
    pub fn put(&mut self, data: Value) {
        let tags = self.tags.clone();
        let output = self.core.output_selector.clone();
        self.append(data, tags, &output);
    }

    /// Emit `data` on the phase's output with explicit tags
    pub fn put_with_tags(&mut self, data: Value, tags: TagLedger) {
        let output = self.core.output_selector.clone();
        self.append(data, tags, &output);
    }

    /// Emit `data` on a named output port
    pub fn put_to(&mut self, port: &str, data: Value) -> Result<(), PhaseError> {
        let output = self
            .core
            .output
            .port(port)
            .map(|spec| spec.selector())
            .ok_or_else(|| self.unknown_port(port))?;
        let tags = self.tags.clone();
        self.append(data, tags, &output);
        Ok(())
    }

    /// Take every item on a named input port and hand each to `f` with the
    /// item's tags installed as current
    pub fn each_input<F>(&mut self, port: &str, f: F) -> anyhow::Result<()>
    where
        F: FnMut(&mut PhaseRuntime, Value) -> anyhow::Result<()>,
    {
        let selector = self
            .core
            .input
            .port(port)
            .map(|spec| spec.selector())
            .ok_or_else(|| self.unknown_port(port))?;
        self.each_selected(&selector, f)
    }

    /// Take every item on the phase's single input selector
    pub fn each_item<F>(&mut self, f: F) -> anyhow::Result<()>
    where
        F: FnMut(&mut PhaseRuntime, Value) -> anyhow::Result<()>,
    {
        let selector = self.core.input_selector.clone();
        self.each_selected(&selector, f)
    }

    /// Ask the engine to hand control back to the driver after this item.
    ///
    /// Only honoured by synchronous 1:1 phases; the remaining items are
    /// processed when the driver resumes the phase.
    pub fn request_yield(&mut self) {
        self.yield_requested = true;
    }

    pub fn yield_requested(&self) -> bool {
        self.yield_requested
    }

    fn each_selected<F>(&mut self, selector: &Selector, mut f: F) -> anyhow::Result<()>
    where
        F: FnMut(&mut PhaseRuntime, Value) -> anyhow::Result<()>,
    {
        for item in self.stream.get(selector) {
            self.record_get(&item.tags);
            self.set_tags(item.tags);
            f(&mut *self, item.data)?;
        }
        Ok(())
    }

    fn unknown_port(&self, port: &str) -> PhaseError {
        PhaseError::UnknownPort {
            phase: self.core.phase.name.clone(),
            port: port.to_string(),
        }
    }

    pub(crate) fn core(&self) -> &Arc<PhaseCore> {
        &self.core
    }

    pub(crate) fn set_tags(&mut self, tags: TagLedger) {
        self.tags = tags;
    }

    pub(crate) fn take_yield_request(&mut self) -> bool {
        std::mem::take(&mut self.yield_requested)
    }

    pub(crate) fn into_stream(self) -> Stream {
        self.stream
    }

    /// Append straight to `target` with the phase's output tag, bypassing
    /// framing; used for aggregated results
    pub(crate) fn put_into(&mut self, target: &Stream, data: Value, mut tags: TagLedger) {
        self.record_put(&mut tags);
        let output = &self.core.output_selector;
        tag_output(&mut tags, output);
        target.put(data, tags);
    }

    /// Start collecting the outputs of a new input item
    pub(crate) fn open_frame(&mut self) {
        if let Some(framing) = self.framing.as_mut() {
            framing.buffered.clear();
        }
    }

    /// Number and append the outputs collected since [`Self::open_frame`];
    /// the first is marked `start` and the last `end`
    pub(crate) fn close_frame(&mut self) {
        let Some(framing) = self.framing.as_mut() else {
            return;
        };
        let outputs = std::mem::take(&mut framing.buffered);
        if outputs.is_empty() {
            return;
        }
        let count = outputs.len() as u64;
        let first = framing.sequence.reserve(count);
        for (offset, (data, mut tags)) in (0u64..).zip(outputs) {
            let mut frames = tags.frames().to_vec();
            frames.push(FrameMarker {
                seq: first + offset,
                start: offset == 0,
                end: offset + 1 == count,
            });
            tags.tag(FRAME_KEY, frames);
            self.stream.put(data, tags);
        }
    }

    pub(crate) fn record_get(&self, tags: &TagLedger) {
        if !trace::enabled() {
            return;
        }
        let span = trace::start(&self.item_span("get", tags));
        if let Some(flow) = tags.flow() {
            flow.step();
        }
        span.end();
    }

    fn record_put(&self, tags: &mut TagLedger) {
        if !trace::enabled() {
            return;
        }
        let span = trace::start(&self.item_span("put", tags));
        if let Some(flow) = tags.flow() {
            flow.step();
        }
        if let Some(id) = trace::flow(self.core.span_info()).start().id() {
            tags.tag(FLOW_KEY, TagValue::Flow(id));
        }
        span.end();
    }

    fn item_span(&self, prefix: &str, tags: &TagLedger) -> SpanInfo {
        let mut info = self
            .core
            .span_named(prefix)
            .with_arg("stream_id", self.stream.id());
        for (key, value) in tags.iter().filter(|(key, _)| key.as_str() != FLOW_KEY) {
            info = info.with_arg(key.clone(), value);
        }
        info
    }

    fn append(&mut self, data: Value, mut tags: TagLedger, output: &Selector) {
        self.record_put(&mut tags);
        tag_output(&mut tags, output);

        match self.framing.as_mut() {
            Some(framing) => framing.buffered.push((data, tags)),
            None => self.stream.put(data, tags),
        }

        if self.reset_tags_after_put {
            self.tags = TagLedger::new();
        }
    }
}

fn tag_output(tags: &mut TagLedger, output: &Selector) {
    if let Some(value) = &output.value {
        tags.tag(output.key.clone(), value.clone());
    }
}
