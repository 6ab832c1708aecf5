// Trace Instrumentation
// Span and flow recording on top of `tracing`, gated by a global switch

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Instant;
use tracing::{trace, trace_span, Span};

static ENABLED: AtomicBool = AtomicBool::new(false);
static NEXT_FLOW_ID: AtomicU64 = AtomicU64::new(1);

/// Turn span/flow recording on or off for the whole process
pub fn set_enabled(enabled: bool) {
    ENABLED.store(enabled, Ordering::Relaxed);
}

pub fn enabled() -> bool {
    ENABLED.load(Ordering::Relaxed)
}

/// What a span or flow describes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpanInfo {
    pub cat: String,
    pub name: String,
    pub args: Vec<(String, String)>,
}

impl SpanInfo {
    pub fn new(cat: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            cat: cat.into(),
            name: name.into(),
            args: Vec::new(),
        }
    }

    pub fn with_arg(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.args.push((key.into(), value.to_string()));
        self
    }
}

/// An open span; closes on [`SpanGuard::end`] or drop
#[must_use = "a span is closed as soon as the guard is dropped"]
pub struct SpanGuard {
    inner: Option<(Span, Instant)>,
}

impl SpanGuard {
    fn disabled() -> Self {
        Self { inner: None }
    }

    pub fn is_recording(&self) -> bool {
        self.inner.is_some()
    }

    pub fn end(self) {}
}

impl Drop for SpanGuard {
    fn drop(&mut self) {
        if let Some((span, started)) = self.inner.take() {
            let elapsed_us = started.elapsed().as_micros() as u64;
            trace!(parent: &span, elapsed_us, "span end");
        }
    }
}

/// Open a span
pub fn start(info: &SpanInfo) -> SpanGuard {
    if !enabled() {
        return SpanGuard::disabled();
    }
    let span = trace_span!("phase_span", cat = %info.cat, name = %info.name, args = ?info.args);
    trace!(parent: &span, "span start");
    SpanGuard {
        inner: Some((span, Instant::now())),
    }
}

/// Identity of a causal flow linking work across async boundaries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FlowId(u64);

impl FlowId {
    pub fn step(self) {
        if enabled() {
            trace!(flow_id = self.0, "flow step");
        }
    }
}

impl fmt::Display for FlowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "flow-{}", self.0)
    }
}

/// A flow that has been described but not started
pub struct Flow {
    info: SpanInfo,
}

/// Describe a flow
pub fn flow(info: SpanInfo) -> Flow {
    Flow { info }
}

impl Flow {
    pub fn start(self) -> FlowHandle {
        if !enabled() {
            return FlowHandle { id: None };
        }
        let id = FlowId(NEXT_FLOW_ID.fetch_add(1, Ordering::Relaxed));
        trace!(flow_id = id.0, cat = %self.info.cat, name = %self.info.name, "flow start");
        FlowHandle { id: Some(id) }
    }
}

/// A started flow
#[derive(Debug)]
pub struct FlowHandle {
    id: Option<FlowId>,
}

impl FlowHandle {
    /// `None` when tracing was disabled at start
    pub fn id(&self) -> Option<FlowId> {
        self.id
    }

    pub fn step(&self) {
        if let Some(id) = self.id {
            id.step();
        }
    }

    pub fn end(self) {
        if let Some(id) = self.id {
            trace!(flow_id = id.0, "flow end");
        }
    }
}
