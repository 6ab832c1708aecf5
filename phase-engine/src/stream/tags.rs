// Tag Ledger
// Per-item metadata used for port routing and frame lineage

use crate::trace::FlowId;

use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Tag key holding the frame marker stack
pub const FRAME_KEY: &str = "frame";

/// Tag key holding the instrumentation flow handle
pub const FLOW_KEY: &str = "flow";

/// Default selector key used between phases
pub const FROM_KEY: &str = "from";

/// Identity of a phase as carried in tags
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PhaseRef {
    pub name: String,
    pub id: String,
}

impl PhaseRef {
    pub fn new(name: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            id: id.into(),
        }
    }
}

impl fmt::Display for PhaseRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.name, self.id)
    }
}

/// One level of a nested fan-out/fan-in grouping
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FrameMarker {
    /// Position within the producing phase's output sequence
    pub seq: u64,
    /// First item of a group
    pub start: bool,
    /// Last item of a group
    pub end: bool,
}

impl FrameMarker {
    pub fn new(seq: u64) -> Self {
        Self {
            seq,
            start: false,
            end: false,
        }
    }

    pub fn starting(mut self) -> Self {
        self.start = true;
        self
    }

    pub fn ending(mut self) -> Self {
        self.end = true;
        self
    }
}

/// Value stored under a tag key
#[derive(Debug, Clone, PartialEq)]
pub enum TagValue {
    Text(String),
    Phase(PhaseRef),
    Frames(Vec<FrameMarker>),
    Flow(FlowId),
    Data(Value),
}

impl TagValue {
    pub fn text(value: impl Into<String>) -> Self {
        Self::Text(value.into())
    }

    pub fn as_frames(&self) -> Option<&[FrameMarker]> {
        match self {
            TagValue::Frames(frames) => Some(frames),
            _ => None,
        }
    }
}

impl fmt::Display for TagValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TagValue::Text(s) => write!(f, "{}", s),
            TagValue::Phase(phase) => write!(f, "{}", phase),
            TagValue::Frames(frames) => {
                let parts: Vec<String> = frames
                    .iter()
                    .map(|frame| {
                        let mut part = frame.seq.to_string();
                        if frame.start {
                            part.push('^');
                        }
                        if frame.end {
                            part.push('$');
                        }
                        part
                    })
                    .collect();
                write!(f, "[{}]", parts.join(","))
            }
            TagValue::Flow(id) => write!(f, "{}", id),
            TagValue::Data(value) => write!(f, "{}", value),
        }
    }
}

impl From<&str> for TagValue {
    fn from(value: &str) -> Self {
        TagValue::Text(value.to_string())
    }
}

impl From<String> for TagValue {
    fn from(value: String) -> Self {
        TagValue::Text(value)
    }
}

impl From<PhaseRef> for TagValue {
    fn from(value: PhaseRef) -> Self {
        TagValue::Phase(value)
    }
}

impl From<Vec<FrameMarker>> for TagValue {
    fn from(value: Vec<FrameMarker>) -> Self {
        TagValue::Frames(value)
    }
}

impl From<Value> for TagValue {
    fn from(value: Value) -> Self {
        TagValue::Data(value)
    }
}

/// Copy-on-write key/value metadata attached to a stream item.
///
/// Clones share storage until one side is tagged, so an item appended to a
/// stream never observes tags written through another ledger.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TagLedger {
    entries: Arc<HashMap<String, TagValue>>,
}

impl TagLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a key on this ledger, leaving every clone untouched
    pub fn tag(&mut self, key: impl Into<String>, value: impl Into<TagValue>) -> &mut Self {
        Arc::make_mut(&mut self.entries).insert(key.into(), value.into());
        self
    }

    /// Consuming variant of [`TagLedger::tag`]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<TagValue>) -> Self {
        self.tag(key, value);
        self
    }

    pub fn read(&self, key: &str) -> Option<&TagValue> {
        self.entries.get(key)
    }

    pub fn remove(&mut self, key: &str) -> Option<TagValue> {
        if !self.entries.contains_key(key) {
            return None;
        }
        Arc::make_mut(&mut self.entries).remove(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &TagValue)> {
        self.entries.iter()
    }

    /// Frame stack, outermost first (empty when untagged)
    pub fn frames(&self) -> &[FrameMarker] {
        self.read(FRAME_KEY)
            .and_then(TagValue::as_frames)
            .unwrap_or(&[])
    }

    /// Frame marker at the innermost nesting level
    pub fn innermost_frame(&self) -> Option<&FrameMarker> {
        self.frames().last()
    }

    /// Flow handle recorded by the last producing phase, if tracing was on
    pub fn flow(&self) -> Option<FlowId> {
        match self.read(FLOW_KEY) {
            Some(TagValue::Flow(id)) => Some(*id),
            _ => None,
        }
    }
}
