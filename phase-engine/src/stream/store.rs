// Stream Store
// Ordered, tag-queryable item collection shared by the phases that consume it

use crate::stream::tags::{TagLedger, TagValue};

use parking_lot::Mutex;
use serde_json::Value;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

static NEXT_STREAM_ID: AtomicU64 = AtomicU64::new(0);

/// Opaque stream identity used in traces and events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StreamId(u64);

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "stream-{}", self.0)
    }
}

/// A data value with its tag ledger
#[derive(Debug, Clone, PartialEq)]
pub struct Item {
    pub data: Value,
    pub tags: TagLedger,
}

impl Item {
    pub fn new(data: Value, tags: TagLedger) -> Self {
        Self { data, tags }
    }
}

/// Picks items out of a stream by a single tag.
///
/// A selector without a value matches every item.
#[derive(Debug, Clone, PartialEq)]
pub struct Selector {
    pub key: String,
    pub value: Option<TagValue>,
}

impl Selector {
    pub fn new(key: impl Into<String>, value: Option<TagValue>) -> Self {
        Self {
            key: key.into(),
            value,
        }
    }

    pub fn exact(key: impl Into<String>, value: impl Into<TagValue>) -> Self {
        Self::new(key, Some(value.into()))
    }

    pub fn any(key: impl Into<String>) -> Self {
        Self::new(key, None)
    }

    pub fn matches(&self, tags: &TagLedger) -> bool {
        match &self.value {
            None => true,
            Some(value) => tags.read(&self.key) == Some(value),
        }
    }
}

/// Handle to an ordered multiset of items.
///
/// Clones share the same storage; appends from concurrently running tasks
/// are serialized so no item is lost.
#[derive(Clone)]
pub struct Stream {
    id: StreamId,
    items: Arc<Mutex<Vec<Item>>>,
}

impl Stream {
    pub fn new() -> Self {
        Self::from_items(Vec::new())
    }

    pub fn from_items(items: Vec<Item>) -> Self {
        Self {
            id: StreamId(NEXT_STREAM_ID.fetch_add(1, Ordering::Relaxed)),
            items: Arc::new(Mutex::new(items)),
        }
    }

    /// Concatenate several streams, in order, into a fresh one
    pub fn merge(mut streams: Vec<Stream>) -> Stream {
        if streams.len() == 1 {
            return streams.pop().unwrap_or_default();
        }
        let merged = Stream::new();
        for stream in streams {
            let items = stream.drain();
            merged.items.lock().extend(items);
        }
        merged
    }

    pub fn id(&self) -> StreamId {
        self.id
    }

    /// Append an item
    pub fn put(&self, data: Value, tags: TagLedger) {
        self.items.lock().push(Item { data, tags });
    }

    /// Take every item matching the selector, preserving order.
    ///
    /// Non-matching items stay in the stream for later consumers.
    pub fn get(&self, selector: &Selector) -> Vec<Item> {
        let mut items = self.items.lock();
        let (taken, kept): (Vec<Item>, Vec<Item>) = items
            .drain(..)
            .partition(|item| selector.matches(&item.tags));
        *items = kept;
        taken
    }

    /// Take every item
    pub fn drain(&self) -> Vec<Item> {
        std::mem::take(&mut *self.items.lock())
    }

    /// Copy of the current contents
    pub fn snapshot(&self) -> Vec<Item> {
        self.items.lock().clone()
    }

    /// Data values currently held, in order
    pub fn values(&self) -> Vec<Value> {
        self.items.lock().iter().map(|item| item.data.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.lock().is_empty()
    }

    pub fn same_as(&self, other: &Stream) -> bool {
        Arc::ptr_eq(&self.items, &other.items)
    }
}

impl Default for Stream {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Stream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Stream")
            .field("id", &self.id)
            .field("len", &self.len())
            .finish()
    }
}
