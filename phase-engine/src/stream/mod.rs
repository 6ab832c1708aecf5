// Stream Module
// Tagged items, tag ledgers and the stream store

pub mod store;
pub mod tags;

pub use store::{Item, Selector, Stream, StreamId};
pub use tags::{FrameMarker, PhaseRef, TagLedger, TagValue, FLOW_KEY, FRAME_KEY, FROM_KEY};
