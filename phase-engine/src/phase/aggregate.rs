// Frame Aggregation
// N:1 state machine: reorders framed items by sequence and folds each group

use crate::error::PhaseResult;
use crate::phase::command::Command;
use crate::phase::implementation::Aggregator;
use crate::phase::runtime::{PhaseCore, PhaseRuntime};
use crate::stream::{FrameMarker, Item, Stream, TagLedger, FRAME_KEY};

use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

/// Running state of an N:1 phase across every stream it sees
pub(crate) struct Aggregation {
    aggregator: Box<dyn Aggregator>,
    /// Next sequence number to admit
    upto: u64,
    /// Items that arrived ahead of `upto`, keyed by sequence
    backlog: BTreeMap<u64, Item>,
    /// Stream the open group's first item arrived on
    group_stream: Option<Stream>,
}

impl Aggregation {
    pub(crate) fn new(aggregator: Box<dyn Aggregator>) -> Self {
        Self {
            aggregator,
            upto: 0,
            backlog: BTreeMap::new(),
            group_stream: None,
        }
    }

    pub(crate) fn backlog_len(&self) -> usize {
        self.backlog.len()
    }

    /// Consume every framed item on `stream`.
    ///
    /// Completed groups put their result into the stream the group started
    /// on, which is returned as `Done`; otherwise `None`.
    ///
    /// # Panics
    ///
    /// Panics on an item without a frame marker, on a sequence number that
    /// was already admitted, or on a duplicate sequence number.
    pub(crate) fn execute(&mut self, core: &Arc<PhaseCore>, stream: Stream) -> PhaseResult<Command> {
        let mut runtime = PhaseRuntime::new(Arc::clone(core), stream.clone());
        let mut completed: Vec<Stream> = Vec::new();

        for item in stream.get(&core.input_selector) {
            let frame = match item.tags.innermost_frame() {
                Some(frame) => *frame,
                None => panic!(
                    "N:1 phase '{}' received an item without a frame marker",
                    core.phase.name
                ),
            };

            if frame.seq != self.upto {
                assert!(
                    frame.seq > self.upto,
                    "N:1 phase '{}' received sequence {} after admitting up to {}",
                    core.phase.name,
                    frame.seq,
                    self.upto
                );
                let duplicate = self.backlog.insert(frame.seq, item).is_some();
                assert!(
                    !duplicate,
                    "N:1 phase '{}' received sequence {} twice",
                    core.phase.name,
                    frame.seq
                );
                continue;
            }

            self.admit(&mut runtime, &stream, item, frame, &mut completed)?;
            while let Some(next) = self.backlog.remove(&self.upto) {
                let frame = next.tags.innermost_frame().copied().unwrap_or_default();
                self.admit(&mut runtime, &stream, next, frame, &mut completed)?;
            }
        }

        debug!(
            phase = %core.phase,
            upto = self.upto,
            backlog = self.backlog_len(),
            groups = completed.len(),
            "aggregation pass"
        );

        if completed.is_empty() {
            return Ok(Command::None);
        }
        Ok(Command::Done(Stream::merge(completed)))
    }

    fn admit(
        &mut self,
        runtime: &mut PhaseRuntime,
        current: &Stream,
        item: Item,
        frame: FrameMarker,
        completed: &mut Vec<Stream>,
    ) -> PhaseResult<()> {
        let core = Arc::clone(runtime.core());
        self.upto += 1;

        runtime.record_get(&item.tags);
        runtime.set_tags(item.tags.clone());

        if frame.start {
            self.group_stream = Some(current.clone());
            self.aggregator
                .on_start(runtime)
                .map_err(|e| core.failure(e))?;
        }

        self.aggregator
            .accumulate(item.data, runtime)
            .map_err(|e| core.failure(e))?;

        if frame.end {
            runtime.set_tags(TagLedger::new());
            let result = self
                .aggregator
                .on_completion(runtime)
                .map_err(|e| core.failure(e))?;

            // the result carries only the enclosing frames and the output tag
            let mut frames = item.tags.frames().to_vec();
            frames.pop();
            let mut tags = TagLedger::new();
            if !frames.is_empty() {
                tags.tag(FRAME_KEY, frames);
            }

            let target = self.group_stream.take().unwrap_or_else(|| current.clone());
            runtime.put_into(&target, result, tags);
            if !completed.iter().any(|stream| stream.same_as(&target)) {
                completed.push(target);
            }
        }
        Ok(())
    }
}
