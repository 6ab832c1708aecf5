// Phase Commands
// What a phase hands back to the driver after executing on a stream

use crate::phase::task::PhaseTask;
use crate::stream::{Item, Stream};

use std::collections::VecDeque;
use std::fmt;

/// Outcome of [`crate::Phase::execute`]
#[derive(Debug)]
pub enum Command {
    /// Finished; continue downstream with this stream
    Done(Stream),
    /// Nothing produced; the branch ends here
    None,
    /// A partial result is ready. Process `stream` downstream, then hand
    /// `resume` back to the same phase for the rest of its input.
    Yield { stream: Stream, resume: ResumeToken },
    /// Run `tasks` concurrently; they all write into `stream`, which
    /// continues downstream once every task has finished
    Par { stream: Stream, tasks: Vec<PhaseTask> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandKind {
    Done,
    None,
    Yield,
    Par,
}

impl Command {
    pub fn kind(&self) -> CommandKind {
        match self {
            Command::Done(_) => CommandKind::Done,
            Command::None => CommandKind::None,
            Command::Yield { .. } => CommandKind::Yield,
            Command::Par { .. } => CommandKind::Par,
        }
    }

    /// Stream carried by the command, if any
    pub fn stream(&self) -> Option<&Stream> {
        match self {
            Command::Done(stream)
            | Command::Yield { stream, .. }
            | Command::Par { stream, .. } => Some(stream),
            Command::None => None,
        }
    }
}

impl fmt::Display for CommandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CommandKind::Done => "done",
            CommandKind::None => "none",
            CommandKind::Yield => "yield",
            CommandKind::Par => "par",
        };
        write!(f, "{}", name)
    }
}

/// Continuation of a phase that yielded mid-stream
#[derive(Debug)]
pub struct ResumeToken {
    pub(crate) phase_id: String,
    pub(crate) pending: VecDeque<Item>,
}

impl ResumeToken {
    pub(crate) fn new(phase_id: impl Into<String>, pending: VecDeque<Item>) -> Self {
        Self {
            phase_id: phase_id.into(),
            pending,
        }
    }

    /// Id of the phase that issued the token
    pub fn phase_id(&self) -> &str {
        &self.phase_id
    }

    /// Input items not yet processed
    pub fn remaining(&self) -> usize {
        self.pending.len()
    }
}
