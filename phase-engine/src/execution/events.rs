// Execution Events
// Progress reporting for phases run by the stage loader

use crate::phase::CommandKind;

use std::time::Duration;
use tokio::sync::mpsc;

/// Sender for execution progress events
pub type ProgressSender = mpsc::UnboundedSender<ExecutionEvent>;

/// Receiver for execution progress events
pub type ProgressReceiver = mpsc::UnboundedReceiver<ExecutionEvent>;

/// Create a new progress channel
pub fn progress_channel() -> (ProgressSender, ProgressReceiver) {
    mpsc::unbounded_channel()
}

/// Events emitted while the stage loader drives a phase list
#[derive(Debug, Clone)]
pub enum ExecutionEvent {
    /// A phase list started on an input stream
    RunStarted {
        total_phases: usize,
        input_items: usize,
    },

    /// A phase was handed a stream (or a resume token)
    PhaseInvoked {
        phase_name: String,
        phase_id: String,
        stage_index: usize,
        resumed: bool,
    },

    /// A phase returned its command
    PhaseCompleted {
        phase_name: String,
        phase_id: String,
        command: CommandKind,
        duration: Duration,
    },

    /// A phase yielded part of its output
    PhaseYielded {
        phase_name: String,
        phase_id: String,
        remaining: usize,
    },

    /// Tasks of a `par` command were dispatched
    TasksDispatched {
        phase_name: String,
        phase_id: String,
        task_count: usize,
    },

    /// Every task of a `par` command finished
    TasksCompleted {
        phase_name: String,
        phase_id: String,
        task_count: usize,
        duration: Duration,
    },

    /// An N:1 phase completed at least one frame group
    GroupCompleted {
        phase_name: String,
        phase_id: String,
        stream_items: usize,
    },

    /// A stream reached the end of the phase list
    StreamFinished { items: usize },

    /// The phase list finished
    RunCompleted {
        success: bool,
        output_items: usize,
        duration: Duration,
    },

    /// A phase or task failed
    Error {
        message: String,
        phase_name: Option<String>,
    },
}

impl ExecutionEvent {
    /// Create a run started event
    pub fn run_started(total_phases: usize, input_items: usize) -> Self {
        Self::RunStarted {
            total_phases,
            input_items,
        }
    }

    /// Create a phase invoked event
    pub fn phase_invoked(
        name: impl Into<String>,
        id: impl Into<String>,
        stage_index: usize,
        resumed: bool,
    ) -> Self {
        Self::PhaseInvoked {
            phase_name: name.into(),
            phase_id: id.into(),
            stage_index,
            resumed,
        }
    }

    /// Create a phase completed event
    pub fn phase_completed(
        name: impl Into<String>,
        id: impl Into<String>,
        command: CommandKind,
        duration: Duration,
    ) -> Self {
        Self::PhaseCompleted {
            phase_name: name.into(),
            phase_id: id.into(),
            command,
            duration,
        }
    }

    pub fn phase_yielded(name: impl Into<String>, id: impl Into<String>, remaining: usize) -> Self {
        Self::PhaseYielded {
            phase_name: name.into(),
            phase_id: id.into(),
            remaining,
        }
    }

    pub fn tasks_dispatched(name: impl Into<String>, id: impl Into<String>, task_count: usize) -> Self {
        Self::TasksDispatched {
            phase_name: name.into(),
            phase_id: id.into(),
            task_count,
        }
    }

    pub fn tasks_completed(
        name: impl Into<String>,
        id: impl Into<String>,
        task_count: usize,
        duration: Duration,
    ) -> Self {
        Self::TasksCompleted {
            phase_name: name.into(),
            phase_id: id.into(),
            task_count,
            duration,
        }
    }

    pub fn group_completed(
        name: impl Into<String>,
        id: impl Into<String>,
        stream_items: usize,
    ) -> Self {
        Self::GroupCompleted {
            phase_name: name.into(),
            phase_id: id.into(),
            stream_items,
        }
    }

    /// Create a run completed event
    pub fn run_completed(success: bool, output_items: usize, duration: Duration) -> Self {
        Self::RunCompleted {
            success,
            output_items,
            duration,
        }
    }

    /// Create an execution error event
    pub fn execution_error(message: impl Into<String>, phase_name: Option<String>) -> Self {
        Self::Error {
            message: message.into(),
            phase_name,
        }
    }
}

/// Helper trait for sending events, ignoring errors (fire-and-forget)
pub trait EventSender {
    fn send_event(&self, event: ExecutionEvent);
}

impl EventSender for ProgressSender {
    fn send_event(&self, event: ExecutionEvent) {
        let _ = self.send(event);
    }
}

impl EventSender for Option<ProgressSender> {
    fn send_event(&self, event: ExecutionEvent) {
        if let Some(sender) = self {
            let _ = sender.send(event);
        }
    }
}
