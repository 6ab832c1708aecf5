// Stage Loader
// Drives a phase list over a stream by interpreting the commands each phase returns

use crate::error::{PhaseError, PhaseResult};
use crate::execution::events::{EventSender, ExecutionEvent, ProgressSender};
use crate::phase::{Arity, Command, Phase, PhaseTask, ResumeToken};
use crate::stream::{PhaseRef, Stream};

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

/// Configuration for the stage loader
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DriverConfig {
    /// Maximum tasks of one `par` command running at once (0 = unlimited)
    pub max_parallel_tasks: usize,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            max_parallel_tasks: 0,
        }
    }
}

/// Pending work for one position in the phase list
#[derive(Debug)]
enum Work {
    Stream(Stream),
    Resume(ResumeToken),
}

/// Runs phase lists to completion.
///
/// Streams move down the list one phase at a time. A yielded chunk is
/// carried to the end of the list before its phase is resumed, so output
/// order follows input order.
#[derive(Debug, Clone, Default)]
pub struct StageLoader {
    /// Configuration
    config: DriverConfig,
    /// Progress event sender
    event_tx: Option<ProgressSender>,
}

impl StageLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set driver configuration
    pub fn with_config(mut self, config: DriverConfig) -> Self {
        self.config = config;
        self
    }

    /// Set progress event sender
    pub fn with_progress(mut self, tx: ProgressSender) -> Self {
        self.event_tx = Some(tx);
        self
    }

    pub fn config(&self) -> &DriverConfig {
        &self.config
    }

    /// Run `phases` starting from an empty stream
    pub async fn process_stages(&self, phases: &mut [Phase]) -> PhaseResult<Stream> {
        self.process_stages_with_input(Stream::new(), phases).await
    }

    /// Run `phases` on `stream` and return everything that reached the end
    /// of the list, merged in arrival order
    pub async fn process_stages_with_input(
        &self,
        stream: Stream,
        phases: &mut [Phase],
    ) -> PhaseResult<Stream> {
        let start = Instant::now();
        self.event_tx
            .send_event(ExecutionEvent::run_started(phases.len(), stream.len()));
        debug!(phases = phases.len(), stream_id = %stream.id(), "stage run started");

        match self.drive(stream, phases).await {
            Ok(output) => {
                self.event_tx.send_event(ExecutionEvent::run_completed(
                    true,
                    output.len(),
                    start.elapsed(),
                ));
                info!(
                    phases = phases.len(),
                    items = output.len(),
                    elapsed_ms = start.elapsed().as_millis() as u64,
                    "stage run finished"
                );
                Ok(output)
            }
            Err(e) => {
                self.event_tx
                    .send_event(ExecutionEvent::execution_error(e.to_string(), Some(e.phase().to_string())));
                self.event_tx
                    .send_event(ExecutionEvent::run_completed(false, 0, start.elapsed()));
                warn!(phase = e.phase(), error = %e, "stage run failed");
                Err(e)
            }
        }
    }

    async fn drive(&self, stream: Stream, phases: &mut [Phase]) -> PhaseResult<Stream> {
        let mut finished: Vec<Stream> = Vec::new();
        let mut pending: Vec<(usize, Work)> = vec![(0, Work::Stream(stream))];

        while let Some((index, work)) = pending.pop() {
            let Some(phase) = phases.get_mut(index) else {
                if let Work::Stream(stream) = work {
                    self.event_tx
                        .send_event(ExecutionEvent::StreamFinished { items: stream.len() });
                    finished.push(stream);
                }
                continue;
            };

            let phase_ref = phase.phase_ref().clone();
            let aggregates = phase.arity() == Arity::ManyToOne;
            let invoked = Instant::now();
            let command = match work {
                Work::Stream(stream) => {
                    self.event_tx.send_event(ExecutionEvent::phase_invoked(
                        &phase_ref.name,
                        &phase_ref.id,
                        index,
                        false,
                    ));
                    phase.execute(stream)?
                }
                Work::Resume(token) => {
                    self.event_tx.send_event(ExecutionEvent::phase_invoked(
                        &phase_ref.name,
                        &phase_ref.id,
                        index,
                        true,
                    ));
                    phase.resume(token)?
                }
            };
            self.event_tx.send_event(ExecutionEvent::phase_completed(
                &phase_ref.name,
                &phase_ref.id,
                command.kind(),
                invoked.elapsed(),
            ));
            debug!(phase = %phase_ref, stage = index, command = %command.kind(), "phase returned");

            match command {
                Command::Done(stream) => {
                    if aggregates {
                        self.event_tx.send_event(ExecutionEvent::group_completed(
                            &phase_ref.name,
                            &phase_ref.id,
                            stream.len(),
                        ));
                    }
                    pending.push((index + 1, Work::Stream(stream)));
                }
                Command::None => {}
                Command::Yield { stream, resume } => {
                    self.event_tx.send_event(ExecutionEvent::phase_yielded(
                        &phase_ref.name,
                        &phase_ref.id,
                        resume.remaining(),
                    ));
                    // LIFO: the chunk runs downstream before the phase resumes
                    pending.push((index, Work::Resume(resume)));
                    pending.push((index + 1, Work::Stream(stream)));
                }
                Command::Par { stream, tasks } => {
                    self.run_tasks(&phase_ref, tasks).await?;
                    pending.push((index + 1, Work::Stream(stream)));
                }
            }
        }

        Ok(Stream::merge(finished))
    }

    /// Run every task of a `par` command; the first failure aborts the rest
    async fn run_tasks(&self, phase: &PhaseRef, tasks: Vec<PhaseTask>) -> PhaseResult<()> {
        let task_count = tasks.len();
        let start = Instant::now();
        self.event_tx.send_event(ExecutionEvent::tasks_dispatched(
            &phase.name,
            &phase.id,
            task_count,
        ));

        let semaphore = match self.config.max_parallel_tasks {
            0 => None,
            limit => Some(Arc::new(Semaphore::new(limit))),
        };

        let mut set = JoinSet::new();
        for task in tasks {
            let semaphore = semaphore.clone();
            let name = phase.name.clone();
            set.spawn(async move {
                let _permit = match semaphore {
                    Some(semaphore) => Some(semaphore.acquire_owned().await.map_err(|e| {
                        PhaseError::Scheduler {
                            phase: name,
                            message: e.to_string(),
                        }
                    })?),
                    None => None,
                };
                task.run().await
            });
        }

        while let Some(joined) = set.join_next().await {
            let result = match joined {
                Ok(result) => result,
                Err(e) if e.is_panic() => {
                    set.abort_all();
                    std::panic::resume_unwind(e.into_panic());
                }
                Err(e) => Err(PhaseError::Scheduler {
                    phase: phase.name.clone(),
                    message: e.to_string(),
                }),
            };
            if let Err(e) = result {
                set.abort_all();
                return Err(e);
            }
        }

        self.event_tx.send_event(ExecutionEvent::tasks_completed(
            &phase.name,
            &phase.id,
            task_count,
            start.elapsed(),
        ));
        Ok(())
    }
}
