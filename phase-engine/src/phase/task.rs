// Phase Tasks
// Deferred per-item work produced by asynchronous phases

use crate::error::PhaseResult;
use crate::phase::implementation::{AsyncExpander, AsyncTransform};
use crate::phase::runtime::PhaseRuntime;
use crate::stream::PhaseRef;
use crate::trace;

use serde_json::Value;
use std::fmt;
use std::sync::Arc;

enum TaskWork {
    Transform(Arc<dyn AsyncTransform>),
    Expand(Arc<dyn AsyncExpander>),
}

/// One item's worth of work for an async 1:1 or 1:N phase.
///
/// The task owns its runtime snapshot, so it can run on any thread and
/// in any order relative to its siblings.
pub struct PhaseTask {
    work: TaskWork,
    data: Value,
    runtime: PhaseRuntime,
}

impl PhaseTask {
    pub(crate) fn transform(
        implementation: Arc<dyn AsyncTransform>,
        data: Value,
        runtime: PhaseRuntime,
    ) -> Self {
        Self {
            work: TaskWork::Transform(implementation),
            data,
            runtime,
        }
    }

    pub(crate) fn expand(
        implementation: Arc<dyn AsyncExpander>,
        data: Value,
        runtime: PhaseRuntime,
    ) -> Self {
        Self {
            work: TaskWork::Expand(implementation),
            data,
            runtime,
        }
    }

    /// Phase the task belongs to
    pub fn phase(&self) -> &PhaseRef {
        self.runtime.phase()
    }

    /// Run the work, writing results into the stream of the issuing command
    pub async fn run(self) -> PhaseResult<()> {
        let PhaseTask {
            work,
            data,
            mut runtime,
        } = self;
        let core = Arc::clone(runtime.core());
        let span = trace::start(&core.span_named("finish"));

        match work {
            TaskWork::Transform(implementation) => {
                let output = implementation
                    .transform(data, &runtime)
                    .await
                    .map_err(|e| core.failure(e))?;
                runtime.put(output);
            }
            TaskWork::Expand(implementation) => {
                runtime.open_frame();
                implementation
                    .expand(data, &mut runtime)
                    .await
                    .map_err(|e| core.failure(e))?;
                runtime.close_frame();
            }
        }

        span.end();
        Ok(())
    }
}

impl fmt::Debug for PhaseTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.work {
            TaskWork::Transform(_) => "transform",
            TaskWork::Expand(_) => "expand",
        };
        f.debug_struct("PhaseTask")
            .field("phase", self.runtime.phase())
            .field("kind", &kind)
            .field("data", &self.data)
            .finish()
    }
}
