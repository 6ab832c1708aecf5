// Phase Implementations
// The user-supplied behaviour bound to a phase, one trait per arity

use crate::phase::runtime::PhaseRuntime;

use serde_json::Value;
use std::fmt;
use std::sync::Arc;

/// 0:N — seeds a new stream through [`PhaseRuntime::put`]
pub trait Source: Send + Sync {
    fn generate(&self, runtime: &mut PhaseRuntime) -> anyhow::Result<()>;
}

/// 1:1 — maps each item to exactly one output
pub trait Transform: Send + Sync {
    fn transform(&self, data: Value, runtime: &mut PhaseRuntime) -> anyhow::Result<Value>;
}

/// 1:1 async — maps each item to a deferred output
#[async_trait::async_trait]
pub trait AsyncTransform: Send + Sync {
    async fn transform(&self, data: Value, runtime: &PhaseRuntime) -> anyhow::Result<Value>;
}

/// 1:N — puts any number of outputs per item
pub trait Expander: Send + Sync {
    fn expand(&self, data: Value, runtime: &mut PhaseRuntime) -> anyhow::Result<()>;
}

/// 1:N async — puts any number of outputs per item from a task
#[async_trait::async_trait]
pub trait AsyncExpander: Send + Sync {
    async fn expand(&self, data: Value, runtime: &mut PhaseRuntime) -> anyhow::Result<()>;
}

/// N:1 — folds each frame group into one output
pub trait Aggregator: Send {
    /// Called before the first item of a group
    fn on_start(&mut self, _runtime: &mut PhaseRuntime) -> anyhow::Result<()> {
        Ok(())
    }

    /// Called for every item, in sequence order
    fn accumulate(&mut self, data: Value, runtime: &mut PhaseRuntime) -> anyhow::Result<()>;

    /// Called after the last item of a group; the result is emitted
    fn on_completion(&mut self, runtime: &mut PhaseRuntime) -> anyhow::Result<Value>;
}

/// N:N — reads and writes named ports
pub trait Router: Send + Sync {
    fn route(&self, runtime: &mut PhaseRuntime) -> anyhow::Result<()>;
}

impl<F> Source for F
where
    F: Fn(&mut PhaseRuntime) -> anyhow::Result<()> + Send + Sync,
{
    fn generate(&self, runtime: &mut PhaseRuntime) -> anyhow::Result<()> {
        self(runtime)
    }
}

impl<F> Transform for F
where
    F: Fn(Value, &mut PhaseRuntime) -> anyhow::Result<Value> + Send + Sync,
{
    fn transform(&self, data: Value, runtime: &mut PhaseRuntime) -> anyhow::Result<Value> {
        self(data, runtime)
    }
}

impl<F> Expander for F
where
    F: Fn(Value, &mut PhaseRuntime) -> anyhow::Result<()> + Send + Sync,
{
    fn expand(&self, data: Value, runtime: &mut PhaseRuntime) -> anyhow::Result<()> {
        self(data, runtime)
    }
}

/// Behaviour handed to [`crate::Phase::new`]
pub enum Implementation {
    Source(Arc<dyn Source>),
    Transform(Arc<dyn Transform>),
    AsyncTransform(Arc<dyn AsyncTransform>),
    Expander(Arc<dyn Expander>),
    AsyncExpander(Arc<dyn AsyncExpander>),
    Aggregator(Box<dyn Aggregator>),
    Router(Arc<dyn Router>),
}

impl Implementation {
    pub fn source<F>(f: F) -> Self
    where
        F: Fn(&mut PhaseRuntime) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        Implementation::Source(Arc::new(f))
    }

    pub fn transform<F>(f: F) -> Self
    where
        F: Fn(Value, &mut PhaseRuntime) -> anyhow::Result<Value> + Send + Sync + 'static,
    {
        Implementation::Transform(Arc::new(f))
    }

    pub fn expander<F>(f: F) -> Self
    where
        F: Fn(Value, &mut PhaseRuntime) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        Implementation::Expander(Arc::new(f))
    }

    pub fn async_transform(t: impl AsyncTransform + 'static) -> Self {
        Implementation::AsyncTransform(Arc::new(t))
    }

    pub fn async_expander(e: impl AsyncExpander + 'static) -> Self {
        Implementation::AsyncExpander(Arc::new(e))
    }

    pub fn aggregator(a: impl Aggregator + 'static) -> Self {
        Implementation::Aggregator(Box::new(a))
    }

    pub fn router(r: impl Router + 'static) -> Self {
        Implementation::Router(Arc::new(r))
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Implementation::Source(_) => "source",
            Implementation::Transform(_) => "transform",
            Implementation::AsyncTransform(_) => "async transform",
            Implementation::Expander(_) => "expander",
            Implementation::AsyncExpander(_) => "async expander",
            Implementation::Aggregator(_) => "aggregator",
            Implementation::Router(_) => "router",
        }
    }
}

impl fmt::Debug for Implementation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Implementation").field(&self.kind()).finish()
    }
}
