// Pipeline Composer
// Wraps an ordered phase list as a single async 1:N phase

use crate::composition::CompositionError;
use crate::execution::StageLoader;
use crate::phase::{Arity, AsyncExpander, Implementation, Phase, PhaseInfo, PhaseRuntime};
use crate::stream::Stream;
use crate::types::{DataType, PortSpec, StreamType, TypeEnv};

use serde_json::Value;
use tokio::sync::Mutex;
use tracing::debug;

/// Name given to every composed pipeline phase
pub const PIPELINE_PHASE: &str = "pipeline";

/// Compose `phases` into one phase, run with a default stage loader
pub fn pipeline(phases: Vec<Phase>) -> Result<Phase, CompositionError> {
    pipeline_with_loader(phases, StageLoader::new())
}

/// Compose `phases` into one async 1:N phase.
///
/// Each input item is run through the whole list on a stream of its own,
/// and everything that comes out is re-emitted as that item's frame.
/// Adjacent phases must have compatible types.
pub fn pipeline_with_loader(
    phases: Vec<Phase>,
    loader: StageLoader,
) -> Result<Phase, CompositionError> {
    let (input, output) = check_types(&phases)?;
    debug!(
        phases = phases.len(),
        input = %input,
        output = %output,
        "pipeline composed"
    );

    let info = PhaseInfo::new(PIPELINE_PHASE, Arity::OneToMany)
        .asynchronous()
        .with_input(input)
        .with_output(output);
    let sub_pipeline = SubPipeline {
        phases: Mutex::new(phases),
        loader,
    };
    Ok(Phase::new(info, Implementation::async_expander(sub_pipeline)))
}

/// Unify each phase's output with its successor's input, returning the
/// resolved input and output types of the whole list
fn check_types(phases: &[Phase]) -> Result<(DataType, DataType), CompositionError> {
    let (first, last) = match (phases.first(), phases.last()) {
        (Some(first), Some(last)) => (first, last),
        _ => return Err(CompositionError::EmptyPipeline),
    };

    let mut env = TypeEnv::new();
    for pair in phases.windows(2) {
        let (upstream, downstream) = (&pair[0], &pair[1]);
        if downstream.arity() == Arity::Init {
            continue;
        }
        let produced = upstream.output_type();
        let consumed = downstream.input_type();
        for (found, expected) in connected_ports(&produced, &consumed) {
            env.unify(&expected.data_type, &found.data_type)
                .map_err(|source| CompositionError::TypeMismatch {
                    upstream: upstream.name().to_string(),
                    downstream: downstream.name().to_string(),
                    source,
                })?;
        }
    }

    let input = first
        .input_layout()
        .single()
        .map_or_else(DataType::fresh, |ty| env.resolve(ty));
    let output = last
        .output_layout()
        .single()
        .map_or_else(DataType::fresh, |ty| env.resolve(ty));
    Ok((input, output))
}

/// Pairs of upstream output and downstream input ports whose selectors can
/// address the same items: equal keys, and equal values unless either side
/// leaves the value open
fn connected_ports<'a>(
    produced: &'a StreamType,
    consumed: &'a StreamType,
) -> impl Iterator<Item = (&'a PortSpec, &'a PortSpec)> + 'a {
    produced.ports.iter().flat_map(move |found| {
        consumed
            .ports
            .iter()
            .filter(move |expected| {
                expected.key == found.key
                    && match (&expected.value, &found.value) {
                        (Some(a), Some(b)) => a == b,
                        _ => true,
                    }
            })
            .map(move |expected| (found, expected))
    })
}

/// Runs the composed list for one item at a time; phases keep per-call
/// state, so concurrent items take turns
struct SubPipeline {
    phases: Mutex<Vec<Phase>>,
    loader: StageLoader,
}

#[async_trait::async_trait]
impl AsyncExpander for SubPipeline {
    async fn expand(&self, data: Value, runtime: &mut PhaseRuntime) -> anyhow::Result<()> {
        let seed = Stream::new();
        seed.put(data, runtime.tags().clone());

        let output = {
            let mut phases = self.phases.lock().await;
            self.loader
                .process_stages_with_input(seed, &mut phases)
                .await?
        };

        for item in output.drain() {
            runtime.put_with_tags(item.data, item.tags);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::composition::{routing_phase, ROUTE_IN_KEY, ROUTE_OUT_KEY};
    use crate::phase::Command;
    use crate::stream::{TagLedger, TagValue};
    use serde_json::json;

    fn number() -> DataType {
        DataType::named("number")
    }

    fn arithmetic(name: &str, f: fn(i64) -> i64) -> Phase {
        Phase::new(
            PhaseInfo::new(name, Arity::OneToOne)
                .with_input(number())
                .with_output(number()),
            Implementation::transform(move |data, _| Ok(json!(f(data.as_i64().unwrap_or(0))))),
        )
    }

    #[test]
    fn test_empty_pipeline_rejected() {
        assert_eq!(
            pipeline(Vec::new()).unwrap_err(),
            CompositionError::EmptyPipeline
        );
    }

    #[test]
    fn test_mismatched_types_rejected() {
        let to_text = Phase::new(
            PhaseInfo::new("to_text", Arity::OneToOne)
                .with_input(number())
                .with_output(DataType::named("string")),
            Implementation::transform(|data, _| Ok(json!(data.to_string()))),
        );

        let err = pipeline(vec![to_text, arithmetic("double", |x| x * 2)]).unwrap_err();

        match err {
            CompositionError::TypeMismatch {
                upstream,
                downstream,
                source,
            } => {
                assert_eq!(upstream, "to_text");
                assert_eq!(downstream, "double");
                assert_eq!(source.expected, number());
                assert_eq!(source.found, DataType::named("string"));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    fn typed(name: &str, input: DataType, output: DataType) -> Phase {
        Phase::new(
            PhaseInfo::new(name, Arity::OneToOne)
                .with_input(input)
                .with_output(output),
            Implementation::transform(|data, _| Ok(data)),
        )
    }

    #[test]
    fn test_routing_phase_carries_types_between_neighbours() {
        let mut produce = typed("produce", number(), number());
        produce.set_output(ROUTE_IN_KEY, "a");
        let mut consume = typed("consume", DataType::named("string"), DataType::named("string"));
        consume.set_input(ROUTE_OUT_KEY, Some(TagValue::text("c")));

        let err = pipeline(vec![produce, routing_phase(&[vec!["a"]], &[vec!["c"]]), consume])
            .unwrap_err();

        match err {
            CompositionError::TypeMismatch {
                upstream,
                downstream,
                source,
            } => {
                assert_eq!(upstream, "routing");
                assert_eq!(downstream, "consume");
                assert_eq!(source.expected, DataType::named("string"));
                assert_eq!(source.found, number());
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_routing_phase_accepts_matching_neighbours() {
        let mut produce = typed("produce", number(), number());
        produce.set_output(ROUTE_IN_KEY, "a");
        let mut consume = typed("consume", number(), number());
        consume.set_input(ROUTE_OUT_KEY, Some(TagValue::text("c")));
        // "d" is not read by the consumer, so its type stays open
        let routing = routing_phase(&[vec!["a"], vec!["b"]], &[vec!["c"], vec!["d"]]);

        assert!(pipeline(vec![produce, routing, consume]).is_ok());
    }

    #[test]
    fn test_type_variables_resolve_through_the_list() {
        let var = DataType::fresh();
        let identity = Phase::new(
            PhaseInfo::new("identity", Arity::OneToOne)
                .with_input(var.clone())
                .with_output(var),
            Implementation::transform(|data, _| Ok(data)),
        );

        let composed = pipeline(vec![arithmetic("double", |x| x * 2), identity]).unwrap();

        assert_eq!(composed.name(), PIPELINE_PHASE);
        assert_eq!(composed.arity(), Arity::OneToMany);
        assert!(composed.is_async());
        assert_eq!(composed.input_layout().single(), Some(&number()));
        assert_eq!(composed.output_layout().single(), Some(&number()));
    }

    #[tokio::test]
    async fn test_pipeline_runs_each_item_through_the_list() {
        let mut composed = pipeline(vec![
            arithmetic("double", |x| x * 2),
            arithmetic("increment", |x| x + 1),
        ])
        .unwrap();

        let input = Stream::new();
        input.put(json!(5), TagLedger::new());

        let Command::Par { stream, tasks } = composed.execute(input).unwrap() else {
            panic!("expected par");
        };
        for task in tasks {
            task.run().await.unwrap();
        }

        let items = stream.snapshot();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].data, json!(11));
        let frame = items[0].tags.innermost_frame().unwrap();
        assert!(frame.start && frame.end);
    }

    #[tokio::test]
    async fn test_sub_stage_failure_fails_the_task() {
        let failing = Phase::new(
            PhaseInfo::new("failing", Arity::OneToOne)
                .with_input(number())
                .with_output(number()),
            Implementation::transform(|_, _| anyhow::bail!("nope")),
        );
        let mut composed = pipeline(vec![failing]).unwrap();

        let input = Stream::new();
        input.put(json!(1), TagLedger::new());
        let Command::Par { tasks, .. } = composed.execute(input).unwrap() else {
            panic!("expected par");
        };

        let mut failures = 0;
        for task in tasks {
            if let Err(e) = task.run().await {
                assert_eq!(e.phase(), PIPELINE_PHASE);
                assert!(e.to_string().contains("nope"));
                failures += 1;
            }
        }
        assert_eq!(failures, 1);
    }
}
