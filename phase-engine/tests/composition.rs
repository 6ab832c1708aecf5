// Pipelines and routing phases run end to end through the stage loader

use phase_engine::composition::{ROUTE_IN_KEY, ROUTE_OUT_KEY};
use phase_engine::{
    pipeline, progress_channel, routing_phase, Aggregator, Arity, CompositionError, DataType,
    ExecutionEvent, Implementation, Phase, PhaseInfo, PhaseRuntime, Selector, StageLoader, Stream,
    TagLedger, TagValue,
};
use serde_json::{json, Value};

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

fn seeded(values: &[i64]) -> Stream {
    let stream = Stream::new();
    for value in values {
        stream.put(json!(value), TagLedger::new());
    }
    stream
}

struct Sum(i64);

impl Aggregator for Sum {
    fn on_start(&mut self, _rt: &mut PhaseRuntime) -> anyhow::Result<()> {
        self.0 = 0;
        Ok(())
    }

    fn accumulate(&mut self, data: Value, _rt: &mut PhaseRuntime) -> anyhow::Result<()> {
        self.0 += data.as_i64().unwrap_or(0);
        Ok(())
    }

    fn on_completion(&mut self, _rt: &mut PhaseRuntime) -> anyhow::Result<Value> {
        Ok(json!(self.0))
    }
}

#[tokio::test]
async fn test_double_then_increment() {
    let composed = pipeline(vec![
        arithmetic("double", |x| x * 2),
        arithmetic("increment", |x| x + 1),
    ])
    .unwrap();

    let output = StageLoader::new()
        .process_stages_with_input(seeded(&[5]), &mut [composed])
        .await
        .unwrap();

    assert_eq!(output.values(), vec![json!(11)]);
}

#[tokio::test]
async fn test_pipeline_output_can_be_aggregated() {
    // each item becomes 1..=n inside the pipeline; the outer sum folds the
    // pipeline's frame back into one value per input
    let range = Phase::new(
        PhaseInfo::new("range", Arity::OneToMany)
            .with_input(number())
            .with_output(number()),
        Implementation::expander(|data, rt| {
            for i in 1..=data.as_i64().unwrap_or(0) {
                rt.put(json!(i));
            }
            Ok(())
        }),
    );
    let inner_sum = Phase::new(
        PhaseInfo::new("inner_sum", Arity::ManyToOne)
            .with_input(number())
            .with_output(number()),
        Implementation::aggregator(Sum(0)),
    );
    let composed = pipeline(vec![range, inner_sum, arithmetic("double", |x| x * 2)]).unwrap();
    let outer_sum = Phase::new(
        PhaseInfo::new("outer_sum", Arity::ManyToOne),
        Implementation::aggregator(Sum(0)),
    );

    let (tx, mut rx) = progress_channel();
    let mut phases = vec![composed, outer_sum];
    let output = StageLoader::new()
        .with_progress(tx)
        .process_stages_with_input(seeded(&[3, 4]), &mut phases)
        .await
        .unwrap();

    // 2 * (1+2+3) and 2 * (1+2+3+4), one group each
    let mut values: Vec<i64> = output.values().iter().filter_map(Value::as_i64).collect();
    values.sort_unstable();
    assert_eq!(values, vec![12, 20]);

    let mut dispatched = 0;
    while let Ok(event) = rx.try_recv() {
        if let ExecutionEvent::TasksDispatched { task_count, .. } = event {
            dispatched += task_count;
        }
    }
    assert_eq!(dispatched, 2);
}

#[tokio::test]
async fn test_nested_pipelines() {
    let inner = pipeline(vec![arithmetic("double", |x| x * 2)]).unwrap();
    let outer = pipeline(vec![inner, arithmetic("increment", |x| x + 1)]).unwrap();

    let output = StageLoader::new()
        .process_stages_with_input(seeded(&[1, 2, 3]), &mut [outer])
        .await
        .unwrap();

    let mut values: Vec<i64> = output.values().iter().filter_map(Value::as_i64).collect();
    values.sort_unstable();
    assert_eq!(values, vec![3, 5, 7]);
}

#[test]
fn test_mismatch_fails_before_data_flows() {
    let to_text = Phase::new(
        PhaseInfo::new("to_text", Arity::OneToOne)
            .with_input(number())
            .with_output(DataType::named("string")),
        Implementation::transform(|data, _| Ok(json!(data.to_string()))),
    );

    let err = pipeline(vec![to_text, arithmetic("double", |x| x * 2)]).unwrap_err();
    assert!(matches!(err, CompositionError::TypeMismatch { .. }));
}

#[tokio::test]
async fn test_routing_republishes_every_input() {
    let routing = routing_phase(&[vec!["a", "b"]], &[vec!["c"]]);
    let stream = Stream::new();
    for (value, port) in [(1, "a"), (2, "b"), (3, "a")] {
        stream.put(json!(value), TagLedger::new().with(ROUTE_IN_KEY, port));
    }

    let output = StageLoader::new()
        .process_stages_with_input(stream, &mut [routing])
        .await
        .unwrap();

    let routed = output.get(&Selector::exact(ROUTE_OUT_KEY, "c"));
    let mut values: Vec<i64> = routed.iter().filter_map(|item| item.data.as_i64()).collect();
    values.sort_unstable();
    assert_eq!(values, vec![1, 2, 3]);
    assert!(routed
        .iter()
        .all(|item| item.tags.read(ROUTE_OUT_KEY) == Some(&TagValue::text("c"))));
    assert!(output.is_empty());
}

#[tokio::test]
async fn test_routing_feeds_a_rebound_phase() {
    let routing = routing_phase(&[vec!["left"], vec!["right"]], &[vec!["l"], vec!["r"]]);
    let mut double_left = arithmetic("double", |x| x * 2);
    double_left.set_input(ROUTE_OUT_KEY, Some(TagValue::text("l")));

    let stream = Stream::new();
    stream.put(json!(10), TagLedger::new().with(ROUTE_IN_KEY, "left"));
    stream.put(json!(7), TagLedger::new().with(ROUTE_IN_KEY, "right"));

    let output = StageLoader::new()
        .process_stages_with_input(stream, &mut [routing, double_left])
        .await
        .unwrap();

    let items = output.snapshot();
    assert_eq!(items.len(), 2);
    // "r" is not selected by the doubler and stays ahead of its output
    assert_eq!(items[0].data, json!(7));
    assert_eq!(items[1].data, json!(20));
}

#[tokio::test]
async fn test_aggregate_is_not_picked_up_by_item_routes() {
    let split = Phase::new(
        PhaseInfo::new("split", Arity::OneToMany)
            .with_input(number())
            .with_output(number()),
        Implementation::expander(|data, rt| {
            rt.tag(ROUTE_IN_KEY, "a");
            for _ in 0..data.as_i64().unwrap_or(0) {
                rt.put(json!(1));
            }
            Ok(())
        }),
    );
    let sum = Phase::new(
        PhaseInfo::new("sum", Arity::ManyToOne)
            .with_input(number())
            .with_output(number()),
        Implementation::aggregator(Sum(0)),
    );
    let routing = routing_phase(&[vec!["a"]], &[vec!["c"]]);

    let output = StageLoader::new()
        .process_stages_with_input(seeded(&[3]), &mut [split, sum, routing])
        .await
        .unwrap();

    let items = output.snapshot();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].data, json!(3));
    assert_eq!(items[0].tags.read(ROUTE_IN_KEY), None);
    assert_eq!(items[0].tags.read(ROUTE_OUT_KEY), None);
}
