use phase_engine::{
    pipeline, progress_channel, Aggregator, Arity, AsyncTransform, DataType, ExecutionEvent,
    Implementation, Phase, PhaseInfo, PhaseRuntime, StageLoader,
};
use serde_json::{json, Value};

struct Length;

#[async_trait::async_trait]
impl AsyncTransform for Length {
    async fn transform(&self, data: Value, _rt: &PhaseRuntime) -> anyhow::Result<Value> {
        let word = data.as_str().unwrap_or_default();
        Ok(json!(word.len()))
    }
}

#[derive(Default)]
struct Total(u64);

impl Aggregator for Total {
    fn on_start(&mut self, _rt: &mut PhaseRuntime) -> anyhow::Result<()> {
        self.0 = 0;
        Ok(())
    }

    fn accumulate(&mut self, data: Value, _rt: &mut PhaseRuntime) -> anyhow::Result<()> {
        self.0 += data.as_u64().unwrap_or(0);
        Ok(())
    }

    fn on_completion(&mut self, _rt: &mut PhaseRuntime) -> anyhow::Result<Value> {
        Ok(json!(self.0))
    }
}

#[tokio::main]
async fn main() {
    let text = DataType::named("string");
    let number = DataType::named("number");

    let lines = Phase::new(
        PhaseInfo::new("lines", Arity::Init).with_output(text.clone()),
        Implementation::source(|rt| {
            rt.put(json!("the quick brown fox"));
            rt.put(json!("jumps over the lazy dog"));
            Ok(())
        }),
    );
    let words = Phase::new(
        PhaseInfo::new("words", Arity::OneToMany)
            .with_input(text.clone())
            .with_output(text.clone()),
        Implementation::expander(|data, rt| {
            for word in data.as_str().unwrap_or_default().split_whitespace() {
                rt.put(json!(word));
            }
            Ok(())
        }),
    );
    let lengths = Phase::new(
        PhaseInfo::new("lengths", Arity::OneToOne)
            .asynchronous()
            .with_input(text)
            .with_output(number.clone()),
        Implementation::async_transform(Length),
    );
    let total = Phase::new(
        PhaseInfo::new("total", Arity::ManyToOne)
            .with_input(number.clone())
            .with_output(number),
        Implementation::aggregator(Total::default()),
    );

    let per_line = pipeline(vec![words, lengths, total]).expect("Failed to compose");

    let (tx, mut rx) = progress_channel();
    let loader = StageLoader::new().with_progress(tx);
    let output = loader
        .process_stages(&mut [lines, per_line])
        .await
        .expect("Run failed");

    println!("Letters per line:");
    for item in output.snapshot() {
        println!("  {}", item.data);
    }

    drop(loader);
    while let Some(event) = rx.recv().await {
        if let ExecutionEvent::PhaseCompleted {
            phase_name,
            command,
            duration,
            ..
        } = event
        {
            println!("  {:<10} -> {} in {:?}", phase_name, command, duration);
        }
    }
}
