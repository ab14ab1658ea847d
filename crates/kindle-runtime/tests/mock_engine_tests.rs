//! Behaviour of the scripted engine the server tests rely on.

use std::time::Duration;

use futures::StreamExt;
use kindle_engine::{EngineError, EngineFactory, GenerationRequest, ModelSpec, OutputDelta};
use kindle_runtime::{MockEngineFactory, MockReply};
use kindle_sampling::SamplingConfig;

fn spec() -> ModelSpec {
    ModelSpec::new("/models/test")
}

fn request(prompt: &str) -> GenerationRequest {
    GenerationRequest::new(prompt, SamplingConfig::conversation())
}

async fn collect(
    stream: kindle_engine::DeltaStream,
) -> Vec<Result<OutputDelta, EngineError>> {
    stream.collect().await
}

#[tokio::test]
async fn unscripted_prompt_is_echoed() {
    let factory = MockEngineFactory::new();
    let engine = factory.create(&spec()).await.unwrap();
    let out = collect(engine.generate(&request("hi there")).await.unwrap()).await;
    let deltas: Vec<OutputDelta> = out.into_iter().map(|d| d.unwrap()).collect();
    assert_eq!(
        deltas,
        vec![
            OutputDelta::fragment("hi"),
            OutputDelta::fragment(" there"),
            OutputDelta::finished(""),
        ]
    );
}

#[tokio::test]
async fn scripted_replies_are_consumed_in_order() {
    let factory = MockEngineFactory::new();
    factory
        .script("q", MockReply::RejectStart(EngineError::Transport("down".into())))
        .script("q", MockReply::fragments(["ok"]));
    let engine = factory.create(&spec()).await.unwrap();

    assert!(engine.generate(&request("q")).await.is_err());
    let out = collect(engine.generate(&request("q")).await.unwrap()).await;
    assert_eq!(out[0].as_ref().unwrap().text, "ok");
    assert_eq!(factory.generations_for("q").len(), 2);
}

#[tokio::test]
async fn fail_after_yields_error_last() {
    let factory = MockEngineFactory::new();
    factory.script(
        "q",
        MockReply::FailAfter {
            deltas: vec![OutputDelta::fragment("a"), OutputDelta::fragment("b")],
            error: EngineError::Transport("reset".into()),
        },
    );
    let engine = factory.create(&spec()).await.unwrap();
    let out = collect(engine.generate(&request("q")).await.unwrap()).await;
    assert_eq!(out.len(), 3);
    assert!(out[1].is_ok());
    assert_eq!(out[2], Err(EngineError::Transport("reset".into())));
}

#[tokio::test]
async fn create_failures_are_consumed_once() {
    let factory = MockEngineFactory::new();
    factory.fail_next_create(EngineError::ModelLoad("oom".into()));
    assert!(factory.create(&spec()).await.is_err());
    assert!(factory.create(&spec()).await.is_ok());
    assert_eq!(factory.engines_created(), 1);
    assert_eq!(factory.specs().len(), 2);
}

#[tokio::test]
async fn killed_engines_fail_but_new_ones_work() {
    let factory = MockEngineFactory::new();
    let old = factory.create(&spec()).await.unwrap();
    factory.kill_engines();
    let err = old.generate(&request("x")).await.err().unwrap();
    assert!(matches!(err, EngineError::Transport(_)));

    let fresh = factory.create(&spec()).await.unwrap();
    assert!(fresh.generate(&request("x")).await.is_ok());
}

#[tokio::test]
async fn shutdown_counts_once_and_rejects_work() {
    let factory = MockEngineFactory::new();
    let engine = factory.create(&spec()).await.unwrap();
    engine.shutdown().await.unwrap();
    engine.shutdown().await.unwrap();
    assert_eq!(factory.shutdowns(), 1);
    assert_eq!(
        engine.generate(&request("x")).await.err().unwrap(),
        EngineError::ShutDown
    );
}

#[tokio::test]
async fn abort_is_recorded() {
    let factory = MockEngineFactory::new();
    let engine = factory.create(&spec()).await.unwrap();
    let req = request("x");
    engine.abort(req.id);
    assert_eq!(factory.aborted(), vec![req.id]);
}

#[tokio::test]
async fn delta_delay_is_applied_lazily() {
    let factory = MockEngineFactory::new().with_delta_delay(Duration::from_millis(20));
    let engine = factory.create(&spec()).await.unwrap();
    let started = std::time::Instant::now();
    let mut stream = engine.generate(&request("one two")).await.unwrap();
    // Nothing is produced until polled.
    assert!(started.elapsed() < Duration::from_millis(20));
    stream.next().await.unwrap().unwrap();
    assert!(started.elapsed() >= Duration::from_millis(20));
}
