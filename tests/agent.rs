//! Orchestrator tests: full runs against fake fetch and inference backends.
//!
//! Every test uses its own scratch directory so "no leaked files" can be
//! checked by counting directory entries after the run.

mod common;

use common::{entries, FakeBackend, FakeFetcher, Served};
use edgequake_vqa::{
    AgentConfig, AgentEvent, ChannelEventSink, ErrorKind, EventKind, ImageQaAgent,
    InvocationContext, RunReport,
};
use serde_json::json;
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;
use tokio::sync::mpsc::UnboundedReceiver;

// ── Test helpers ─────────────────────────────────────────────────────────────

fn config(scratch: &Path) -> AgentConfig {
    AgentConfig::builder().scratch_dir(scratch).build().unwrap()
}

fn agent(config: AgentConfig, fetcher: &Arc<FakeFetcher>, backend: &Arc<FakeBackend>) -> ImageQaAgent {
    ImageQaAgent::new(config, fetcher.clone(), backend.clone())
}

fn drain(rx: &mut UnboundedReceiver<AgentEvent>) -> Vec<AgentEvent> {
    let mut events = Vec::new();
    while let Ok(ev) = rx.try_recv() {
        events.push(ev);
    }
    events
}

fn kinds(events: &[AgentEvent]) -> Vec<EventKind> {
    events.iter().map(|e| e.kind).collect()
}

async fn run(agent: &ImageQaAgent, ctx: &InvocationContext) -> (RunReport, Vec<AgentEvent>) {
    let (sink, mut rx) = ChannelEventSink::new();
    let report = agent.run(ctx, &sink).await;
    (report, drain(&mut rx))
}

// ── Success paths ────────────────────────────────────────────────────────────

#[tokio::test]
async fn two_images_one_call_one_completed_event() {
    let scratch = TempDir::new().unwrap();
    let fetcher = Arc::new(
        FakeFetcher::new()
            .route("http://h/1.png", Served::Png(64, 48))
            .route("http://h/2.png", Served::Png(2048, 1024)),
    );
    let backend = Arc::new(FakeBackend::answering("The car is red."));
    let agent = agent(config(scratch.path()), &fetcher, &backend);
    let ctx = InvocationContext::new("q-1", "http://h/1.png,http://h/2.png", "What color is the car?");

    let (report, events) = run(&agent, &ctx).await;

    assert!(report.is_success(), "error: {:?}", report.error);
    assert_eq!(report.answer.as_deref(), Some("The car is red."));
    assert_eq!(report.images, 2);
    // two downloads + one derivative for the oversized image
    assert_eq!(report.artifacts_created, 3);
    assert!(report.cleanup_warnings.is_empty());

    assert_eq!(fetcher.calls(), vec!["http://h/1.png", "http://h/2.png"]);

    let calls = backend.calls();
    assert_eq!(calls.len(), 1);
    assert!(calls[0].prompt.contains("What color is the car?"));
    assert_eq!(calls[0].sizes, vec![(64, 48), (1024, 512)]);
    assert_eq!(calls[0].mime_types, vec!["image/png", "image/png"]);

    assert_eq!(kinds(&events), vec![EventKind::Started, EventKind::Completed]);
    assert_eq!(events[1].message(), "The car is red.");
    assert!(events.iter().all(|e| e.query_id == "q-1"));

    assert_eq!(entries(scratch.path()), 0);
}

#[tokio::test]
async fn whitespace_around_locators_is_ignored() {
    let scratch = TempDir::new().unwrap();
    let fetcher = Arc::new(
        FakeFetcher::new()
            .route("http://h/a.png", Served::Png(8, 8))
            .route("http://h/b.png", Served::Png(9, 9)),
    );
    let backend = Arc::new(FakeBackend::answering("ok"));
    let agent = agent(config(scratch.path()), &fetcher, &backend);
    let ctx = InvocationContext::new("q", "  http://h/a.png ,\thttp://h/b.png  ", "?");

    let (report, _) = run(&agent, &ctx).await;

    assert!(report.is_success());
    assert_eq!(fetcher.calls(), vec!["http://h/a.png", "http://h/b.png"]);
}

#[tokio::test]
async fn small_images_create_no_derivatives() {
    let scratch = TempDir::new().unwrap();
    let fetcher = Arc::new(
        FakeFetcher::new()
            .route("http://h/a.png", Served::Png(1024, 1024))
            .route("http://h/b.png", Served::Png(10, 700)),
    );
    let backend = Arc::new(FakeBackend::answering("ok"));
    let agent = agent(config(scratch.path()), &fetcher, &backend);
    let ctx = InvocationContext::new("q", "http://h/a.png,http://h/b.png", "?");

    let (report, _) = run(&agent, &ctx).await;

    assert!(report.is_success());
    assert_eq!(report.artifacts_created, 2);
    assert_eq!(backend.calls()[0].sizes, vec![(1024, 1024), (10, 700)]);
    assert_eq!(entries(scratch.path()), 0);
}

#[tokio::test]
async fn custom_max_dimension_and_template_apply() {
    let scratch = TempDir::new().unwrap();
    let fetcher = Arc::new(FakeFetcher::new().route("http://h/a.png", Served::Png(300, 600)));
    let backend = Arc::new(FakeBackend::answering("ok"));
    let config = AgentConfig::builder()
        .scratch_dir(scratch.path())
        .max_dimension(100)
        .system_prompt("Q: {question}\nUse the attached images.")
        .build()
        .unwrap();
    let agent = agent(config, &fetcher, &backend);
    let ctx = InvocationContext::new("q", "http://h/a.png", "Is it tall?");

    let (report, _) = run(&agent, &ctx).await;

    assert!(report.is_success());
    let call = &backend.calls()[0];
    assert_eq!(call.prompt, "Q: Is it tall?\nUse the attached images.");
    assert_eq!(call.sizes, vec![(50, 100)]);
}

#[tokio::test]
async fn passthrough_context_is_echoed_in_every_event() {
    let scratch = TempDir::new().unwrap();
    let fetcher = Arc::new(FakeFetcher::new().route("http://h/a.png", Served::Png(4, 4)));
    let backend = Arc::new(FakeBackend::answering("yes"));
    let agent = agent(config(scratch.path()), &fetcher, &backend);
    let ctx: InvocationContext = serde_json::from_value(json!({
        "queryId": "corr-77",
        "agentId": "vision-agent",
        "webhookGroups": [{"name": "ops", "url": "https://hooks.example/ops"}],
        "tenant": "acme",
        "params": { "filename": "http://h/a.png", "specificQuestion": "Any people?" }
    }))
    .unwrap();

    let (_, events) = run(&agent, &ctx).await;

    assert_eq!(events.len(), 2);
    for ev in &events {
        let v = serde_json::to_value(ev).unwrap();
        assert_eq!(v["queryId"], "corr-77");
        assert_eq!(v["data"]["agentId"], "vision-agent");
        assert_eq!(v["data"]["webhookGroups"][0]["name"], "ops");
        assert_eq!(v["data"]["tenant"], "acme");
        assert_eq!(v["data"]["params"]["specificQuestion"], "Any people?");
    }
    assert_eq!(events[1].message(), "yes");
}

// ── Failure paths ────────────────────────────────────────────────────────────

#[tokio::test]
async fn retrieval_failure_mid_loop_aborts_and_cleans_up() {
    let scratch = TempDir::new().unwrap();
    let fetcher = Arc::new(
        FakeFetcher::new()
            .route("http://h/a.png", Served::Png(2000, 1000))
            .route("http://h/c.png", Served::Png(10, 10)),
    );
    let backend = Arc::new(FakeBackend::answering("unused"));
    let agent = agent(config(scratch.path()), &fetcher, &backend);
    let ctx = InvocationContext::new("q-2", "http://h/a.png,http://h/missing.png,http://h/c.png", "?");

    let (report, events) = run(&agent, &ctx).await;

    assert!(!report.is_success());
    assert_eq!(report.error.as_ref().map(|e| e.kind()), Some(ErrorKind::Retrieval));
    // The third locator is never attempted.
    assert_eq!(fetcher.calls(), vec!["http://h/a.png", "http://h/missing.png"]);
    assert!(backend.calls().is_empty());

    assert_eq!(kinds(&events), vec![EventKind::Started, EventKind::Failed]);
    assert!(events[1].message().contains("http://h/missing.png"));

    // First locator's download and derivative are both gone.
    assert_eq!(report.artifacts_created, 2);
    assert_eq!(entries(scratch.path()), 0);
}

#[tokio::test]
async fn undecodable_image_aborts_and_cleans_up() {
    let scratch = TempDir::new().unwrap();
    let fetcher = Arc::new(
        FakeFetcher::new()
            .route("http://h/a.png", Served::Png(32, 32))
            .route("http://h/b.png", Served::Garbage),
    );
    let backend = Arc::new(FakeBackend::answering("unused"));
    let agent = agent(config(scratch.path()), &fetcher, &backend);
    let ctx = InvocationContext::new("q", "http://h/a.png,http://h/b.png", "?");

    let (report, events) = run(&agent, &ctx).await;

    assert_eq!(report.error.as_ref().map(|e| e.kind()), Some(ErrorKind::Decode));
    assert!(backend.calls().is_empty());
    assert!(!kinds(&events).contains(&EventKind::Completed));
    assert_eq!(report.artifacts_created, 2);
    assert_eq!(entries(scratch.path()), 0);
}

#[tokio::test]
async fn inference_failure_aborts_and_cleans_up() {
    let scratch = TempDir::new().unwrap();
    let fetcher = Arc::new(FakeFetcher::new().route("http://h/a.png", Served::Png(3000, 100)));
    let backend = Arc::new(FakeBackend::failing("model not loaded"));
    let agent = agent(config(scratch.path()), &fetcher, &backend);
    let ctx = InvocationContext::new("q", "http://h/a.png", "?");

    let (report, events) = run(&agent, &ctx).await;

    assert_eq!(report.error.as_ref().map(|e| e.kind()), Some(ErrorKind::Inference));
    assert_eq!(backend.calls().len(), 1);
    assert_eq!(kinds(&events), vec![EventKind::Started, EventKind::Failed]);
    assert!(events[1].message().contains("model not loaded"));
    assert_eq!(entries(scratch.path()), 0);
}

#[tokio::test]
async fn empty_answer_is_a_failure() {
    let scratch = TempDir::new().unwrap();
    let fetcher = Arc::new(FakeFetcher::new().route("http://h/a.png", Served::Png(4, 4)));
    let backend = Arc::new(FakeBackend::answering("   "));
    let agent = agent(config(scratch.path()), &fetcher, &backend);
    let ctx = InvocationContext::new("q", "http://h/a.png", "?");

    let (report, events) = run(&agent, &ctx).await;

    assert_eq!(report.error.as_ref().map(|e| e.kind()), Some(ErrorKind::Inference));
    assert!(!kinds(&events).contains(&EventKind::Completed));
}

#[tokio::test]
async fn failure_event_can_be_disabled() {
    let scratch = TempDir::new().unwrap();
    let fetcher = Arc::new(FakeFetcher::new());
    let backend = Arc::new(FakeBackend::answering("unused"));
    let config = AgentConfig::builder()
        .scratch_dir(scratch.path())
        .emit_failure_event(false)
        .build()
        .unwrap();
    let agent = agent(config, &fetcher, &backend);
    let ctx = InvocationContext::new("q", "http://h/missing.png", "?");

    let (report, events) = run(&agent, &ctx).await;

    assert!(report.error.is_some());
    assert_eq!(kinds(&events), vec![EventKind::Started]);
}

#[tokio::test]
async fn no_locators_is_invalid_input_without_io() {
    let scratch = TempDir::new().unwrap();
    let fetcher = Arc::new(FakeFetcher::new());
    let backend = Arc::new(FakeBackend::answering("unused"));
    let agent = agent(config(scratch.path()), &fetcher, &backend);
    let ctx = InvocationContext::new("q", " , ", "?");

    let (report, events) = run(&agent, &ctx).await;

    assert_eq!(report.error.as_ref().map(|e| e.kind()), Some(ErrorKind::InvalidInput));
    assert!(fetcher.calls().is_empty());
    assert_eq!(report.artifacts_created, 0);
    assert_eq!(kinds(&events), vec![EventKind::Started, EventKind::Failed]);
}

// ── Concurrency ──────────────────────────────────────────────────────────────

#[tokio::test]
async fn concurrent_acquisition_preserves_input_order() {
    let scratch = TempDir::new().unwrap();
    // The first locator finishes last.
    let fetcher = Arc::new(
        FakeFetcher::new()
            .route_delayed("http://h/a.png", Served::Png(10, 10), 150)
            .route_delayed("http://h/b.png", Served::Png(20, 20), 50)
            .route_delayed("http://h/c.png", Served::Png(1500, 30), 0),
    );
    let backend = Arc::new(FakeBackend::answering("ordered"));
    let config = AgentConfig::builder()
        .scratch_dir(scratch.path())
        .concurrency(3)
        .build()
        .unwrap();
    let agent = agent(config, &fetcher, &backend);
    let ctx = InvocationContext::new("q", "http://h/a.png,http://h/b.png,http://h/c.png", "?");

    let (report, _) = run(&agent, &ctx).await;

    assert!(report.is_success(), "error: {:?}", report.error);
    assert_eq!(backend.calls()[0].sizes, vec![(10, 10), (20, 20), (1024, 20)]);
    assert_eq!(report.artifacts_created, 4);
    assert_eq!(entries(scratch.path()), 0);
}

#[tokio::test]
async fn concurrent_failure_still_removes_every_artifact() {
    let scratch = TempDir::new().unwrap();
    let fetcher = Arc::new(
        FakeFetcher::new()
            .route_delayed("http://h/a.png", Served::Png(4000, 4000), 30)
            .route_delayed("http://h/c.png", Served::Png(2000, 10), 60),
    );
    let backend = Arc::new(FakeBackend::answering("unused"));
    let config = AgentConfig::builder()
        .scratch_dir(scratch.path())
        .concurrency(3)
        .build()
        .unwrap();
    let agent = agent(config, &fetcher, &backend);
    let ctx = InvocationContext::new("q", "http://h/a.png,http://h/missing.png,http://h/c.png", "?");

    let (report, events) = run(&agent, &ctx).await;

    assert_eq!(report.error.as_ref().map(|e| e.kind()), Some(ErrorKind::Retrieval));
    assert!(backend.calls().is_empty());
    assert!(!kinds(&events).contains(&EventKind::Completed));
    assert_eq!(report.artifacts_created, 4);
    assert_eq!(entries(scratch.path()), 0);
}

#[tokio::test]
async fn parallel_runs_share_a_scratch_dir_without_collisions() {
    let scratch = TempDir::new().unwrap();
    let fetcher = Arc::new(
        FakeFetcher::new()
            .route_delayed("http://h/a.png", Served::Png(1200, 600), 20)
            .route("http://h/b.png", Served::Png(16, 16)),
    );
    let backend = Arc::new(FakeBackend::answering("fine"));
    let agent = agent(config(scratch.path()), &fetcher, &backend);
    let first = InvocationContext::new("run-1", "http://h/a.png,http://h/b.png", "?");
    let second = InvocationContext::new("run-2", "http://h/a.png,http://h/b.png", "?");

    let ((r1, e1), (r2, e2)) = tokio::join!(run(&agent, &first), run(&agent, &second));

    assert!(r1.is_success() && r2.is_success());
    assert!(e1.iter().all(|e| e.query_id == "run-1"));
    assert!(e2.iter().all(|e| e.query_id == "run-2"));
    assert_eq!(backend.calls().len(), 2);
    assert_eq!(entries(scratch.path()), 0);
}

#[tokio::test]
async fn dropped_run_leaves_no_files() {
    let scratch = TempDir::new().unwrap();
    let fetcher = Arc::new(
        FakeFetcher::new()
            .route("http://h/a.png", Served::Png(8, 8))
            .route_delayed("http://h/b.png", Served::Png(8, 8), 10_000),
    );
    let backend = Arc::new(FakeBackend::answering("unused"));
    let agent = agent(config(scratch.path()), &fetcher, &backend);
    let ctx = InvocationContext::new("q", "http://h/a.png,http://h/b.png", "?");

    let (sink, _rx) = ChannelEventSink::new();
    let timed_out =
        tokio::time::timeout(std::time::Duration::from_millis(200), agent.run(&ctx, &sink)).await;

    assert!(timed_out.is_err());
    assert_eq!(fetcher.calls().len(), 2);
    assert_eq!(entries(scratch.path()), 0);
}
