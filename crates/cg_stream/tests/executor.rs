use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::json;
use tokio_util::sync::CancellationToken;

use cg_core::{ChatGateError, ChatMode, CreditCostTable, Identity, WorkflowEvent};
use cg_ledger::{CreditLedger, FallbackStore, MemoryQuotaStore, QuotaConfig};
use cg_stream::{
    BufferSink, CompletionRequest, EventSender, ExecutorError, SessionState, StageInput,
    StreamExecutor, TimingSummary, UsageReporter, UsageSummary, WorkflowConfig, WorkflowEngine,
    WorkflowHandle,
};

/// 脚本中的一步
#[derive(Clone)]
enum Step {
    Emit(WorkflowEvent),
    /// 等待取消信号后以错误结束
    AwaitCancel,
    Fail(&'static str),
    Panic,
    /// 不理会取消信号的长时间步骤
    Stall(Duration),
}

struct ScriptedEngine {
    script: Vec<Step>,
    starts: Arc<AtomicUsize>,
}

impl ScriptedEngine {
    fn new(script: Vec<Step>) -> Self {
        Self {
            script,
            starts: Arc::new(AtomicUsize::new(0)),
        }
    }
}

impl WorkflowEngine for ScriptedEngine {
    fn run(&self, config: WorkflowConfig) -> Box<dyn WorkflowHandle> {
        Box::new(ScriptedHandle {
            script: self.script.clone(),
            config,
            subscriber: Mutex::new(None),
            starts: self.starts.clone(),
        })
    }
}

struct ScriptedHandle {
    script: Vec<Step>,
    config: WorkflowConfig,
    subscriber: Mutex<Option<EventSender>>,
    starts: Arc<AtomicUsize>,
}

#[async_trait]
impl WorkflowHandle for ScriptedHandle {
    fn on_all(&self, subscriber: EventSender) {
        *self.subscriber.lock() = Some(subscriber);
    }

    async fn start(&self, stage: &str, input: StageInput) -> cg_core::Result<()> {
        assert_eq!(stage, "router");
        assert_eq!(input.question, self.config.question);
        self.starts.fetch_add(1, Ordering::SeqCst);

        let tx = self.subscriber.lock().clone();
        for step in &self.script {
            match step {
                Step::Emit(event) => {
                    if let Some(tx) = &tx {
                        let _ = tx.send(event.clone());
                    }
                    tokio::task::yield_now().await;
                }
                Step::AwaitCancel => {
                    self.config.signal.cancelled().await;
                    return Err(ChatGateError::Workflow("This operation was aborted".to_string()));
                }
                Step::Fail(message) => return Err(ChatGateError::Workflow(message.to_string())),
                Step::Panic => panic!("scripted panic"),
                Step::Stall(duration) => tokio::time::sleep(*duration).await,
            }
        }
        Ok(())
    }

    fn timing_summary(&self) -> TimingSummary {
        TimingSummary {
            total_ms: 12,
            stages: Vec::new(),
        }
    }
}

/// 记录上报次数
#[derive(Default)]
struct RecordingReporter {
    captured: AtomicUsize,
}

#[async_trait]
impl UsageReporter for RecordingReporter {
    async fn capture(&self, _event: &str, _usage: &UsageSummary) -> cg_core::Result<()> {
        self.captured.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn flush(&self) -> cg_core::Result<()> {
        Ok(())
    }
}

struct FailingReporter;

#[async_trait]
impl UsageReporter for FailingReporter {
    async fn capture(&self, _event: &str, _usage: &UsageSummary) -> cg_core::Result<()> {
        Err(ChatGateError::Protocol("analytics unreachable".to_string()))
    }

    async fn flush(&self) -> cg_core::Result<()> {
        Err(ChatGateError::Protocol("analytics unreachable".to_string()))
    }
}

fn ledger(daily_user: u32, daily_ip: u32) -> Arc<CreditLedger> {
    Arc::new(CreditLedger::new(
        Arc::new(MemoryQuotaStore::new()),
        Arc::new(FallbackStore::new()),
        QuotaConfig {
            daily_user,
            daily_ip,
        },
    ))
}

fn executor(script: Vec<Step>) -> StreamExecutor {
    StreamExecutor::new(
        Arc::new(ScriptedEngine::new(script)),
        ledger(100, 10),
        CreditCostTable::new(),
    )
}

fn request(mode: ChatMode) -> CompletionRequest {
    serde_json::from_value(json!({
        "prompt": "why is the sky blue",
        "mode": mode,
        "threadId": "thread-1",
        "threadItemId": "item-1",
        "parentThreadItemId": "item-0",
    }))
    .unwrap()
}

fn user() -> Identity {
    Identity::User("42".to_string())
}

fn stage(name: &str) -> Step {
    Step::Emit(WorkflowEvent::stage(name, json!({ "name": name })))
}

#[tokio::test]
async fn router_then_writer_then_done_complete() {
    let executor = executor(vec![stage("router"), stage("writer")]);
    let sink = Arc::new(BufferSink::new());

    let admission = executor.admit(Some(&user()), request(ChatMode::Gpt4oMini)).await.unwrap();
    let outcome = executor
        .run(admission, CancellationToken::new(), sink.clone())
        .await
        .unwrap();

    assert_eq!(outcome.state, SessionState::Completed);
    assert_eq!(outcome.frames, 3);

    let frames = sink.frames();
    let events: Vec<&str> = frames.iter().map(|f| f.event.as_str()).collect();
    assert_eq!(events, ["router", "writer", "done"]);
    assert_eq!(frames[2].status(), Some("complete"));

    let router = &frames[0].data;
    assert_eq!(router["type"], "router");
    assert_eq!(router["threadId"], "thread-1");
    assert_eq!(router["parentThreadItemId"], "item-0");
    assert_eq!(router["query"], "why is the sky blue");
    assert_eq!(router["mode"], "gpt-4o-mini");
    assert_eq!(router["webSearch"], false);
    assert_eq!(router["router"], json!({ "name": "router" }));
}

#[tokio::test(start_paused = true)]
async fn cancellation_mid_workflow_ends_aborted() {
    let executor = executor(vec![stage("router"), Step::AwaitCancel, stage("writer")]);
    let sink = Arc::new(BufferSink::new());
    let cancel = CancellationToken::new();

    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.cancel();
    });

    let admission = executor.admit(Some(&user()), request(ChatMode::Deep)).await.unwrap();
    let outcome = executor
        .run(admission, cancel, sink.clone())
        .await
        .unwrap();

    assert_eq!(outcome.state, SessionState::Aborted);
    let frames = sink.frames();
    let last = frames.last().unwrap();
    assert!(last.is_terminal());
    assert_eq!(last.status(), Some("aborted"));
    assert!(!frames.iter().any(|f| f.status() == Some("error")));
    assert!(!frames.iter().any(|f| f.event == "writer"));
}

#[tokio::test]
async fn failure_writes_error_frame_then_returns_error() {
    let executor = executor(vec![stage("router"), Step::Fail("model exploded")]);
    let sink = Arc::new(BufferSink::new());

    let admission = executor.admit(Some(&user()), request(ChatMode::Pro)).await.unwrap();
    let err = executor
        .run(admission, CancellationToken::new(), sink.clone())
        .await
        .unwrap_err();
    assert!(matches!(err, ExecutorError::Workflow(_)));

    let frames = sink.frames();
    assert_eq!(frames.len(), 2);
    let done = &frames[1];
    assert!(done.is_terminal());
    assert_eq!(done.status(), Some("error"));
    assert!(done.data["error"].as_str().unwrap().contains("model exploded"));
    assert_eq!(done.data["threadItemId"], "item-1");
}

#[tokio::test]
async fn panicking_workflow_is_a_failure() {
    let executor = executor(vec![stage("router"), Step::Panic]);
    let sink = Arc::new(BufferSink::new());

    let admission = executor.admit(Some(&user()), request(ChatMode::Pro)).await.unwrap();
    let result = executor
        .run(admission, CancellationToken::new(), sink.clone())
        .await;

    assert!(matches!(result, Err(ExecutorError::Workflow(_))));
    let frames = sink.frames();
    assert_eq!(frames.iter().filter(|f| f.is_terminal()).count(), 1);
    assert_eq!(frames.last().unwrap().status(), Some("error"));
}

#[tokio::test]
async fn events_keep_emission_order() {
    let script: Vec<Step> = (0..50).map(|i| stage(&format!("step{i}"))).collect();
    let executor = executor(script);
    let sink = Arc::new(BufferSink::new());

    let admission = executor.admit(Some(&user()), request(ChatMode::Gpt41Nano)).await.unwrap();
    executor
        .run(admission, CancellationToken::new(), sink.clone())
        .await
        .unwrap();

    let frames = sink.frames();
    assert_eq!(frames.len(), 51);
    for (i, frame) in frames.iter().take(50).enumerate() {
        assert_eq!(frame.event, format!("step{i}"));
    }
    assert!(frames[50].is_terminal());
}

#[tokio::test]
async fn reserved_done_event_from_workflow_is_not_forwarded() {
    let executor = executor(vec![
        stage("router"),
        Step::Emit(WorkflowEvent::stage("done", json!({ "status": "complete" }))),
        stage("writer"),
    ]);
    let sink = Arc::new(BufferSink::new());

    let admission = executor.admit(Some(&user()), request(ChatMode::Gpt4oMini)).await.unwrap();
    executor
        .run(admission, CancellationToken::new(), sink.clone())
        .await
        .unwrap();

    let frames = sink.frames();
    assert_eq!(frames.iter().filter(|f| f.is_terminal()).count(), 1);
    assert_eq!(frames.last().unwrap().event, "done");
    assert_eq!(frames.len(), 3);
}

#[tokio::test]
async fn admission_rejects_unidentified_and_exhausted() {
    let engine = Arc::new(ScriptedEngine::new(vec![stage("router")]));
    let starts = engine.starts.clone();
    let executor = StreamExecutor::new(engine, ledger(10, 12), CreditCostTable::new());

    assert!(matches!(
        executor.admit(None, request(ChatMode::Deep)).await,
        Err(ExecutorError::Unidentified)
    ));

    let ip = Identity::Ip("203.0.113.9".to_string());
    executor.admit(Some(&ip), request(ChatMode::Deep)).await.unwrap();
    match executor.admit(Some(&ip), request(ChatMode::Deep)).await {
        Err(ExecutorError::QuotaExceeded { remaining, required }) => {
            assert_eq!(remaining, 2);
            assert_eq!(required, 10);
        }
        other => panic!("unexpected admission: {other:?}"),
    }

    // 被拒绝的请求不会启动工作流
    assert_eq!(starts.load(Ordering::SeqCst), 0);
    assert_eq!(executor.ledger().remaining(&ip).await, 2);
}

#[tokio::test]
async fn admission_uses_cost_overrides() {
    let executor = StreamExecutor::new(
        Arc::new(ScriptedEngine::new(Vec::new())),
        ledger(5, 0),
        CreditCostTable::new().with_cost(ChatMode::Gpt4oMini, 4),
    );

    let admission = executor.admit(Some(&user()), request(ChatMode::Gpt4oMini)).await.unwrap();
    assert_eq!(admission.cost(), 4);
    assert_eq!(executor.ledger().remaining(&user()).await, 1);
}

#[tokio::test]
async fn usage_is_reported_for_users_only() {
    let reporter = Arc::new(RecordingReporter::default());
    let executor = executor(vec![stage("router")]).with_reporter(reporter.clone());

    let admission = executor.admit(Some(&user()), request(ChatMode::Gpt4oMini)).await.unwrap();
    executor
        .run(admission, CancellationToken::new(), Arc::new(BufferSink::new()))
        .await
        .unwrap();

    let ip = Identity::Ip("198.51.100.1".to_string());
    let admission = executor.admit(Some(&ip), request(ChatMode::Gpt4oMini)).await.unwrap();
    executor
        .run(admission, CancellationToken::new(), Arc::new(BufferSink::new()))
        .await
        .unwrap();

    for _ in 0..100 {
        if reporter.captured.load(Ordering::SeqCst) > 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(reporter.captured.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn failing_reporter_does_not_affect_outcome() {
    let executor = executor(vec![stage("router"), stage("writer")]).with_reporter(Arc::new(FailingReporter));
    let sink = Arc::new(BufferSink::new());

    let admission = executor.admit(Some(&user()), request(ChatMode::Gpt4oMini)).await.unwrap();
    let outcome = executor
        .run(admission, CancellationToken::new(), sink.clone())
        .await
        .unwrap();

    assert_eq!(outcome.state, SessionState::Completed);
    assert_eq!(sink.frames().last().unwrap().status(), Some("complete"));
}

#[tokio::test]
async fn admission_carries_the_charged_mode() {
    let executor = executor(vec![stage("router")]);
    let sink = Arc::new(BufferSink::new());

    let admission = executor.admit(Some(&user()), request(ChatMode::Gpt4oMini)).await.unwrap();
    assert_eq!(admission.mode(), ChatMode::Gpt4oMini);
    assert_eq!(admission.cost(), 1);
    assert_eq!(executor.ledger().remaining(&user()).await, 99);

    executor
        .run(admission, CancellationToken::new(), sink.clone())
        .await
        .unwrap();

    // 运行的模式只能是扣费时的模式
    for frame in sink.frames().iter().filter(|f| !f.is_terminal()) {
        assert_eq!(frame.data["mode"], "gpt-4o-mini");
    }
}

#[tokio::test(start_paused = true)]
async fn workflow_ignoring_cancellation_still_ends_aborted() {
    let executor = executor(vec![stage("router"), Step::Stall(Duration::from_secs(3600))]);
    let sink = Arc::new(BufferSink::new());
    let cancel = CancellationToken::new();

    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.cancel();
    });

    let admission = executor.admit(Some(&user()), request(ChatMode::Deep)).await.unwrap();
    let outcome = tokio::time::timeout(Duration::from_secs(60), executor.run(admission, cancel, sink.clone()))
        .await
        .expect("run must not wait for the stalled workflow")
        .unwrap();

    assert_eq!(outcome.state, SessionState::Aborted);
    let frames = sink.frames();
    assert_eq!(frames.first().unwrap().event, "router");
    assert_eq!(frames.last().unwrap().status(), Some("aborted"));
    assert_eq!(frames.iter().filter(|f| f.is_terminal()).count(), 1);
}

#[tokio::test(start_paused = true)]
async fn cancelled_before_run_never_starts_the_workflow() {
    let engine = Arc::new(ScriptedEngine::new(vec![stage("router"), Step::Stall(Duration::from_secs(3600))]));
    let starts = engine.starts.clone();
    let executor = StreamExecutor::new(engine, ledger(100, 10), CreditCostTable::new());
    let sink = Arc::new(BufferSink::new());

    let cancel = CancellationToken::new();
    cancel.cancel();

    let admission = executor.admit(Some(&user()), request(ChatMode::Pro)).await.unwrap();
    let outcome = tokio::time::timeout(Duration::from_secs(60), executor.run(admission, cancel, sink.clone()))
        .await
        .expect("run must return without starting the workflow")
        .unwrap();

    assert_eq!(outcome.state, SessionState::Aborted);
    assert_eq!(starts.load(Ordering::SeqCst), 0);

    let frames = sink.frames();
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0].status(), Some("aborted"));
}
