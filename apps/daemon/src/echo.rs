//! 本地回显引擎
//!
//! 没有接入真实推理工作流时的替身：router → writer → answer，
//! 按词流式回显问题，每步之间检查取消信号。

use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::json;

use cg_core::event::{AnswerPayload, ItemStatus};
use cg_core::{ChatGateError, Result, WorkflowEvent};
use cg_stream::{
    EventSender, StageInput, StageTiming, TimingSummary, WorkflowConfig, WorkflowEngine,
    WorkflowHandle,
};

#[derive(Debug, Clone)]
pub struct EchoEngine {
    /// 相邻两个词之间的停顿
    word_delay: Duration,
}

impl EchoEngine {
    pub fn new(word_delay: Duration) -> Self {
        Self { word_delay }
    }
}

impl Default for EchoEngine {
    fn default() -> Self {
        Self::new(Duration::from_millis(20))
    }
}

impl WorkflowEngine for EchoEngine {
    fn run(&self, config: WorkflowConfig) -> Box<dyn WorkflowHandle> {
        Box::new(EchoWorkflow {
            config,
            word_delay: self.word_delay,
            subscriber: Mutex::new(None),
            timings: Mutex::new(Vec::new()),
        })
    }
}

struct EchoWorkflow {
    config: WorkflowConfig,
    word_delay: Duration,
    subscriber: Mutex<Option<EventSender>>,
    timings: Mutex<Vec<StageTiming>>,
}

impl EchoWorkflow {
    fn send(&self, event: WorkflowEvent) {
        if let Some(tx) = self.subscriber.lock().as_ref() {
            let _ = tx.send(event);
        }
    }

    fn check_cancelled(&self) -> Result<()> {
        if self.config.signal.is_cancelled() {
            return Err(ChatGateError::Workflow("This operation was aborted".to_string()));
        }
        Ok(())
    }

    fn record(&self, stage: &str, started: Instant, calls: u32) {
        self.timings.lock().push(StageTiming {
            stage: stage.to_string(),
            duration_ms: started.elapsed().as_millis() as u64,
            calls,
        });
    }
}

#[async_trait]
impl WorkflowHandle for EchoWorkflow {
    fn on_all(&self, subscriber: EventSender) {
        *self.subscriber.lock() = Some(subscriber);
    }

    async fn start(&self, stage: &str, input: StageInput) -> Result<()> {
        let started = Instant::now();
        self.check_cancelled()?;
        self.send(WorkflowEvent::stage(
            stage,
            json!({ "route": "writer", "mode": self.config.mode, "webSearch": self.config.web_search }),
        ));
        self.record(stage, started, 0);

        let started = Instant::now();
        self.send(WorkflowEvent::stage("writer", json!({ "status": "PENDING" })));

        let mut text = String::new();
        let mut calls = 0;
        for word in input.question.split_whitespace() {
            tokio::select! {
                _ = self.config.signal.cancelled() => {}
                _ = tokio::time::sleep(self.word_delay) => {}
            }
            self.check_cancelled()?;

            if !text.is_empty() {
                text.push(' ');
            }
            text.push_str(word);
            calls += 1;
            self.send(WorkflowEvent::Answer(AnswerPayload {
                text: text.clone(),
                status: Some(ItemStatus::Pending),
            }));
        }

        self.send(WorkflowEvent::Answer(AnswerPayload {
            text,
            status: Some(ItemStatus::Completed),
        }));
        self.record("writer", started, calls);
        Ok(())
    }

    fn timing_summary(&self) -> TimingSummary {
        let stages = self.timings.lock().clone();
        TimingSummary {
            total_ms: stages.iter().map(|s| s.duration_ms).sum(),
            stages,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cg_core::ChatMode;
    use std::collections::HashMap;
    use tokio_util::sync::CancellationToken;

    fn config(question: &str, signal: CancellationToken) -> WorkflowConfig {
        WorkflowConfig {
            mode: ChatMode::Gpt4oMini,
            question: question.to_string(),
            thread_id: "t".to_string(),
            thread_item_id: "i".to_string(),
            messages: Vec::new(),
            custom_instructions: None,
            web_search: false,
            show_suggestions: false,
            mcp_config: HashMap::new(),
            max_iterations: 3,
            signal,
        }
    }

    #[tokio::test]
    async fn echoes_the_question_word_by_word() {
        let engine = EchoEngine::new(Duration::ZERO);
        let handle = engine.run(config("hello there", CancellationToken::new()));
        let (tx, rx) = flume::unbounded();
        handle.on_all(tx);

        handle
            .start("router", StageInput { question: "hello there".to_string() })
            .await
            .unwrap();

        let names: Vec<String> = rx.drain().map(|e| e.name().to_string()).collect();
        assert_eq!(names, ["router", "writer", "answer", "answer", "answer"]);
        assert_eq!(handle.timing_summary().stages.len(), 2);
    }

    #[tokio::test]
    async fn stops_when_cancelled() {
        let signal = CancellationToken::new();
        signal.cancel();
        let handle = EchoEngine::default().run(config("hi", signal));

        let result = handle
            .start("router", StageInput { question: "hi".to_string() })
            .await;
        assert!(result.is_err());
    }
}
