//! 流式执行器
//!
//! 一次完成请求的编排：准入扣费 → 订阅事件 → 启动入口阶段 → 逐个转发事件
//! → 写出唯一的终止帧。

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use cg_core::{ChatGateError, ChatMode, CreditCostTable, DoneFrame, Identity, TerminalStatus};
use cg_ledger::CreditLedger;

use crate::analytics::{spawn_report, NoopReporter, UsageReporter, UsageSummary};
use crate::request::CompletionRequest;
use crate::session::{SessionState, StreamSession};
use crate::sink::FrameSink;
use crate::workflow::{StageInput, WorkflowEngine, ENTRY_STAGE};

#[derive(Error, Debug)]
pub enum ExecutorError {
    #[error("request carries no user id or client address")]
    Unidentified,

    #[error("insufficient credits: {remaining} remaining, {required} required")]
    QuotaExceeded { remaining: u32, required: u32 },

    #[error("workflow failed: {0}")]
    Workflow(#[from] ChatGateError),
}

/// 准入凭证：额度已按所携带请求的模式扣除，`run` 只接受它
#[derive(Debug)]
pub struct Admission {
    identity: Identity,
    request: CompletionRequest,
    cost: u32,
}

impl Admission {
    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn mode(&self) -> ChatMode {
        self.request.mode
    }

    pub fn request(&self) -> &CompletionRequest {
        &self.request
    }

    pub fn cost(&self) -> u32 {
        self.cost
    }
}

/// 一次运行的结果
#[derive(Debug, Clone, PartialEq)]
pub struct StreamOutcome {
    pub state: SessionState,
    pub frames: usize,
    pub elapsed: Duration,
}

pub struct StreamExecutor {
    engine: Arc<dyn WorkflowEngine>,
    ledger: Arc<CreditLedger>,
    costs: CreditCostTable,
    reporter: Arc<dyn UsageReporter>,
}

impl StreamExecutor {
    pub fn new(engine: Arc<dyn WorkflowEngine>, ledger: Arc<CreditLedger>, costs: CreditCostTable) -> Self {
        Self {
            engine,
            ledger,
            costs,
            reporter: Arc::new(NoopReporter),
        }
    }

    pub fn with_reporter(mut self, reporter: Arc<dyn UsageReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    pub fn ledger(&self) -> &Arc<CreditLedger> {
        &self.ledger
    }

    pub fn costs(&self) -> &CreditCostTable {
        &self.costs
    }

    /// 检查并扣除本次请求的额度，必须在调用工作流之前完成
    pub async fn admit(
        &self,
        identity: Option<&Identity>,
        request: CompletionRequest,
    ) -> Result<Admission, ExecutorError> {
        let identity = identity.ok_or(ExecutorError::Unidentified)?;
        let mode = request.mode;
        let cost = self.costs.cost(mode);

        if !self.ledger.deduct(identity, cost).await {
            let remaining = self.ledger.remaining(identity).await;
            debug!(identity = %identity, %mode, cost, remaining, "Admission rejected");
            return Err(ExecutorError::QuotaExceeded {
                remaining,
                required: cost,
            });
        }

        debug!(identity = %identity, %mode, cost, "Admission granted");
        Ok(Admission {
            identity: identity.clone(),
            request,
            cost,
        })
    }

    /// 运行工作流并把事件写入 `sink`
    ///
    /// 失败时先写出 `done/error` 终止帧，再返回错误；取消不视为错误。
    /// 取消信号触发后不再等待工作流，直接以 `aborted` 结束。
    pub async fn run(
        &self,
        admission: Admission,
        cancel: CancellationToken,
        sink: Arc<dyn FrameSink>,
    ) -> Result<StreamOutcome, ExecutorError> {
        let request = &admission.request;
        let mut session = StreamSession::new(request.envelope(), cancel.clone(), sink);
        let handle = self.engine.run(request.workflow_config(cancel.clone()));

        // 先订阅，再启动
        let (tx, rx) = flume::unbounded();
        handle.on_all(tx);
        session.start();

        let input = StageInput {
            question: request.prompt.clone(),
        };
        let mut start = AssertUnwindSafe(handle.start(ENTRY_STAGE, input)).catch_unwind();

        let result = if cancel.is_cancelled() {
            // 未启动的工作流不会被轮询
            Err(aborted())
        } else {
            loop {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break Err(aborted()),
                    Ok(event) = rx.recv_async() => {
                        session.emit(&event);
                    }
                    res = &mut start => {
                        break res.unwrap_or_else(|_| {
                            Err(ChatGateError::Workflow("workflow panicked".to_string()))
                        });
                    }
                }
            }
        };
        drop(start);

        // start 返回前已入队的事件
        for event in rx.drain() {
            session.emit(&event);
        }

        let timing = handle.timing_summary();
        info!(
            session_id = %session.id(),
            thread_id = %request.thread_id,
            elapsed_ms = session.elapsed().as_millis() as u64,
            workflow_ms = timing.total_ms,
            stages = timing.stages.len(),
            "Workflow summary"
        );

        let thread = session.thread().clone();
        match result {
            Ok(()) => {
                if let Some(user_id) = admission.identity.user_id() {
                    spawn_report(
                        self.reporter.clone(),
                        UsageSummary {
                            user_id: user_id.to_string(),
                            query: request.prompt.clone(),
                            mode: request.mode,
                            web_search: request.web_search,
                            show_suggestions: request.show_suggestions,
                            thread_id: request.thread_id.clone(),
                            thread_item_id: request.thread_item_id.clone(),
                            parent_thread_item_id: request.parent_thread_item_id.clone(),
                            summary: timing,
                        },
                    );
                }
                session.finish(DoneFrame::new(TerminalStatus::Complete, thread));
            }
            Err(_) if cancel.is_cancelled() => {
                debug!(thread_id = %request.thread_id, "Workflow aborted");
                session.finish(DoneFrame::new(TerminalStatus::Aborted, thread));
            }
            Err(err) => {
                error!(
                    identity = %admission.identity,
                    thread_id = %request.thread_id,
                    mode = %request.mode,
                    error = %err,
                    "Workflow execution error"
                );
                session.finish(DoneFrame::error(err.to_string(), thread));
                return Err(ExecutorError::Workflow(err));
            }
        }

        Ok(StreamOutcome {
            state: session.state(),
            frames: session.frames_sent(),
            elapsed: session.elapsed(),
        })
    }
}

fn aborted() -> ChatGateError {
    ChatGateError::Workflow("This operation was aborted".to_string())
}
