//! # cg_stream - ChatGate Stream Executor
//!
//! 流式执行层：驱动外部推理工作流，把它发出的事件按序编码为
//! `event:/data:` 帧写给下游，并保证每个会话恰好以一个终止帧结束。

pub mod analytics;
pub mod encoder;
pub mod executor;
pub mod request;
pub mod session;
pub mod sink;
pub mod workflow;

pub use analytics::{
    spawn_report, NoopReporter, PostHogReporter, TracingReporter, UsageReporter, UsageSummary,
    WORKFLOW_SUMMARY_EVENT,
};
pub use encoder::{parse_frames, EncodedFrame, EventEncoder, SseFrame, SERIALIZE_FAILURE_MESSAGE};
pub use executor::{Admission, ExecutorError, StreamExecutor, StreamOutcome};
pub use request::CompletionRequest;
pub use session::{SessionState, StreamSession};
pub use sink::{BufferSink, ChannelSink, FrameSink};
pub use workflow::{
    ChatMessage, EventSender, Role, StageInput, StageTiming, TimingSummary, WorkflowConfig,
    WorkflowEngine, WorkflowHandle, ENTRY_STAGE,
};
