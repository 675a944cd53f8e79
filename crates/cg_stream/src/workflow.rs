//! 工作流引擎协作接口
//!
//! 推理工作流本身是外部黑盒，执行器只通过这里的接口驱动它：
//! 订阅全部事件、启动入口阶段、读取耗时汇总。

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use cg_core::{ChatMode, Result, WorkflowEvent};

/// 入口阶段
pub const ENTRY_STAGE: &str = "router";

/// 默认最大迭代次数
pub const DEFAULT_MAX_ITERATIONS: u32 = 3;

/// 事件订阅端
pub type EventSender = flume::Sender<WorkflowEvent>;

/// 对话角色
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// 历史消息
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

/// 启动一次工作流所需的全部输入
#[derive(Debug, Clone)]
pub struct WorkflowConfig {
    pub mode: ChatMode,
    pub question: String,
    pub thread_id: String,
    pub thread_item_id: String,
    pub messages: Vec<ChatMessage>,
    pub custom_instructions: Option<String>,
    pub web_search: bool,
    pub show_suggestions: bool,
    pub mcp_config: HashMap<String, String>,
    pub max_iterations: u32,
    /// 取消信号，进行中的步骤应观察它并停止发起新的模型调用
    pub signal: CancellationToken,
}

/// 入口阶段的输入
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageInput {
    pub question: String,
}

/// 单个阶段的耗时
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StageTiming {
    pub stage: String,
    pub duration_ms: u64,
    pub calls: u32,
}

/// 工作流耗时汇总
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimingSummary {
    pub total_ms: u64,
    pub stages: Vec<StageTiming>,
}

/// 已创建、尚未启动的工作流
#[async_trait]
pub trait WorkflowHandle: Send + Sync {
    /// 订阅全部事件 (必须在 `start` 之前调用)
    fn on_all(&self, subscriber: EventSender);

    /// 启动指定阶段；返回时工作流已不再发出领域事件
    async fn start(&self, stage: &str, input: StageInput) -> Result<()>;

    fn timing_summary(&self) -> TimingSummary;
}

/// 工作流引擎
pub trait WorkflowEngine: Send + Sync {
    fn run(&self, config: WorkflowConfig) -> Box<dyn WorkflowHandle>;
}
