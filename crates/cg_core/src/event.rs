//! 流式事件定义
//!
//! 工作流事件是带类型载荷的联合体；下发给客户端时，事件载荷以事件名为键
//! 合并进会话信封 (线程关联 ID、原始问题、模式、功能开关)。

use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};

use crate::mode::ChatMode;

/// 终止帧的事件类型
pub const DONE_EVENT: &str = "done";

/// 线程内条目状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ItemStatus {
    Pending,
    Completed,
    Error,
    Aborted,
}

/// 回答片段
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnswerPayload {
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<ItemStatus>,
}

/// 检索来源
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourcePayload {
    pub title: String,
    pub link: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snippet: Option<String>,
}

/// 工作流自身报告的错误 (不终止流)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub message: String,
}

/// 工作流事件
#[derive(Debug, Clone, PartialEq)]
pub enum WorkflowEvent {
    /// 推理步骤树
    Steps(serde_json::Value),
    /// 回答文本
    Answer(AnswerPayload),
    /// 检索来源
    Sources(Vec<SourcePayload>),
    /// 条目状态
    Status(ItemStatus),
    /// 工具调用
    ToolCalls(serde_json::Value),
    /// 工具结果
    ToolResults(serde_json::Value),
    /// 后续问题建议
    Suggestions(Vec<String>),
    /// 非致命错误
    Error(ErrorPayload),
    /// 阶段事件 (router / planner / writer ...)
    Stage {
        name: String,
        payload: serde_json::Value,
    },
}

impl WorkflowEvent {
    pub fn stage(name: impl Into<String>, payload: serde_json::Value) -> Self {
        WorkflowEvent::Stage {
            name: name.into(),
            payload,
        }
    }

    /// 事件名，同时也是载荷在信封中的键
    pub fn name(&self) -> &str {
        match self {
            WorkflowEvent::Steps(_) => "steps",
            WorkflowEvent::Answer(_) => "answer",
            WorkflowEvent::Sources(_) => "sources",
            WorkflowEvent::Status(_) => "status",
            WorkflowEvent::ToolCalls(_) => "toolCalls",
            WorkflowEvent::ToolResults(_) => "toolResults",
            WorkflowEvent::Suggestions(_) => "suggestions",
            WorkflowEvent::Error(_) => "error",
            WorkflowEvent::Stage { name, .. } => name,
        }
    }
}

/// 序列化为 `{ <name>: <payload> }`，供信封 flatten 合并
impl Serialize for WorkflowEvent {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(1))?;
        match self {
            WorkflowEvent::Steps(v) | WorkflowEvent::ToolCalls(v) | WorkflowEvent::ToolResults(v) => {
                map.serialize_entry(self.name(), v)?
            }
            WorkflowEvent::Answer(p) => map.serialize_entry(self.name(), p)?,
            WorkflowEvent::Sources(p) => map.serialize_entry(self.name(), p)?,
            WorkflowEvent::Status(p) => map.serialize_entry(self.name(), p)?,
            WorkflowEvent::Suggestions(p) => map.serialize_entry(self.name(), p)?,
            WorkflowEvent::Error(p) => map.serialize_entry(self.name(), p)?,
            WorkflowEvent::Stage { name, payload } => map.serialize_entry(name, payload)?,
        }
        map.end()
    }
}

/// 线程关联 ID
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThreadContext {
    pub thread_id: String,
    pub thread_item_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_thread_item_id: Option<String>,
}

/// 会话信封：每个下发事件都携带的公共字段
#[derive(Debug, Clone, PartialEq)]
pub struct StreamEnvelope {
    pub thread: ThreadContext,
    pub query: String,
    pub mode: ChatMode,
    pub web_search: bool,
    pub show_suggestions: bool,
}

impl StreamEnvelope {
    /// 将工作流事件包装为下发帧
    pub fn wrap<'a>(&'a self, event: &'a WorkflowEvent) -> EventFrame<'a> {
        EventFrame {
            event_type: event.name(),
            thread: &self.thread,
            query: &self.query,
            mode: self.mode,
            web_search: self.web_search,
            show_suggestions: self.show_suggestions,
            event,
        }
    }
}

/// 可下发的帧
pub trait Frame: Serialize {
    /// `event:` 行的类型名
    fn frame_type(&self) -> &str;

    /// 关联的线程上下文 (用于日志与降级终止帧)
    fn thread(&self) -> &ThreadContext;

    fn is_terminal(&self) -> bool {
        false
    }
}

/// 工作流事件帧
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EventFrame<'a> {
    #[serde(rename = "type")]
    event_type: &'a str,
    #[serde(flatten)]
    thread: &'a ThreadContext,
    query: &'a str,
    mode: ChatMode,
    web_search: bool,
    show_suggestions: bool,
    #[serde(flatten)]
    event: &'a WorkflowEvent,
}

impl Frame for EventFrame<'_> {
    fn frame_type(&self) -> &str {
        self.event_type
    }

    fn thread(&self) -> &ThreadContext {
        self.thread
    }
}

/// 终止状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TerminalStatus {
    Complete,
    Aborted,
    Error,
}

/// 终止帧 `{type: done, status, error?}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DoneFrame {
    #[serde(rename = "type")]
    pub event_type: String,
    pub status: TerminalStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(flatten)]
    pub thread: ThreadContext,
}

impl DoneFrame {
    pub fn new(status: TerminalStatus, thread: ThreadContext) -> Self {
        Self {
            event_type: DONE_EVENT.to_string(),
            status,
            error: None,
            thread,
        }
    }

    pub fn error(message: impl Into<String>, thread: ThreadContext) -> Self {
        Self {
            error: Some(message.into()),
            ..Self::new(TerminalStatus::Error, thread)
        }
    }
}

impl Frame for DoneFrame {
    fn frame_type(&self) -> &str {
        DONE_EVENT
    }

    fn thread(&self) -> &ThreadContext {
        &self.thread
    }

    fn is_terminal(&self) -> bool {
        true
    }
}
