//! 事件编码器
//!
//! 将帧编码为 `event: <type>\ndata: <json>\n\n`。编码失败时不向上抛出，
//! 而是记录日志并合成一个 `done/error` 终止帧，保证客户端总能收到合法的结束帧。

use serde_json::Value;
use thiserror::Error;
use tracing::error;

use cg_core::event::DONE_EVENT;
use cg_core::{DoneFrame, Frame, ThreadContext};

/// 降级终止帧中的固定错误信息
pub const SERIALIZE_FAILURE_MESSAGE: &str = "Failed to serialize payload";

/// 信封占用的顶层字段，阶段事件不能以此为名
pub const RESERVED_EVENT_NAMES: &[&str] = &[
    "type",
    "threadId",
    "threadItemId",
    "parentThreadItemId",
    "query",
    "mode",
    "webSearch",
    "showSuggestions",
];

#[derive(Error, Debug)]
pub enum EncodeError {
    #[error("payload is not serializable: {0}")]
    Json(#[from] serde_json::Error),

    #[error("event type {0:?} cannot be framed")]
    InvalidEventType(String),

    #[error("event type {0:?} collides with an envelope field")]
    ReservedEventType(String),
}

/// 编码结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedFrame {
    pub bytes: Vec<u8>,
    /// 原帧编码失败，`bytes` 是合成的终止帧
    pub degraded: bool,
}

pub struct EventEncoder;

impl EventEncoder {
    /// 编码一个帧，失败时降级为终止错误帧
    pub fn encode<F: Frame>(frame: &F) -> EncodedFrame {
        match Self::try_encode(frame) {
            Ok(bytes) => EncodedFrame {
                bytes,
                degraded: false,
            },
            Err(err) => {
                let thread = frame.thread();
                error!(
                    payload_type = frame.frame_type(),
                    thread_id = %thread.thread_id,
                    thread_item_id = %thread.thread_item_id,
                    error = %err,
                    "Error serializing message payload"
                );
                EncodedFrame {
                    bytes: Self::fallback_frame(thread),
                    degraded: true,
                }
            }
        }
    }

    pub fn try_encode<F: Frame>(frame: &F) -> Result<Vec<u8>, EncodeError> {
        let event_type = frame.frame_type();
        if event_type.is_empty() || event_type.contains(|c| c == '\n' || c == '\r') {
            return Err(EncodeError::InvalidEventType(event_type.to_string()));
        }
        if !frame.is_terminal() && RESERVED_EVENT_NAMES.contains(&event_type) {
            return Err(EncodeError::ReservedEventType(event_type.to_string()));
        }

        let mut value = serde_json::to_value(frame)?;
        normalize_content(&mut value, event_type);
        sanitize(&mut value);
        let data = serde_json::to_string(&value)?;

        Ok(format!("event: {event_type}\ndata: {data}\n\n").into_bytes())
    }

    /// 合成的 `done/error` 终止帧
    pub fn fallback_frame(thread: &ThreadContext) -> Vec<u8> {
        let done = DoneFrame::error(SERIALIZE_FAILURE_MESSAGE, thread.clone());
        let data = serde_json::to_string(&done).unwrap_or_else(|_| {
            format!(r#"{{"type":"done","status":"error","error":"{SERIALIZE_FAILURE_MESSAGE}"}}"#)
        });
        format!("event: {DONE_EVENT}\ndata: {data}\n\n").into_bytes()
    }
}

/// 把上游双重转义留下的字面 `\n` 还原为换行
pub fn normalize_markdown(content: &str) -> String {
    content.replace("\\n", "\n")
}

fn normalize_content(value: &mut Value, event_type: &str) {
    if let Some(Value::String(content)) = value.get_mut("content") {
        *content = normalize_markdown(content);
    }
    if let Some(Value::Object(payload)) = value.get_mut(event_type) {
        for field in ["text", "content"] {
            if let Some(Value::String(text)) = payload.get_mut(field) {
                *text = normalize_markdown(text);
            }
        }
    }
}

/// 预清洗：去掉字符串中的 NUL，丢弃值为 null 的对象字段
fn sanitize(value: &mut Value) {
    match value {
        Value::String(s) if s.contains('\0') => s.retain(|c| c != '\0'),
        Value::Array(items) => items.iter_mut().for_each(sanitize),
        Value::Object(map) => {
            map.retain(|_, v| !v.is_null());
            map.values_mut().for_each(sanitize);
        }
        _ => {}
    }
}

/// 解析后的一帧
#[derive(Debug, Clone, PartialEq)]
pub struct SseFrame {
    pub event: String,
    pub data: Value,
}

impl SseFrame {
    pub fn is_terminal(&self) -> bool {
        self.event == DONE_EVENT
    }

    /// 终止帧的 status 字段
    pub fn status(&self) -> Option<&str> {
        self.data.get("status").and_then(Value::as_str)
    }
}

/// 解析 `event:/data:` 文本帧，忽略无法识别的块
pub fn parse_frames(text: &str) -> Vec<SseFrame> {
    text.split("\n\n")
        .filter_map(|block| {
            let mut event = None;
            let mut data = None;
            for line in block.lines() {
                if let Some(rest) = line.strip_prefix("event: ") {
                    event = Some(rest.to_string());
                } else if let Some(rest) = line.strip_prefix("data: ") {
                    data = serde_json::from_str(rest).ok();
                }
            }
            Some(SseFrame {
                event: event?,
                data: data?,
            })
        })
        .collect()
}
