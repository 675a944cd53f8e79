//! 完成请求

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use cg_core::{ChatMode, StreamEnvelope, ThreadContext};

use crate::workflow::{ChatMessage, WorkflowConfig, DEFAULT_MAX_ITERATIONS};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletionRequest {
    pub prompt: String,
    pub mode: ChatMode,
    pub thread_id: String,
    pub thread_item_id: String,
    #[serde(default)]
    pub parent_thread_item_id: Option<String>,
    #[serde(default)]
    pub messages: Vec<ChatMessage>,
    #[serde(default)]
    pub custom_instructions: Option<String>,
    #[serde(default)]
    pub web_search: bool,
    #[serde(default)]
    pub show_suggestions: bool,
    #[serde(default)]
    pub max_iterations: Option<u32>,
    #[serde(default)]
    pub mcp_config: HashMap<String, String>,
}

impl CompletionRequest {
    /// 未给出或为 0 时取默认值
    pub fn max_iterations(&self) -> u32 {
        self.max_iterations
            .filter(|n| *n > 0)
            .unwrap_or(DEFAULT_MAX_ITERATIONS)
    }

    pub fn thread(&self) -> ThreadContext {
        ThreadContext {
            thread_id: self.thread_id.clone(),
            thread_item_id: self.thread_item_id.clone(),
            parent_thread_item_id: self.parent_thread_item_id.clone(),
        }
    }

    pub fn envelope(&self) -> StreamEnvelope {
        StreamEnvelope {
            thread: self.thread(),
            query: self.prompt.clone(),
            mode: self.mode,
            web_search: self.web_search,
            show_suggestions: self.show_suggestions,
        }
    }

    pub fn workflow_config(&self, signal: CancellationToken) -> WorkflowConfig {
        WorkflowConfig {
            mode: self.mode,
            question: self.prompt.clone(),
            thread_id: self.thread_id.clone(),
            thread_item_id: self.thread_item_id.clone(),
            messages: self.messages.clone(),
            custom_instructions: self.custom_instructions.clone(),
            web_search: self.web_search,
            show_suggestions: self.show_suggestions,
            mcp_config: self.mcp_config.clone(),
            max_iterations: self.max_iterations(),
            signal,
        }
    }
}
