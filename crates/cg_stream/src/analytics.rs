//! 用量上报
//!
//! 上报在独立任务中进行，失败只记 warn，绝不阻塞或影响主路径。

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::json;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use cg_core::{ChatGateError, ChatMode, Result};

use crate::workflow::TimingSummary;

/// 工作流汇总事件名
pub const WORKFLOW_SUMMARY_EVENT: &str = "workflow_summary";

/// 默认 PostHog 地址
pub const DEFAULT_POSTHOG_HOST: &str = "https://us.i.posthog.com";

/// 一次成功运行的用量记录
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageSummary {
    pub user_id: String,
    pub query: String,
    pub mode: ChatMode,
    pub web_search: bool,
    pub show_suggestions: bool,
    pub thread_id: String,
    pub thread_item_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_thread_item_id: Option<String>,
    pub summary: TimingSummary,
}

#[async_trait]
pub trait UsageReporter: Send + Sync {
    async fn capture(&self, event: &str, usage: &UsageSummary) -> Result<()>;

    async fn flush(&self) -> Result<()>;
}

/// 丢弃所有记录
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopReporter;

#[async_trait]
impl UsageReporter for NoopReporter {
    async fn capture(&self, _event: &str, _usage: &UsageSummary) -> Result<()> {
        Ok(())
    }

    async fn flush(&self) -> Result<()> {
        Ok(())
    }
}

/// 写入日志
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingReporter;

#[async_trait]
impl UsageReporter for TracingReporter {
    async fn capture(&self, event: &str, usage: &UsageSummary) -> Result<()> {
        info!(
            event,
            user_id = %usage.user_id,
            thread_id = %usage.thread_id,
            mode = %usage.mode,
            total_ms = usage.summary.total_ms,
            "Usage captured"
        );
        Ok(())
    }

    async fn flush(&self) -> Result<()> {
        Ok(())
    }
}

/// PostHog 上报：capture 入队，flush 批量发送
pub struct PostHogReporter {
    client: reqwest::Client,
    api_key: String,
    host: String,
    queue: Mutex<Vec<serde_json::Value>>,
}

impl PostHogReporter {
    pub fn new(api_key: impl Into<String>, host: Option<String>) -> Self {
        let host = host.unwrap_or_else(|| DEFAULT_POSTHOG_HOST.to_string());
        Self {
            client: reqwest::Client::new(),
            api_key: api_key.into(),
            host: host.trim_end_matches('/').to_string(),
            queue: Mutex::new(Vec::new()),
        }
    }

    pub fn pending(&self) -> usize {
        self.queue.lock().len()
    }
}

#[async_trait]
impl UsageReporter for PostHogReporter {
    async fn capture(&self, event: &str, usage: &UsageSummary) -> Result<()> {
        let properties = serde_json::to_value(usage)?;
        self.queue.lock().push(json!({
            "event": event,
            "distinct_id": usage.user_id,
            "properties": properties,
        }));
        Ok(())
    }

    async fn flush(&self) -> Result<()> {
        let batch = std::mem::take(&mut *self.queue.lock());
        if batch.is_empty() {
            return Ok(());
        }

        let url = format!("{}/batch/", self.host);
        let body = json!({ "api_key": self.api_key, "batch": batch });
        let res = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| ChatGateError::Protocol(format!("PostHog batch request failed: {}", e)))?;

        if !res.status().is_success() {
            let status = res.status();
            let text = res.text().await.unwrap_or_default();
            return Err(ChatGateError::Protocol(format!(
                "PostHog batch rejected ({}): {}",
                status, text
            )));
        }
        Ok(())
    }
}

/// 在独立任务中上报并刷新，错误只记 warn
pub fn spawn_report(reporter: Arc<dyn UsageReporter>, usage: UsageSummary) -> JoinHandle<()> {
    tokio::spawn(async move {
        if let Err(e) = reporter.capture(WORKFLOW_SUMMARY_EVENT, &usage).await {
            warn!(error = %e, thread_id = %usage.thread_id, "Usage capture failed");
        }
        if let Err(e) = reporter.flush().await {
            warn!(error = %e, "Usage flush failed");
        }
    })
}
