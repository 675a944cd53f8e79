//! 流式会话
//!
//! 会话状态机：Created → Running → {Completed | Aborted | Failed}。
//! 进入终止态之后不再向下游写任何字节，保证每个会话恰好一个终止帧。

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

use cg_core::event::DONE_EVENT;
use cg_core::{DoneFrame, StreamEnvelope, TerminalStatus, ThreadContext, WorkflowEvent};

use crate::encoder::{EncodedFrame, EventEncoder};
use crate::sink::FrameSink;

/// 会话状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Created,
    Running,
    Completed,
    Aborted,
    Failed,
}

impl SessionState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            SessionState::Completed | SessionState::Aborted | SessionState::Failed
        )
    }

    fn from_status(status: TerminalStatus) -> Self {
        match status {
            TerminalStatus::Complete => SessionState::Completed,
            TerminalStatus::Aborted => SessionState::Aborted,
            TerminalStatus::Error => SessionState::Failed,
        }
    }
}

pub struct StreamSession {
    id: Uuid,
    envelope: StreamEnvelope,
    cancel: CancellationToken,
    started_at: Instant,
    state: SessionState,
    sink: Arc<dyn FrameSink>,
    frames_sent: usize,
}

impl StreamSession {
    pub fn new(envelope: StreamEnvelope, cancel: CancellationToken, sink: Arc<dyn FrameSink>) -> Self {
        Self {
            id: Uuid::new_v4(),
            envelope,
            cancel,
            started_at: Instant::now(),
            state: SessionState::Created,
            sink,
            frames_sent: 0,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn thread(&self) -> &ThreadContext {
        &self.envelope.thread
    }

    pub fn frames_sent(&self) -> usize {
        self.frames_sent
    }

    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn start(&mut self) {
        if self.state == SessionState::Created {
            self.state = SessionState::Running;
            debug!(session_id = %self.id, thread_id = %self.envelope.thread.thread_id, "Stream session started");
        }
    }

    /// 下发一个工作流事件，返回是否写出
    pub fn emit(&mut self, event: &WorkflowEvent) -> bool {
        if self.state.is_terminal() {
            return false;
        }
        // done 事件只能由会话自己下发
        if event.name() == DONE_EVENT {
            warn!(session_id = %self.id, "Workflow emitted reserved 'done' event, dropping");
            return false;
        }

        let encoded = EventEncoder::encode(&self.envelope.wrap(event));
        if self.push(encoded) {
            // 降级帧本身就是终止帧
            self.state = SessionState::Failed;
            self.cancel.cancel();
        }
        true
    }

    /// 下发终止帧并进入终止态；已终止时返回 None
    pub fn finish(&mut self, done: DoneFrame) -> Option<SessionState> {
        if self.state.is_terminal() {
            debug!(session_id = %self.id, state = ?self.state, "Session already terminal, skipping done frame");
            return None;
        }

        let status = done.status;
        let degraded = self.push(EventEncoder::encode(&done));
        self.state = if degraded {
            SessionState::Failed
        } else {
            SessionState::from_status(status)
        };
        Some(self.state)
    }

    /// 写出已编码的帧，返回是否为降级帧
    fn push(&mut self, encoded: EncodedFrame) -> bool {
        self.sink.enqueue(encoded.bytes);
        // 空段作为刷新标记
        self.sink.enqueue(Vec::new());
        self.frames_sent += 1;
        encoded.degraded
    }
}
