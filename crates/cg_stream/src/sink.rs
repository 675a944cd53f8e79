//! 下游字节接收端
//!
//! 执行器只负责帧内容，不管理连接生命周期。

use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::encoder::{parse_frames, SseFrame};

pub trait FrameSink: Send + Sync {
    /// 追加一段字节；空段是刷新标记
    fn enqueue(&self, chunk: Vec<u8>);
}

/// 通道接收端，接收侧通常是 HTTP 响应体
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<Vec<u8>>,
}

impl ChannelSink {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<Vec<u8>>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl FrameSink for ChannelSink {
    fn enqueue(&self, chunk: Vec<u8>) {
        // 接收侧已关闭说明客户端断开，取消由会话令牌处理
        if self.tx.send(chunk).is_err() {
            tracing::trace!("Frame sink closed, dropping chunk");
        }
    }
}

/// 内存缓冲接收端
#[derive(Debug, Default)]
pub struct BufferSink {
    chunks: Mutex<Vec<Vec<u8>>>,
}

impl BufferSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// 所有写入的段 (含刷新标记)
    pub fn chunks(&self) -> Vec<Vec<u8>> {
        self.chunks.lock().clone()
    }

    /// 拼接后的文本
    pub fn text(&self) -> String {
        let bytes: Vec<u8> = self.chunks.lock().concat();
        String::from_utf8_lossy(&bytes).into_owned()
    }

    /// 解析出的帧
    pub fn frames(&self) -> Vec<SseFrame> {
        parse_frames(&self.text())
    }
}

impl FrameSink for BufferSink {
    fn enqueue(&self, chunk: Vec<u8>) {
        self.chunks.lock().push(chunk);
    }
}
