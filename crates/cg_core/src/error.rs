//! 全局错误处理机制

use thiserror::Error;

/// ChatGate 统一错误类型
#[derive(Error, Debug)]
pub enum ChatGateError {
    #[error("Quota store error: {0}")]
    Store(String),

    #[error("Workflow error: {0}")]
    Workflow(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// 统一 Result 类型别名
pub type Result<T> = std::result::Result<T, ChatGateError>;
