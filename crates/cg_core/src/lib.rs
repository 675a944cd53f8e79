//! # cg_core - ChatGate Core Primitives
//!
//! 核心原语层，定义请求身份、对话模式与额度消耗表、流式事件联合体、全局错误处理机制。
//! 此 crate 是整个项目的基础依赖，不依赖其他业务 crate。

pub mod error;
pub mod event;
pub mod identity;
pub mod mode;

pub use error::{ChatGateError, Result};
pub use event::{
    DoneFrame, EventFrame, Frame, StreamEnvelope, TerminalStatus, ThreadContext, WorkflowEvent,
};
pub use identity::{Identity, IdentityKind};
pub use mode::{ChatMode, CreditCostTable};
