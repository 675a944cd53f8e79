//! # cg_ledger - ChatGate Credit Ledger
//!
//! 额度账本层：按身份的每日配额、懒补充、原子扣减，
//! 以及主存储超时/故障时的本地降级。

pub mod clock;
pub mod entry;
pub mod fallback;
pub mod ledger;
pub mod race;
pub mod redis_store;
pub mod store;

pub use clock::{Clock, ManualClock, SystemClock};
pub use entry::LedgerEntry;
pub use fallback::FallbackStore;
pub use ledger::{CreditLedger, QuotaConfig};
pub use race::PRIMARY_STORE_DEADLINE;
pub use redis_store::RedisQuotaStore;
pub use store::{MemoryQuotaStore, QuotaStore};

pub use cg_core::{ChatGateError, Result};
