//! 主存储抽象
//!
//! 每次"补充检查 + 读/扣减/重置"都必须作为一个原子操作执行，
//! 多个请求处理器 (乃至多个进程) 并发访问同一身份时保持线性一致。

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::NaiveDate;
use parking_lot::Mutex;

use cg_core::{Identity, Result};

use crate::entry::LedgerEntry;

#[async_trait]
pub trait QuotaStore: Send + Sync {
    /// 存储名称 (日志用)
    fn name(&self) -> &'static str;

    /// 读取余额，跨日则先补满
    async fn remaining(&self, identity: &Identity, daily_quota: u32, today: NaiveDate)
        -> Result<u32>;

    /// 补充检查并在余额足够时扣减
    async fn deduct(
        &self,
        identity: &Identity,
        cost: u32,
        daily_quota: u32,
        today: NaiveDate,
    ) -> Result<bool>;

    /// 无条件重置为满额，返回新余额
    async fn reset(&self, identity: &Identity, daily_quota: u32, today: NaiveDate) -> Result<u32>;
}

/// 单进程内存存储
///
/// 所有操作在同一把锁内完成，适用于单实例部署、开发与测试。
#[derive(Debug, Default)]
pub struct MemoryQuotaStore {
    entries: Mutex<HashMap<String, LedgerEntry>>,
}

impl MemoryQuotaStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_entry<R>(
        &self,
        identity: &Identity,
        daily_quota: u32,
        today: NaiveDate,
        f: impl FnOnce(&mut LedgerEntry) -> R,
    ) -> R {
        let mut entries = self.entries.lock();
        let entry = entries
            .entry(identity.storage_key())
            .or_insert_with(|| LedgerEntry::full(daily_quota, today));
        entry.refresh(daily_quota, today);
        f(entry)
    }
}

#[async_trait]
impl QuotaStore for MemoryQuotaStore {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn remaining(
        &self,
        identity: &Identity,
        daily_quota: u32,
        today: NaiveDate,
    ) -> Result<u32> {
        Ok(self.with_entry(identity, daily_quota, today, |entry| entry.remaining))
    }

    async fn deduct(
        &self,
        identity: &Identity,
        cost: u32,
        daily_quota: u32,
        today: NaiveDate,
    ) -> Result<bool> {
        Ok(self.with_entry(identity, daily_quota, today, |entry| entry.try_deduct(cost)))
    }

    async fn reset(&self, identity: &Identity, daily_quota: u32, today: NaiveDate) -> Result<u32> {
        self.entries
            .lock()
            .insert(identity.storage_key(), LedgerEntry::full(daily_quota, today));
        Ok(daily_quota)
    }
}
