//! 本地降级缓存
//!
//! 主存储超时或不可用时给出同步答案。进程内有效、不与主存储同步，
//! 允许与主存储产生偏差 (可用性优先于记账精度)。

use std::collections::HashMap;

use chrono::NaiveDate;
use parking_lot::Mutex;

use crate::entry::LedgerEntry;

/// 降级缓存，按存储键索引
#[derive(Debug, Default)]
pub struct FallbackStore {
    entries: Mutex<HashMap<String, LedgerEntry>>,
}

impl FallbackStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 读取余额；日期变化或首次访问时以满额覆盖
    pub fn remaining(&self, key: &str, daily_quota: u32, today: NaiveDate) -> u32 {
        let mut entries = self.entries.lock();
        Self::refreshed(&mut entries, key, daily_quota, today).remaining
    }

    /// 原子地检查并扣减
    pub fn try_deduct(&self, key: &str, cost: u32, daily_quota: u32, today: NaiveDate) -> bool {
        let mut entries = self.entries.lock();
        Self::refreshed(&mut entries, key, daily_quota, today).try_deduct(cost)
    }

    /// 无条件重置为满额
    pub fn reset(&self, key: &str, daily_quota: u32, today: NaiveDate) -> u32 {
        self.entries
            .lock()
            .insert(key.to_string(), LedgerEntry::full(daily_quota, today));
        daily_quota
    }

    /// 查看条目 (不触发补充)
    pub fn entry(&self, key: &str) -> Option<LedgerEntry> {
        self.entries.lock().get(key).copied()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    fn refreshed<'a>(
        entries: &'a mut HashMap<String, LedgerEntry>,
        key: &str,
        daily_quota: u32,
        today: NaiveDate,
    ) -> &'a mut LedgerEntry {
        let entry = entries
            .entry(key.to_string())
            .or_insert_with(|| LedgerEntry::full(daily_quota, today));
        entry.refresh(daily_quota, today);
        entry
    }
}
