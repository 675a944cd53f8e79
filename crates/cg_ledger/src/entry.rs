//! 账本条目与懒补充规则

use chrono::NaiveDate;

/// 某个身份的余额记录
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LedgerEntry {
    /// 剩余额度
    pub remaining: u32,
    /// 最近一次补充的日期
    pub last_refill: NaiveDate,
}

impl LedgerEntry {
    /// 满额条目
    pub fn full(daily_quota: u32, today: NaiveDate) -> Self {
        Self {
            remaining: daily_quota,
            last_refill: today,
        }
    }

    /// 跨日后的首次访问补满；同日内只把余额压回配额上限
    pub fn refresh(&mut self, daily_quota: u32, today: NaiveDate) {
        if self.last_refill != today {
            *self = Self::full(daily_quota, today);
        } else {
            self.remaining = self.remaining.min(daily_quota);
        }
    }

    /// 余额足够时扣减
    pub fn try_deduct(&mut self, cost: u32) -> bool {
        match self.remaining.checked_sub(cost) {
            Some(rest) => {
                self.remaining = rest;
                true
            }
            None => false,
        }
    }
}
