//! 日历日来源
//!
//! 额度按 UTC 日历日懒补充，时钟可注入以便在测试中跨越日期边界。

use chrono::{Days, NaiveDate, Utc};
use parking_lot::Mutex;

pub trait Clock: Send + Sync {
    /// 当前 UTC 日期
    fn today(&self) -> NaiveDate;
}

/// 系统时钟
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn today(&self) -> NaiveDate {
        Utc::now().date_naive()
    }
}

/// 手动推进的时钟
#[derive(Debug)]
pub struct ManualClock {
    day: Mutex<NaiveDate>,
}

impl ManualClock {
    pub fn new(day: NaiveDate) -> Self {
        Self {
            day: Mutex::new(day),
        }
    }

    pub fn set(&self, day: NaiveDate) {
        *self.day.lock() = day;
    }

    pub fn advance_days(&self, days: u64) {
        let mut day = self.day.lock();
        if let Some(next) = day.checked_add_days(Days::new(days)) {
            *day = next;
        }
    }
}

impl Clock for ManualClock {
    fn today(&self) -> NaiveDate {
        *self.day.lock()
    }
}

/// 存储中使用的日期格式 (`YYYY-MM-DD`)
pub fn day_stamp(day: NaiveDate) -> String {
    day.format("%Y-%m-%d").to_string()
}
