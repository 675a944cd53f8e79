//! Redis 主存储
//!
//! 补充检查与读/扣减/重置在服务端 Lua 脚本内一次完成，按身份键串行化。

use async_trait::async_trait;
use chrono::NaiveDate;
use redis::aio::MultiplexedConnection;
use redis::Script;

use cg_core::{ChatGateError, Identity, Result};

use crate::clock::day_stamp;
use crate::store::QuotaStore;

/// KEYS: 余额键, 补充日期键
/// ARGV: 每日配额, 今日日期
const GET_REMAINING_SCRIPT: &str = r#"
local key = KEYS[1]
local refill_key = KEYS[2]
local daily = tonumber(ARGV[1])
local today = ARGV[2]

if redis.call('GET', refill_key) ~= today then
    redis.call('SET', key, daily)
    redis.call('SET', refill_key, today)
    return daily
end

local remaining = tonumber(redis.call('GET', key)) or 0
return math.min(remaining, daily)
"#;

/// KEYS: 余额键, 补充日期键
/// ARGV: 消耗, 每日配额, 今日日期
const DEDUCT_SCRIPT: &str = r#"
local key = KEYS[1]
local refill_key = KEYS[2]
local cost = tonumber(ARGV[1])
local daily = tonumber(ARGV[2])
local today = ARGV[3]

local remaining
if redis.call('GET', refill_key) ~= today then
    remaining = daily
    redis.call('SET', refill_key, today)
else
    remaining = math.min(tonumber(redis.call('GET', key)) or 0, daily)
end

if remaining < cost then
    redis.call('SET', key, remaining)
    return 0
end

redis.call('SET', key, remaining - cost)
return 1
"#;

/// KEYS: 余额键, 补充日期键
/// ARGV: 每日配额, 今日日期
const FORCE_RESET_SCRIPT: &str = r#"
local key = KEYS[1]
local refill_key = KEYS[2]
local daily = tonumber(ARGV[1])
local today = ARGV[2]

redis.call('SET', key, daily)
redis.call('SET', refill_key, today)
return daily
"#;

/// Redis 额度存储
#[derive(Clone)]
pub struct RedisQuotaStore {
    conn: MultiplexedConnection,
    get_remaining: Script,
    deduct: Script,
    force_reset: Script,
}

impl RedisQuotaStore {
    /// 连接到 Redis (`redis://` / `rediss://`)
    pub async fn connect(url: &str) -> Result<Self> {
        let client = redis::Client::open(url).map_err(store_error)?;
        let conn = client
            .get_multiplexed_async_connection()
            .await
            .map_err(store_error)?;

        tracing::info!("Connected to redis quota store");

        Ok(Self::from_connection(conn))
    }

    pub fn from_connection(conn: MultiplexedConnection) -> Self {
        Self {
            conn,
            get_remaining: Script::new(GET_REMAINING_SCRIPT),
            deduct: Script::new(DEDUCT_SCRIPT),
            force_reset: Script::new(FORCE_RESET_SCRIPT),
        }
    }
}

#[async_trait]
impl QuotaStore for RedisQuotaStore {
    fn name(&self) -> &'static str {
        "redis"
    }

    async fn remaining(
        &self,
        identity: &Identity,
        daily_quota: u32,
        today: NaiveDate,
    ) -> Result<u32> {
        let mut conn = self.conn.clone();
        let remaining: i64 = self
            .get_remaining
            .key(identity.storage_key())
            .key(identity.refill_key())
            .arg(daily_quota)
            .arg(day_stamp(today))
            .invoke_async(&mut conn)
            .await
            .map_err(store_error)?;

        Ok(clamp_u32(remaining))
    }

    async fn deduct(
        &self,
        identity: &Identity,
        cost: u32,
        daily_quota: u32,
        today: NaiveDate,
    ) -> Result<bool> {
        let mut conn = self.conn.clone();
        let deducted: i64 = self
            .deduct
            .key(identity.storage_key())
            .key(identity.refill_key())
            .arg(cost)
            .arg(daily_quota)
            .arg(day_stamp(today))
            .invoke_async(&mut conn)
            .await
            .map_err(store_error)?;

        Ok(deducted == 1)
    }

    async fn reset(&self, identity: &Identity, daily_quota: u32, today: NaiveDate) -> Result<u32> {
        let mut conn = self.conn.clone();
        let remaining: i64 = self
            .force_reset
            .key(identity.storage_key())
            .key(identity.refill_key())
            .arg(daily_quota)
            .arg(day_stamp(today))
            .invoke_async(&mut conn)
            .await
            .map_err(store_error)?;

        Ok(clamp_u32(remaining))
    }
}

fn store_error(err: redis::RedisError) -> ChatGateError {
    ChatGateError::Store(err.to_string())
}

fn clamp_u32(value: i64) -> u32 {
    u32::try_from(value.max(0)).unwrap_or(u32::MAX)
}
