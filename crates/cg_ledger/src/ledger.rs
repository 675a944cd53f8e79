//! 额度账本
//!
//! 每次主存储调用都与本地降级缓存竞速 (固定截止时间)，
//! 主存储的任何故障都不会传递给调用方。

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use cg_core::{Identity, IdentityKind};

use crate::clock::{Clock, SystemClock};
use crate::fallback::FallbackStore;
use crate::race::{first_of, FallbackCause, Race, PRIMARY_STORE_DEADLINE};
use crate::store::QuotaStore;

/// 每日配额，0 表示该身份类型关闭额度功能
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QuotaConfig {
    /// 已登录用户
    pub daily_user: u32,
    /// 匿名 IP
    pub daily_ip: u32,
}

impl QuotaConfig {
    pub fn daily_quota(&self, kind: IdentityKind) -> u32 {
        match kind {
            IdentityKind::User => self.daily_user,
            IdentityKind::Ip => self.daily_ip,
        }
    }
}

/// 额度账本
pub struct CreditLedger {
    store: Arc<dyn QuotaStore>,
    fallback: Arc<FallbackStore>,
    clock: Arc<dyn Clock>,
    quotas: QuotaConfig,
    deadline: Duration,
}

impl CreditLedger {
    pub fn new(store: Arc<dyn QuotaStore>, fallback: Arc<FallbackStore>, quotas: QuotaConfig) -> Self {
        Self {
            store,
            fallback,
            clock: Arc::new(SystemClock),
            quotas,
            deadline: PRIMARY_STORE_DEADLINE,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = deadline;
        self
    }

    pub fn quotas(&self) -> QuotaConfig {
        self.quotas
    }

    pub fn daily_quota(&self, kind: IdentityKind) -> u32 {
        self.quotas.daily_quota(kind)
    }

    /// 当前剩余额度 (必要时懒补充)
    pub async fn remaining(&self, identity: &Identity) -> u32 {
        let daily = self.daily_quota(identity.kind());
        if daily == 0 {
            return 0;
        }

        let today = self.clock.today();
        let key = identity.storage_key();
        let race = first_of(
            self.store.remaining(identity, daily, today),
            self.deadline,
            || self.fallback.remaining(&key, daily, today),
        )
        .await;

        self.settle("remaining", identity, race)
    }

    /// 余额足够时原子扣减 `cost`，返回是否成功
    pub async fn deduct(&self, identity: &Identity, cost: u32) -> bool {
        let daily = self.daily_quota(identity.kind());
        if daily == 0 {
            debug!(identity = %identity, "Credits disabled for identity kind");
            return false;
        }

        let today = self.clock.today();
        let key = identity.storage_key();
        let race = first_of(
            self.store.deduct(identity, cost, daily, today),
            self.deadline,
            || self.fallback.try_deduct(&key, cost, daily, today),
        )
        .await;

        self.settle("deduct", identity, race)
    }

    /// 无条件重置为满额，返回新余额
    pub async fn force_reset(&self, identity: &Identity) -> u32 {
        let daily = self.daily_quota(identity.kind());
        let today = self.clock.today();
        let key = identity.storage_key();
        let race = first_of(
            self.store.reset(identity, daily, today),
            self.deadline,
            || self.fallback.reset(&key, daily, today),
        )
        .await;

        self.settle("force_reset", identity, race)
    }

    fn settle<T>(&self, op: &'static str, identity: &Identity, race: Race<T>) -> T {
        if let Race::Fallback { cause, .. } = &race {
            match cause {
                FallbackCause::TimedOut(deadline) => warn!(
                    identity = %identity,
                    op,
                    store = self.store.name(),
                    deadline_ms = deadline.as_millis() as u64,
                    "Quota store timed out, answering from fallback"
                ),
                FallbackCause::Failed(err) => warn!(
                    identity = %identity,
                    op,
                    store = self.store.name(),
                    error = %err,
                    "Quota store failed, answering from fallback"
                ),
            }
        }
        race.into_value()
    }
}
