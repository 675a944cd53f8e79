//! 守护进程配置 (命令行参数，缺省时读取环境变量)

use std::net::SocketAddr;

use clap::Parser;

use cg_core::CreditCostTable;
use cg_ledger::QuotaConfig;

/// Credit-gated completion streaming server
#[derive(Parser, Debug, Clone)]
#[command(version, about, long_about = None)]
pub struct DaemonConfig {
    /// Listen address
    #[arg(long, env = "CHATGATE_ADDR", default_value = "0.0.0.0:3001")]
    pub addr: SocketAddr,

    /// Daily credits for authenticated users (0 disables)
    #[arg(long, env = "FREE_CREDITS_LIMIT_REQUESTS_AUTH", default_value_t = 0)]
    pub daily_user: u32,

    /// Daily credits for anonymous callers, keyed by client address (0 disables)
    #[arg(long, env = "FREE_CREDITS_LIMIT_REQUESTS_IP", default_value_t = 0)]
    pub daily_ip: u32,

    /// Per-mode cost overrides, e.g. `deep=8,gpt-4o-mini=1`
    #[arg(long, env = "CHAT_MODE_CREDIT_COSTS")]
    pub credit_costs: Option<String>,

    /// Redis URL of the shared quota store; in-memory store when unset
    #[arg(long, env = "KV_URL")]
    pub kv_url: Option<String>,

    #[arg(long, env = "REDIS_URL", hide = true)]
    pub redis_url: Option<String>,

    /// Token expected in `x-admin-token`; admin routes are disabled when unset
    #[arg(long, env = "CHATGATE_ADMIN_TOKEN", hide_env_values = true)]
    pub admin_token: Option<String>,

    #[arg(long, env = "POSTHOG_API_KEY", hide_env_values = true)]
    pub posthog_api_key: Option<String>,

    #[arg(long, env = "POSTHOG_HOST")]
    pub posthog_host: Option<String>,
}

impl DaemonConfig {
    pub fn store_url(&self) -> Option<&str> {
        self.kv_url
            .as_deref()
            .or(self.redis_url.as_deref())
            .filter(|url| !url.trim().is_empty())
    }

    pub fn quotas(&self) -> QuotaConfig {
        QuotaConfig {
            daily_user: self.daily_user,
            daily_ip: self.daily_ip,
        }
    }

    pub fn cost_table(&self) -> cg_core::Result<CreditCostTable> {
        match self.credit_costs.as_deref() {
            Some(overrides) => CreditCostTable::parse_overrides(overrides),
            None => Ok(CreditCostTable::new()),
        }
    }
}
