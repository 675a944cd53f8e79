//! ChatGate Daemon - 额度门控的流式完成服务

mod config;
mod echo;
mod routes;

use std::net::SocketAddr;
use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use cg_ledger::{CreditLedger, FallbackStore, MemoryQuotaStore, QuotaStore, RedisQuotaStore};
use cg_stream::{PostHogReporter, StreamExecutor, TracingReporter, UsageReporter};

use crate::config::DaemonConfig;
use crate::echo::EchoEngine;
use crate::routes::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // .env 不存在时忽略
    let _ = dotenvy::dotenv();

    // 初始化日志
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "chatgate_daemon=debug,cg_ledger=info,cg_stream=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = DaemonConfig::parse();
    tracing::info!("ChatGate Daemon starting...");

    let quotas = config.quotas();
    tracing::info!(
        daily_user = quotas.daily_user,
        daily_ip = quotas.daily_ip,
        "Credit quotas configured"
    );
    if quotas.daily_user == 0 && quotas.daily_ip == 0 {
        tracing::warn!("Both daily quotas are 0, every completion will be rejected");
    }
    let costs = config.cost_table()?;

    // 主存储
    let store: Arc<dyn QuotaStore> = match config.store_url() {
        Some(url) => Arc::new(RedisQuotaStore::connect(url).await?),
        None => {
            tracing::warn!("No KV_URL configured, credits are kept in process memory");
            Arc::new(MemoryQuotaStore::new())
        }
    };
    tracing::info!("Quota store initialized: {}", store.name());

    let ledger = Arc::new(CreditLedger::new(store, Arc::new(FallbackStore::new()), quotas));

    // 用量上报
    let reporter: Arc<dyn UsageReporter> = match config.posthog_api_key.clone() {
        Some(key) => {
            tracing::info!("Usage analytics enabled (PostHog)");
            Arc::new(PostHogReporter::new(key, config.posthog_host.clone()))
        }
        None => Arc::new(TracingReporter),
    };

    let executor = StreamExecutor::new(Arc::new(EchoEngine::default()), ledger, costs)
        .with_reporter(reporter);
    tracing::info!("Stream executor initialized with local echo engine");

    let state = AppState {
        executor: Arc::new(executor),
        admin_token: config.admin_token.as_deref().map(Arc::from),
    };
    if state.admin_token.is_none() {
        tracing::info!("Admin routes disabled (no CHATGATE_ADMIN_TOKEN)");
    }

    let app = routes::router(state);
    let listener = tokio::net::TcpListener::bind(config.addr).await?;
    tracing::info!("ChatGate Daemon listening on {}", config.addr);

    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(async {
            // 等待关闭信号
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("Shutting down...");
        })
        .await?;

    Ok(())
}
