//! ChatGate CLI - 额度账本交互管理

use std::io::{self, BufRead, Write};
use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use cg_core::{ChatMode, CreditCostTable, Identity};
use cg_ledger::{CreditLedger, FallbackStore, MemoryQuotaStore, QuotaConfig, QuotaStore, RedisQuotaStore};

/// Inspect and adjust ChatGate credits
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Redis URL of the shared quota store; in-memory store when unset
    #[arg(long, env = "KV_URL")]
    kv_url: Option<String>,

    #[arg(long, env = "REDIS_URL", hide = true)]
    redis_url: Option<String>,

    #[arg(long, env = "FREE_CREDITS_LIMIT_REQUESTS_AUTH", default_value_t = 0)]
    daily_user: u32,

    #[arg(long, env = "FREE_CREDITS_LIMIT_REQUESTS_IP", default_value_t = 0)]
    daily_ip: u32,

    /// Per-mode cost overrides, e.g. `deep=8,gpt-4o-mini=1`
    #[arg(long, env = "CHAT_MODE_CREDIT_COSTS")]
    credit_costs: Option<String>,
}

impl Cli {
    /// 空字符串视为未配置
    fn store_url(&self) -> Option<&str> {
        self.kv_url
            .as_deref()
            .or(self.redis_url.as_deref())
            .filter(|url| !url.trim().is_empty())
    }

    fn cost_table(&self) -> cg_core::Result<CreditCostTable> {
        match self.credit_costs.as_deref() {
            Some(overrides) => CreditCostTable::parse_overrides(overrides),
            None => Ok(CreditCostTable::new()),
        }
    }
}

/// 一条 REPL 命令
#[derive(Debug, PartialEq, Eq)]
enum Command {
    Help,
    Quit,
    Costs,
    Remaining(Identity),
    Deduct(Identity, u32),
    Reset(Identity),
}

fn parse_identity(kind: Option<&str>, value: Option<&str>) -> Result<Identity, String> {
    let value = value.ok_or("missing identity value")?;
    match kind {
        Some("user") => Identity::resolve(Some(value), None),
        Some("ip") => Identity::resolve(None, Some(value)),
        Some(other) => return Err(format!("unknown identity kind: {other}")),
        None => return Err("missing identity kind (user|ip)".to_string()),
    }
    .ok_or_else(|| "empty identity value".to_string())
}

fn parse_command(input: &str) -> Result<Command, String> {
    let mut parts = input.split_whitespace();
    let command = parts.next().ok_or("empty command")?;

    match command {
        "help" => Ok(Command::Help),
        "quit" | "exit" => Ok(Command::Quit),
        "costs" => Ok(Command::Costs),
        "remaining" => Ok(Command::Remaining(parse_identity(parts.next(), parts.next())?)),
        "reset" => Ok(Command::Reset(parse_identity(parts.next(), parts.next())?)),
        "deduct" => {
            let identity = parse_identity(parts.next(), parts.next())?;
            let cost = match parts.next() {
                Some(cost) => cost.parse().map_err(|_| format!("invalid cost: {cost}"))?,
                None => 1,
            };
            Ok(Command::Deduct(identity, cost))
        }
        other => Err(format!("Unknown command: {other}")),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    // 初始化日志
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "cg=info,cg_ledger=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let store: Arc<dyn QuotaStore> = match cli.store_url() {
        Some(url) => Arc::new(RedisQuotaStore::connect(url).await?),
        None => Arc::new(MemoryQuotaStore::new()),
    };
    let quotas = QuotaConfig {
        daily_user: cli.daily_user,
        daily_ip: cli.daily_ip,
    };
    let ledger = CreditLedger::new(store.clone(), Arc::new(FallbackStore::new()), quotas);
    let costs = cli.cost_table()?;

    println!("ChatGate CLI v{}", env!("CARGO_PKG_VERSION"));
    println!(
        "Store: {}, daily quota user={} ip={}",
        store.name(),
        quotas.daily_user,
        quotas.daily_ip
    );
    println!("Type 'help' for available commands, 'quit' to exit.");
    println!();

    let stdin = io::stdin();
    let mut stdout = io::stdout();

    loop {
        print!("cg> ");
        stdout.flush()?;

        let mut input = String::new();
        if stdin.lock().read_line(&mut input)? == 0 {
            break;
        }
        let input = input.trim();

        if input.is_empty() {
            continue;
        }

        let command = match parse_command(input) {
            Ok(command) => command,
            Err(message) => {
                println!("{}", message);
                println!("Type 'help' for available commands.");
                continue;
            }
        };

        match command {
            Command::Help => {
                println!("Available commands:");
                println!("  remaining <user|ip> <id>       - Show remaining credits");
                println!("  deduct <user|ip> <id> [cost]   - Deduct credits (default cost 1)");
                println!("  reset <user|ip> <id>           - Force-reset to the full daily quota");
                println!("  costs                          - Show the credit cost per mode");
                println!("  help                           - Show this help message");
                println!("  quit / exit                    - Exit the CLI");
            }
            Command::Costs => {
                for mode in ChatMode::ALL {
                    println!("  {:<20} {}", mode.as_str(), costs.cost(mode));
                }
            }
            Command::Remaining(identity) => {
                let remaining = ledger.remaining(&identity).await;
                println!("{}: {} remaining", identity, remaining);
            }
            Command::Deduct(identity, cost) => {
                if ledger.deduct(&identity, cost).await {
                    println!("{}: deducted {}, {} remaining", identity, cost, ledger.remaining(&identity).await);
                } else {
                    println!("{}: insufficient credits", identity);
                }
            }
            Command::Reset(identity) => {
                let remaining = ledger.force_reset(&identity).await;
                println!("{}: reset to {}", identity, remaining);
            }
            Command::Quit => {
                println!("Goodbye!");
                break;
            }
        }
    }

    Ok(())
}
