use std::net::SocketAddr;

use clap::{Parser, ValueEnum};
use paybridge_core::LedgerStorageConfig;
use paybridge_service::{build_router, ServiceConfig, ServiceState};
use tracing::info;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LedgerStorageMode {
    Auto,
    Memory,
    Postgres,
}

#[derive(Debug, Parser)]
#[command(name = "paybridged", version, about = "multi-tenant ISO 20022 payment middleware service")]
struct Cli {
    /// REST socket address to bind, e.g. 127.0.0.1:8091
    #[arg(long, default_value = "127.0.0.1:8091")]
    listen: SocketAddr,
    /// Ledger persistence backend. `auto` picks postgres when a database url is configured.
    #[arg(long, value_enum, default_value_t = LedgerStorageMode::Auto, env = "PAYBRIDGE_LEDGER_STORAGE")]
    ledger_storage: LedgerStorageMode,
    /// PostgreSQL url for audit ledger persistence.
    #[arg(long, env = "PAYBRIDGE_LEDGER_DATABASE_URL")]
    ledger_database_url: Option<String>,
    /// Max PostgreSQL pool connections for ledger persistence.
    #[arg(long, default_value_t = 5, env = "PAYBRIDGE_LEDGER_PG_MAX_CONNECTIONS")]
    ledger_pg_max_connections: u32,
    /// Clearing-system endpoint to dispatch outbound payment requests to.
    /// Falls back to an in-process echo fixture when unset.
    #[arg(long, env = "PAYBRIDGE_CLEARING_ENDPOINT")]
    clearing_endpoint: Option<String>,
    /// Fraud-engine endpoint to assess inbound payments against.
    /// Falls back to an always-approve fixture when unset.
    #[arg(long, env = "PAYBRIDGE_FRAUD_ENDPOINT")]
    fraud_endpoint: Option<String>,
}

fn resolve_ledger_storage(cli: &Cli) -> anyhow::Result<LedgerStorageConfig> {
    let resolved_url = cli.ledger_database_url.clone().or_else(|| std::env::var("DATABASE_URL").ok());

    let storage = match cli.ledger_storage {
        LedgerStorageMode::Memory => LedgerStorageConfig::memory(),
        LedgerStorageMode::Postgres => {
            let database_url = resolved_url
                .ok_or_else(|| anyhow::anyhow!("ledger_storage=postgres requires --ledger-database-url or DATABASE_URL"))?;
            LedgerStorageConfig::postgres(database_url, cli.ledger_pg_max_connections)
        }
        LedgerStorageMode::Auto => match resolved_url {
            Some(database_url) => LedgerStorageConfig::postgres(database_url, cli.ledger_pg_max_connections),
            None => LedgerStorageConfig::memory(),
        },
    };

    Ok(storage)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(std::env::var("RUST_LOG").unwrap_or_else(|_| "paybridge_service=info,info".to_string()))
        .init();

    let cli = Cli::parse();
    let ledger_storage = resolve_ledger_storage(&cli)?;
    let config = ServiceConfig { ledger_storage, clearing_endpoint: cli.clearing_endpoint, fraud_endpoint: cli.fraud_endpoint };
    let state = ServiceState::bootstrap(config).await?;
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(cli.listen).await?;
    info!("paybridge-service listening on {}", listener.local_addr()?);
    axum::serve(listener, app).await?;

    Ok(())
}
