use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio::net::TcpListener;
use tracing::{info, warn};

use coupon_drop::config::{Config, DEFAULT_CONFIG_PATH};
use coupon_drop::store::{self, CouponStore};
use coupon_drop::{routes, seed, AppState};

#[derive(Debug, Parser)]
#[command(name = "coupon-drop", version)]
#[command(about = "Serve single-use coupon codes with a per-visitor cooldown")]
struct Cli {
    /// TOML config file; created with defaults if missing.
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the HTTP service (default).
    Serve,
    /// Replace the coupon pool with freshly generated codes and clear the claim ledger.
    Seed {
        /// Number of coupons; defaults to `seed_count` from the config.
        #[arg(short = 'n', long)]
        count: Option<usize>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = Config::load(&cli.config)?;
    info!("Loaded config: {:?}", config);

    let store = store::open(&config.database_url)
        .with_context(|| format!("Failed to open store {}", config.database_url))?;

    match cli.command.unwrap_or(Command::Serve) {
        Command::Seed { count } => {
            let count = count.unwrap_or(config.seed_count);
            let total = tokio::task::spawn_blocking(move || seed::seed_pool(store.as_ref(), count))
                .await?
                .context("Failed to seed coupon pool")?;
            info!(total, "Seeding complete");
            Ok(())
        }
        Command::Serve => serve(store, config).await,
    }
}

async fn serve(store: Arc<dyn CouponStore>, config: Config) -> anyhow::Result<()> {
    let stats = {
        let store = store.clone();
        tokio::task::spawn_blocking(move || store.pool_stats()).await??
    };
    if stats.total == 0 {
        warn!("Coupon pool is empty; every claim will fail until `coupon-drop seed` is run");
    } else {
        info!(total = stats.total, unclaimed = stats.unclaimed, "Coupon pool ready");
    }

    let state = AppState::new(store, &config);
    let app = routes::router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    info!(
        cooldown_minutes = config.cooldown_minutes,
        prefix = %config.api_prefix,
        "Coupon service listening on http://{}",
        addr
    );

    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind to {addr}"))?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    .context("HTTP server error")?;

    Ok(())
}
