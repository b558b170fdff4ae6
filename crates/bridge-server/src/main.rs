//! Bridge ledger server binary.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use bridge_server::config::{Args, StoreKind};
use bridge_server::ledger::{queue, ChannelQueue, Ledger, LedgerMetrics};
use bridge_server::store::{LedgerStore, MemoryStore, PgStore};
use bridge_server::{create_router, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    let args = Args::parse();

    let log_level = args.log_level.clone();
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("bridge_server={},tower_http=info", log_level).into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    if let Err(e) = args.validate() {
        anyhow::bail!("Configuration error: {}", e);
    }

    let store: Arc<dyn LedgerStore> = match args.store {
        StoreKind::Postgres => {
            let url = args
                .database_url
                .as_deref()
                .context("DATABASE_URL is required with the postgres store")?;
            let store = PgStore::connect(url, args.db_max_connections, args.statement_timeout_ms)
                .await
                .context("Failed to connect to database")?;
            store.migrate().await.context("Failed to run migrations")?;
            tracing::info!("Database migrations applied");
            Arc::new(store)
        }
        StoreKind::Memory => {
            tracing::warn!("Using in-memory store; state is lost on shutdown");
            Arc::new(MemoryStore::new())
        }
    };

    let (queue, events) = ChannelQueue::new(args.event_queue_capacity);
    tokio::spawn(queue::run_consumer(events));

    let ledger = Ledger::new(
        store,
        Arc::new(queue),
        Arc::new(LedgerMetrics::new()),
        args.ledger_settings(),
    );

    if args.seed_fee_catalog {
        let seeded = ledger
            .seed_fee_catalog()
            .await
            .context("Failed to seed fee catalog")?;
        tracing::info!(rules = seeded, "Fee catalog seeded");
    }

    let sweeper = ledger.clone();
    let sweep_every = Duration::from_secs(args.idempotency_sweep_secs);
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(sweep_every);
        loop {
            interval.tick().await;
            match sweeper.purge_expired_idempotency().await {
                Ok(0) => {}
                Ok(purged) => tracing::info!(purged, "Expired idempotency records purged"),
                Err(e) => tracing::warn!(error = %e, "Idempotency sweep failed"),
            }
        }
    });

    let app = create_router(AppState::new(ledger));

    let listener = tokio::net::TcpListener::bind(args.listen)
        .await
        .with_context(|| format!("Failed to bind {}", args.listen))?;
    tracing::info!(listen = %args.listen, store = ?args.store, "Bridge server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
    }
    tracing::info!("Shutting down");
}
