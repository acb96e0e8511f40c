use std::sync::Arc;

use anyhow::Context;
use forum_server::{
    build_app,
    chat::{MemoryMessageStore, MessageStore, PgMessageStore},
    config::ServerConfig,
    db::{
        migrations::run_migrations,
        pool::{check_pool_health, create_pg_pool, PoolConfig},
    },
};
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = ServerConfig::from_env();
    init_tracing(&config);

    if config.is_dev_jwt_secret() {
        warn!("FORUM_JWT_SECRET is unset; using the development secret");
    }

    let store = open_message_store(&config).await?;
    let app = build_app(&config, store)?;

    let listener = TcpListener::bind(config.listen_addr)
        .await
        .with_context(|| format!("failed to bind forum listener on {}", config.listen_addr))?;

    info!(listen_addr = %config.listen_addr, "starting forum server");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("forum server exited unexpectedly")
}

// RUST_LOG wins over FORUM_LOG_FILTER when both are set.
fn init_tracing(config: &ServerConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_filter.as_str()));

    if config.log_json {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

async fn open_message_store(config: &ServerConfig) -> anyhow::Result<Arc<dyn MessageStore>> {
    let Some(database_url) = config.database_url.as_deref() else {
        warn!("FORUM_DATABASE_URL is unset; chat history is kept in memory only");
        return Ok(Arc::new(MemoryMessageStore::new()));
    };

    let pool = create_pg_pool(database_url, PoolConfig::from_env())
        .await
        .context("failed to initialize forum PostgreSQL pool")?;
    check_pool_health(&pool).await?;
    run_migrations(&pool).await?;
    info!("forum PostgreSQL message store ready");

    Ok(Arc::new(PgMessageStore::new(pool)))
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(error) = tokio::signal::ctrl_c().await {
            warn!(%error, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(error) => {
                warn!(%error, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    info!("shutdown signal received");
}
