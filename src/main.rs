use anyhow::Result;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::info;

use shunt::config::{Config, DatabaseBackend};
use shunt::dispatch::create_dispatch_router;
use shunt::geoip::GeoResolver;
use shunt::storage::{PostgresStorage, SqliteStorage, Storage};
use shunt::volatile::{MemoryStore, RedisStore, VolatileStore};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let config = Config::from_env()?;
    info!("Loaded configuration");

    let storage: Arc<dyn Storage> = match config.database.backend {
        DatabaseBackend::Sqlite => {
            info!("Using SQLite storage: {}", config.database.url);
            Arc::new(
                SqliteStorage::new(&config.database.url, config.database.max_connections).await?,
            )
        }
        DatabaseBackend::Postgres => {
            info!("Using PostgreSQL storage: {}", config.database.url);
            Arc::new(
                PostgresStorage::new(&config.database.url, config.database.max_connections).await?,
            )
        }
    };

    info!("Initializing database...");
    storage.init().await?;
    info!("Database initialized successfully");

    let volatile: Arc<dyn VolatileStore> = if config.volatile.redis_url.is_empty() {
        info!("Using in-process volatile store");
        Arc::new(MemoryStore::new())
    } else {
        info!("Using Redis volatile store: {}", config.volatile.redis_url);
        Arc::new(RedisStore::connect(&config.volatile.redis_url).await?)
    };

    let geo = Arc::new(GeoResolver::from_config(&config.geoip)?);

    let router = create_dispatch_router(
        storage,
        volatile,
        Arc::clone(&geo),
        config.rate_limit.clone(),
    );

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Dispatch server listening on http://{}", addr);

    axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    geo.close();
    info!("Shut down cleanly");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("failed to install shutdown handler: {e}");
    }
}
