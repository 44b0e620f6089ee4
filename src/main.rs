use spaceprobe_broker::{
    listener, router, BroadcastHub, BrokerConfig, BrokerState, InMemorySensorStore,
    PostgresSensorStore, ReadingPipeline, SensorStore,
};
use sqlx::postgres::PgPoolOptions;
use std::future::IntoFuture;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "spaceprobe_broker=info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("🚀 Starting Spaceprobe Broker v{}", env!("CARGO_PKG_VERSION"));

    let config = BrokerConfig::from_env()?;

    let store: Arc<dyn SensorStore> = match &config.database_url {
        Some(database_url) => {
            info!("Connecting to database...");
            let pool = PgPoolOptions::new()
                .max_connections(config.db_max_connections)
                .connect(database_url)
                .await?;

            let store = PostgresSensorStore::new(pool);
            store.initialize().await?;
            info!("✅ Database schema initialized");
            Arc::new(store)
        }
        None => {
            warn!("DATABASE_URL not set, readings are kept in memory only");
            Arc::new(InMemorySensorStore::new())
        }
    };

    let hub = BroadcastHub::with_capacity(config.wildcard_policy, config.observer_queue_capacity);
    let policy = config.reliability_policy.build(config.reliability_epsilon);
    let pipeline = Arc::new(
        ReadingPipeline::new(store, policy, hub.clone()).with_window(config.selection_window),
    );

    info!("📋 Configuration loaded:");
    info!("   Reliability policy: {}", pipeline.estimator().policy().name());
    info!("   Reliability epsilon: {}", config.reliability_epsilon);
    info!("   Selection window: {:?}", config.selection_window);
    info!("   Wildcard policy: {:?}", hub.policy());
    info!("   Observer queue capacity: {}", config.observer_queue_capacity);
    info!("   CORS origins: {:?}", config.cors_origins);

    let tcp_listener = tokio::net::TcpListener::bind(config.tcp_bind_address()).await?;
    let ingest = tokio::spawn(listener::serve(tcp_listener, pipeline));

    let app = router(BrokerState::new(hub), &config.cors_origins);
    let addr: SocketAddr = config.ws_bind_address().parse()?;
    info!("🎧 Listening on http://{}", addr);
    info!("📡 WebSocket endpoint: ws://{}/ws", addr);

    let http_listener = tokio::net::TcpListener::bind(&addr).await?;
    let server = axum::serve(http_listener, app.into_make_service()).into_future();

    tokio::select! {
        result = server => result?,
        result = ingest => {
            if let Err(e) = result {
                error!("Ingestion listener stopped: {}", e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Shutting down");
        }
    }

    Ok(())
}
