use std::sync::Arc;

use gateway::config::GatewayConfig;
use gateway::{db, AppState};
use gateway_core::acceptor::{self, AcceptorDeps};
use gateway_core::location_store::LocationStore;
use gateway_core::misc_store::MiscStore;
use gateway_core::registry::{DeviceRegistry, PgConfigStore};
use gateway_core::sublist::SublistMap;
use gateway_core::websocket;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    let config = GatewayConfig::from_env();
    tracing_subscriber::fmt().with_env_filter(EnvFilter::new(config.log_filter.clone())).init();

    info!("connecting to database...");
    let pool = db::create_pool(&config.database_url).await;
    db::run_migrations(&pool).await;
    info!("migrations applied");

    let registry = Arc::new(DeviceRegistry::new());
    let sublist_map = Arc::new(SublistMap::new());
    let location_store = LocationStore::new(pool.clone(), config.store_buf_size);
    let misc_store = Arc::new(MiscStore::new(pool.clone()));
    let config_fetcher = Arc::new(PgConfigStore::new(pool.clone()));

    tokio::spawn(location_store.clone().run_timer_flusher(config.store_ticker, config.store_max_age));
    tokio::spawn(location_store.clone().run_writer());

    let acceptor_deps = Arc::new(AcceptorDeps {
        registry: registry.clone(),
        config_fetcher,
        sublist_map: sublist_map.clone(),
        location_store: location_store.clone(),
        misc_store: misc_store.clone(),
        proxy_protocol_enabled: config.proxy_protocol_enabled,
    });

    let tcp_listener = TcpListener::bind(&config.tcp_addr).await.expect("failed to bind tcp listener");
    info!(addr = %config.tcp_addr, "gps listener bound");
    tokio::spawn(acceptor::run_acceptor(tcp_listener, acceptor_deps));

    let ws_listener = TcpListener::bind(&config.ws_addr).await.expect("failed to bind websocket listener");
    info!(addr = %config.ws_addr, "websocket listener bound");
    tokio::spawn(run_ws_listener(ws_listener, sublist_map.clone()));

    let state = AppState { pool, registry, sublist_map, location_store, misc_store };
    let router = gateway::build_router(state);
    let http_listener = TcpListener::bind(&config.http_addr).await.expect("failed to bind http listener");
    info!(addr = %config.http_addr, "control plane listening");
    axum::serve(http_listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("control plane error");
    info!("gateway shut down gracefully");
}

async fn run_ws_listener(listener: TcpListener, sublist_map: Arc<SublistMap>) {
    loop {
        let (stream, _addr) = match listener.accept().await {
            Ok(pair) => pair,
            Err(err) => {
                tracing::warn!(error = %err, "io_error: websocket accept failed");
                continue;
            }
        };
        let sublist_map = sublist_map.clone();
        tokio::spawn(async move {
            match tokio_tungstenite::accept_async(stream).await {
                Ok(ws) => websocket::run_subscriber_session(ws, sublist_map).await,
                Err(err) => tracing::debug!(error = %err, "websocket handshake failed"),
            }
        });
    }
}

/// Waits for SIGTERM or Ctrl-C (SIGINT) and returns to trigger graceful shutdown.
async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => { info!("received Ctrl+C, shutting down"); },
        _ = terminate => { info!("received SIGTERM, shutting down"); },
    }
}
