use std::net::SocketAddr;
use std::sync::Arc;

use axum::{routing::get, Router};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use backend::config::{Config, StoreBackend};
use backend::domain::{GameCategory, GameConfig};
use backend::gateway::HttpGateway;
use backend::repository::Stores;
use backend::state::{AppState, Collaborators};
use shared::Money;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize structured logging with JSON formatting (configurable via env)
    let use_json = std::env::var("LOG_FORMAT")
        .unwrap_or_else(|_| "text".to_string())
        .eq_ignore_ascii_case("json");

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "backend=info,tower_http=info".into());

    if use_json {
        // JSON structured logging for production
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        // Human-readable logging for development
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }

    tracing::info!(
        service = "backend",
        version = env!("CARGO_PKG_VERSION"),
        log_format = if use_json { "json" } else { "text" },
        "Starting betting backend"
    );

    // Load configuration
    let config = Config::load()?;
    tracing::info!(
        store = ?config.store.backend,
        allowed_callers = config.settlement.allowed_callers.len(),
        workers = config.jobs.workers,
        "Configuration loaded"
    );
    if config.settlement.allowed_callers.is_empty() {
        tracing::warn!("WEBHOOK_ALLOWED_IPS is empty; deposit and game callbacks will be refused");
    }

    let stores = match config.store.backend {
        StoreBackend::Redis => {
            let redis_client = redis::Client::open(config.store.redis_url.clone())?;
            let redis_conn = redis_client.get_connection_manager().await?;
            tracing::info!("Redis connected");
            Stores::redis(redis_conn)
        }
        StoreBackend::Memory => {
            tracing::warn!("Using the in-memory store; state is lost on restart");
            Stores::in_memory()
        }
    };

    if config.betting.seed_games {
        for game in default_games()? {
            stores.games.upsert_game(&game).await?;
        }
        tracing::info!("Default games loaded");
    }

    let mut collaborators = Collaborators::logging();
    match &config.gateway.base_url {
        Some(base_url) => {
            let gateway = Arc::new(HttpGateway::new(
                base_url,
                &config.gateway.api_key,
                config.gateway.request_timeout,
            )?);
            collaborators.payments = gateway.clone();
            collaborators.sms = gateway.clone();
            collaborators.games = gateway;
            tracing::info!(base_url = %base_url, "Gateway client configured");
        }
        None => tracing::warn!("GATEWAY_BASE_URL not set; outbound calls are only logged"),
    }

    let api_port = config.api_port;
    let metrics_port = config.metrics_port;
    let (app_state, supervisor) = AppState::build(config, stores, collaborators);
    let app = backend::build_router(app_state);

    // Start metrics server
    let metrics_handle = tokio::spawn(start_metrics_server(metrics_port));

    // Start server
    let addr = SocketAddr::from(([0, 0, 0, 0], api_port));
    tracing::info!("Backend API listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    tracing::info!("HTTP server stopped, draining jobs");
    supervisor.shutdown().await;
    metrics_handle.abort();

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}

fn default_games() -> anyhow::Result<Vec<GameConfig>> {
    Ok(vec![
        GameConfig {
            category: GameCategory::LuckyNumber,
            game_cat_id: "1".to_string(),
            name: "Lucky 7".to_string(),
            bet_amount: Money::from_major(50)?,
            payout_multiplier: 5,
            rtp_limit: 90,
            active: true,
        },
        GameConfig {
            category: GameCategory::LuckyNumber,
            game_cat_id: "2".to_string(),
            name: "Lucky 7 Max".to_string(),
            bet_amount: Money::from_major(100)?,
            payout_multiplier: 6,
            rtp_limit: 90,
            active: true,
        },
        GameConfig {
            category: GameCategory::Spin,
            game_cat_id: "1".to_string(),
            name: "Spin & Win".to_string(),
            bet_amount: Money::from_major(20)?,
            payout_multiplier: 10,
            rtp_limit: 92,
            active: true,
        },
    ])
}

async fn start_metrics_server(port: u16) -> anyhow::Result<()> {
    let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
    let handle = builder.install_recorder()?;

    let app = Router::new().route(
        "/metrics",
        get(|| async move { handle.render() }),
    );

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!("Metrics server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
