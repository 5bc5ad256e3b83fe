// Library interface for backend - exposes modules for testing

pub mod config;
pub mod domain;
pub mod errors;
pub mod extractors;
pub mod gateway;
pub mod handlers;
pub mod jobs;
pub mod middleware;
pub mod repository;
pub mod services;
pub mod state;

use axum::{
    middleware::from_fn_with_state,
    routing::{get, post},
    Router,
};
use state::AppState;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

/// Build the application router
pub fn build_router(state: AppState) -> Router {
    // Deposit and game results move money, so only listed callers reach them
    let allow_listed = Router::new()
        .route("/api/callbacks/deposit", post(handlers::callbacks::deposit))
        .route("/api/callbacks/game", post(handlers::callbacks::game))
        .route_layer(from_fn_with_state(
            state.clone(),
            middleware::require_allowed_caller,
        ));

    Router::new()
        // Health check
        .route("/health", get(handlers::health::health_check))
        .route("/health/detailed", get(handlers::health::detailed_health))
        // Auth
        .route("/api/auth/otp", post(handlers::auth::request_otp))
        .route("/api/auth/verify", post(handlers::auth::verify_otp))
        // Betting
        .route(
            "/api/bets",
            post(handlers::bets::place_bet).get(handlers::bets::list_bets),
        )
        .route("/api/spins", post(handlers::bets::place_spin))
        // Payments
        .route("/api/deposits", post(handlers::payments::initiate_deposit))
        .route("/api/withdrawals", post(handlers::payments::initiate_withdrawal))
        // Account
        .route("/api/account", get(handlers::account::summary))
        .route("/api/account/self-exclusion", post(handlers::account::self_exclude))
        .route("/api/account/delete", post(handlers::account::request_deletion))
        .route(
            "/api/account/delete/confirm",
            post(handlers::account::confirm_deletion),
        )
        // Provider callbacks
        .route("/api/callbacks/withdrawal", post(handlers::callbacks::withdrawal))
        .route(
            "/api/callbacks/b2b-withdrawal",
            post(handlers::callbacks::b2b_withdrawal),
        )
        .merge(allow_listed)
        // State
        .with_state(state)
        // Middleware
        .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any))
        .layer(TraceLayer::new_for_http())
}
