//! Coin Ledger Service - Main Application Entry Point
//!
//! This is a REST API server for a dual-balance virtual coin ledger with
//! payment reconciliation. It provides authenticated endpoints for
//! balances, idempotent charges, refunds, recharge orders, and post
//! boosts, plus public payment-provider notification endpoints.
//!
//! # Architecture
//!
//! - **Web Framework**: Axum (async HTTP server)
//! - **Database**: PostgreSQL with sqlx (async queries)
//! - **Authentication**: API key with SHA-256 hashing
//! - **Payment providers**: WeChat Pay v3 and Alipay, RSA-signed
//! - **Format**: JSON requests/responses
//!
//! # Startup Flow
//!
//! 1. Load configuration from environment variables
//! 2. Create database connection pool
//! 3. Run database migrations
//! 4. Build HTTP router with routes and middleware
//! 5. Start server on configured port

mod config;
mod db;
mod error;
mod gateway;
mod handlers;
mod middleware;
mod models;
mod services;
mod state;

use tracing_subscriber::EnvFilter;

use axum::{
    Router, middleware as axum_middleware,
    routing::{get, post},
};
use tower_http::trace::TraceLayer;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging with tracing subscriber. Reads RUST_LOG environment variable (defaults to "info" level)
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    // Load configuration
    let config = config::Config::from_env()?;
    tracing::info!("Configuration loaded");

    // Create database pool
    let pool = db::create_pool(&config.database_url).await?;
    tracing::info!("Database pool created");

    // Run migrations
    db::run_migrations(&pool).await?;
    tracing::info!("Database migrations complete");

    let state = state::AppState::new(pool, config);
    let port = state.config.server_port;

    // Create authenticated routes (API endpoints)
    let authenticated_routes = Router::new()
        // Balance and ledger routes
        .route("/api/v1/balance", get(handlers::balance::get_balance))
        .route("/api/v1/ledger", get(handlers::balance::list_ledger))
        // Idempotent charge routes
        .route("/api/v1/charges", post(handlers::charges::create_charge))
        .route(
            "/api/v1/charges/{id}/complete",
            post(handlers::charges::complete_charge),
        )
        .route(
            "/api/v1/charges/{id}/refund",
            post(handlers::charges::refund_charge),
        )
        // Recharge routes
        .route("/api/v1/recharge", post(handlers::recharge::create_recharge))
        .route(
            "/api/v1/recharge/sync",
            post(handlers::recharge::sync_recharge),
        )
        // Boost routes
        .route(
            "/api/v1/posts/{id}/boost",
            post(handlers::boost::boost_post),
        )
        // Apply authentication middleware to all routes in this group
        .route_layer(axum_middleware::from_fn_with_state(
            state.clone(),
            middleware::auth::auth_middleware,
        ));

    // Combine authenticated routes with public routes
    let app = Router::new()
        // Public routes (no authentication required)
        .route("/health", get(handlers::health::health_check))
        // Provider notifications authenticate by signature, not API key
        .route("/api/v1/notify/wechat", post(handlers::notify::wechat_notify))
        .route("/api/v1/notify/alipay", post(handlers::notify::alipay_notify))
        // Merge authenticated routes
        .merge(authenticated_routes)
        // Add distributed tracing middleware for observability
        .layer(TraceLayer::new_for_http())
        // Share application state with all handlers via State extraction
        .with_state(state);

    // Bind to network address and start server
    let addr = format!("0.0.0.0:{}", port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on {}", addr);

    // Start serving HTTP requests
    // This blocks forever, handling requests concurrently with tokio
    axum::serve(listener, app).await?;

    Ok(())
}
