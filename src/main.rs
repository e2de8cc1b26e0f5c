//! chatd — chat gateway server.

use std::sync::Arc;

use chatd::config::Config;
use chatd::db::PgStore;
use chatd::routes;
use chatd::state::AppState;
use sqlx::postgres::PgPoolOptions;
use tracing::{info, warn};

#[tokio::main]
async fn main() {
    // Load .env if present (local dev).
    let _ = dotenvy::dotenv();

    let config = Config::from_env();

    // Tracing.
    tracing_subscriber::fmt()
        .with_env_filter(&config.log_level)
        .with_target(true)
        .init();

    info!("chatd starting");
    info!(listen = %config.listen_addr, instance = %config.server_instance);
    if config.uses_dev_secret() {
        warn!("JWT_SECRET not set, using the development secret");
    }

    // ── Postgres ────────────────────────────────────────────
    let pool = PgPoolOptions::new()
        .max_connections(config.db_max_connections)
        .connect(&config.database_url)
        .await
        .expect("failed to connect to Postgres");

    info!("running migrations");
    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .expect("failed to apply migrations");

    info!("database ready");

    // ── Shared state ────────────────────────────────────────
    let state = AppState::new(Arc::new(PgStore::new(pool)), config.clone());

    // ── Bind & serve ────────────────────────────────────────
    let listener = tokio::net::TcpListener::bind(&config.listen_addr)
        .await
        .expect("failed to bind");

    info!(addr = %config.listen_addr, "chatd listening");

    axum::serve(listener, routes::router(state))
        .await
        .expect("server error");
}
