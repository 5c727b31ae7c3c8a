use anyhow::Context;
use dotenvy::dotenv;
use log::{error, info};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use learnserver::ai::AiClient;
use learnserver::api_router::configure_api_routes;
use learnserver::auth::tokens::TokenManager;
use learnserver::bootstrap;
use learnserver::config::AppConfig;
use learnserver::email::Mailer;
use learnserver::shared::state::AppState;
use learnserver::shared::utils::create_conn;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = AppConfig::from_env()?;
    let pool = create_conn(&config.database_url).context("failed to build database pool")?;

    // Schema failures abort startup; a half-initialized database is worse
    // than no server.
    bootstrap::run_schema(&pool).await?;
    if let Some(seed) = &config.admin_seed {
        bootstrap::seed_admin(&pool, seed).await?;
    }

    let tokens = TokenManager::new(&config.jwt);
    let mailer = Mailer::new(&config.smtp).context("failed to build SMTP transport")?;
    let ai = AiClient::new(&config.ai);
    let state = Arc::new(AppState::new(pool, config.clone(), tokens, mailer, ai));

    let app = configure_api_routes(state.clone())
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let addr = config.bind_address();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!("learnserver listening on {addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {err}");
        return;
    }
    info!("Shutting down");
}
