mod app;
mod config;
mod error;
mod middleware;
mod routes;
mod state;
mod stats;
mod users;

use crate::config::AppConfig;
use crate::state::AppState;

fn init_tracing(config: &AppConfig) {
    let env_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| config.log_filter());

    if config.json_logs {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(env_filter).init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let app_state = AppState::init()?;
    init_tracing(&app_state.config);

    tracing::info!(
        environment = %app_state.config.environment,
        users = app_state.users.count(),
        rate_limited = app_state.rate_limiter.is_some(),
        "starting userdir"
    );

    let addr = app_state.config.socket_addr()?;
    let drain_timeout = app_state.config.shutdown_timeout;
    let app = app::build_app(app_state);
    app::serve(app, addr, drain_timeout).await
}
