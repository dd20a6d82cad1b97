//! Fieldgate policy gateway binary.

use std::net::SocketAddr;
use std::sync::Arc;

use clap::Parser;
use fieldgate_gateway::{create_router, AppState, Args, GatewayConfig, SecurityStack};
use tracing::{debug, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "fieldgate_gateway=info,fieldgate_core=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    let config = GatewayConfig::from(&args);
    config.validate()?;

    info!(
        listen = %config.listen_addr,
        auth = config.auth_mode.as_str(),
        "Starting fieldgate gateway"
    );

    // A partially wired security layer must never serve traffic.
    let stack = Arc::new(SecurityStack::build(&config)?);
    info!(
        request_timeout_ms = config.request_timeout.as_millis() as u64,
        policy_cache = stack.policy_cache.is_some(),
        "Security provider ready"
    );

    let sweeper = stack.clone();
    let sweep_interval = config.sweep_interval;
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(sweep_interval);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            match sweeper.sweep_expired() {
                Ok(0) => {}
                Ok(removed) => debug!(removed, "swept expired credentials"),
                Err(e) => warn!(error = %e, "credential sweep failed"),
            }
        }
    });

    let state = AppState::from_stack(&stack, config.clone());
    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind(&config.listen_addr).await?;
    info!("Gateway listening on {}", config.listen_addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}
