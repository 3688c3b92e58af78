#![deny(warnings)]
#![deny(clippy::unwrap_used)]

use std::sync::Arc;

use dotenv::dotenv;
use fio_gate::gate::ExecutionCoordinator;
use fio_gate::gate::audit::AuditLog;
use fio_gate::gate::config::GateConfig;
use fio_gate::gate::http::{self, AppState};
use poem::{EndpointExt, Server, listener::TcpListener, middleware::Tracing};
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv().ok();

    // Initialize logging with proper tracing default
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive("info".parse()?),
        )
        .init();

    let config = GateConfig::from_env()?;
    info!(
        "Gate configured for {}@{} targeting {} (max runtime {}s)",
        config.ssh.username,
        config.ssh.address,
        config.policy.target_device,
        config.policy.max_runtime.as_secs()
    );
    if config.server.api_key.is_none() {
        warn!("API_KEY is not set; HTTP endpoints are unauthenticated");
    }

    let audit = Arc::new(AuditLog::from_config(&config.server));
    let coordinator = ExecutionCoordinator::from_config(&config, audit.clone());
    let state = Arc::new(AppState {
        coordinator,
        audit,
        api_key: config.server.api_key.clone(),
    });

    let addr = format!("0.0.0.0:{}", config.server.port);
    info!("Starting fio gate on {}", addr);

    let app = http::app(state).with(Tracing);

    Server::new(TcpListener::bind(addr))
        .name("fio gate")
        .run(app)
        .await?;

    Ok(())
}
