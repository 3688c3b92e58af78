#![deny(warnings)]
#![deny(clippy::unwrap_used)]

use std::sync::Arc;

use dotenv::dotenv;
use fio_gate::gate::audit::AuditLog;
use fio_gate::gate::config::GateConfig;
use fio_gate::gate::{ExecutionCoordinator, FioGateCommands};
use poem_mcpserver::McpServer;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv().ok();

    // stdout carries the MCP protocol; logs go to stderr
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive("info".parse()?),
        )
        .init();

    let config = GateConfig::from_env()?;
    let audit = Arc::new(AuditLog::from_config(&config.server));
    let coordinator = ExecutionCoordinator::from_config(&config, audit.clone());

    poem_mcpserver::stdio::stdio(McpServer::new().tools(FioGateCommands::new(coordinator, audit)))
        .await?;
    Ok(())
}
