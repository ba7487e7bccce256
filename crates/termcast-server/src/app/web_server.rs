use anyhow::Result;

use crate::cli::Cli;
use crate::web::server::WebServer;

/// Run the web server
pub async fn run_web_server(cli: &Cli) -> Result<()> {
    let config = cli.server_config()?;

    tracing::info!(
        addr = %config.bind_addr,
        history_limit = config.manager.history_limit,
        debounce_ms = config.manager.debounce.as_millis() as u64,
        heartbeat_secs = config.heartbeat.as_secs(),
        "Starting termcast"
    );

    // Create and start server
    let server = WebServer::new(config);
    server.start().await?;

    Ok(())
}
