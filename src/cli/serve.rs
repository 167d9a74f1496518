use anyhow::Result;
use tracing::info;

use repograph::config::Config;
use repograph::jobs::Orchestrator;
use repograph::server;

/// Start the HTTP server; flags override the `[server]` section
pub async fn serve_http(config: &Config, host: Option<String>, port: Option<u16>) -> Result<()> {
    let host = host.unwrap_or_else(|| config.server.host.clone());
    let port = port.unwrap_or(config.server.port);

    let orchestrator = Orchestrator::from_config(config)?;
    info!("Database: {}", orchestrator.db().path().display());

    println!("repograph server on http://{}:{}", host, port);
    server::serve(server::router(orchestrator, &config.server), &host, port).await
}
