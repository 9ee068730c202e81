use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tokio::{signal, sync::watch};
use tracing::{error, info};

use crate::config::Config;

#[derive(Parser, Debug)]
pub struct ServeCommand {
    /// HTTP server port
    #[arg(short, long, default_value = "8099")]
    pub port: u16,

    /// Address to bind
    #[arg(long, default_value = "0.0.0.0")]
    pub bind: std::net::IpAddr,
}

impl Default for ServeCommand {
    fn default() -> Self {
        Self {
            port: 8099,
            bind: std::net::IpAddr::from([0, 0, 0, 0]),
        }
    }
}

impl ServeCommand {
    pub async fn run(self, config: Config) -> Result<()> {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let engine = config.build_engine()?;
        let config = Arc::new(config);
        let addr = SocketAddr::new(self.bind, self.port);

        info!("HTTP server listening on http://localhost:{}", self.port);
        info!(
            "Preferred quality/circuit: {} / {}",
            config.preferred_quality, config.preferred_circuit
        );

        let server_handle = tokio::spawn(async move {
            if let Err(e) = crate::server::run_server(addr, engine, config, shutdown_rx).await {
                error!("[server] Error: {}", e);
            }
        });

        signal::ctrl_c().await?;
        info!("Shutting down...");
        let _ = shutdown_tx.send(true);
        let _ = server_handle.await;

        info!("Done.");
        Ok(())
    }
}
