use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use crate::config::Config;

mod catalog;
mod resolve;
mod serve;

pub use catalog::CatalogCommand;
pub use resolve::ResolveCommand;
pub use serve::ServeCommand;

#[derive(Parser, Debug)]
#[command(name = "vidroom")]
#[command(about = "Resolve playable streams for live broadcast rooms")]
pub struct Args {
    /// YAML config file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Proxy for upstream requests (overrides the config file)
    #[arg(long, global = true)]
    pub proxy: Option<String>,

    /// Log filter used when RUST_LOG is not set
    #[arg(long, global = true, default_value = "info")]
    pub log_level: String,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Start the HTTP server (default)
    Serve(ServeCommand),
    /// Resolve a single room and print its stream
    Resolve(ResolveCommand),
    /// List known qualities and circuits
    Catalog(CatalogCommand),
}

impl Args {
    pub async fn run(self) -> Result<()> {
        init_tracing(&self.log_level);

        let mut config = Config::load(self.config.as_deref())?;
        if let Some(proxy) = self.proxy {
            config.proxy = Some(proxy);
        }

        let command = self
            .command
            .unwrap_or(Command::Serve(ServeCommand::default()));

        match command {
            Command::Serve(cmd) => cmd.run(config).await,
            Command::Resolve(cmd) => cmd.run(config).await,
            Command::Catalog(cmd) => cmd.run(config).await,
        }
    }
}

fn init_tracing(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}
