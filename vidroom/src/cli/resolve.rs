use anyhow::{Result, bail};
use clap::Parser;
use room_stream::{ResolutionOptions, RoomAddress};
use tokio::time::Instant;

use crate::config::Config;

#[derive(Parser, Debug)]
pub struct ResolveCommand {
    /// Numeric room address
    pub address: String,

    /// Desired quality (defaults to the configured preference)
    #[arg(short, long)]
    pub quality: Option<String>,

    /// Desired circuit (defaults to the configured preference)
    #[arg(short, long)]
    pub circuit: Option<String>,

    /// Bitrate code to request up front
    #[arg(long)]
    pub rate: Option<i64>,

    /// Ignore any cached signing function
    #[arg(long)]
    pub fresh: bool,

    /// Print the result as JSON
    #[arg(long)]
    pub json: bool,
}

impl ResolveCommand {
    pub async fn run(self, config: Config) -> Result<()> {
        let address = RoomAddress::parse(self.address.trim())?;
        let engine = config.build_engine()?;

        let options = ResolutionOptions::new(
            self.quality
                .unwrap_or_else(|| config.preferred_quality.clone()),
            self.circuit
                .unwrap_or_else(|| config.preferred_circuit.clone()),
        )
        .with_fresh_signature(self.fresh)
        .with_bitrate_code(self.rate);

        let deadline = Instant::now() + config.resolve_timeout();
        let Some(stream) = engine
            .resolve_with_deadline(&address, &options, deadline)
            .await?
        else {
            if self.json {
                println!("null");
                return Ok(());
            }
            bail!("Room {} has no stream (absent, banned or offline)", address);
        };

        if self.json {
            println!("{}", serde_json::to_string_pretty(&stream)?);
            return Ok(());
        }

        println!("Room:     {} ({})", address, address.page_url());
        println!("Stream:   {}", stream.stream_url);
        println!(
            "Quality:  {} {}",
            stream.quality,
            display_or_unknown(&stream.quality_display)
        );
        println!(
            "Circuit:  {} {}",
            stream.circuit,
            display_or_unknown(&stream.circuit_display)
        );

        Ok(())
    }
}

fn display_or_unknown(label: &str) -> String {
    if label.is_empty() {
        "(unknown)".to_string()
    } else {
        format!("({})", label)
    }
}
