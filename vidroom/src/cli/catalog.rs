use anyhow::Result;
use clap::Parser;
use room_stream::catalog;

use crate::config::Config;

#[derive(Parser, Debug)]
pub struct CatalogCommand;

impl CatalogCommand {
    pub async fn run(self, config: Config) -> Result<()> {
        println!("Qualities:");
        for (code, label) in catalog::qualities() {
            let marker = preferred_marker(code, &config.preferred_quality);
            println!("  - {}  {}{}", code, label, marker);
        }

        println!();
        println!("Circuits:");
        for (code, label) in catalog::circuits() {
            let marker = preferred_marker(code, &config.preferred_circuit);
            println!("  - {:<8}{}{}", code, label, marker);
        }

        Ok(())
    }
}

fn preferred_marker(code: &str, preferred: &str) -> &'static str {
    if code == preferred { " (preferred)" } else { "" }
}
