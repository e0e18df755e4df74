//! warden - confinement zone host
//!
//! Binary name: `warden`

mod cli;
mod host;
mod signals;

use anyhow::{Context, Result};
use clap::Parser;
use serde::Serialize;
use serde_json::json;

use cli::{Cli, Commands};

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    let text = serde_json::to_string_pretty(value).context("Failed to encode output")?;
    println!("{text}");
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mut settings = warden_core::load_settings(cli.config.as_deref())
        .await
        .context("Failed to load configuration")?;
    if let Some(data_dir) = cli.data_dir {
        settings.data_dir = data_dir;
    }

    match cli.command {
        Commands::Run => host::run(settings).await,
        Commands::Zones => print_json(&host::open(&settings)?.zones()),
        Commands::List => {
            let manager = host::open(&settings)?;
            let now = manager.now();
            let rows: Vec<_> = manager
                .restrictions()
                .into_iter()
                .map(|record| {
                    json!({
                        "remaining": record.remaining(now).to_string(),
                        "expired": record.is_expired(now),
                        "record": record,
                    })
                })
                .collect();
            print_json(&rows)
        }
        Commands::Config => print_json(&settings),
    }
}
