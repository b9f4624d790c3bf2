use anyhow::anyhow;
use clap::Parser;
use parley_core::{telemetry, RuntimeSettings};
use parley_server::{start_server_with_config, ServerConfig};
use std::net::SocketAddr;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "parley-server", version, about = "Chat proxy and image relay for Parley")]
struct Cli {
    /// Address to listen on; overrides PARLEY_SERVER_ADDR and parley.yaml.
    #[arg(long)]
    addr: Option<SocketAddr>,
    /// Explicit parley.yaml instead of the platform config locations.
    #[arg(long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    telemetry::init_tracing("info")?;
    let cli = Cli::parse();

    let settings = match &cli.config {
        Some(path) => RuntimeSettings::load_from(path),
        None => RuntimeSettings::load(),
    }
    .map_err(|err| anyhow!(err.user_message()))?;
    let addr = cli.addr.unwrap_or(settings.server_addr);

    let server = start_server_with_config(addr, ServerConfig::from_settings(&settings)).await?;
    tracing::info!(addr = %server.addr, provider = ?settings.provider, "parley-server listening");
    server.wait().await?;
    Ok(())
}
