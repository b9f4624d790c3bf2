use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use parley_core::{
    telemetry, AppState, ExchangeCoordinator, ExchangeOutcome, LlmProviderKind, MessageKind,
    RuntimeSettings, StateStore,
};
use tempfile::TempDir;
use tokio::runtime::Runtime;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "xtask", version, about = "Automation helpers for Parley")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run one exchange against the mock provider and reload it from disk.
    Smoke,
}

fn main() -> Result<()> {
    telemetry::init_tracing("info")?;
    let cli = Cli::parse();

    match cli.command {
        Commands::Smoke => smoke_test(),
    }
}

fn smoke_test() -> Result<()> {
    let runtime = Runtime::new()?;
    let temp_dir = TempDir::new()?;
    let defaults = RuntimeSettings::default();
    let settings = RuntimeSettings {
        provider: LlmProviderKind::Mock,
        api_key: Some("sk-smoke".into()),
        relay_endpoint: Some(format!("http://{}/api/images/upload", defaults.server_addr)),
        data_dir: temp_dir.path().to_path_buf(),
        ..defaults
    };
    let state = AppState::open(&settings)?;
    state.create_chat()?;

    let exchange = ExchangeCoordinator::from_settings(state, &settings)
        .map_err(|err| anyhow::anyhow!(err.user_message()))?;
    let report = runtime.block_on(exchange.send("ping from xtask", MessageKind::Text))?;
    if report.outcome != ExchangeOutcome::Completed {
        bail!("smoke exchange ended with {:?}", report.outcome);
    }

    let reloaded = StateStore::on_disk(settings.data_dir.clone()).load_state()?;
    match reloaded.current_chat() {
        Some(chat) => info!(
            "messages" = chat.messages.len(),
            "title" = %chat.title,
            "smoke test chat saved"
        ),
        None => bail!("smoke chat was not persisted"),
    }

    Ok(())
}
