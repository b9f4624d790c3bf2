use anyhow::Result;
use std::sync::OnceLock;
use tracing_subscriber::{fmt, layer::SubscriberExt, EnvFilter, Registry};

static SUBSCRIBER_GUARD: OnceLock<()> = OnceLock::new();

/// Initialize the global tracing subscriber for the Parley workspace.
///
/// `RUST_LOG` wins over `default_directive`. Repeated calls are no-ops so
/// tests and binaries can both call it.
pub fn init_tracing(default_directive: &str) -> Result<()> {
    if SUBSCRIBER_GUARD.get().is_some() {
        return Ok(());
    }

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_directive))?;
    let subscriber = Registry::default().with(filter).with(fmt::layer());
    tracing::subscriber::set_global_default(subscriber)?;
    SUBSCRIBER_GUARD.set(()).ok();

    Ok(())
}
