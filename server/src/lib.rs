use anyhow::Context as _;
use axum::Router;
use parley_core::relay::{ImageKitHost, ImageRelay, ImageUploader};
use parley_core::{LlmDriver, RuntimeSettings};
use std::net::SocketAddr;
use std::sync::Arc;

pub mod server;

#[derive(Clone)]
pub struct ServerConfig {
    pub llm: LlmDriver,
    pub relay: Arc<dyn ImageUploader>,
}

impl ServerConfig {
    pub fn from_settings(settings: &RuntimeSettings) -> Self {
        let llm = LlmDriver::with_provider(settings.provider, Some(settings.openai_base_url.clone()));
        let relay: Arc<dyn ImageUploader> = match &settings.imagekit {
            Some(imagekit) => Arc::new(ImageRelay::new(Arc::new(ImageKitHost::new(imagekit)))),
            None => {
                tracing::warn!("ImageKit is not configured; image uploads will fail");
                Arc::new(server::UnconfiguredHost)
            }
        };
        Self { llm, relay }
    }
}

pub struct StartedServer {
    pub addr: SocketAddr,
    handle: Option<tokio::task::JoinHandle<anyhow::Result<()>>>,
}

impl StartedServer {
    pub async fn wait(self) -> anyhow::Result<()> {
        let mut this = self;
        let handle = this.handle.take().context("server task already consumed")?;

        handle
            .await
            .context("server task panicked")?
            .context("server failed")?;
        Ok(())
    }
}

impl Drop for StartedServer {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

pub async fn start_server_with_config(
    addr: SocketAddr,
    config: ServerConfig,
) -> anyhow::Result<StartedServer> {
    let app: Router = server::router(config);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;

    let actual = listener.local_addr().context("failed to read local addr")?;

    let handle = tokio::spawn(async move {
        axum::serve(listener, app).await.context("server failed")?;
        Ok(())
    });

    Ok(StartedServer {
        addr: actual,
        handle: Some(handle),
    })
}
