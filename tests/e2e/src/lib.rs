//! Helpers for booting a real Geko HTTP server in-process.

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use geko_runtime::api::HttpApiServer;
use geko_runtime::config::{ApiConfig, FallbackModelConfig, PipelineConfig};
use geko_runtime::models::LexiconBackend;
use geko_runtime::PipelineManager;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

/// A server bound to an ephemeral port. Aborted on drop.
pub struct TestServer {
    pub addr: SocketAddr,
    pub client: reqwest::Client,
    handle: JoinHandle<()>,
}

impl TestServer {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Pipeline over the built-in lexicon catalog, caching under `cache_dir`.
pub fn lexicon_pipeline(
    model: &str,
    fallbacks: &[(&str, i32)],
    cache_dir: &Path,
) -> Result<PipelineManager> {
    let config = PipelineConfig {
        model_name: model.to_string(),
        cache_dir: cache_dir.to_path_buf(),
        fallback_models: fallbacks
            .iter()
            .map(|(name, priority)| FallbackModelConfig::new(*name, *priority))
            .collect(),
        ..PipelineConfig::default()
    };
    PipelineManager::new(config, Arc::new(LexiconBackend::new()))
        .context("pipeline construction failed")
}

/// Serve `pipeline` on 127.0.0.1 and wait until `/health` answers.
pub async fn spawn_server(pipeline: PipelineManager) -> Result<TestServer> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    let server = HttpApiServer::new(ApiConfig::default(), pipeline);

    let handle = tokio::spawn(async move {
        if let Err(e) = server.serve(listener).await {
            tracing::error!("test server exited: {}", e);
        }
    });

    let test_server = TestServer {
        addr,
        client: reqwest::Client::new(),
        handle,
    };

    for _ in 0..50 {
        if let Ok(response) = test_server.client.get(test_server.url("/health")).send().await {
            if response.status().is_success() {
                return Ok(test_server);
            }
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    bail!("server on {} never became healthy", addr)
}
