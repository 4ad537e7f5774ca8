//! HTTP API server implementation
//!
//! Builds the axum router over a shared [`PipelineManager`] and serves it.

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use thiserror::Error;
use tokio::net::TcpListener;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use super::routes::{self, AppState};
use crate::config::ApiConfig;
use crate::pipeline::PipelineManager;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Failed to bind to {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Server error: {0}")]
    Serve(#[source] std::io::Error),
}

/// HTTP API server
pub struct HttpApiServer {
    config: ApiConfig,
    state: AppState,
}

impl HttpApiServer {
    pub fn new(config: ApiConfig, pipeline: PipelineManager) -> Self {
        Self {
            config,
            state: AppState::new(pipeline),
        }
    }

    pub fn state(&self) -> AppState {
        self.state.clone()
    }

    /// Bind to the configured address and serve until the process exits.
    pub async fn start(self) -> Result<(), ServerError> {
        let addr = format!("{}:{}", self.config.host, self.config.port);
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|source| ServerError::Bind {
                addr: addr.clone(),
                source,
            })?;
        self.serve(listener).await
    }

    /// Serve on an already-bound listener.
    pub async fn serve(self, listener: TcpListener) -> Result<(), ServerError> {
        if let Ok(local) = listener.local_addr() {
            tracing::info!("HTTP API server listening on {}", local);
        }
        axum::serve(listener, self.router())
            .await
            .map_err(ServerError::Serve)
    }

    /// Router with all routes and middleware
    pub fn router(&self) -> Router {
        Router::new()
            .route("/health", get(routes::health_check))
            .route("/ai/test", get(routes::test_connection))
            .route("/ai/analyze", post(routes::analyze))
            .route("/ai/status", get(routes::pipeline_status))
            .route("/ai/metrics", get(routes::system_metrics))
            .with_state(self.state.clone())
            .layer(DefaultBodyLimit::max(self.config.max_body_size))
            .layer(TraceLayer::new_for_http())
            .layer(CorsLayer::permissive())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PipelineConfig;
    use crate::models::LexiconBackend;
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use serde_json::{json, Value};
    use std::sync::Arc;
    use tower::ServiceExt;

    fn server(cache_dir: &std::path::Path) -> HttpApiServer {
        let config = PipelineConfig {
            model_name: "geko-lexicon-base".to_string(),
            cache_dir: cache_dir.to_path_buf(),
            ..PipelineConfig::default()
        };
        let pipeline = PipelineManager::new(config, Arc::new(LexiconBackend::new())).unwrap();
        HttpApiServer::new(ApiConfig::default(), pipeline)
    }

    async fn call(router: Router, request: Request<Body>) -> (StatusCode, Value) {
        let response = router.oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    fn post_json(uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_health() {
        let dir = tempfile::tempdir().unwrap();
        let (status, body) = call(server(dir.path()).router(), get("/health")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn test_connection_reports_active_model() {
        let dir = tempfile::tempdir().unwrap();
        let (status, body) = call(server(dir.path()).router(), get("/ai/test")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "AI Core connected");
        assert_eq!(body["ai_core_status"]["active_model"], "geko-lexicon-base");
        assert_eq!(body["ai_core_status"]["backend"], "lexicon");
    }

    #[tokio::test]
    async fn test_analyze() {
        let dir = tempfile::tempdir().unwrap();
        let request = post_json(
            "/ai/analyze",
            json!({"text": "server deploy failed with a database error"}),
        );
        let (status, body) = call(server(dir.path()).router(), request).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
        assert_eq!(body["result"]["status"], "ok");
        assert_eq!(body["result"]["predicted_category"], "technical");
        assert_eq!(body["result"]["formatted"], true);
    }

    #[tokio::test]
    async fn test_analyze_empty_text_is_data() {
        let dir = tempfile::tempdir().unwrap();
        let request = post_json("/ai/analyze", json!({"text": "  ", "options": {"postprocess": false}}));
        let (status, body) = call(server(dir.path()).router(), request).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["result"]["status"], "error");
        assert_eq!(body["result"]["error"], "empty input");
    }

    #[tokio::test]
    async fn test_analyze_rejects_malformed_body() {
        let dir = tempfile::tempdir().unwrap();
        let response = server(dir.path())
            .router()
            .oneshot(post_json("/ai/analyze", json!({"content": "no text field"})))
            .await
            .unwrap();
        assert!(response.status().is_client_error());
    }

    #[tokio::test]
    async fn test_status_and_metrics() {
        let dir = tempfile::tempdir().unwrap();
        let server = server(dir.path());

        let (status, info) = call(server.router(), get("/ai/status")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(info["model_name"], "geko-lexicon-base");
        assert_eq!(info["validation_threshold"], 0.6);
        assert_eq!(info["max_validation_retries"], 2);

        let (status, health) = call(server.router(), get("/ai/metrics")).await;
        assert_eq!(status, StatusCode::OK);
        assert!(health["status"] == "healthy" || health["status"] == "warning");
        assert!(health["metrics"]["cpu_count"].as_u64().unwrap() >= 1);
    }
}
