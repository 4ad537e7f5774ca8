//! Drives the HTTP API over real sockets.
//!
//! Run with `cargo test -p geko-e2e --features e2e`.

#![cfg(feature = "e2e")]

use geko_e2e::{lexicon_pipeline, spawn_server};
use serde_json::{json, Value};

#[tokio::test]
async fn health_and_connection() {
    let cache = tempfile::tempdir().unwrap();
    let server = spawn_server(lexicon_pipeline("geko-lexicon-base", &[], cache.path()).unwrap())
        .await
        .unwrap();

    let health: Value = server.client.get(server.url("/health")).send().await.unwrap().json().await.unwrap();
    assert_eq!(health["status"], "ok");

    let test: Value = server.client.get(server.url("/ai/test")).send().await.unwrap().json().await.unwrap();
    assert_eq!(test["status"], "AI Core connected");
    assert_eq!(test["ai_core_status"]["initialized"], true);
}

#[tokio::test]
async fn analyze_round_trip() {
    let cache = tempfile::tempdir().unwrap();
    let server = spawn_server(lexicon_pipeline("geko-lexicon-base", &[], cache.path()).unwrap())
        .await
        .unwrap();

    let response = server
        .client
        .post(server.url("/ai/analyze"))
        .json(&json!({"text": "Our team shares news with friends and family"}))
        .send()
        .await
        .unwrap();
    assert!(response.status().is_success());

    let body: Value = response.json().await.unwrap();
    assert_eq!(body["success"], true);
    assert_eq!(body["result"]["predicted_category"], "social");
    assert_eq!(body["result"]["validated"], true);
    assert_eq!(body["result"]["fallback_used"], false);
    assert!(body["result"]["request_id"].is_string());
}

#[tokio::test]
async fn concurrent_requests_are_serialized() {
    let cache = tempfile::tempdir().unwrap();
    let server = spawn_server(lexicon_pipeline("geko-lexicon-base", &[], cache.path()).unwrap())
        .await
        .unwrap();

    let requests = (0..8).map(|i| {
        let client = server.client.clone();
        let url = server.url("/ai/analyze");
        async move {
            client
                .post(url)
                .json(&json!({"text": format!("server error alert number {}", i)}))
                .send()
                .await
                .unwrap()
                .json::<Value>()
                .await
                .unwrap()
        }
    });

    let mut handles = Vec::new();
    for request in requests {
        handles.push(tokio::spawn(request));
    }
    for handle in handles {
        let body = handle.await.unwrap();
        assert_eq!(body["success"], true);
        assert_eq!(body["result"]["status"], "ok");
    }
}

#[tokio::test]
async fn status_lists_fallbacks() {
    let cache = tempfile::tempdir().unwrap();
    let pipeline =
        lexicon_pipeline("geko-lexicon-base", &[("geko-lexicon-lite", 3)], cache.path()).unwrap();
    let server = spawn_server(pipeline).await.unwrap();

    let status: Value = server.client.get(server.url("/ai/status")).send().await.unwrap().json().await.unwrap();
    let names: Vec<&str> = status["fallback_models"]
        .as_array()
        .unwrap()
        .iter()
        .map(|entry| entry["name"].as_str().unwrap())
        .collect();
    assert_eq!(names, vec!["geko-lexicon-base", "geko-lexicon-lite"]);

    let metrics: Value = server.client.get(server.url("/ai/metrics")).send().await.unwrap().json().await.unwrap();
    assert!(metrics["metrics"]["ram_total_gb"].as_f64().unwrap() > 0.0);
}
