//! Web server module: the JSON API over the target registry and probe
//! history. Handlers talk only to storage, never to the scheduler.

mod handlers;

use crate::config::Config;
use crate::db::Storage;

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn Storage>,
}

/// Build the API router.
pub fn routes(state: AppState) -> Router {
    let cors = CorsLayer::new().allow_origin(Any).allow_methods(Any);

    Router::new()
        .route(
            "/v1/targets",
            post(handlers::handle_create_target).get(handlers::handle_list_targets),
        )
        .route("/v1/targets/{id}/results", get(handlers::handle_get_results))
        .route("/healthz", get(handlers::handle_healthz))
        .layer(cors)
        .layer(DefaultBodyLimit::max(1024 * 1024)) // 1MB
        .with_state(state)
}

/// HTTP server for the linkwatch API.
pub struct Server {
    config: Config,
    state: AppState,
}

impl Server {
    pub fn new(config: Config, store: Arc<dyn Storage>) -> Self {
        Self {
            config,
            state: AppState { store },
        }
    }

    /// Serve until `shutdown` resolves, then finish in-flight requests.
    pub async fn start(
        &self,
        shutdown: impl Future<Output = ()> + Send + 'static,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let addr = SocketAddr::from(([0, 0, 0, 0], self.config.http_port));
        let router = routes(self.state.clone());

        tracing::info!("Web server listening on {}", addr);

        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(listener, router)
            .with_graceful_shutdown(shutdown)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{CheckResult, SqliteStorage};
    use chrono::{Duration as ChronoDuration, Utc};
    use serde_json::{json, Value};
    use std::net::SocketAddr;
    use std::time::Duration;
    use tempfile::NamedTempFile;

    async fn spawn_api(store: Arc<dyn Storage>) -> SocketAddr {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let router = routes(AppState { store });
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        addr
    }

    fn open_store() -> (NamedTempFile, Arc<dyn Storage>) {
        let tmp = NamedTempFile::new().unwrap();
        let store: Arc<dyn Storage> = Arc::new(SqliteStorage::open(tmp.path()).unwrap());
        (tmp, store)
    }

    #[tokio::test]
    async fn register_target_is_idempotent() {
        let (_tmp, store) = open_store();
        let addr = spawn_api(store).await;
        let client = reqwest::Client::new();
        let url = format!("http://{addr}/v1/targets");

        let resp = client
            .post(&url)
            .json(&json!({"url": "https://example.com"}))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 201);
        let first: Value = resp.json().await.unwrap();
        assert_eq!(first["url"], "https://example.com");
        assert!(!first["created_at"].as_str().unwrap().is_empty());

        // Different spelling, same canonical form.
        let resp = client
            .post(&url)
            .json(&json!({"url": "https://EXAMPLE.com/"}))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);
        let second: Value = resp.json().await.unwrap();
        assert_eq!(first["id"], second["id"]);
    }

    #[tokio::test]
    async fn register_rejects_invalid_urls() {
        let (_tmp, store) = open_store();
        let addr = spawn_api(store).await;
        let client = reqwest::Client::new();
        let url = format!("http://{addr}/v1/targets");

        let resp = client
            .post(&url)
            .json(&json!({"url": "ftp://example.com"}))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 400);

        let resp = client
            .post(&url)
            .json(&json!({"url": "not a url"}))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 400);

        // Malformed body.
        let resp = client
            .post(&url)
            .header("Content-Type", "application/json")
            .body("{")
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 400);

        // Missing url field.
        let resp = client
            .post(&url)
            .json(&json!({"address": "https://example.com"}))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 400);
    }

    #[tokio::test]
    async fn idempotency_key_returns_first_registration() {
        let (_tmp, store) = open_store();
        let addr = spawn_api(store).await;
        let client = reqwest::Client::new();
        let url = format!("http://{addr}/v1/targets");

        let resp = client
            .post(&url)
            .header("Idempotency-Key", "key-1")
            .json(&json!({"url": "https://a.example"}))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 201);
        let first: Value = resp.json().await.unwrap();

        let resp = client
            .post(&url)
            .header("Idempotency-Key", "key-1")
            .json(&json!({"url": "https://b.example"}))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);
        let second: Value = resp.json().await.unwrap();
        assert_eq!(first["id"], second["id"]);
        assert_eq!(second["url"], "https://a.example");
    }

    #[tokio::test]
    async fn pagination_walks_targets_in_creation_order() {
        let (_tmp, store) = open_store();
        let addr = spawn_api(store.clone()).await;
        let client = reqwest::Client::new();

        for url in ["https://a.com", "https://b.com", "https://c.com"] {
            store.create_target(url, "").unwrap();
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        let mut seen = Vec::new();
        let mut token = String::new();
        for _ in 0..3 {
            let resp = client
                .get(format!(
                    "http://{addr}/v1/targets?limit=1&page_token={token}"
                ))
                .send()
                .await
                .unwrap();
            assert_eq!(resp.status(), 200);
            let body: Value = resp.json().await.unwrap();
            let items = body["items"].as_array().unwrap();
            assert_eq!(items.len(), 1);
            seen.push(items[0]["url"].as_str().unwrap().to_string());
            token = body["next_page_token"].as_str().unwrap().to_string();
        }
        assert_eq!(seen, ["https://a.com", "https://b.com", "https://c.com"]);
        assert!(token.is_empty());

        let resp = client
            .get(format!("http://{addr}/v1/targets?page_token=@@garbage@@"))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 400);
    }

    #[tokio::test]
    async fn results_reports_probe_history() {
        let (_tmp, store) = open_store();
        let addr = spawn_api(store.clone()).await;
        let client = reqwest::Client::new();

        let (target, _) = store.create_target("https://example.com", "").unwrap();
        let now = Utc::now();
        store
            .save_check_result(&CheckResult {
                target_id: target.id.clone(),
                checked_at: now - ChronoDuration::seconds(30),
                status_code: 200,
                latency_ms: 12,
                error: String::new(),
            })
            .unwrap();
        store
            .save_check_result(&CheckResult {
                target_id: target.id.clone(),
                checked_at: now - ChronoDuration::seconds(10),
                status_code: 0,
                latency_ms: 500,
                error: "connection refused".to_string(),
            })
            .unwrap();

        let resp = client
            .get(format!("http://{addr}/v1/targets/{}/results", target.id))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);
        let body: Value = resp.json().await.unwrap();
        let items = body["items"].as_array().unwrap();
        assert_eq!(items.len(), 2);
        // Newest first: the transport failure, then the HTTP response.
        assert_eq!(items[0]["status_code"], 0);
        assert_eq!(items[0]["error"], "connection refused");
        assert_eq!(items[1]["status_code"], 200);
        assert_eq!(items[1]["error"], Value::Null);

        let since = (now - ChronoDuration::seconds(20)).to_rfc3339();
        let resp = client
            .get(format!(
                "http://{addr}/v1/targets/{}/results?since={}",
                target.id,
                urlencode(&since)
            ))
            .send()
            .await
            .unwrap();
        let body: Value = resp.json().await.unwrap();
        assert_eq!(body["items"].as_array().unwrap().len(), 1);

        let resp = client
            .get(format!(
                "http://{addr}/v1/targets/{}/results?since=yesterday",
                target.id
            ))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 400);
    }

    #[tokio::test]
    async fn healthz_is_ok() {
        let (_tmp, store) = open_store();
        let addr = spawn_api(store).await;

        let resp = reqwest::get(format!("http://{addr}/healthz")).await.unwrap();
        assert_eq!(resp.status(), 200);
    }

    fn urlencode(s: &str) -> String {
        s.replace('+', "%2B").replace(':', "%3A")
    }
}
