//! HTTP client for the Steam store endpoints
//!
//! Search never fails (problems become an empty list); requirement lookups
//! return a typed [`CatalogError`]. Transient failures are retried with
//! exponential backoff.

use reqwest::{Client, Response, Url};
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;
use tokio::time::sleep;
use tracing::{debug, warn};

use super::markup::clean_markup;
use super::types::{GameRecord, RequirementSet, NOT_SPECIFIED};
use crate::config::CatalogConfig;

/// Catalog errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CatalogError {
    #[error("game {0} not found in the catalog")]
    GameNotFound(u64),

    #[error("could not fetch game data: {0}")]
    FetchFailed(String),
}

/// Client for catalog search and requirement lookups
pub struct CatalogClient {
    client: Client,
    search_url: String,
    details_url: String,
    max_retries: u32,
}

impl CatalogClient {
    pub fn new(config: &CatalogConfig) -> Self {
        let client = Client::builder()
            .timeout(config.timeout())
            .user_agent(concat!("canirun/", env!("CARGO_PKG_VERSION")))
            .build()
            .unwrap_or_else(|_| Client::new());

        CatalogClient {
            client,
            search_url: config.search_url.trim().trim_end_matches('/').to_string(),
            details_url: config.details_url.trim().to_string(),
            max_retries: config.max_retries,
        }
    }

    /// Search games by name, in catalog order. Empty on any failure.
    pub async fn search(&self, name: &str) -> Vec<GameRecord> {
        let name = name.trim();
        if name.is_empty() {
            return Vec::new();
        }

        let Some(url) = search_url(&self.search_url, name) else {
            warn!(base = %self.search_url, "invalid catalog search URL");
            return Vec::new();
        };

        let response = match self.get_with_retry(url).await {
            Ok(response) => response,
            Err(err) => {
                warn!(%err, query = name, "catalog search failed");
                return Vec::new();
            }
        };

        let body: Value = match response.json().await {
            Ok(body) => body,
            Err(err) => {
                warn!(%err, query = name, "catalog search returned invalid JSON");
                return Vec::new();
            }
        };

        let records = parse_search_results(body);
        debug!(query = name, hits = records.len(), "catalog search finished");
        records
    }

    /// Fetch the PC requirements of one catalog entry.
    pub async fn fetch_requirements(&self, id: u64) -> Result<RequirementSet, CatalogError> {
        let mut url = Url::parse(&self.details_url)
            .map_err(|err| CatalogError::FetchFailed(format!("invalid details URL: {}", err)))?;
        url.query_pairs_mut().append_pair("appids", &id.to_string());

        let response = self.get_with_retry(url).await?;
        let body: Value = response
            .json()
            .await
            .map_err(|err| CatalogError::FetchFailed(format!("invalid catalog response: {}", err)))?;

        parse_details(id, &body)
    }

    async fn get_with_retry(&self, url: Url) -> Result<Response, CatalogError> {
        let max_attempts = self.max_retries.saturating_add(1).max(1);

        for attempt in 1..=max_attempts {
            let response = match self.client.get(url.clone()).send().await {
                Ok(response) => response,
                Err(err) => {
                    if attempt < max_attempts && is_retryable_network_error(&err) {
                        warn!(%err, attempt, "catalog request failed, retrying");
                        sleep(backoff_for_attempt(attempt)).await;
                        continue;
                    }
                    return Err(CatalogError::FetchFailed(err.to_string()));
                }
            };

            let status = response.status();
            if status.is_success() {
                return Ok(response);
            }

            if attempt < max_attempts && status.is_server_error() {
                warn!(%status, attempt, "catalog server error, retrying");
                sleep(backoff_for_attempt(attempt)).await;
                continue;
            }

            return Err(CatalogError::FetchFailed(format!("HTTP {}", status)));
        }

        Err(CatalogError::FetchFailed("catalog unreachable".to_string()))
    }
}

/// `{base}/{name}` with the name escaped as one path segment.
fn search_url(base: &str, name: &str) -> Option<Url> {
    let mut url = Url::parse(base).ok()?;
    url.path_segments_mut().ok()?.pop_if_empty().push(name);
    Some(url)
}

/// Malformed entries are skipped rather than failing the whole list.
fn parse_search_results(body: Value) -> Vec<GameRecord> {
    match body {
        Value::Array(items) => items
            .into_iter()
            .filter_map(|item| serde_json::from_value::<GameRecord>(item).ok())
            .collect(),
        _ => Vec::new(),
    }
}

/// Details response: `{"<id>": {"success": bool, "data": {...}}}`
fn parse_details(id: u64, body: &Value) -> Result<RequirementSet, CatalogError> {
    let entry = body
        .get(id.to_string())
        .ok_or(CatalogError::GameNotFound(id))?;

    if entry.get("success").and_then(Value::as_bool) == Some(false) {
        return Err(CatalogError::GameNotFound(id));
    }

    let data = entry.get("data");
    let game_name = data
        .and_then(|d| d.get("name"))
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map_or_else(|| format!("App {}", id), str::to_string);

    // Games without requirements send `"pc_requirements": []`
    let requirements = data
        .and_then(|d| d.get("pc_requirements"))
        .and_then(Value::as_object);
    let block = |key: &str| {
        requirements
            .and_then(|req| req.get(key))
            .and_then(Value::as_str)
            .map(clean_markup)
            .filter(|text| !text.is_empty())
            .unwrap_or_else(|| NOT_SPECIFIED.to_string())
    };

    Ok(RequirementSet {
        game_name,
        minimum_text: block("minimum"),
        recommended_text: block("recommended"),
    })
}

fn is_retryable_network_error(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect() || err.is_request()
}

fn backoff_for_attempt(attempt: u32) -> Duration {
    // 200ms, 400ms, 800ms ... capped at 2s
    let exponent = attempt.saturating_sub(1).min(4);
    let factor = 2u64.saturating_pow(exponent);
    let ms = 200u64.saturating_mul(factor).min(2_000);
    Duration::from_millis(ms)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::{Path, Query, State};
    use axum::http::StatusCode;
    use axum::routing::get;
    use axum::{Json, Router};
    use serde_json::json;
    use std::collections::HashMap;
    use std::net::SocketAddr;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tokio::net::TcpListener;

    async fn spawn_server(app: Router) -> (SocketAddr, tokio::task::JoinHandle<()>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });
        (addr, handle)
    }

    fn client_for(addr: SocketAddr, max_retries: u32) -> CatalogClient {
        CatalogClient::new(&CatalogConfig {
            search_url: format!("http://{}/actions/SearchApps", addr),
            details_url: format!("http://{}/api/appdetails", addr),
            timeout_seconds: 2,
            max_retries,
        })
    }

    async fn details(Query(params): Query<HashMap<String, String>>) -> Json<Value> {
        let id = params.get("appids").cloned().unwrap_or_default();
        let body = match id.as_str() {
            "220" => json!({
                "220": {
                    "success": true,
                    "data": {
                        "name": "Half-Life 2",
                        "pc_requirements": {
                            "minimum": "<strong>Minimum:</strong> 1.7 Ghz Processor, 512MB RAM, DirectX&reg; 8.1 level Graphics Card",
                            "recommended": "<strong>Recommended:</strong> Pentium 4 processor (3.0GHz, or better), 1GB RAM"
                        }
                    }
                }
            }),
            "500" => json!({ "500": { "success": true, "data": { "name": "Soundtrack", "pc_requirements": [] } } }),
            "501" => json!({ "501": { "data": { "name": "Demo", "pc_requirements": { "minimum": "<p>Any PC</p>" } } } }),
            other => json!({ other: { "success": false } }),
        };
        Json(body)
    }

    fn catalog_app() -> Router {
        Router::new()
            .route(
                "/actions/SearchApps/:name",
                get(|Path(name): Path<String>| async move {
                    if name == "Half-Life 2" {
                        Json(json!([
                            { "appid": "220", "name": "Half-Life 2", "icon": "i.jpg", "logo": "l.jpg" },
                            { "appid": "320", "name": "Half-Life 2: Deathmatch" },
                            { "appid": null, "name": "broken entry" }
                        ]))
                    } else {
                        Json(json!([]))
                    }
                }),
            )
            .route("/api/appdetails", get(details))
    }

    #[tokio::test]
    async fn search_keeps_catalog_order_and_escapes_name() {
        let (addr, handle) = spawn_server(catalog_app()).await;
        let client = client_for(addr, 0);

        let results = client.search("Half-Life 2").await;
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].catalog_id, 220);
        assert_eq!(results[0].name, "Half-Life 2");
        assert_eq!(results[1].catalog_id, 320);

        assert!(client.search("Nothing Like This").await.is_empty());
        assert!(client.search("   ").await.is_empty());

        handle.abort();
    }

    #[tokio::test]
    async fn search_failure_is_empty_list() {
        let app = Router::new().route(
            "/actions/SearchApps/:name",
            get(|| async { (StatusCode::OK, "this is not json") }),
        );
        let (addr, handle) = spawn_server(app).await;
        assert!(client_for(addr, 0).search("anything").await.is_empty());
        handle.abort();

        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let closed = listener.local_addr().unwrap();
        drop(listener);
        assert!(client_for(closed, 0).search("anything").await.is_empty());
    }

    #[tokio::test]
    async fn requirements_are_cleaned() {
        let (addr, handle) = spawn_server(catalog_app()).await;
        let requirements = client_for(addr, 0).fetch_requirements(220).await.unwrap();

        assert_eq!(requirements.game_name, "Half-Life 2");
        assert_eq!(
            requirements.minimum_text,
            "Minimum: 1.7 Ghz Processor, 512MB RAM, DirectX® 8.1 level Graphics Card"
        );
        assert!(!requirements.recommended_text.contains('<'));
        handle.abort();
    }

    #[tokio::test]
    async fn invalid_id_is_game_not_found() {
        let (addr, handle) = spawn_server(catalog_app()).await;
        let err = client_for(addr, 0)
            .fetch_requirements(999_999_999)
            .await
            .unwrap_err();
        assert_eq!(err, CatalogError::GameNotFound(999_999_999));
        handle.abort();
    }

    #[tokio::test]
    async fn missing_requirement_blocks_are_not_specified() {
        let (addr, handle) = spawn_server(catalog_app()).await;
        let client = client_for(addr, 0);

        let soundtrack = client.fetch_requirements(500).await.unwrap();
        assert_eq!(soundtrack.minimum_text, NOT_SPECIFIED);
        assert_eq!(soundtrack.recommended_text, NOT_SPECIFIED);

        // No success flag at all still yields data
        let demo = client.fetch_requirements(501).await.unwrap();
        assert_eq!(demo.minimum_text, "Any PC");
        assert_eq!(demo.recommended_text, NOT_SPECIFIED);
        handle.abort();
    }

    #[tokio::test]
    async fn server_errors_are_retried() {
        let hits = Arc::new(AtomicUsize::new(0));
        let app = Router::new()
            .route(
                "/api/appdetails",
                get(|State(hits): State<Arc<AtomicUsize>>| async move {
                    if hits.fetch_add(1, Ordering::SeqCst) == 0 {
                        return (StatusCode::SERVICE_UNAVAILABLE, Json(json!({})));
                    }
                    (
                        StatusCode::OK,
                        Json(json!({ "7": { "success": true, "data": { "name": "Retry" } } })),
                    )
                }),
            )
            .with_state(hits.clone());
        let (addr, handle) = spawn_server(app).await;

        let requirements = client_for(addr, 1).fetch_requirements(7).await.unwrap();
        assert_eq!(requirements.game_name, "Retry");
        assert_eq!(hits.load(Ordering::SeqCst), 2);
        handle.abort();
    }

    #[tokio::test]
    async fn client_errors_are_fetch_failed() {
        let app = Router::new().route(
            "/api/appdetails",
            get(|| async { (StatusCode::FORBIDDEN, "rate limited") }),
        );
        let (addr, handle) = spawn_server(app).await;
        let err = client_for(addr, 3).fetch_requirements(220).await.unwrap_err();
        assert!(matches!(err, CatalogError::FetchFailed(ref msg) if msg.contains("403")));
        handle.abort();
    }

    #[test]
    fn search_url_escapes_one_segment() {
        let url = search_url("https://steamcommunity.com/actions/SearchApps", "AC/DC: Rock & Roll?").unwrap();
        assert_eq!(
            url.as_str(),
            "https://steamcommunity.com/actions/SearchApps/AC%2FDC:%20Rock%20&%20Roll%3F"
        );
    }

    #[test]
    fn test_backoff_growth() {
        assert_eq!(backoff_for_attempt(1), Duration::from_millis(200));
        assert_eq!(backoff_for_attempt(2), Duration::from_millis(400));
        assert_eq!(backoff_for_attempt(10), Duration::from_millis(2_000));
    }

    #[tokio::test]
    #[ignore = "talks to the live Steam store"]
    async fn live_half_life_2() {
        let client = CatalogClient::new(&CatalogConfig::default());
        let results = client.search("Half-Life 2").await;
        assert!(results[0].name.contains("Half-Life 2"));

        let requirements = client.fetch_requirements(results[0].catalog_id).await.unwrap();
        assert_ne!(requirements.minimum_text, NOT_SPECIFIED);
    }
}
