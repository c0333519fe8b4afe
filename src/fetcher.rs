use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Method, StatusCode};
use tracing::{debug, warn};

use crate::api::health::UpstreamHealth;
use crate::api::latency::LatencyStats;
use crate::config::{Config, USER_AGENT};
use crate::error::{AppError, Result};
use crate::limiter::RateLimiter;
use crate::types::{Item, Order};

/// Anything that can produce the active order book of one item.
/// Implementations never fail: an unavailable book is an empty one.
#[async_trait]
pub trait OrderSource: Send + Sync {
    async fn fetch_orders(&self, item: &Item) -> Vec<Order>;
}

/// Upstream response passed back verbatim by the relay routes.
#[derive(Debug)]
pub struct RelayResponse {
    pub status: StatusCode,
    pub content_type: String,
    pub body: Vec<u8>,
}

/// HTTP client for the marketplace API. Every request goes through the shared
/// [`RateLimiter`]; 429/200 outcomes feed [`UpstreamHealth`].
pub struct MarketClient {
    http: reqwest::Client,
    base_url: String,
    limiter: Arc<RateLimiter>,
    health: Arc<UpstreamHealth>,
    latency: Arc<LatencyStats>,
}

impl MarketClient {
    pub fn new(
        cfg: &Config,
        limiter: Arc<RateLimiter>,
        health: Arc<UpstreamHealth>,
        latency: Arc<LatencyStats>,
    ) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(cfg.upstream_timeout_secs))
            .user_agent(USER_AGENT)
            .build()?;
        Ok(Self {
            http,
            base_url: cfg.upstream_api_url.clone(),
            limiter,
            health,
            latency,
        })
    }

    /// Fetch one item's order book and keep only orders whose poster is in game.
    /// Any failure (transport, non-200, malformed body) yields an empty list.
    pub async fn fetch_item_orders(&self, slug: &str) -> Vec<Order> {
        if slug.is_empty() {
            debug!("[FETCH] skipping item without lookup slug");
            return Vec::new();
        }
        let url = format!("{}/items/{}/orders?include=item", self.base_url, slug);

        let _permit = self.limiter.acquire().await;
        let started = Instant::now();
        let resp = self
            .http
            .get(&url)
            .header("Platform", "pc")
            .header(ACCEPT, "application/json")
            .send()
            .await;

        let resp = match resp {
            Ok(r) => r,
            Err(e) => {
                self.latency.record(started.elapsed());
                warn!("[FETCH] {slug}: request failed: {e}");
                return Vec::new();
            }
        };
        let status = resp.status();
        self.observe_status(status);

        let body = resp.text().await;
        self.latency.record(started.elapsed());

        if status != StatusCode::OK {
            warn!("[FETCH] {slug}: upstream status {status}");
            return Vec::new();
        }
        let body = match body {
            Ok(b) => b,
            Err(e) => {
                warn!("[FETCH] {slug}: failed to read body: {e}");
                return Vec::new();
            }
        };

        match parse_active_orders(&body) {
            Ok((total, active)) => {
                debug!("[FETCH] {slug}: {total} orders, {} from in-game posters", active.len());
                active
            }
            Err(e) => {
                let preview: String = body.chars().take(200).collect();
                warn!("[FETCH] {slug}: malformed order book ({e}): {preview}");
                Vec::new()
            }
        }
    }

    /// Forward an arbitrary call to `{base}/{path_and_query}` through the limiter.
    pub async fn relay(
        &self,
        method: Method,
        path_and_query: &str,
        authorization: Option<String>,
        body: Option<Vec<u8>>,
    ) -> Result<RelayResponse> {
        let url = format!("{}/{}", self.base_url, path_and_query.trim_start_matches('/'));
        debug!("[RELAY] {method} {url}");

        let mut req = self
            .http
            .request(method, &url)
            .header("Platform", "pc")
            .header(ACCEPT, "application/json");
        if let Some(auth) = authorization {
            req = req.header(AUTHORIZATION, auth);
        }
        if let Some(body) = body {
            req = req.header(CONTENT_TYPE, "application/json").body(body);
        }

        let _permit = self.limiter.acquire().await;
        let started = Instant::now();
        let resp = req
            .send()
            .await
            .map_err(|e| AppError::Upstream(format!("{url}: {e}")))?;
        let status = resp.status();
        self.observe_status(status);

        let content_type = resp
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("application/json")
            .to_string();
        let body = resp.bytes().await?.to_vec();
        self.latency.record(started.elapsed());

        Ok(RelayResponse {
            status,
            content_type,
            body,
        })
    }

    fn observe_status(&self, status: StatusCode) {
        if status == StatusCode::TOO_MANY_REQUESTS {
            self.health.mark_rate_limited();
        } else if status == StatusCode::OK {
            self.health.mark_ok();
        }
    }
}

#[async_trait]
impl OrderSource for MarketClient {
    async fn fetch_orders(&self, item: &Item) -> Vec<Order> {
        self.fetch_item_orders(&item.lookup_slug).await
    }
}

/// Parse a `{"payload": {"orders": [...]}}` body. Returns the raw order count and
/// the orders from in-game posters. Individual orders that do not parse are dropped.
pub fn parse_active_orders(body: &str) -> Result<(usize, Vec<Order>)> {
    let v: serde_json::Value = serde_json::from_str(body)?;
    let raw = v
        .get("payload")
        .and_then(|p| p.get("orders"))
        .and_then(|o| o.as_array())
        .ok_or_else(|| AppError::Upstream("response has no payload.orders array".to_string()))?;

    let active = raw
        .iter()
        .filter_map(|o| serde_json::from_value::<Order>(o.clone()).ok())
        .filter(|o| o.poster_status().is_active())
        .collect();
    Ok((raw.len(), active))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::OrderSide;

    #[test]
    fn keeps_only_in_game_posters() {
        let body = r#"{"payload":{"orders":[
            {"id":"a","order_type":"sell","platinum":20,"creation_date":"2024-01-01T00:00:00Z","user":{"status":"ingame"}},
            {"id":"b","order_type":"buy","platinum":10,"creation_date":"2024-01-01T00:00:00Z","user":{"status":"online"}},
            {"id":"c","order_type":"buy","platinum":12,"creation_date":"2024-01-01T00:00:00Z","user":{"status":"offline"}},
            {"id":"d","order_type":"buy","platinum":9,"user":{"status":"ingame"}}
        ]}}"#;
        let (total, active) = parse_active_orders(body).unwrap();
        assert_eq!(total, 4);
        let ids: Vec<_> = active.iter().map(|o| o.id.as_str()).collect();
        assert_eq!(ids, ["a", "d"]);
        assert_eq!(active[1].side, OrderSide::Buy);
        assert!(active[1].creation_date.is_none());
    }

    #[test]
    fn unparsable_orders_are_dropped_not_fatal() {
        let body = r#"{"payload":{"orders":[
            {"id":"a","order_type":"riven","platinum":20,"user":{"status":"ingame"}},
            {"id":"b","order_type":"sell","platinum":"lots","user":{"status":"ingame"}},
            {"id":"c","order_type":"sell","platinum":30,"user":{"status":"ingame"}}
        ]}}"#;
        let (_, active) = parse_active_orders(body).unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, "c");
    }

    #[test]
    fn malformed_bodies_are_errors() {
        assert!(parse_active_orders("<html>bad gateway</html>").is_err());
        assert!(parse_active_orders(r#"{"payload":{}}"#).is_err());
        assert!(parse_active_orders(r#"{"error":"not found"}"#).is_err());
    }

    fn offline_client() -> MarketClient {
        client_for("http://127.0.0.1:9".to_string())
    }

    /// Serves `/items/:slug/orders`, answering 429 to the first `throttled` calls.
    async fn flaky_upstream(throttled: usize) -> String {
        use axum::{extract::State, http::StatusCode as Status, routing::get, Router};
        use std::sync::atomic::{AtomicUsize, Ordering};

        async fn orders(State(calls): State<Arc<(AtomicUsize, usize)>>) -> (Status, String) {
            let n = calls.0.fetch_add(1, Ordering::SeqCst);
            if n < calls.1 {
                return (Status::TOO_MANY_REQUESTS, String::new());
            }
            let body = r#"{"payload":{"orders":[
                {"id":"a","order_type":"sell","platinum":20,"user":{"status":"ingame"}},
                {"id":"b","order_type":"buy","platinum":10,"user":{"status":"offline"}}
            ]}}"#;
            (Status::OK, body.to_string())
        }

        let app = Router::new()
            .route("/items/:slug/orders", get(orders))
            .with_state(Arc::new((AtomicUsize::new(0), throttled)));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    fn client_for(base_url: String) -> MarketClient {
        let cfg = Config {
            upstream_api_url: base_url,
            log_level: "info".to_string(),
            db_path: ":memory:".to_string(),
            api_port: 0,
            requests_per_second: 20,
            tradeable_marker: String::new(),
            job_retention_secs: 0,
            upstream_timeout_secs: 5,
        };
        MarketClient::new(
            &cfg,
            RateLimiter::new(cfg.requests_per_second),
            Arc::new(UpstreamHealth::new()),
            Arc::new(LatencyStats::new()),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn throttled_response_flags_health_until_next_success() {
        let client = client_for(flaky_upstream(1).await);

        assert!(client.fetch_item_orders("ash_prime_set").await.is_empty());
        assert!(client.health.rate_limited());
        assert_eq!(client.health.rate_limit_hits(), 1);

        let orders = client.fetch_item_orders("ash_prime_set").await;
        assert_eq!(orders.len(), 1, "offline poster filtered out");
        assert_eq!(orders[0].id, "a");
        assert!(!client.health.rate_limited());
        assert_eq!(client.health.rate_limit_hits(), 1);
        assert_eq!(client.latency.len(), 2);
    }

    #[tokio::test]
    async fn empty_slug_short_circuits() {
        let client = offline_client();
        assert!(client.fetch_item_orders("").await.is_empty());
        assert_eq!(client.latency.len(), 0);
    }

    #[tokio::test]
    async fn unreachable_upstream_yields_no_orders() {
        let client = offline_client();
        let item = Item {
            id: "i".into(),
            display_name: "Ash Prime Set".into(),
            lookup_slug: "ash_prime_set".into(),
        };
        assert!(client.fetch_orders(&item).await.is_empty());
        assert!(!client.health.rate_limited());
        assert_eq!(client.latency.len(), 1);
    }
}
