//! REST adapter for the order backend
//!
//! Routes, relative to the configured base URL:
//! - `GET  /orders`
//! - `GET  /orders/{id}`
//! - `POST /orders/{id}/start`
//! - `POST /orders/{id}/complete`
//! - `PATCH /orders/{id}/status` with `{"status": "<kitchen status>"}`

use async_trait::async_trait;
use galley_api::{KitchenStatus, Order};
use galley_backend::{decode_order, decode_orders, BackendError, BackendResult, OrderBackend};
use galley_config::{BackendConfig, MissingFieldPolicy};
use galley_util::OrderId;
use reqwest::{Client, Method, Response, StatusCode};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{debug, warn};

/// Order backend over HTTP/JSON
pub struct HttpBackend {
    client: Client,
    base_url: String,
    missing_fields: MissingFieldPolicy,
    /// Outcome of the most recent request
    healthy: AtomicBool,
}

impl HttpBackend {
    pub fn new(
        base_url: impl Into<String>,
        timeout: Duration,
        missing_fields: MissingFieldPolicy,
    ) -> BackendResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()
            .map_err(|e| BackendError::Internal(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            missing_fields,
            healthy: AtomicBool::new(true),
        })
    }

    /// Build from the `[backend]` config section. Returns `None` when no
    /// base URL is configured.
    pub fn from_config(config: &BackendConfig) -> BackendResult<Option<Self>> {
        match &config.base_url {
            Some(url) => Self::new(url.clone(), config.request_timeout, config.missing_fields).map(Some),
            None => Ok(None),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn orders_url(&self) -> String {
        format!("{}/orders", self.base_url)
    }

    fn order_url(&self, order_id: &OrderId, suffix: Option<&str>) -> String {
        let mut url = format!("{}/orders/{}", self.base_url, encode_segment(order_id.as_str()));
        if let Some(suffix) = suffix {
            url.push('/');
            url.push_str(suffix);
        }
        url
    }

    async fn send(
        &self,
        method: Method,
        url: String,
        body: Option<serde_json::Value>,
        order_id: Option<&OrderId>,
    ) -> BackendResult<Response> {
        debug!(%method, %url, "Backend request");

        let mut request = self.client.request(method.clone(), &url);
        if let Some(body) = body {
            request = request.json(&body);
        }

        let response = match request.send().await {
            Ok(response) => response,
            Err(e) => {
                self.healthy.store(false, Ordering::Relaxed);
                warn!(%method, %url, error = %e, "Backend request failed");
                return Err(BackendError::Transport(e.to_string()));
            }
        };

        self.healthy.store(true, Ordering::Relaxed);

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        if status == StatusCode::NOT_FOUND
            && let Some(order_id) = order_id
        {
            return Err(BackendError::NotFound(order_id.clone()));
        }

        let message = response.text().await.unwrap_or_default();
        warn!(%method, %url, status = status.as_u16(), "Backend returned error status");
        Err(BackendError::Status {
            status: status.as_u16(),
            message,
        })
    }

    async fn body(response: Response) -> BackendResult<Vec<u8>> {
        response
            .bytes()
            .await
            .map(|b| b.to_vec())
            .map_err(|e| BackendError::Transport(e.to_string()))
    }
}

#[async_trait]
impl OrderBackend for HttpBackend {
    fn name(&self) -> &str {
        "http"
    }

    async fn fetch_orders(&self) -> BackendResult<Vec<Order>> {
        let response = self.send(Method::GET, self.orders_url(), None, None).await?;
        let body = Self::body(response).await?;
        Ok(decode_orders(&body, self.missing_fields)?)
    }

    async fn fetch_order(&self, order_id: &OrderId) -> BackendResult<Order> {
        let response = self
            .send(Method::GET, self.order_url(order_id, None), None, Some(order_id))
            .await?;
        let body = Self::body(response).await?;
        Ok(decode_order(&body, self.missing_fields)?)
    }

    async fn start_order(&self, order_id: &OrderId) -> BackendResult<()> {
        self.send(
            Method::POST,
            self.order_url(order_id, Some("start")),
            None,
            Some(order_id),
        )
        .await?;
        Ok(())
    }

    async fn complete_order(&self, order_id: &OrderId) -> BackendResult<()> {
        self.send(
            Method::POST,
            self.order_url(order_id, Some("complete")),
            None,
            Some(order_id),
        )
        .await?;
        Ok(())
    }

    async fn update_status(&self, order_id: &OrderId, status: KitchenStatus) -> BackendResult<()> {
        self.send(
            Method::PATCH,
            self.order_url(order_id, Some("status")),
            Some(serde_json::json!({ "status": status.as_str() })),
            Some(order_id),
        )
        .await?;
        Ok(())
    }

    fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::Relaxed)
    }
}

/// Percent-encode an order ID for use as a single path segment
fn encode_segment(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for b in s.bytes() {
        match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(b as char)
            }
            _ => out.push_str(&format!("%{:02X}", b)),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    fn backend(base: &str) -> HttpBackend {
        HttpBackend::new(base, Duration::from_secs(2), MissingFieldPolicy::FillDefaults).unwrap()
    }

    /// Serve one canned HTTP response and hand back the request head
    async fn serve_once(status_line: &'static str, body: &'static str) -> (String, tokio::task::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 4096];
            let n = socket.read(&mut buf).await.unwrap();
            let request = String::from_utf8_lossy(&buf[..n]).to_string();

            let response = format!(
                "HTTP/1.1 {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                status_line,
                body.len(),
                body
            );
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.shutdown().await.unwrap();
            request
        });

        (format!("http://{}", addr), handle)
    }

    #[test]
    fn builds_routes() {
        let backend = backend("http://orders.local/api/");
        let id = OrderId::new("A 1/2");

        assert_eq!(backend.base_url(), "http://orders.local/api");
        assert_eq!(backend.orders_url(), "http://orders.local/api/orders");
        assert_eq!(
            backend.order_url(&id, Some("start")),
            "http://orders.local/api/orders/A%201%2F2/start"
        );
        assert_eq!(
            backend.order_url(&OrderId::from(7u64), None),
            "http://orders.local/api/orders/7"
        );
    }

    #[test]
    fn from_config_without_url_is_none() {
        let config = BackendConfig::default();
        assert!(HttpBackend::from_config(&config).unwrap().is_none());
    }

    #[tokio::test]
    async fn fetch_orders_decodes_body() {
        let (base, server) = serve_once("200 OK", r#"[{"id": 1, "status": "queued"}, {"id": "2"}]"#).await;
        let backend = backend(&base);

        let orders = backend.fetch_orders().await.unwrap();
        assert_eq!(orders.len(), 2);
        assert_eq!(orders[1].customer_name, "Guest");

        let request = server.await.unwrap();
        assert!(request.starts_with("GET /orders HTTP/1.1"));
        assert!(backend.is_healthy());
    }

    #[tokio::test]
    async fn missing_order_maps_to_not_found() {
        let (base, server) = serve_once("404 Not Found", "{}").await;
        let backend = backend(&base);

        let result = backend.fetch_order(&OrderId::new("9")).await;
        assert!(matches!(result, Err(BackendError::NotFound(_))));
        server.await.unwrap();
    }

    #[tokio::test]
    async fn update_status_sends_patch() {
        let (base, server) = serve_once("204 No Content", "").await;
        let backend = backend(&base);

        backend
            .update_status(&OrderId::new("9"), KitchenStatus::Completed)
            .await
            .unwrap();

        let request = server.await.unwrap();
        assert!(request.starts_with("PATCH /orders/9/status HTTP/1.1"));
    }

    #[tokio::test]
    async fn server_error_is_status() {
        let (base, server) = serve_once("503 Service Unavailable", "down").await;
        let backend = backend(&base);

        let result = backend.start_order(&OrderId::new("9")).await;
        match result {
            Err(BackendError::Status { status, .. }) => assert_eq!(status, 503),
            other => panic!("unexpected result {:?}", other.map(|_| ())),
        }
        server.await.unwrap();
    }

    #[tokio::test]
    async fn unreachable_backend_is_transport_error() {
        // Bind then drop to get a port nobody listens on
        let addr = {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap()
        };
        let backend = backend(&format!("http://{}", addr));

        let result = backend.fetch_orders().await;
        assert!(matches!(result, Err(BackendError::Transport(_))));
        assert!(!backend.is_healthy());
    }
}
