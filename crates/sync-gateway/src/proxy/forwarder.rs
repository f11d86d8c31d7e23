//! Plain reverse-proxy leg: forwards a request to the upstream API and maps
//! the reply back into an axum response.

use crate::domain::config::{LimitsConfig, UpstreamConfig};
use crate::domain::{GatewayError, InterceptError};
use axum::body::Body;
use axum::http::{header, HeaderMap, HeaderName, Request};
use axum::response::Response;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tower::Service;
use tracing::debug;

/// Connection-scoped headers that must not cross the proxy.
const HOP_BY_HOP: [HeaderName; 8] = [
    header::CONNECTION,
    HeaderName::from_static("keep-alive"),
    header::PROXY_AUTHENTICATE,
    header::PROXY_AUTHORIZATION,
    header::TE,
    header::TRAILER,
    header::TRANSFER_ENCODING,
    header::UPGRADE,
];

fn strip_hop_by_hop(headers: &mut HeaderMap) {
    for name in &HOP_BY_HOP {
        headers.remove(name);
    }
}

/// Forwards every request it receives to `upstream.base_url`, preserving
/// method, path, query, headers, and body.
#[derive(Clone)]
pub struct UpstreamForwarder {
    client: reqwest::Client,
    base_url: Arc<str>,
    max_request_size: usize,
}

impl UpstreamForwarder {
    pub fn new(upstream: &UpstreamConfig, limits: &LimitsConfig) -> Result<Self, GatewayError> {
        let client = reqwest::Client::builder()
            .connect_timeout(upstream.connect_timeout)
            .timeout(upstream.request_timeout)
            .pool_idle_timeout(Duration::from_secs(90))
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| GatewayError::Client(e.to_string()))?;

        Ok(Self {
            client,
            base_url: Arc::from(upstream.base()),
            max_request_size: limits.max_request_size,
        })
    }

    /// Upstream URL for a proxied path and query.
    fn target_url(&self, req: &Request<Body>) -> String {
        let path_and_query = req
            .uri()
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or("/");
        format!("{}{}", self.base_url, path_and_query)
    }

    async fn forward(&self, req: Request<Body>) -> Result<Response, InterceptError> {
        let url = self.target_url(&req);
        let (parts, body) = req.into_parts();
        let body = axum::body::to_bytes(body, self.max_request_size)
            .await
            .map_err(|e| InterceptError::RequestBody(e.to_string()))?;

        let mut headers = parts.headers;
        strip_hop_by_hop(&mut headers);
        headers.remove(header::HOST);
        headers.remove(header::CONTENT_LENGTH);

        debug!(method = %parts.method, url = %url, bytes = body.len(), "Forwarding upstream");
        let upstream = self
            .client
            .request(parts.method, url)
            .headers(headers)
            .body(body)
            .send()
            .await?;

        let mut response = Response::builder().status(upstream.status());
        if let Some(response_headers) = response.headers_mut() {
            *response_headers = upstream.headers().clone();
            strip_hop_by_hop(response_headers);
        }

        response
            .body(Body::from_stream(upstream.bytes_stream()))
            .map_err(|e| InterceptError::Upstream(e.to_string()))
    }
}

impl Service<Request<Body>> for UpstreamForwarder {
    type Response = Response;
    type Error = InterceptError;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: Request<Body>) -> Self::Future {
        let forwarder = self.clone();
        Box::pin(async move { forwarder.forward(req).await })
    }
}
