//! Send-message interception.
//!
//! Wraps the upstream forwarder. For a send request the outbound hook points
//! the upstream's status webhook at this gateway under a freshly minted
//! correlation key; when the upstream answers `202 message(s) queued` the
//! inbound hook holds the response and races the webhook against a poller
//! and a deadline. Whichever status arrives first replaces the body the
//! client receives.
//!
//! Anything that does not look like a single-recipient queued send passes
//! through untouched.

use super::route::is_send_message_route;
use crate::domain::config::{CallbackConfig, GatewayConfig};
use crate::domain::{
    CorrelationId, CorrelationStore, Credentials, EntryGuard, InterceptError, PendingRequest,
    SendAck, SendRequest, StatusPayload,
};
use crate::middleware::{GatewayMetrics, Resolution};
use crate::poller::Poller;
use axum::body::Body;
use axum::http::request::Parts;
use axum::http::{header, HeaderValue, Request, StatusCode};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use std::convert::Infallible;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tower::{Layer, Service};
use tracing::{debug, info, warn, Span};

/// Shared state of the interception hooks.
pub struct Interceptor {
    store: Arc<dyn CorrelationStore>,
    poller: Arc<Poller>,
    metrics: Arc<GatewayMetrics>,
    callback: CallbackConfig,
    wait_timeout: Duration,
    max_request_size: usize,
    max_response_size: usize,
    shutdown: CancellationToken,
}

/// Entry created by the outbound hook. Dropping it removes the entry.
struct Registration {
    guard: EntryGuard,
    notifications: mpsc::Receiver<StatusPayload>,
}

impl Interceptor {
    pub fn new(
        config: &GatewayConfig,
        store: Arc<dyn CorrelationStore>,
        poller: Arc<Poller>,
        metrics: Arc<GatewayMetrics>,
    ) -> Self {
        Self {
            store,
            poller,
            metrics,
            callback: config.callback.clone(),
            wait_timeout: config.wait.timeout,
            max_request_size: config.limits.max_request_size,
            max_response_size: config.limits.max_response_size,
            shutdown: CancellationToken::new(),
        }
    }

    /// Pollers spawned by this interceptor are children of `token`.
    pub fn with_shutdown(mut self, token: CancellationToken) -> Self {
        self.shutdown = token;
        self
    }

    /// Outbound hook.
    ///
    /// Rewrites the send body to carry this gateway's callback URL and
    /// registers the pending entry. Bodies that are not a JSON object are
    /// forwarded as-is with nothing registered.
    fn prepare_send(
        &self,
        parts: &mut Parts,
        body: Bytes,
    ) -> Result<(Bytes, Option<Registration>), InterceptError> {
        let mut send: SendRequest = match serde_json::from_slice(&body) {
            Ok(send) => send,
            Err(e) => {
                debug!(error = %e, "Send body is not a JSON object, forwarding unmodified");
                return Ok((body, None));
            }
        };

        let key = CorrelationId::new();
        send.url = Some(self.callback.url_for(key));
        send.method = Some("POST".to_string());
        let body = Bytes::from(serde_json::to_vec(&send)?);

        let (pending, notifications) = PendingRequest::new(key);
        self.store.put(key, pending);
        let guard = EntryGuard::new(Arc::clone(&self.store), key);

        parts.extensions.insert(key);
        parts
            .headers
            .insert(header::CONTENT_LENGTH, HeaderValue::from(body.len()));
        Span::current().record("correlation_id", tracing::field::display(key));

        Ok((
            body,
            Some(Registration {
                guard,
                notifications,
            }),
        ))
    }

    /// Inbound hook.
    ///
    /// Only a `202` carrying a single queued message UUID is held; every
    /// other response is returned as received.
    async fn await_resolution(
        &self,
        response: Response,
        registration: Registration,
        credentials: Option<Credentials>,
    ) -> Result<Response, InterceptError> {
        let Registration {
            guard,
            mut notifications,
        } = registration;

        if response.status() != StatusCode::ACCEPTED {
            self.metrics.record_passthrough();
            return Ok(response);
        }

        let key = guard.key();
        if self.store.get(&key).is_none() {
            debug!(correlation_id = %key, "Pending entry gone, passing response through");
            self.metrics.record_passthrough();
            return Ok(response);
        }

        let (mut parts, body) = response.into_parts();
        let body = axum::body::to_bytes(body, self.max_response_size)
            .await
            .map_err(|e| InterceptError::BodyRead(e.to_string()))?;

        let ack: SendAck = match serde_json::from_slice(&body) {
            Ok(ack) => ack,
            Err(e) => {
                debug!(error = %e, "Upstream ack is not JSON, passing through");
                self.metrics.record_passthrough();
                return Ok(Response::from_parts(parts, Body::from(body)));
            }
        };

        let (Some(message_uuid), Some(credentials)) = (ack.queued_message_uuid(), credentials)
        else {
            debug!(
                correlation_id = %key,
                message = %ack.message,
                uuids = ack.message_uuid.len(),
                "Not a single queued send, passing through"
            );
            self.metrics.record_passthrough();
            return Ok(Response::from_parts(parts, Body::from(body)));
        };

        self.store.alias(message_uuid, &key);

        let cancel = self.shutdown.child_token();
        let _stop_poller = cancel.clone().drop_guard();
        let (poll_tx, mut poll_rx) = oneshot::channel();
        tokio::spawn(Arc::clone(&self.poller).run(
            message_uuid.to_string(),
            credentials,
            cancel.clone(),
            poll_tx,
        ));

        let status = tokio::select! {
            biased;
            Some(status) = notifications.recv() => {
                cancel.cancel();
                self.metrics.record_resolution(Resolution::Webhook);
                info!(correlation_id = %key, message_uuid, state = %status.message_state, "Resolved by webhook");
                status
            }
            Ok(status) = &mut poll_rx => {
                self.metrics.record_resolution(Resolution::Poll);
                info!(correlation_id = %key, message_uuid, state = %status.message_state, "Resolved by poll");
                status
            }
            _ = tokio::time::sleep(self.wait_timeout) => {
                self.metrics.record_race_timeout();
                warn!(correlation_id = %key, message_uuid, "No status before deadline");
                return Err(InterceptError::Timeout(self.wait_timeout));
            }
        };

        let body = serde_json::to_vec(&status)?;
        parts.headers.remove(header::TRANSFER_ENCODING);
        parts.headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        );
        parts
            .headers
            .insert(header::CONTENT_LENGTH, HeaderValue::from(body.len()));

        Ok(Response::from_parts(parts, Body::from(body)))
    }

    async fn intercept<S>(&self, req: Request<Body>, mut inner: S) -> Result<Response, InterceptError>
    where
        S: Service<Request<Body>, Response = Response, Error = InterceptError>,
    {
        let (mut parts, body) = req.into_parts();
        let body = axum::body::to_bytes(body, self.max_request_size)
            .await
            .map_err(|e| InterceptError::RequestBody(e.to_string()))?;
        let credentials = Credentials::from_headers(&parts.headers);

        let (body, registration) = self.prepare_send(&mut parts, body)?;
        if registration.is_some() {
            self.metrics.record_intercepted();
        }
        let response = inner.call(Request::from_parts(parts, Body::from(body))).await?;

        match registration {
            Some(registration) => {
                self.await_resolution(response, registration, credentials)
                    .await
            }
            None => {
                self.metrics.record_passthrough();
                Ok(response)
            }
        }
    }
}

/// Layer applying [`Interceptor`] in front of an upstream service
#[derive(Clone)]
pub struct InterceptLayer {
    interceptor: Arc<Interceptor>,
}

impl InterceptLayer {
    pub fn new(interceptor: Interceptor) -> Self {
        Self {
            interceptor: Arc::new(interceptor),
        }
    }
}

impl<S> Layer<S> for InterceptLayer {
    type Service = InterceptService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        InterceptService {
            inner,
            interceptor: Arc::clone(&self.interceptor),
            not_ready: None,
        }
    }
}

/// Intercept service
///
/// Errors from the hooks or the upstream are rendered as JSON error
/// responses here, so the service itself never fails.
pub struct InterceptService<S> {
    inner: S,
    interceptor: Arc<Interceptor>,
    /// Readiness failure of `inner`, answered on the next call
    not_ready: Option<InterceptError>,
}

impl<S: Clone> Clone for InterceptService<S> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            interceptor: Arc::clone(&self.interceptor),
            not_ready: None,
        }
    }
}

impl<S> Service<Request<Body>> for InterceptService<S>
where
    S: Service<Request<Body>, Response = Response, Error = InterceptError>
        + Clone
        + Send
        + 'static,
    S::Future: Send,
{
    type Response = Response;
    type Error = Infallible;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        if let Err(e) = std::task::ready!(self.inner.poll_ready(cx)) {
            warn!(error = %e, "Upstream service not ready");
            self.not_ready = Some(e);
        }
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: Request<Body>) -> Self::Future {
        if let Some(e) = self.not_ready.take() {
            return Box::pin(async move { Ok(e.into_response()) });
        }

        let interceptor = Arc::clone(&self.interceptor);
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);

        Box::pin(async move {
            let result = if is_send_message_route(req.method(), req.uri().path()) {
                interceptor.intercept(req, inner).await
            } else {
                inner.call(req).await
            };

            Ok(result.unwrap_or_else(|e| {
                match &e {
                    InterceptError::Timeout(_) => {}
                    InterceptError::Upstream(_) => warn!(error = %e, "Upstream request failed"),
                    _ => {
                        interceptor.metrics.record_hook_error();
                        warn!(error = %e, "Interception failed");
                    }
                }
                e.into_response()
            }))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::config::PollConfig;
    use crate::domain::{InMemoryCorrelationStore, MessageState, PollError, NOTIFICATION_CAPACITY};
    use crate::ports::StatusLookup;
    use async_trait::async_trait;
    use axum::http::Method;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tower::ServiceExt;

    const MESSAGE_UUID: &str = "550e8400-e29b-41d4-a716-446655440000";
    const SEND_PATH: &str = "/v1/Account/MAXXXXXXXXXXXXXXXXXX/Message/";
    // base64("MAXXXXXXXXXXXXXXXXXX:token")
    const BASIC_AUTH: &str = "Basic TUFYWFhYWFhYWFhYWFhYWFhYWFg6dG9rZW4=";

    /// Reports `queued` until `resolve_on` calls have been made, then `state`.
    struct CountingLookup {
        calls: AtomicUsize,
        resolve_on: usize,
        state: MessageState,
    }

    #[async_trait]
    impl StatusLookup for CountingLookup {
        async fn lookup(
            &self,
            message_uuid: &str,
            _credentials: &Credentials,
        ) -> Result<StatusPayload, PollError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            let state = if call >= self.resolve_on {
                self.state
            } else {
                MessageState::Queued
            };
            Ok(StatusPayload::new(message_uuid, state))
        }
    }

    struct Harness {
        store: Arc<InMemoryCorrelationStore>,
        lookup: Arc<CountingLookup>,
        metrics: Arc<GatewayMetrics>,
        layer: InterceptLayer,
    }

    fn harness(resolve_on: usize, state: MessageState) -> Harness {
        let mut config = GatewayConfig::default();
        config.callback.base_url = "http://gateway.test:8091/".to_string();
        config.wait.timeout = Duration::from_secs(10);

        let store = Arc::new(InMemoryCorrelationStore::new());
        let lookup = Arc::new(CountingLookup {
            calls: AtomicUsize::new(0),
            resolve_on,
            state,
        });
        let metrics = Arc::new(GatewayMetrics::new());
        let poll = PollConfig {
            max_attempts: 10,
            interval: Duration::from_millis(500),
            ..PollConfig::default()
        };
        let poller = Arc::new(Poller::new(
            Arc::clone(&lookup) as Arc<dyn StatusLookup>,
            &poll,
            Arc::clone(&metrics),
        ));
        let interceptor = Interceptor::new(
            &config,
            Arc::clone(&store) as Arc<dyn CorrelationStore>,
            poller,
            Arc::clone(&metrics),
        );

        Harness {
            store,
            lookup,
            metrics,
            layer: InterceptLayer::new(interceptor),
        }
    }

    fn send_request(body: &str) -> Request<Body> {
        Request::builder()
            .method(Method::POST)
            .uri(SEND_PATH)
            .header(header::AUTHORIZATION, BASIC_AUTH)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn accepted(body: serde_json::Value) -> Response {
        (StatusCode::ACCEPTED, axum::Json(body)).into_response()
    }

    fn queued_ack(uuids: &[&str]) -> serde_json::Value {
        serde_json::json!({
            "api_id": "db342550-e6a0-11e3-a4b9-22000ac6194a",
            "message": "message(s) queued",
            "message_uuid": uuids,
        })
    }

    async fn read_body(response: Response) -> Bytes {
        axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap()
    }

    /// Correlation key the outbound hook wrote into the forwarded body
    async fn stamped_key(req: Request<Body>) -> (CorrelationId, serde_json::Value) {
        let body = axum::body::to_bytes(req.into_body(), usize::MAX)
            .await
            .unwrap();
        let send: serde_json::Value = serde_json::from_slice(&body).unwrap();
        let url = send["url"].as_str().unwrap();
        let key = url.rsplit('/').next().unwrap().parse().unwrap();
        (key, send)
    }

    #[tokio::test(start_paused = true)]
    async fn test_webhook_before_poll_resolves_request() {
        // Poll would only resolve on attempt 5; the webhook lands first
        let h = harness(5, MessageState::Sent);
        let store = Arc::clone(&h.store);

        let upstream = tower::service_fn(move |req: Request<Body>| {
            let store = Arc::clone(&store);
            async move {
                assert!(req.extensions().get::<CorrelationId>().is_some());
                let (key, send) = stamped_key(req).await;
                assert_eq!(send["method"], "POST");
                assert_eq!(send["src"], "14155550100");
                assert_eq!(
                    send["url"],
                    format!("http://gateway.test:8091/{}", key)
                );

                tokio::spawn(async move {
                    tokio::time::sleep(Duration::from_millis(100)).await;
                    let pending = store.get(&key).unwrap();
                    pending
                        .notifier
                        .try_send(StatusPayload::new(MESSAGE_UUID, MessageState::Delivered))
                        .unwrap();
                });
                Ok::<_, InterceptError>(accepted(queued_ack(&[MESSAGE_UUID])))
            }
        });

        let response = h
            .layer
            .layer(upstream)
            .oneshot(send_request(
                r#"{"src":"14155550100","dst":"14155550101","text":"hi","url":"https://client.example/cb"}"#,
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::ACCEPTED);
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            "application/json"
        );
        let body = read_body(response).await;
        let status: StatusPayload = serde_json::from_slice(&body).unwrap();
        assert_eq!(status.message_uuid, MESSAGE_UUID);
        assert_eq!(status.message_state, MessageState::Delivered);

        assert!(h.store.is_empty());
        assert_eq!(h.metrics.resolved_by_webhook.load(Ordering::Relaxed), 1);

        // Poller is cancelled and makes no further lookups
        let calls = h.lookup.calls.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(h.lookup.calls.load(Ordering::SeqCst), calls);
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_resolves_without_webhook() {
        let h = harness(2, MessageState::Sent);
        let upstream = tower::service_fn(|_req: Request<Body>| async {
            Ok::<_, InterceptError>(accepted(queued_ack(&[MESSAGE_UUID])))
        });

        let response = h
            .layer
            .layer(upstream)
            .oneshot(send_request(r#"{"src":"1","dst":"2","text":"hi"}"#))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::ACCEPTED);
        let content_length: usize = response.headers()[header::CONTENT_LENGTH]
            .to_str()
            .unwrap()
            .parse()
            .unwrap();
        let body = read_body(response).await;
        assert_eq!(body.len(), content_length);

        let status: StatusPayload = serde_json::from_slice(&body).unwrap();
        assert_eq!(status.message_state, MessageState::Sent);
        assert_eq!(h.lookup.calls.load(Ordering::SeqCst), 2);
        assert_eq!(h.metrics.resolved_by_poll.load(Ordering::Relaxed), 1);
        assert!(h.store.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_returns_gateway_timeout() {
        let h = harness(usize::MAX, MessageState::Sent);
        let upstream = tower::service_fn(|_req: Request<Body>| async {
            Ok::<_, InterceptError>(accepted(queued_ack(&[MESSAGE_UUID])))
        });

        let response = h
            .layer
            .layer(upstream)
            .oneshot(send_request(r#"{"src":"1","dst":"2","text":"hi"}"#))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::GATEWAY_TIMEOUT);
        let body: serde_json::Value = serde_json::from_slice(&read_body(response).await).unwrap();
        assert!(body["error"]["message"]
            .as_str()
            .unwrap()
            .contains("timeout on waiting for callback"));
        assert!(h.store.is_empty());
        assert_eq!(h.metrics.race_timeouts.load(Ordering::Relaxed), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_multi_recipient_ack_passes_through() {
        let h = harness(1, MessageState::Sent);
        let ack = queued_ack(&[MESSAGE_UUID, "660e8400-e29b-41d4-a716-446655440001"]);
        let expected = serde_json::to_vec(&ack).unwrap();
        let upstream = tower::service_fn(move |_req: Request<Body>| {
            let ack = ack.clone();
            async move { Ok::<_, InterceptError>(accepted(ack)) }
        });

        let response = h
            .layer
            .layer(upstream)
            .oneshot(send_request(r#"{"src":"1","dst":"2<3","text":"hi"}"#))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::ACCEPTED);
        assert_eq!(&read_body(response).await[..], &expected[..]);
        assert!(h.store.is_empty());
        assert_eq!(h.lookup.calls.load(Ordering::SeqCst), 0);
        assert_eq!(h.metrics.passthrough.load(Ordering::Relaxed), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_credentials_passes_through() {
        let h = harness(1, MessageState::Sent);
        let upstream = tower::service_fn(|_req: Request<Body>| async {
            Ok::<_, InterceptError>(accepted(queued_ack(&[MESSAGE_UUID])))
        });
        let mut req = send_request(r#"{"src":"1","dst":"2","text":"hi"}"#);
        req.headers_mut().remove(header::AUTHORIZATION);

        let response = h.layer.layer(upstream).oneshot(req).await.unwrap();

        let ack: serde_json::Value = serde_json::from_slice(&read_body(response).await).unwrap();
        assert_eq!(ack["message"], "message(s) queued");
        assert!(h.store.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_json_send_body_is_forwarded_unmodified() {
        let h = harness(1, MessageState::Sent);
        let upstream = tower::service_fn(|req: Request<Body>| async move {
            assert!(req.extensions().get::<CorrelationId>().is_none());
            let body = axum::body::to_bytes(req.into_body(), 1024).await.unwrap();
            assert_eq!(&body[..], b"src=1&dst=2");
            Ok::<_, InterceptError>(StatusCode::BAD_REQUEST.into_response())
        });

        let response = h
            .layer
            .layer(upstream)
            .oneshot(send_request("src=1&dst=2"))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(h.store.stats().total_registered.load(Ordering::Relaxed), 0);
        assert_eq!(h.metrics.sends_intercepted.load(Ordering::Relaxed), 0);
        assert_eq!(h.metrics.passthrough.load(Ordering::Relaxed), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_other_routes_are_not_touched() {
        let h = harness(1, MessageState::Sent);
        let upstream = tower::service_fn(|req: Request<Body>| async move {
            let body = axum::body::to_bytes(req.into_body(), 1024).await.unwrap();
            assert_eq!(&body[..], br#"{"text":"hi"}"#);
            Ok::<_, InterceptError>(accepted(queued_ack(&[MESSAGE_UUID])))
        });
        let req = Request::builder()
            .method(Method::POST)
            .uri("/v1/Account/MAXXXX/Call/")
            .header(header::AUTHORIZATION, BASIC_AUTH)
            .body(Body::from(r#"{"text":"hi"}"#))
            .unwrap();

        let response = h.layer.layer(upstream).oneshot(req).await.unwrap();

        assert_eq!(response.status(), StatusCode::ACCEPTED);
        assert_eq!(h.metrics.sends_intercepted.load(Ordering::Relaxed), 0);
        assert_eq!(h.store.stats().total_registered.load(Ordering::Relaxed), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_upstream_failure_is_bad_gateway_and_entry_removed() {
        let h = harness(1, MessageState::Sent);
        let upstream = tower::service_fn(|_req: Request<Body>| async {
            Err::<Response, _>(InterceptError::Upstream("connection refused".into()))
        });

        let response = h
            .layer
            .layer(upstream)
            .oneshot(send_request(r#"{"src":"1","dst":"2","text":"hi"}"#))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        assert_eq!(h.store.stats().total_registered.load(Ordering::Relaxed), 1);
        assert!(h.store.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_oversized_ack_is_hook_error() {
        let mut h = harness(1, MessageState::Sent);
        let mut config = GatewayConfig::default();
        config.limits.max_response_size = 16;
        let poller = Arc::new(Poller::new(
            Arc::clone(&h.lookup) as Arc<dyn StatusLookup>,
            &config.poll,
            Arc::clone(&h.metrics),
        ));
        h.layer = InterceptLayer::new(Interceptor::new(
            &config,
            Arc::clone(&h.store) as Arc<dyn CorrelationStore>,
            poller,
            Arc::clone(&h.metrics),
        ));
        let upstream = tower::service_fn(|_req: Request<Body>| async {
            Ok::<_, InterceptError>(accepted(queued_ack(&[MESSAGE_UUID])))
        });

        let response = h
            .layer
            .layer(upstream)
            .oneshot(send_request(r#"{"src":"1","dst":"2","text":"hi"}"#))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        assert_eq!(h.metrics.hook_errors.load(Ordering::Relaxed), 1);
        assert!(h.store.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_simultaneous_webhook_and_poll_resolve_once() {
        // Poll resolves on its first attempt while webhooks are already queued
        let h = harness(1, MessageState::Sent);
        let store = Arc::clone(&h.store);
        let dropped = Arc::new(AtomicUsize::new(0));
        let dropped_in_upstream = Arc::clone(&dropped);

        let upstream = tower::service_fn(move |req: Request<Body>| {
            let store = Arc::clone(&store);
            let dropped = Arc::clone(&dropped_in_upstream);
            async move {
                let (key, _) = stamped_key(req).await;
                let pending = store.get(&key).unwrap();
                for _ in 0..NOTIFICATION_CAPACITY + 2 {
                    let webhook = StatusPayload::new(MESSAGE_UUID, MessageState::Delivered);
                    if pending.notifier.try_send(webhook).is_err() {
                        dropped.fetch_add(1, Ordering::SeqCst);
                    }
                }
                Ok::<_, InterceptError>(accepted(queued_ack(&[MESSAGE_UUID])))
            }
        });

        let response = h
            .layer
            .layer(upstream)
            .oneshot(send_request(r#"{"src":"1","dst":"2","text":"hi"}"#))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::ACCEPTED);
        let status: StatusPayload = serde_json::from_slice(&read_body(response).await).unwrap();
        assert_eq!(status.message_uuid, MESSAGE_UUID);
        assert!(matches!(
            status.message_state,
            MessageState::Delivered | MessageState::Sent
        ));

        let by_webhook = h.metrics.resolved_by_webhook.load(Ordering::Relaxed);
        let by_poll = h.metrics.resolved_by_poll.load(Ordering::Relaxed);
        assert_eq!(by_webhook + by_poll, 1);
        assert_eq!(dropped.load(Ordering::SeqCst), 2);
        assert!(h.store.is_empty());
    }

    /// Upstream whose readiness check always fails.
    #[derive(Clone)]
    struct Unavailable;

    impl Service<Request<Body>> for Unavailable {
        type Response = Response;
        type Error = InterceptError;
        type Future = std::future::Ready<Result<Response, InterceptError>>;

        fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
            Poll::Ready(Err(InterceptError::Upstream("connection pool closed".into())))
        }

        fn call(&mut self, _req: Request<Body>) -> Self::Future {
            panic!("called without readiness");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_upstream_readiness_error_is_answered() {
        let h = harness(1, MessageState::Sent);

        let response = h
            .layer
            .layer(Unavailable)
            .oneshot(send_request(r#"{"src":"1","dst":"2","text":"hi"}"#))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        let body: serde_json::Value = serde_json::from_slice(&read_body(response).await).unwrap();
        assert!(body["error"]["message"]
            .as_str()
            .unwrap()
            .contains("connection pool closed"));
        assert_eq!(h.store.stats().total_registered.load(Ordering::Relaxed), 0);
    }
}
