//! Gateway counters, exported as JSON on the admin server.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Which leg of the race produced the status returned to the client
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    Webhook,
    Poll,
}

/// Gateway metrics
#[derive(Debug, Default)]
pub struct GatewayMetrics {
    // Proxy traffic
    pub requests_total: AtomicU64,
    pub requests_success: AtomicU64,
    pub requests_error: AtomicU64,

    // Interception
    pub sends_intercepted: AtomicU64,
    pub passthrough: AtomicU64,
    pub resolved_by_webhook: AtomicU64,
    pub resolved_by_poll: AtomicU64,
    pub race_timeouts: AtomicU64,
    pub hook_errors: AtomicU64,

    // Polling
    pub poll_attempts: AtomicU64,
    pub poll_failures: AtomicU64,

    // Webhooks
    pub webhooks_received: AtomicU64,
    pub webhooks_delivered: AtomicU64,
    pub webhooks_dropped: AtomicU64,
    pub webhooks_unmatched: AtomicU64,

    // Latency tracking (simplified - in production use histograms)
    pub total_latency_ms: AtomicU64,
    pub request_count_for_latency: AtomicU64,
}

impl GatewayMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a proxied request
    pub fn record_request(&self, success: bool, latency_ms: u64) {
        self.requests_total.fetch_add(1, Ordering::Relaxed);

        if success {
            self.requests_success.fetch_add(1, Ordering::Relaxed);
        } else {
            self.requests_error.fetch_add(1, Ordering::Relaxed);
        }

        self.total_latency_ms
            .fetch_add(latency_ms, Ordering::Relaxed);
        self.request_count_for_latency
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_intercepted(&self) {
        self.sends_intercepted.fetch_add(1, Ordering::Relaxed);
    }

    /// Intercepted send whose response was handed back untouched
    pub fn record_passthrough(&self) {
        self.passthrough.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_resolution(&self, resolution: Resolution) {
        let counter = match resolution {
            Resolution::Webhook => &self.resolved_by_webhook,
            Resolution::Poll => &self.resolved_by_poll,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_race_timeout(&self) {
        self.race_timeouts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_hook_error(&self) {
        self.hook_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_poll_attempt(&self, success: bool) {
        self.poll_attempts.fetch_add(1, Ordering::Relaxed);
        if !success {
            self.poll_failures.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_webhook_received(&self) {
        self.webhooks_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_webhook_delivered(&self) {
        self.webhooks_delivered.fetch_add(1, Ordering::Relaxed);
    }

    /// Webhook matched a pending send but its channel was full or closed
    pub fn record_webhook_dropped(&self) {
        self.webhooks_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_webhook_unmatched(&self) {
        self.webhooks_unmatched.fetch_add(1, Ordering::Relaxed);
    }

    /// Get average latency in ms
    pub fn average_latency_ms(&self) -> f64 {
        let total = self.total_latency_ms.load(Ordering::Relaxed);
        let count = self.request_count_for_latency.load(Ordering::Relaxed);
        if count == 0 {
            0.0
        } else {
            total as f64 / count as f64
        }
    }

    /// Export metrics as JSON
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "requests": {
                "total": self.requests_total.load(Ordering::Relaxed),
                "success": self.requests_success.load(Ordering::Relaxed),
                "error": self.requests_error.load(Ordering::Relaxed),
            },
            "sends": {
                "intercepted": self.sends_intercepted.load(Ordering::Relaxed),
                "passthrough": self.passthrough.load(Ordering::Relaxed),
                "resolved_by_webhook": self.resolved_by_webhook.load(Ordering::Relaxed),
                "resolved_by_poll": self.resolved_by_poll.load(Ordering::Relaxed),
                "timeouts": self.race_timeouts.load(Ordering::Relaxed),
                "hook_errors": self.hook_errors.load(Ordering::Relaxed),
            },
            "polling": {
                "attempts": self.poll_attempts.load(Ordering::Relaxed),
                "failures": self.poll_failures.load(Ordering::Relaxed),
            },
            "webhooks": {
                "received": self.webhooks_received.load(Ordering::Relaxed),
                "delivered": self.webhooks_delivered.load(Ordering::Relaxed),
                "dropped": self.webhooks_dropped.load(Ordering::Relaxed),
                "unmatched": self.webhooks_unmatched.load(Ordering::Relaxed),
            },
            "latency": {
                "average_ms": self.average_latency_ms(),
            }
        })
    }
}

/// Request timing helper
pub struct RequestTimer {
    start: Instant,
    metrics: Arc<GatewayMetrics>,
}

impl RequestTimer {
    pub fn new(metrics: Arc<GatewayMetrics>) -> Self {
        Self {
            start: Instant::now(),
            metrics,
        }
    }

    pub fn finish(self, success: bool) {
        let latency_ms = self.start.elapsed().as_millis() as u64;
        self.metrics.record_request(success, latency_ms);
    }
}
