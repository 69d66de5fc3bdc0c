use std::rc::Rc;
use std::time::{Duration, Instant};

use actix_web::{
    dev::{forward_ready, Service, ServiceRequest, ServiceResponse, Transform},
    Error, HttpResponse,
};
use futures::future::{ready, LocalBoxFuture, Ready};
use once_cell::sync::Lazy;
use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGaugeVec, Opts,
    TextEncoder,
};

static HTTP_REQUESTS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    let counter = IntCounterVec::new(
        Opts::new(
            "market_stream_http_requests_total",
            "Total HTTP requests handled by market-stream-service",
        ),
        &["method", "path", "status"],
    )
    .expect("failed to create market_stream_http_requests_total");
    prometheus::default_registry()
        .register(Box::new(counter.clone()))
        .expect("failed to register market_stream_http_requests_total");
    counter
});

static HTTP_REQUEST_DURATION_SECONDS: Lazy<HistogramVec> = Lazy::new(|| {
    let histogram = HistogramVec::new(
        HistogramOpts::new(
            "market_stream_http_request_duration_seconds",
            "HTTP request latency for market-stream-service",
        )
        .buckets(vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5]),
        &["method", "path", "status"],
    )
    .expect("failed to create market_stream_http_request_duration_seconds");
    prometheus::default_registry()
        .register(Box::new(histogram.clone()))
        .expect("failed to register market_stream_http_request_duration_seconds");
    histogram
});

static WS_SESSIONS_ACTIVE: Lazy<IntGaugeVec> = Lazy::new(|| {
    let gauge = IntGaugeVec::new(
        Opts::new(
            "market_stream_ws_sessions_active",
            "Live WebSocket sessions by stream flavor",
        ),
        &["flavor"],
    )
    .expect("failed to create market_stream_ws_sessions_active");
    prometheus::default_registry()
        .register(Box::new(gauge.clone()))
        .expect("failed to register market_stream_ws_sessions_active");
    gauge
});

static WS_SESSIONS_REJECTED_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    let counter = IntCounter::new(
        "market_stream_ws_sessions_rejected_total",
        "WebSocket handshakes closed for an invalid or expired token",
    )
    .expect("failed to create market_stream_ws_sessions_rejected_total");
    prometheus::default_registry()
        .register(Box::new(counter.clone()))
        .expect("failed to register market_stream_ws_sessions_rejected_total");
    counter
});

static EVENTS_PROCESSED_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    let counter = IntCounterVec::new(
        Opts::new(
            "market_stream_events_processed_total",
            "Log records handled by ingestion consumers",
        ),
        &["consumer", "outcome"],
    )
    .expect("failed to create market_stream_events_processed_total");
    prometheus::default_registry()
        .register(Box::new(counter.clone()))
        .expect("failed to register market_stream_events_processed_total");
    counter
});

static PUSH_NOTIFICATIONS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    let counter = IntCounterVec::new(
        Opts::new(
            "market_stream_push_notifications_total",
            "Push notification attempts by targeting kind and result",
        ),
        &["kind", "result"],
    )
    .expect("failed to create market_stream_push_notifications_total");
    prometheus::default_registry()
        .register(Box::new(counter.clone()))
        .expect("failed to register market_stream_push_notifications_total");
    counter
});

static REGISTRY_EVICTIONS_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    let counter = IntCounter::new(
        "market_stream_registry_evictions_total",
        "Sessions removed from the registry after a failed send",
    )
    .expect("failed to create market_stream_registry_evictions_total");
    prometheus::default_registry()
        .register(Box::new(counter.clone()))
        .expect("failed to register market_stream_registry_evictions_total");
    counter
});

pub fn observe_http_request(method: &str, path: &str, status: u16, elapsed: Duration) {
    let status_label = status.to_string();
    HTTP_REQUESTS_TOTAL
        .with_label_values(&[method, path, &status_label])
        .inc();
    HTTP_REQUEST_DURATION_SECONDS
        .with_label_values(&[method, path, &status_label])
        .observe(elapsed.as_secs_f64());
}

pub fn session_opened(flavor: &str) {
    WS_SESSIONS_ACTIVE.with_label_values(&[flavor]).inc();
}

pub fn session_closed(flavor: &str) {
    WS_SESSIONS_ACTIVE.with_label_values(&[flavor]).dec();
}

pub fn session_rejected() {
    WS_SESSIONS_REJECTED_TOTAL.inc();
}

/// `outcome` is one of `processed`, `malformed`, `failed`
pub fn record_event(consumer: &str, outcome: &str) {
    EVENTS_PROCESSED_TOTAL
        .with_label_values(&[consumer, outcome])
        .inc();
}

pub fn record_push(kind: &str, delivered: bool) {
    let result = if delivered { "success" } else { "failure" };
    PUSH_NOTIFICATIONS_TOTAL
        .with_label_values(&[kind, result])
        .inc();
}

pub fn record_evictions(count: usize) {
    REGISTRY_EVICTIONS_TOTAL.inc_by(count as u64);
}

pub async fn serve_metrics() -> HttpResponse {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();

    let mut buffer = Vec::new();
    if let Err(err) = encoder.encode(&metric_families, &mut buffer) {
        return HttpResponse::InternalServerError().body(err.to_string());
    }

    HttpResponse::Ok()
        .content_type(encoder.format_type())
        .body(buffer)
}

/// Records count and latency of every request, labelled by route pattern
/// so path parameters do not explode label cardinality.
pub struct MetricsMiddleware;

impl<S, B> Transform<S, ServiceRequest> for MetricsMiddleware
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type InitError = ();
    type Transform = MetricsMiddlewareService<S>;
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(MetricsMiddlewareService {
            service: Rc::new(service),
        }))
    }
}

pub struct MetricsMiddlewareService<S> {
    service: Rc<S>,
}

impl<S, B> Service<ServiceRequest> for MetricsMiddlewareService<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let service = self.service.clone();
        let path = req
            .match_pattern()
            .unwrap_or_else(|| "unmatched".to_string());
        let method = req.method().to_string();
        let start = Instant::now();

        Box::pin(async move {
            let result = service.call(req).await;
            let elapsed = start.elapsed();
            match &result {
                Ok(response) => {
                    observe_http_request(&method, &path, response.status().as_u16(), elapsed);
                }
                Err(_) => {
                    observe_http_request(&method, &path, 500, elapsed);
                }
            }
            result
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_are_registered() {
        record_event("arbitrage", "processed");
        record_push("broadcast", true);
        session_opened("market");
        session_closed("market");

        let names: Vec<String> = prometheus::gather()
            .into_iter()
            .map(|family| family.get_name().to_string())
            .collect();
        assert!(names.contains(&"market_stream_events_processed_total".to_string()));
        assert!(names.contains(&"market_stream_push_notifications_total".to_string()));
        assert!(names.contains(&"market_stream_ws_sessions_active".to_string()));
    }
}
