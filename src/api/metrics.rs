use axum::{
    extract::{MatchedPath, Request},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use prometheus::{Encoder, Histogram, IntCounter, IntCounterVec, TextEncoder};
use std::sync::Once;
use std::time::Instant;
use tower::{Layer, Service};

lazy_static::lazy_static! {
    static ref HTTP_REQUESTS_TOTAL: IntCounterVec = IntCounterVec::new(
        prometheus::opts!("http_requests_total", "Total number of HTTP requests"),
        &["method", "endpoint", "status"]
    ).unwrap();

    static ref HTTP_REQUEST_DURATION: Histogram = Histogram::with_opts(
        prometheus::HistogramOpts::new(
            "http_request_duration_seconds",
            "HTTP request duration in seconds"
        )
    ).unwrap();

    static ref MINING_RUNS: IntCounterVec = IntCounterVec::new(
        prometheus::opts!("mining_runs_total", "Total number of finished mining runs"),
        &["outcome"]
    ).unwrap();

    static ref MINING_ITERATIONS: IntCounter = IntCounter::new(
        "mining_iterations_total",
        "Total number of outlier mining iterations"
    ).unwrap();

    static ref DETECTIONS_SELECTED: IntCounter = IntCounter::new(
        "detections_selected_total",
        "Total number of detections selected for review"
    ).unwrap();

    static ref DETECTIONS_CONFIRMED: IntCounter = IntCounter::new(
        "detections_confirmed_total",
        "Total number of detections labeled by reviewers"
    ).unwrap();

    static ref MINING_DURATION: Histogram = Histogram::with_opts(
        prometheus::HistogramOpts::new(
            "mining_duration_seconds",
            "Mining run duration in seconds"
        )
    ).unwrap();
}

static REGISTER: Once = Once::new();

pub fn init_metrics() {
    REGISTER.call_once(|| {
        let collectors: Vec<Box<dyn prometheus::core::Collector>> = vec![
            Box::new(HTTP_REQUESTS_TOTAL.clone()),
            Box::new(HTTP_REQUEST_DURATION.clone()),
            Box::new(MINING_RUNS.clone()),
            Box::new(MINING_ITERATIONS.clone()),
            Box::new(DETECTIONS_SELECTED.clone()),
            Box::new(DETECTIONS_CONFIRMED.clone()),
            Box::new(MINING_DURATION.clone()),
        ];
        for collector in collectors {
            if let Err(e) = prometheus::register(collector) {
                tracing::warn!("Failed to register metric: {}", e);
            }
        }
    });
}

#[derive(Clone)]
pub struct MetricsMiddleware;

impl MetricsMiddleware {
    pub fn new() -> Self {
        init_metrics();
        Self
    }
}

impl Default for MetricsMiddleware {
    fn default() -> Self {
        Self::new()
    }
}

impl<S> Layer<S> for MetricsMiddleware {
    type Service = MetricsService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        MetricsService { inner }
    }
}

#[derive(Clone)]
pub struct MetricsService<S> {
    inner: S,
}

impl<S> Service<Request> for MetricsService<S>
where
    S: Service<Request, Response = Response> + Clone + Send + 'static,
    S::Future: Send + 'static,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = std::pin::Pin<
        Box<dyn std::future::Future<Output = Result<Self::Response, Self::Error>> + Send>,
    >;

    fn poll_ready(
        &mut self,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request) -> Self::Future {
        let method = req.method().to_string();
        let path = endpoint_label(&req);
        let start = Instant::now();

        let mut inner = self.inner.clone();

        Box::pin(async move {
            let response = inner.call(req).await?;

            let duration = start.elapsed().as_secs_f64();
            let status = response.status().as_u16().to_string();

            HTTP_REQUEST_DURATION.observe(duration);
            HTTP_REQUESTS_TOTAL
                .with_label_values(&[&method, &path, &status])
                .inc();

            Ok(response)
        })
    }
}

/// Route template for the request, so ids in the path do not become labels.
fn endpoint_label(req: &Request) -> String {
    req.extensions()
        .get::<MatchedPath>()
        .map(|path| path.as_str().to_string())
        .unwrap_or_else(|| "unmatched".to_string())
}

pub async fn metrics_handler() -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();

    match encoder.encode(&metric_families, &mut buffer) {
        Ok(_) => (
            StatusCode::OK,
            [(axum::http::header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            buffer,
        ),
        Err(e) => {
            tracing::error!("Failed to encode metrics: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                [(axum::http::header::CONTENT_TYPE, "text/plain")],
                b"Failed to encode metrics".to_vec(),
            )
        }
    }
}

pub fn record_mining_iteration(newly_selected: u64) {
    MINING_ITERATIONS.inc();
    DETECTIONS_SELECTED.inc_by(newly_selected);
}

pub fn record_mining_run(outcome: &str) {
    MINING_RUNS.with_label_values(&[outcome]).inc();
}

pub fn record_mining_duration(duration: f64) {
    MINING_DURATION.observe(duration);
}

pub fn record_detections_confirmed(count: u64) {
    DETECTIONS_CONFIRMED.inc_by(count);
}
