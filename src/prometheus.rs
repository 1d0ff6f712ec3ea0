use std::fmt;

use axum::{
    extract::{Request, State},
    http::header,
    middleware::Next,
    response::{IntoResponse, Response},
};
use prometheus::{
    HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry, TEXT_FORMAT, TextEncoder,
};
use tokio::time::Instant;

use crate::appstate::AppState;
use crate::error::Result;
use crate::route::RateRoute;

pub const METRICS_PATH: &str = "/metrics";

/// Request and refresh metrics, scraped from `/metrics`.
#[derive(Clone)]
pub struct Metrics {
    pub registry: Registry,
    pub http_requests_total: IntCounterVec,
    pub http_request_duration: HistogramVec,
    pub refresh_runs_total: IntCounterVec,
}

impl fmt::Debug for Metrics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Metrics")
    }
}

impl Metrics {
    pub fn new() -> Result<Self> {
        let http_requests_total = IntCounterVec::new(
            Opts::new("http_requests_total", "Total number of HTTP requests"),
            &["route", "method", "status"],
        )?;

        let http_request_duration = HistogramVec::new(
            HistogramOpts::new(
                "http_request_duration_seconds",
                "HTTP request duration in seconds",
            )
            .buckets(vec![0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]),
            &["route", "method"],
        )?;

        let refresh_runs_total = IntCounterVec::new(
            Opts::new("rate_refresh_runs_total", "Exchange rate refresh runs by outcome"),
            &["outcome"],
        )?;

        let registry = Registry::new();
        registry.register(Box::new(http_requests_total.clone()))?;
        registry.register(Box::new(http_request_duration.clone()))?;
        registry.register(Box::new(refresh_runs_total.clone()))?;

        Ok(Self {
            registry,
            http_requests_total,
            http_request_duration,
            refresh_runs_total,
        })
    }

    pub fn record_refresh(&self, succeeded: bool) {
        let outcome = if succeeded { "success" } else { "failure" };
        self.refresh_runs_total.with_label_values(&[outcome]).inc();
    }

    /// Text exposition of everything registered.
    pub fn render(&self) -> Result<String> {
        Ok(TextEncoder::new().encode_to_string(&self.registry.gather())?)
    }
}

/// Route label for a request path; symbols never become label values.
pub fn route_label(path: &str) -> &'static str {
    match path {
        "/health" => "health",
        "/currencies" => "currencies",
        METRICS_PATH => "metrics",
        _ => RateRoute::parse(path)
            .map(|route| route.shape())
            .unwrap_or("unmatched"),
    }
}

// Prometheus metrics handler
pub async fn metrics_handler(State(state): State<AppState>) -> Result<Response> {
    let body = state.metrics.render()?;
    Ok(([(header::CONTENT_TYPE, TEXT_FORMAT)], body).into_response())
}

// Prometheus metrics middleware
pub async fn metrics_middleware(
    State(metrics): State<Metrics>,
    req: Request,
    next: Next,
) -> Response {
    let start = Instant::now();
    let route = route_label(req.uri().path());
    let method = req.method().as_str().to_owned();

    let response = next.run(req).await;

    if route != "metrics" {
        let status = response.status().as_u16().to_string();
        metrics
            .http_requests_total
            .with_label_values(&[route, method.as_str(), status.as_str()])
            .inc();
        metrics
            .http_request_duration
            .with_label_values(&[route, method.as_str()])
            .observe(start.elapsed().as_secs_f64());
    }
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn labels_follow_route_shape() {
        assert_eq!(route_label("/rates"), "rates_all");
        assert_eq!(route_label("/rates/BTC/USD"), "rates_pair");
        assert_eq!(route_label("/rates/DOGE/JPY"), "rates_pair");
        assert_eq!(route_label("/rates/history/BTC/USD"), "rates_history");
        assert_eq!(route_label("/currencies"), "currencies");
        assert_eq!(route_label("/wp-admin/setup.php"), "unmatched");
    }

    #[test]
    fn refresh_outcomes_are_counted() {
        let metrics = Metrics::new().unwrap();
        metrics.record_refresh(true);
        metrics.record_refresh(true);
        metrics.record_refresh(false);

        assert_eq!(
            metrics
                .refresh_runs_total
                .with_label_values(&["success"])
                .get(),
            2
        );
        let text = metrics.render().unwrap();
        assert!(text.contains("rate_refresh_runs_total{outcome=\"failure\"} 1"));
    }
}
