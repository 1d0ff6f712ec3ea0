use axum::{
    extract::Request,
    http::{HeaderValue, StatusCode, Uri, header},
    middleware::Next,
    response::Response,
};
use tracing::debug;

use crate::error::AppError;

// Simplified CORS middleware
pub async fn add_headers(req: Request, next: Next) -> Response {
    let mut response = next.run(req).await;
    let headers = response.headers_mut();
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_ORIGIN,
        HeaderValue::from_static("*"),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static("GET, OPTIONS"),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_HEADERS,
        HeaderValue::from_static("Content-Type"),
    );
    response
}

// CORS preflight; add_headers supplies the Allow-* headers
pub async fn preflight() -> StatusCode {
    StatusCode::NO_CONTENT
}

// Anything outside the routed paths
pub async fn invalid_path(uri: Uri) -> AppError {
    debug!(path = %uri.path(), "No route for path");
    AppError::BadPath(format!("Unknown resource {}", uri.path()))
}

// Simple health check endpoint
pub async fn health_check() -> &'static str {
    "OK"
}
