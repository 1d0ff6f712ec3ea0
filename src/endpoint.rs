use std::time::Duration;

use axum::{
    BoxError, Json, Router,
    error_handling::HandleErrorLayer,
    extract::{Path, State, rejection::PathRejection},
    middleware,
    response::{IntoResponse, Response},
    routing::get,
};
use serde::Serialize;
use tower::ServiceBuilder;
use tower::timeout::error::Elapsed;
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::Level;

use crate::appstate::AppState;
use crate::error::{AppError, Result};
use crate::filter::{add_headers, health_check, invalid_path, preflight};
use crate::prometheus::{METRICS_PATH, metrics_handler, metrics_middleware};
use crate::rates::CurrencyList;
use crate::route::RateRoute;

/// Body of the single-pair lookup.
#[derive(Debug, Serialize)]
pub struct LatestRate {
    pub value: f64,
}

pub async fn all_rates_handler(State(state): State<AppState>) -> Result<Response> {
    dispatch(&state, RateRoute::All).await
}

// Axum decodes the captured tail, so `%42TC` arrives as `BTC`.
pub async fn rates_handler(
    State(state): State<AppState>,
    rest: std::result::Result<Path<String>, PathRejection>,
) -> Result<Response> {
    let Path(rest) = rest.map_err(|e| AppError::BadPath(e.body_text()))?;
    let route = RateRoute::parse(&format!("/rates/{rest}"))?;
    dispatch(&state, route).await
}

async fn dispatch(state: &AppState, route: RateRoute) -> Result<Response> {
    let response = match route {
        RateRoute::All => Json(state.rates.all_rates().await?).into_response(),
        RateRoute::ForCrypto { crypto } => {
            Json(state.rates.rates_for_crypto(&crypto).await?).into_response()
        }
        RateRoute::Pair { crypto, fiat } => {
            let value = state.rates.latest_rate(&crypto, &fiat).await?;
            Json(LatestRate { value }).into_response()
        }
        RateRoute::History { crypto, fiat } => {
            Json(state.rates.history(&crypto, &fiat).await?).into_response()
        }
    };
    Ok(response)
}

pub async fn currencies_handler(State(state): State<AppState>) -> Result<Json<CurrencyList>> {
    Ok(Json(state.rates.currencies().await?))
}

async fn request_timed_out(err: BoxError) -> AppError {
    if err.is::<Elapsed>() {
        AppError::Timeout("request")
    } else {
        AppError::Internal(err.to_string())
    }
}

/// Routes, CORS, metrics, request tracing and the whole-request timeout.
///
/// With a `base_path` such as `/api` the routes are served under it instead
/// of at the root.
pub fn build_router(state: AppState, request_timeout: Duration, base_path: Option<&str>) -> Router {
    let routes = Router::new()
        .route("/rates", get(all_rates_handler).options(preflight))
        .route("/rates/{*rest}", get(rates_handler).options(preflight))
        .route("/currencies", get(currencies_handler).options(preflight))
        .route("/health", get(health_check))
        .route(METRICS_PATH, get(metrics_handler))
        .fallback(invalid_path)
        .layer(
            ServiceBuilder::new()
                .layer(HandleErrorLayer::new(request_timed_out))
                .timeout(request_timeout),
        )
        .layer(middleware::from_fn_with_state(
            state.metrics.clone(),
            metrics_middleware,
        ))
        .with_state(state);

    let app = match base_path {
        Some(prefix) => Router::new().nest(prefix, routes).fallback(invalid_path),
        None => routes,
    };

    app.layer(middleware::from_fn(add_headers)).layer(
        TraceLayer::new_for_http()
            .make_span_with(DefaultMakeSpan::new().include_headers(true))
            .on_response(DefaultOnResponse::new().level(Level::INFO)),
    )
}
