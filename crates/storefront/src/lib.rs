//! Orchard storefront library.
//!
//! Inventory-consistent cart, checkout and payment reconciliation, exposed as
//! a JSON API. The binary wires these pieces to `PostgreSQL`; tests wire them
//! to the in-memory store.

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod config;
pub mod db;
pub mod error;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod services;
pub mod state;

use std::time::Duration;

use axum::Router;
use tower_http::trace::{DefaultOnResponse, OnResponse, TraceLayer};
use tower_sessions::service::CookieController;
use tower_sessions::{SessionManagerLayer, SessionStore};
use tracing::Span;

use crate::middleware::{RateLimiterLayer, request_id_middleware};
use crate::state::AppState;

/// Build the application router.
///
/// `api_limiter` is applied to `/api` routes only so health probes without
/// proxy headers are never rejected.
pub fn app<S, C>(
    state: AppState,
    session_layer: SessionManagerLayer<S, C>,
    api_limiter: Option<RateLimiterLayer>,
) -> Router
where
    S: SessionStore + Clone,
    C: CookieController + Sync,
{
    let api = match api_limiter {
        Some(limiter) => routes::api_routes().layer(limiter),
        None => routes::api_routes(),
    };

    Router::new()
        .merge(routes::health_routes())
        .merge(api)
        .layer(session_layer)
        .layer(axum::middleware::from_fn(request_id_middleware))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|request: &axum::http::Request<_>| {
                    tracing::info_span!(
                        "http_request",
                        method = %request.method(),
                        uri = %request.uri(),
                        request_id = tracing::field::Empty,
                        status = tracing::field::Empty,
                        latency_ms = tracing::field::Empty,
                    )
                })
                .on_response(
                    |response: &axum::http::Response<_>, latency: Duration, span: &Span| {
                        span.record("status", response.status().as_u16());
                        span.record(
                            "latency_ms",
                            u64::try_from(latency.as_millis()).unwrap_or(u64::MAX),
                        );
                        DefaultOnResponse::default().on_response(response, latency, span);
                    },
                ),
        )
        .with_state(state)
}
