//! Request accounting for the conversion API.

use axum::{
    body::Body,
    extract::MatchedPath,
    http::Request,
    middleware::Next,
    response::Response,
};
use f2f_core::ErrorKind;
use std::time::Instant;

use crate::metrics::{API_REQUESTS_IN_FLIGHT, API_REQUESTS_TOTAL, API_REQUEST_DURATION};

/// Label for requests that matched no route.
const UNMATCHED_ROUTE: &str = "unmatched";

/// Records latency and outcome per API route.
///
/// Requests are labelled by their route template (`/api/v1/jobs/{id}`), so
/// job and recipe ids never become label values. Failed requests also carry
/// the error kind the handler returned.
pub async fn metrics_middleware(request: Request<Body>, next: Next) -> Response {
    let start = Instant::now();
    let method = request.method().to_string();
    let route = request
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| UNMATCHED_ROUTE.to_string());

    API_REQUESTS_IN_FLIGHT.inc();
    let response = next.run(request).await;
    API_REQUESTS_IN_FLIGHT.dec();

    let status = response.status().as_u16().to_string();
    let error_kind = response
        .extensions()
        .get::<ErrorKind>()
        .map_or("none", ErrorKind::as_str);

    API_REQUEST_DURATION
        .with_label_values(&[&method, &route, &status])
        .observe(start.elapsed().as_secs_f64());
    API_REQUESTS_TOTAL
        .with_label_values(&[&method, &route, &status, error_kind])
        .inc();

    response
}
