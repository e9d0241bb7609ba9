use std::time::Duration;

use axum::http::{HeaderName, Method, StatusCode, header};
use axum::response::Response;
use tower_http::cors::{AllowOrigin, CorsLayer};

use crate::extractors::JWT_HEADER;

/// Creates the CORS middleware for all routes.
///
/// The request origin is mirrored back. Browsers may send the JWT header and JSON bodies with
/// `GET`, `POST` and `HEAD` requests.
pub fn cors() -> CorsLayer {
    CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::HEAD, Method::OPTIONS])
        .allow_headers([
            HeaderName::from_static(JWT_HEADER),
            HeaderName::from_static("x-requested-with"),
            HeaderName::from_static("origin"),
            HeaderName::from_static("accept"),
            HeaderName::from_static("content-type"),
            HeaderName::from_static("authentication"),
        ])
        .allow_origin(AllowOrigin::mirror_request())
        .max_age(Duration::from_secs(3600))
}

/// Answers CORS preflight requests with `204 No Content`.
///
/// Only preflight responses carry `Access-Control-Allow-Methods`.
pub fn preflight_no_content(mut response: Response) -> Response {
    if response.status() == StatusCode::OK
        && response
            .headers()
            .contains_key(header::ACCESS_CONTROL_ALLOW_METHODS)
    {
        *response.status_mut() = StatusCode::NO_CONTENT;
    }

    response
}
