use axum::extract::{FromRequest, Request};
use axum::http::header;
use bytes::Bytes;
use serde::de::DeserializeOwned;

use crate::endpoints::common::BadMetricRequest;

/// A JSON request body.
///
/// Unlike [`axum::Json`], the `Content-Type` header must be exactly `application/json`, without
/// parameters. The body size is capped by the `DefaultBodyLimit` of the route.
#[derive(Debug)]
pub struct JsonBody<T>(pub T);

impl<S, T> FromRequest<S> for JsonBody<T>
where
    S: Send + Sync,
    T: DeserializeOwned,
{
    type Rejection = BadMetricRequest;

    async fn from_request(request: Request, state: &S) -> Result<Self, Self::Rejection> {
        let content_type = request
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");

        if content_type != mime::APPLICATION_JSON.as_ref() {
            return Err(BadMetricRequest::UnsupportedContentType(
                content_type.to_owned(),
            ));
        }

        let body = Bytes::from_request(request, state).await?;
        let value = serde_json::from_slice(&body).map_err(BadMetricRequest::InvalidJson)?;

        Ok(Self(value))
    }
}
