use axum::extract::{FromRequestParts, Query};
use axum::http::StatusCode;
use axum::http::request::Parts;
use axum::response::{IntoResponse, Response};
use proxy_auth::VerifyError;
use proxy_stats::metric;
use serde::Deserialize;

use crate::service::ServiceState;
use crate::statsd::ServerCounters;
use crate::utils::ApiErrorResponse;

/// Header carrying the JSON web token.
pub const JWT_HEADER: &str = "x-jwt-token";

/// Query parameter carrying the JSON web token, if the header is absent.
const JWT_QUERY_PARAM: &str = "token";

/// An error rejecting an unauthenticated submission.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("token not specified")]
    MissingToken,
    #[error("error parsing token")]
    BadToken(#[source] VerifyError),
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let status = match self {
            Self::MissingToken => StatusCode::UNAUTHORIZED,
            Self::BadToken(_) => StatusCode::FORBIDDEN,
        };

        (status, ApiErrorResponse::from_error(&self)).into_response()
    }
}

#[derive(Deserialize)]
struct TokenQuery {
    token: Option<String>,
}

fn token_from_parts(parts: &Parts) -> Option<String> {
    let header = parts
        .headers
        .get(JWT_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty());

    if let Some(token) = header {
        return Some(token.to_owned());
    }

    Query::<TokenQuery>::try_from_uri(&parts.uri)
        .ok()
        .and_then(|Query(query)| query.token)
        .filter(|token| !token.is_empty())
}

/// Proof that a request carries a valid JSON web token.
///
/// The token is read from the `X-JWT-Token` header or the `token` query parameter. If no JWT
/// secret is configured, every request is authenticated.
#[derive(Clone, Copy, Debug)]
pub struct Authenticated;

impl FromRequestParts<ServiceState> for Authenticated {
    type Rejection = AuthError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &ServiceState,
    ) -> Result<Self, Self::Rejection> {
        let Some(verifier) = state.verifier() else {
            return Ok(Self);
        };

        let Some(token) = token_from_parts(parts) else {
            proxy_log::warn!(path = parts.uri.path(), "token not specified");
            metric!(counter(ServerCounters::RequestsWithoutToken) += 1);
            return Err(AuthError::MissingToken);
        };

        match verifier.verify(&token) {
            Ok(_) => Ok(Self),
            Err(error) => {
                proxy_log::warn!(
                    error = &error as &dyn std::error::Error,
                    path = parts.uri.path(),
                    "error parsing token"
                );
                metric!(counter(ServerCounters::RequestsBadToken) += 1);
                Err(AuthError::BadToken(error))
            }
        }
    }
}
