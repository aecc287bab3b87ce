//! Caller-identity extraction (§6: "auth identity is injected by an upstream
//! filter as a string named `authAgentAddr`"). This crate does not verify
//! credentials — authentication and rate limiting are external collaborators
//! (§1 Non-goals) — it only reads the identity the upstream filter already
//! established and forwards it to the Service as a plain string.

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

pub const AUTH_HEADER: &str = "x-agent-addr";

/// The caller's agent address, as injected by the upstream auth filter.
/// Extracting this fails the request with 401 if the header is absent.
pub struct AuthAgentAddr(pub String);

pub struct MissingAuthHeader;

impl IntoResponse for MissingAuthHeader {
    fn into_response(self) -> Response {
        (
            StatusCode::UNAUTHORIZED,
            axum::Json(serde_json::json!({
                "error": "unauthorized",
                "message": format!("missing {} header", AUTH_HEADER),
            })),
        )
            .into_response()
    }
}

#[axum::async_trait]
impl<S: Send + Sync> FromRequestParts<S> for AuthAgentAddr {
    type Rejection = MissingAuthHeader;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .headers
            .get(AUTH_HEADER)
            .and_then(|v| v.to_str().ok())
            .filter(|s| !s.is_empty())
            .map(|s| AuthAgentAddr(s.to_string()))
            .ok_or(MissingAuthHeader)
    }
}

/// Same header, but absence is not an error — used by public endpoints where
/// the identity only matters if present (none of the current routes need
/// this, kept for symmetry with `AuthAgentAddr`).
pub struct OptionalAuthAgentAddr(pub Option<String>);

#[axum::async_trait]
impl<S: Send + Sync> FromRequestParts<S> for OptionalAuthAgentAddr {
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let addr = parts
            .headers
            .get(AUTH_HEADER)
            .and_then(|v| v.to_str().ok())
            .filter(|s| !s.is_empty())
            .map(|s| s.to_string());
        Ok(OptionalAuthAgentAddr(addr))
    }
}
