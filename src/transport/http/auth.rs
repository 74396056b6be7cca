//! Bearer-token extractor for institution routes.

use crate::app::{AuthenticatedInstitution, ServiceError};
use crate::transport::http::handlers::common::fail;
use crate::transport::http::types::AppState;
use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use axum::http::HeaderMap;
use axum::response::Response;

/// The authenticated institution. Missing token → 401, bad or expired token → 403.
pub struct Caller(pub AuthenticatedInstitution);

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    (!token.is_empty()).then_some(token)
}

#[async_trait]
impl FromRequestParts<AppState> for Caller {
    type Rejection = Response;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let Some(token) = bearer_token(&parts.headers) else {
            return Err(fail(
                &ServiceError::Unauthorized("Access token required".to_string()),
                state.development,
            ));
        };
        state
            .institutions
            .authenticate(token)
            .await
            .map(Caller)
            .map_err(|e| fail(&e, state.development))
    }
}
