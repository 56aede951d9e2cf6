//! Request authentication

use axum::{extract::FromRequestParts, http::header::AUTHORIZATION, http::request::Parts};
use axum_extra::extract::CookieJar;
use std::sync::Arc;

use crate::AppState;
use crate::services::error::{ErrorKind, StepError, StepId};
use crate::services::session;

// ============================================================================
// Auth Extractor - validates the JWT and extracts user_id
// ============================================================================

/// Extractor that validates the access token and returns the user_id.
///
/// The token comes from the `access_token` cookie (browser sessions) or an
/// `Authorization: Bearer` header (service callers). Failures are reported
/// under the `auth_check` step.
pub struct AuthUser(pub i64);

impl FromRequestParts<Arc<AppState>> for AuthUser {
    type Rejection = StepError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let unauthorized =
            |msg: &str| StepError::new(StepId::AuthCheck, ErrorKind::Unauthorized, msg);

        let jar = CookieJar::from_headers(&parts.headers);
        let access_token = jar
            .get("access_token")
            .map(|c| c.value().to_string())
            .or_else(|| {
                parts
                    .headers
                    .get(AUTHORIZATION)
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.strip_prefix("Bearer "))
                    .map(str::to_string)
            })
            .ok_or_else(|| unauthorized("missing access token"))?;

        let user_id =
            session::validate_access_token(&access_token, &state.jwt_secret).map_err(|e| {
                tracing::debug!(error = %e, "JWT validation failed");
                unauthorized(&e.to_string())
            })?;

        Ok(AuthUser(user_id))
    }
}
