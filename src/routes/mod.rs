pub mod auth;
pub mod clips;

use axum::{
    Json, Router,
    response::{IntoResponse, Response},
};
use serde_json::json;
use std::sync::Arc;

use crate::AppState;
use crate::services::error::StepError;

/// Build all routes for the API
pub fn build_routes() -> Router<Arc<AppState>> {
    Router::new().merge(clips::routes())
}

/// Failures reach callers as `{error: "Phase N failed", step, message}`
impl IntoResponse for StepError {
    fn into_response(self) -> Response {
        let body = json!({
            "error": format!("Phase {} failed", self.stage.phase()),
            "step": self.stage,
            "message": self.user_message(),
        });
        (self.status_code(), Json(body)).into_response()
    }
}
