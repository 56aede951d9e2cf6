//! Clip export endpoints

use axum::{
    Json, Router,
    extract::{Path, State, rejection::JsonRejection},
    http::StatusCode,
    routing::{get, post},
};
use serde::Serialize;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower_governor::{
    GovernorLayer, governor::GovernorConfigBuilder, key_extractor::SmartIpKeyExtractor,
};
use uuid::Uuid;

use crate::AppState;
use crate::models::{Clip, ClipRequest, RenderJobSummary};
use crate::routes::auth::AuthUser;
use crate::services::error::{ErrorKind, LogErr, StepError, StepId};
use crate::services::pipeline::RenderOutcome;
use crate::services::render_task::RenderOutput;

pub fn routes() -> Router<Arc<AppState>> {
    // Each render copies a source video upstream, so keep bursts small per client
    let rate_limit_config = GovernorConfigBuilder::default()
        .per_second(6)
        .burst_size(10)
        .key_extractor(SmartIpKeyExtractor)
        .finish()
        .expect("Failed to build rate limit config");

    let rate_limit_layer = GovernorLayer {
        config: rate_limit_config.into(),
    };

    let render = Router::new()
        .route("/clips/render", post(render_clip))
        .layer(rate_limit_layer);

    Router::new()
        .merge(render)
        .route("/clips/{id}", get(get_clip))
        .route("/clips/{id}/renders", get(list_renders))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct DerivativeResponse {
    url: String,
    asset_id: Uuid,
    job_id: Uuid,
}

impl From<RenderOutput> for DerivativeResponse {
    fn from(output: RenderOutput) -> Self {
        Self {
            url: output.url,
            asset_id: output.asset_id,
            job_id: output.job_id,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CaptionSummary {
    count: usize,
    used_fallback: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RenderResponse {
    success: bool,
    clip_id: String,
    vertical: DerivativeResponse,
    thumbnail: DerivativeResponse,
    captions: CaptionSummary,
}

impl From<RenderOutcome> for RenderResponse {
    fn from(outcome: RenderOutcome) -> Self {
        Self {
            success: true,
            clip_id: outcome.clip_id,
            vertical: outcome.vertical.into(),
            thumbnail: outcome.thumbnail.into(),
            captions: CaptionSummary {
                count: outcome.captions_count,
                used_fallback: outcome.captions_used_fallback,
            },
        }
    }
}

/// POST /clips/render - Render the vertical and thumbnail exports for a clip
async fn render_clip(
    State(state): State<Arc<AppState>>,
    AuthUser(user_id): AuthUser,
    payload: Result<Json<ClipRequest>, JsonRejection>,
) -> Result<Json<RenderResponse>, StepError> {
    let Json(request) = payload.map_err(|e| {
        StepError::new(StepId::ParseRequest, ErrorKind::InvalidRequest, e.body_text())
    })?;

    let outcome = run_with_deadline(state, user_id, request).await?;
    Ok(Json(outcome.into()))
}

/// Run the pipeline on its own task with a deadline.
///
/// If the caller goes away the handler future is dropped; the drop guard
/// cancels the token and the detached run winds down, still writing
/// terminal job and clip states.
async fn run_with_deadline(
    state: Arc<AppState>,
    user_id: i64,
    request: ClipRequest,
) -> Result<RenderOutcome, StepError> {
    let cancel = CancellationToken::new();
    let _cancel_on_drop = cancel.clone().drop_guard();

    let deadline = state.pipeline_deadline;
    let timer = cancel.clone();
    tokio::spawn(async move {
        tokio::select! {
            _ = timer.cancelled() => {}
            _ = tokio::time::sleep(deadline) => {
                tracing::warn!(deadline_secs = deadline.as_secs(), "pipeline deadline reached, cancelling run");
                timer.cancel();
            }
        }
    });

    let pipeline = state.pipeline.clone();
    let run_token = cancel.clone();
    tokio::spawn(async move { pipeline.render_clip(user_id, &request, &run_token).await })
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "pipeline task aborted");
            StepError::new(
                StepId::UpdateClipRecord,
                ErrorKind::Internal,
                "pipeline task aborted before the clip record was updated",
            )
        })?
}

/// Clips are visible to their owner; unowned rows are visible to any caller
async fn load_owned_clip(state: &AppState, clip_id: &str, user_id: i64) -> Result<Clip, StatusCode> {
    let clip = state
        .clips
        .get_clip(clip_id)
        .await
        .log_500("Get clip error")?
        .ok_or(StatusCode::NOT_FOUND)?;

    match clip.user_id {
        Some(owner) if owner != user_id => Err(StatusCode::NOT_FOUND),
        _ => Ok(clip),
    }
}

/// GET /clips/{id} - Current clip status, for callers polling after a timeout
async fn get_clip(
    State(state): State<Arc<AppState>>,
    AuthUser(user_id): AuthUser,
    Path(clip_id): Path<String>,
) -> Result<Json<Clip>, StatusCode> {
    let clip = load_owned_clip(&state, &clip_id, user_id).await?;
    Ok(Json(clip))
}

/// GET /clips/{id}/renders - Render attempts for a clip with asset counts
async fn list_renders(
    State(state): State<Arc<AppState>>,
    AuthUser(user_id): AuthUser,
    Path(clip_id): Path<String>,
) -> Result<Json<Vec<RenderJobSummary>>, StatusCode> {
    load_owned_clip(&state, &clip_id, user_id).await?;

    let jobs = state
        .jobs
        .list_jobs_for_clip(&clip_id)
        .await
        .log_500("List render jobs error")?;

    Ok(Json(jobs))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ClipStatus;
    use crate::services::captions::CaptionGenerator;
    use crate::services::pipeline::{PipelineOptions, PipelineOrchestrator};
    use crate::services::session::create_access_token;
    use crate::services::testing::{FakeTranscoder, MemoryStore, rejected};
    use axum::body::Body;
    use axum::http::Request;
    use std::time::Duration;
    use tower::ServiceExt;

    const SECRET: &[u8] = b"route-test-secret";

    fn app(store: Arc<MemoryStore>, cf: Arc<FakeTranscoder>) -> Router {
        let pipeline = PipelineOrchestrator::new(
            store.clone(),
            store.clone(),
            cf,
            CaptionGenerator::default(),
            PipelineOptions::default(),
        );
        let state = Arc::new(AppState {
            pipeline: Arc::new(pipeline),
            clips: store.clone(),
            jobs: store,
            jwt_secret: SECRET.to_vec(),
            pipeline_deadline: Duration::from_secs(30),
        });
        crate::routes::build_routes().with_state(state)
    }

    fn bearer(user_id: i64) -> String {
        format!(
            "Bearer {}",
            create_access_token(user_id, SECRET, chrono::Duration::minutes(5))
        )
    }

    fn render_request(auth: Option<String>, body: &str) -> Request<Body> {
        let mut builder = Request::builder()
            .method("POST")
            .uri("/clips/render")
            .header("content-type", "application/json")
            .header("x-forwarded-for", "127.0.0.1");
        if let Some(auth) = auth {
            builder = builder.header("authorization", auth);
        }
        builder.body(Body::from(body.to_string())).unwrap()
    }

    async fn json_body(resp: axum::response::Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    const BODY: &str = r#"{"clipId":"clip-1","sourceVideoUrl":"https://example/src.mp4","startTime":10,"duration":15,"title":"Hook"}"#;

    #[tokio::test]
    async fn test_render_success_response() {
        let store = Arc::new(MemoryStore::with_clip("clip-1"));
        let resp = app(store.clone(), Arc::new(FakeTranscoder::default()))
            .oneshot(render_request(Some(bearer(7)), BODY))
            .await
            .unwrap();

        assert_eq!(resp.status(), StatusCode::OK);
        let body = json_body(resp).await;
        assert_eq!(body["success"], true);
        assert!(body["vertical"]["url"].as_str().unwrap().contains("width=1080&height=1920"));
        assert!(body["thumbnail"]["url"].as_str().unwrap().contains("width=1080&height=1080"));
        assert_eq!(body["captions"]["count"], 0);
        assert_eq!(store.clip("clip-1").status, ClipStatus::Ready);
    }

    #[tokio::test]
    async fn test_upload_failure_response_shape() {
        let store = Arc::new(MemoryStore::with_clip("clip-1"));
        let cf = Arc::new(FakeTranscoder::failing_upload(rejected("copy", 400, "invalid url")));
        let resp = app(store.clone(), cf)
            .oneshot(render_request(Some(bearer(7)), BODY))
            .await
            .unwrap();

        assert_eq!(resp.status(), StatusCode::BAD_GATEWAY);
        let body = json_body(resp).await;
        assert_eq!(body["error"], "Phase 3 failed");
        assert_eq!(body["step"], "cloudflare_upload");
        assert!(body["message"].as_str().unwrap().contains("invalid url"));
        assert_eq!(store.clip("clip-1").status, ClipStatus::Failed);
        assert!(store.jobs().is_empty());
    }

    #[tokio::test]
    async fn test_missing_token_is_auth_check() {
        let store = Arc::new(MemoryStore::with_clip("clip-1"));
        let resp = app(store.clone(), Arc::new(FakeTranscoder::default()))
            .oneshot(render_request(None, BODY))
            .await
            .unwrap();

        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
        let body = json_body(resp).await;
        assert_eq!(body["step"], "auth_check");
        assert!(store.clip_writes().is_empty());
    }

    #[tokio::test]
    async fn test_cookie_token_and_expired_token() {
        let store = Arc::new(MemoryStore::with_clip("clip-1"));
        let router = app(store, Arc::new(FakeTranscoder::default()));

        let token = create_access_token(7, SECRET, chrono::Duration::minutes(5));
        let resp = router
            .clone()
            .oneshot(
                Request::builder()
                    .uri("/clips/clip-1")
                    .header("cookie", format!("access_token={}", token))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let expired = create_access_token(7, SECRET, chrono::Duration::minutes(-10));
        let resp = router
            .oneshot(
                Request::builder()
                    .uri("/clips/clip-1")
                    .header("authorization", format!("Bearer {}", expired))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
        let body = json_body(resp).await;
        assert_eq!(body["step"], "auth_check");
        assert_eq!(body["message"], "Token expired");
    }

    #[tokio::test]
    async fn test_malformed_body_is_parse_request() {
        let store = Arc::new(MemoryStore::with_clip("clip-1"));
        let resp = app(store, Arc::new(FakeTranscoder::default()))
            .oneshot(render_request(Some(bearer(7)), r#"{"clipId": 5}"#))
            .await
            .unwrap();

        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let body = json_body(resp).await;
        assert_eq!(body["step"], "parse_request");
        assert_eq!(body["error"], "Phase 0 failed");
    }

    #[tokio::test]
    async fn test_unknown_clip_is_404() {
        let store = Arc::new(MemoryStore::with_clip("other"));
        let resp = app(store, Arc::new(FakeTranscoder::default()))
            .oneshot(render_request(Some(bearer(7)), BODY))
            .await
            .unwrap();

        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
        let body = json_body(resp).await;
        assert_eq!(body["step"], "fetch_clip_record");
    }

    #[tokio::test]
    async fn test_render_of_another_users_clip_is_404() {
        let store = Arc::new(MemoryStore::with_clip("clip-1"));
        let cf = Arc::new(FakeTranscoder::default());
        let body = r#"{"clipId":"clip-1","sourceVideoUrl":"https://elsewhere.example/x.mp4","startTime":0,"duration":5}"#;
        let resp = app(store.clone(), cf.clone())
            .oneshot(render_request(Some(bearer(8)), body))
            .await
            .unwrap();

        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
        let body = json_body(resp).await;
        assert_eq!(body["step"], "fetch_clip_record");
        assert_eq!(store.clip("clip-1").status, ClipStatus::Pending);
        assert!(store.clip_writes().is_empty());
        assert!(store.jobs().is_empty());
        assert_eq!(cf.upload_calls.load(std::sync::atomic::Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_status_and_renders_endpoints() {
        let store = Arc::new(MemoryStore::with_clip("clip-1"));
        let router = app(store.clone(), Arc::new(FakeTranscoder::default()));

        let resp = router
            .clone()
            .oneshot(render_request(Some(bearer(7)), BODY))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let resp = router
            .clone()
            .oneshot(
                Request::builder()
                    .uri("/clips/clip-1")
                    .header("authorization", bearer(7))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = json_body(resp).await;
        assert_eq!(body["status"], "ready");
        assert!(body["verticalUrl"].is_string());

        let resp = router
            .clone()
            .oneshot(
                Request::builder()
                    .uri("/clips/clip-1/renders")
                    .header("authorization", bearer(7))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = json_body(resp).await;
        let jobs = body.as_array().unwrap();
        assert_eq!(jobs.len(), 2);
        assert!(jobs.iter().all(|j| j["status"] == "completed" && j["assetCount"] == 1));

        // Another user's clip is invisible
        let resp = router
            .oneshot(
                Request::builder()
                    .uri("/clips/clip-1")
                    .header("authorization", bearer(8))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }
}
