mod config;
mod constants;
mod domain;
mod models;
mod routes;
mod services;

use axum::{Router, routing::get};
use sqlx::postgres::PgPoolOptions;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use config::AppConfig;
use services::captions::{CaptionGenerator, LanguageModel, OpenAiChatClient};
use services::cloudflare::CloudflareStreamClient;
use services::job_store::{ClipStore, JobStore, PgStore};
use services::pipeline::{PipelineOptions, PipelineOrchestrator};

pub struct AppState {
    pub pipeline: Arc<PipelineOrchestrator>,
    pub clips: Arc<dyn ClipStore>,
    pub jobs: Arc<dyn JobStore>,
    pub jwt_secret: Vec<u8>,
    /// Upper bound on one render request, upload through final clip write
    pub pipeline_deadline: Duration,
}

async fn health() -> &'static str {
    "ok"
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = AppConfig::from_env()?;

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&config.database_url)
        .await?;

    let http = reqwest::Client::builder()
        .timeout(config.http_timeout)
        .build()?;

    if config.cloudflare.account_id.is_none() || config.cloudflare.api_token.is_none() {
        tracing::warn!("Cloudflare Stream credentials not set; renders will fail at cloudflare_upload");
    }
    let transcoder = Arc::new(CloudflareStreamClient::new(config.cloudflare.clone(), http.clone()));

    let caption_model = config.captions.api_key.as_deref().map(|key| {
        Arc::new(OpenAiChatClient::new(
            key,
            &config.captions.model,
            &config.captions.api_base,
            http.clone(),
        )) as Arc<dyn LanguageModel>
    });
    if caption_model.is_none() {
        tracing::info!("OPENAI_API_KEY not set; captions use the fallback split");
    }

    let store = Arc::new(PgStore::new(pool));

    let pipeline = PipelineOrchestrator::new(
        store.clone(),
        store.clone(),
        transcoder,
        CaptionGenerator::new(caption_model),
        PipelineOptions {
            fail_fast: config.fail_fast,
            retry: config.retry,
        },
    );

    let state = Arc::new(AppState {
        pipeline: Arc::new(pipeline),
        clips: store.clone(),
        jobs: store,
        jwt_secret: config.jwt_secret.clone(),
        pipeline_deadline: config.pipeline_deadline,
    });

    let app = Router::new()
        .route("/health", get(health))
        .merge(routes::build_routes())
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(
        %addr,
        fail_fast = config.fail_fast,
        deadline_secs = config.pipeline_deadline.as_secs(),
        "clip export service listening"
    );

    // Peer address is the rate-limit key fallback when no proxy headers are present
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;
    Ok(())
}
