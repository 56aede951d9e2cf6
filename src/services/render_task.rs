//! One derivative render: job row -> upstream clip -> playback URL -> asset
//! row -> job completion, strictly in that order.
//!
//! A job that ends `failed` never gets an asset: every failure after the job
//! row exists goes through `fail_job` before the asset is written, and the
//! asset write is the last fallible step before completion.

use std::sync::Arc;
use std::time::Instant;

use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::constants::PROCESSING_METHOD;
use crate::models::{
    AssetMetadata, Captions, ClipRequest, NewAsset, NewRenderJob, OutputFormat, RenderFeatures,
    RenderParams,
};
use crate::services::cloudflare::{TranscodeError, TranscodeProvider};
use crate::services::error::{ErrorKind, StepError, StoreError};
use crate::services::job_store::JobStore;
use crate::services::retry::RetryPolicy;

/// Inputs shared by both derivative renders of one pipeline run
pub struct RenderContext<'a> {
    pub user_id: i64,
    pub request: &'a ClipRequest,
    pub remote_video_id: &'a str,
    pub captions: &'a Captions,
}

#[derive(Debug, Clone)]
pub struct RenderOutput {
    pub url: String,
    pub job_id: Uuid,
    pub asset_id: Uuid,
    pub remote_clip_id: String,
}

#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    #[error("could not create render job: {0}")]
    JobCreate(#[source] StoreError),

    #[error(transparent)]
    Upstream(#[from] TranscodeError),

    #[error("could not record asset: {0}")]
    AssetWrite(#[source] StoreError),

    #[error("could not complete render job: {0}")]
    JobComplete(#[source] StoreError),

    #[error("cancelled {0}")]
    Cancelled(String),
}

impl RenderError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            RenderError::JobCreate(_) | RenderError::AssetWrite(_) | RenderError::JobComplete(_) => {
                ErrorKind::Storage
            }
            RenderError::Upstream(TranscodeError::Unavailable) => ErrorKind::Configuration,
            RenderError::Upstream(_) => ErrorKind::Upstream,
            RenderError::Cancelled(_) => ErrorKind::Cancelled,
        }
    }

    /// Attribute this failure to the step that owns `format`
    pub fn into_step_error(self, format: OutputFormat) -> StepError {
        let payload = match &self {
            RenderError::Upstream(e) => e.upstream_payload(),
            _ => None,
        };
        StepError::new(format.step(), self.kind(), self.to_string()).with_payload(payload)
    }
}

pub struct RenderTask {
    format: OutputFormat,
    transcoder: Arc<dyn TranscodeProvider>,
    jobs: Arc<dyn JobStore>,
    retry: RetryPolicy,
}

impl RenderTask {
    pub fn new(
        format: OutputFormat,
        transcoder: Arc<dyn TranscodeProvider>,
        jobs: Arc<dyn JobStore>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            format,
            transcoder,
            jobs,
            retry,
        }
    }

    pub async fn run(
        &self,
        ctx: &RenderContext<'_>,
        cancel: &CancellationToken,
    ) -> Result<RenderOutput, RenderError> {
        let started = Instant::now();
        let request = ctx.request;

        let job = NewRenderJob {
            user_id: ctx.user_id,
            params: RenderParams {
                clip_id: request.clip_id.clone(),
                start_time: request.start_time,
                end_time: request.end_time(),
                output_format: self.format,
                cloudflare_video_id: ctx.remote_video_id.to_string(),
                features: RenderFeatures::default(),
            },
        };
        let job_id = self.jobs.create_job(&job).await.map_err(RenderError::JobCreate)?;

        tracing::info!(
            clip_id = %request.clip_id,
            format = self.format.as_str(),
            %job_id,
            "render job created"
        );

        let output = match self.produce(job_id, ctx, cancel).await {
            Ok(output) => output,
            Err(e) => {
                let message = e.to_string();
                if let Err(store_err) = self.jobs.fail_job(job_id, &message).await {
                    tracing::error!(%job_id, error = %store_err, "could not mark render job failed");
                }
                tracing::warn!(
                    clip_id = %request.clip_id,
                    format = self.format.as_str(),
                    %job_id,
                    error = %message,
                    "render failed"
                );
                return Err(e);
            }
        };

        // The asset already exists, so a failed completion write must not
        // turn into fail_job.
        let elapsed = started.elapsed().as_secs_f64();
        if let Err(e) = self.jobs.complete_job(job_id, elapsed).await {
            tracing::warn!(
                clip_id = %request.clip_id,
                format = self.format.as_str(),
                %job_id,
                asset_id = %output.asset_id,
                error = %e,
                "render job left in processing: completion write failed after the asset was stored"
            );
            return Err(RenderError::JobComplete(e));
        }

        tracing::info!(
            clip_id = %request.clip_id,
            format = self.format.as_str(),
            %job_id,
            asset_id = %output.asset_id,
            remote_clip_id = %output.remote_clip_id,
            processing_time_seconds = elapsed,
            "render completed"
        );

        Ok(output)
    }

    async fn produce(
        &self,
        job_id: Uuid,
        ctx: &RenderContext<'_>,
        cancel: &CancellationToken,
    ) -> Result<RenderOutput, RenderError> {
        let request = ctx.request;
        if cancel.is_cancelled() {
            return Err(RenderError::Cancelled("before upstream clip creation".into()));
        }

        let label = self.format.label();
        let create = self.retry.run("clip", cancel, || {
            self.transcoder
                .create_clip(ctx.remote_video_id, request.start_time, request.end_time(), label)
        });
        let remote_clip_id = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                return Err(RenderError::Cancelled(
                    "while creating upstream clip (upstream state unknown)".into(),
                ));
            }
            result = create => result?,
        };

        let (width, height) = self.format.dimensions();
        let url = self.transcoder.playback_url(&remote_clip_id, width, height);

        if cancel.is_cancelled() {
            return Err(RenderError::Cancelled(format!(
                "after upstream clip {} was created",
                remote_clip_id
            )));
        }

        let asset = NewAsset {
            render_job_id: job_id,
            source_media_id: request.clip_id.clone(),
            output_type: self.format,
            storage_path: url.clone(),
            duration_seconds: request.duration,
            metadata: AssetMetadata {
                resolution: format!("{}x{}", width, height),
                aspect_ratio: self.format.aspect_ratio().to_string(),
                captions_count: ctx.captions.len(),
                captions_burned: false,
                cloudflare_clip_id: remote_clip_id.clone(),
                processing_method: PROCESSING_METHOD.to_string(),
                title: request.title.clone(),
                hook: request.hook.clone(),
            },
        };
        let asset_id = self
            .jobs
            .create_asset(&asset)
            .await
            .map_err(RenderError::AssetWrite)?;

        Ok(RenderOutput {
            url,
            job_id,
            asset_id,
            remote_clip_id,
        })
    }
}
