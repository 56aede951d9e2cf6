//! Clip export pipeline.
//!
//! Drives one clip from `pending` to `ready` or `failed`:
//!
//! 1. look up the clip (`fetch_clip_record`), enter `processing`
//! 2. generate captions once (`generate_captions`, best-effort)
//! 3. copy the source into Cloudflare Stream once (`cloudflare_upload`)
//! 4. render the vertical and thumbnail derivatives from that one upload
//!    (`process_vertical`, `process_thumbnail`)
//! 5. write the terminal clip status (`update_clip_record`)
//!
//! The clip row is written only here, never by the render tasks. `ready`
//! is written only with both URLs.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::models::{Captions, ClipRequest, OutputFormat};
use crate::services::captions::CaptionGenerator;
use crate::services::cloudflare::{TranscodeError, TranscodeProvider};
use crate::services::error::{ErrorKind, StepError, StepId};
use crate::services::job_store::{ClipStore, JobStore};
use crate::services::render_task::{RenderContext, RenderError, RenderOutput, RenderTask};
use crate::services::retry::RetryPolicy;

#[derive(Debug, Clone, Copy)]
pub struct PipelineOptions {
    /// Render sequentially and stop at the first failure. When false both
    /// derivatives run concurrently and each records its own outcome.
    pub fail_fast: bool,
    pub retry: RetryPolicy,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            fail_fast: true,
            retry: RetryPolicy::none(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RenderOutcome {
    pub clip_id: String,
    pub vertical: RenderOutput,
    pub thumbnail: RenderOutput,
    pub captions_count: usize,
    pub captions_used_fallback: bool,
}

pub struct PipelineOrchestrator {
    clips: Arc<dyn ClipStore>,
    jobs: Arc<dyn JobStore>,
    transcoder: Arc<dyn TranscodeProvider>,
    captions: CaptionGenerator,
    options: PipelineOptions,
}

impl PipelineOrchestrator {
    pub fn new(
        clips: Arc<dyn ClipStore>,
        jobs: Arc<dyn JobStore>,
        transcoder: Arc<dyn TranscodeProvider>,
        captions: CaptionGenerator,
        options: PipelineOptions,
    ) -> Self {
        Self {
            clips,
            jobs,
            transcoder,
            captions,
            options,
        }
    }

    fn render_task(&self, format: OutputFormat) -> RenderTask {
        RenderTask::new(
            format,
            self.transcoder.clone(),
            self.jobs.clone(),
            self.options.retry,
        )
    }

    /// Run the whole pipeline for one request.
    ///
    /// Once the clip is `processing`, every exit path leaves it terminal,
    /// including cancellation.
    pub async fn render_clip(
        &self,
        user_id: i64,
        request: &ClipRequest,
        cancel: &CancellationToken,
    ) -> Result<RenderOutcome, StepError> {
        request
            .validate()
            .map_err(|msg| StepError::new(StepId::ParseRequest, ErrorKind::InvalidRequest, msg))?;

        let clip_id = request.clip_id.as_str();

        let clip = self.clips.get_clip(clip_id).await.map_err(|e| {
            StepError::new(StepId::FetchClipRecord, ErrorKind::Storage, e.to_string())
        })?;
        // Another user's clip is reported exactly like a missing one
        let owned = match clip {
            Some(clip) => clip.user_id.is_none_or(|owner| owner == user_id),
            None => false,
        };
        if !owned {
            return Err(StepError::new(
                StepId::FetchClipRecord,
                ErrorKind::NotFound,
                format!("Clip {} not found", clip_id),
            ));
        }

        self.clips.mark_processing(clip_id).await.map_err(|e| {
            StepError::new(StepId::UpdateClipRecord, ErrorKind::Storage, e.to_string())
        })?;
        tracing::info!(clip_id, user_id, fail_fast = self.options.fail_fast, "clip processing started");

        let captions = match request.transcript_text() {
            Some(transcript) => {
                self.captions
                    .generate(transcript, request.start_time, request.duration)
                    .await
            }
            None => Captions::default(),
        };
        if captions.is_empty() {
            tracing::info!(clip_id, step = %StepId::GenerateCaptions, "no captions for this clip");
        } else {
            tracing::info!(
                clip_id,
                step = %StepId::GenerateCaptions,
                count = captions.len(),
                used_fallback = captions.used_fallback,
                "captions ready"
            );
        }

        let remote_video_id = match self.upload_source(request, cancel).await {
            Ok(id) => id,
            Err(e) => return Err(self.fail_clip(clip_id, e, None, None).await),
        };

        let ctx = RenderContext {
            user_id,
            request,
            remote_video_id: &remote_video_id,
            captions: &captions,
        };
        let vertical_task = self.render_task(OutputFormat::Vertical);
        let thumbnail_task = self.render_task(OutputFormat::Thumbnail);

        let (vertical, thumbnail) = if self.options.fail_fast {
            let vertical = match vertical_task.run(&ctx, cancel).await {
                Ok(output) => output,
                Err(e) => {
                    let err = e.into_step_error(OutputFormat::Vertical);
                    return Err(self.fail_clip(clip_id, err, None, None).await);
                }
            };
            let thumbnail = match thumbnail_task.run(&ctx, cancel).await {
                Ok(output) => output,
                Err(e) => {
                    let err = e.into_step_error(OutputFormat::Thumbnail);
                    return Err(self.fail_clip(clip_id, err, None, None).await);
                }
            };
            (vertical, thumbnail)
        } else {
            let (vertical, thumbnail) =
                tokio::join!(vertical_task.run(&ctx, cancel), thumbnail_task.run(&ctx, cancel));
            match (vertical, thumbnail) {
                (Ok(v), Ok(t)) => (v, t),
                (v, t) => return Err(self.fail_partial(clip_id, v, t).await),
            }
        };

        if let Err(e) = self
            .clips
            .mark_ready(clip_id, &vertical.url, &thumbnail.url)
            .await
        {
            let err = StepError::new(StepId::UpdateClipRecord, ErrorKind::Storage, e.to_string());
            return Err(self.fail_clip(clip_id, err, None, None).await);
        }

        tracing::info!(
            clip_id,
            vertical_url = %vertical.url,
            thumbnail_url = %thumbnail.url,
            "clip ready"
        );

        Ok(RenderOutcome {
            clip_id: clip_id.to_string(),
            vertical,
            thumbnail,
            captions_count: captions.len(),
            captions_used_fallback: captions.used_fallback,
        })
    }

    async fn upload_source(
        &self,
        request: &ClipRequest,
        cancel: &CancellationToken,
    ) -> Result<String, StepError> {
        let cancelled = || {
            StepError::new(
                StepId::CloudflareUpload,
                ErrorKind::Cancelled,
                "cancelled before the source upload completed",
            )
        };
        if cancel.is_cancelled() {
            return Err(cancelled());
        }

        let name = request.title.as_deref().unwrap_or(&request.clip_id);
        let upload = self.options.retry.run("copy", cancel, || {
            self.transcoder.upload_source(&request.source_video_url, name)
        });
        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(cancelled()),
            result = upload => result,
        };

        result
            .map(|id| {
                tracing::info!(clip_id = %request.clip_id, video_id = %id, "source uploaded");
                id
            })
            .map_err(|e| {
                let kind = match e {
                    TranscodeError::Unavailable => ErrorKind::Configuration,
                    _ => ErrorKind::Upstream,
                };
                StepError::new(StepId::CloudflareUpload, kind, e.to_string())
                    .with_payload(e.upstream_payload())
            })
    }

    /// Both renders ran; at least one failed. The first failure in fixed
    /// order (vertical, thumbnail) becomes the clip error. A derivative that
    /// did render keeps its URL on the failed clip.
    async fn fail_partial(
        &self,
        clip_id: &str,
        vertical: Result<RenderOutput, RenderError>,
        thumbnail: Result<RenderOutput, RenderError>,
    ) -> StepError {
        let (vertical_url, vertical_err) = split(vertical, OutputFormat::Vertical);
        let (thumbnail_url, thumbnail_err) = split(thumbnail, OutputFormat::Thumbnail);
        if let (Some(_), Some(e)) = (&vertical_err, &thumbnail_err) {
            tracing::warn!(clip_id, error = %e, "thumbnail also failed");
        }
        let err = match vertical_err.or(thumbnail_err) {
            Some(err) => err,
            None => StepError::new(
                StepId::UpdateClipRecord,
                ErrorKind::Internal,
                "render outcome inconsistent",
            ),
        };
        self.fail_clip(clip_id, err, vertical_url.as_deref(), thumbnail_url.as_deref())
            .await
    }

    /// Persist the step-tagged error on the clip and hand it back
    async fn fail_clip(
        &self,
        clip_id: &str,
        err: StepError,
        vertical_url: Option<&str>,
        thumbnail_url: Option<&str>,
    ) -> StepError {
        let persisted = err.persisted_message();
        tracing::error!(
            clip_id,
            step = %err.stage,
            error = %persisted,
            upstream = err.upstream_payload.as_deref().unwrap_or(""),
            "clip failed"
        );
        if let Err(store_err) = self
            .clips
            .mark_failed(clip_id, &persisted, vertical_url, thumbnail_url)
            .await
        {
            tracing::error!(clip_id, error = %store_err, "could not mark clip failed");
        }
        err
    }
}

fn split(
    result: Result<RenderOutput, RenderError>,
    format: OutputFormat,
) -> (Option<String>, Option<StepError>) {
    match result {
        Ok(output) => (Some(output.url), None),
        Err(e) => (None, Some(e.into_step_error(format))),
    }
}
