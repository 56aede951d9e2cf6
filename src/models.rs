//! Shared data models used across modules

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::services::error::StepId;

/// Inbound render request. Wire format is camelCase.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClipRequest {
    pub clip_id: String,
    pub source_video_url: String,
    /// Seconds from the start of the source
    pub start_time: f64,
    /// Clip length in seconds
    pub duration: f64,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub transcript: Option<String>,
    #[serde(default)]
    pub hook: Option<String>,
}

impl ClipRequest {
    /// Local checks only. Whether the range fits the source is up to the provider.
    pub fn validate(&self) -> Result<(), String> {
        if self.clip_id.trim().is_empty() {
            return Err("clipId is required".into());
        }
        let url = self.source_video_url.trim();
        if url.is_empty() {
            return Err("sourceVideoUrl is required".into());
        }
        if !(url.starts_with("https://") || url.starts_with("http://")) {
            return Err("sourceVideoUrl must be an absolute http(s) URL".into());
        }
        if !self.start_time.is_finite() || self.start_time < 0.0 {
            return Err("startTime must be a non-negative number of seconds".into());
        }
        if !self.duration.is_finite() || self.duration <= 0.0 {
            return Err("duration must be a positive number of seconds".into());
        }
        Ok(())
    }

    pub fn end_time(&self) -> f64 {
        self.start_time + self.duration
    }

    /// Transcript with surrounding whitespace removed, if any text remains
    pub fn transcript_text(&self) -> Option<&str> {
        self.transcript
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClipStatus {
    Pending,
    Processing,
    Ready,
    Failed,
}

impl ClipStatus {
    /// Parse the `clips.status` column
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(ClipStatus::Pending),
            "processing" => Some(ClipStatus::Processing),
            "ready" => Some(ClipStatus::Ready),
            "failed" => Some(ClipStatus::Failed),
            _ => None,
        }
    }
}

/// Parent clip record, owned by the calling system
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Clip {
    pub id: String,
    pub user_id: Option<i64>,
    pub status: ClipStatus,
    pub error_message: Option<String>,
    pub vertical_url: Option<String>,
    pub thumbnail_url: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    Vertical,
    Thumbnail,
}

impl OutputFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutputFormat::Vertical => "vertical",
            OutputFormat::Thumbnail => "thumbnail",
        }
    }

    /// Name given to the clip on the provider side
    pub fn label(&self) -> &'static str {
        match self {
            OutputFormat::Vertical => "vertical_9x16",
            OutputFormat::Thumbnail => "thumbnail_1x1",
        }
    }

    /// Crop-fit output size as (width, height)
    pub fn dimensions(&self) -> (u32, u32) {
        match self {
            OutputFormat::Vertical => (1080, 1920),
            OutputFormat::Thumbnail => (1080, 1080),
        }
    }

    pub fn aspect_ratio(&self) -> &'static str {
        match self {
            OutputFormat::Vertical => "9:16",
            OutputFormat::Thumbnail => "1:1",
        }
    }

    /// Pipeline step that owns failures of this format
    pub fn step(&self) -> StepId {
        match self {
            OutputFormat::Vertical => StepId::ProcessVertical,
            OutputFormat::Thumbnail => StepId::ProcessThumbnail,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "processing" => Some(JobStatus::Processing),
            "completed" => Some(JobStatus::Completed),
            "failed" => Some(JobStatus::Failed),
            _ => None,
        }
    }
}

/// Feature switches stored with each job. None of these are implemented;
/// they are recorded so downstream readers never assume they were applied.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RenderFeatures {
    pub burn_captions: bool,
    pub face_tracking: bool,
    pub dynamic_zoom: bool,
}

/// `params` column of a render job
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RenderParams {
    pub clip_id: String,
    pub start_time: f64,
    pub end_time: f64,
    pub output_format: OutputFormat,
    pub cloudflare_video_id: String,
    pub features: RenderFeatures,
}

/// Input for creating a render job row
#[derive(Debug, Clone)]
pub struct NewRenderJob {
    pub user_id: i64,
    pub params: RenderParams,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderJob {
    pub id: Uuid,
    pub user_id: i64,
    pub job_type: String,
    pub engine: String,
    pub params: serde_json::Value,
    pub status: JobStatus,
    pub error_message: Option<String>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub processing_time_seconds: Option<f64>,
}

/// Render job plus how many assets reference it
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderJobSummary {
    #[serde(flatten)]
    pub job: RenderJob,
    pub asset_count: i64,
}

/// `metadata` column of an asset
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AssetMetadata {
    pub resolution: String,
    pub aspect_ratio: String,
    pub captions_count: usize,
    pub captions_burned: bool,
    pub cloudflare_clip_id: String,
    pub processing_method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hook: Option<String>,
}

/// Input for creating an asset row
#[derive(Debug, Clone)]
pub struct NewAsset {
    pub render_job_id: Uuid,
    pub source_media_id: String,
    pub output_type: OutputFormat,
    pub storage_path: String,
    pub duration_seconds: f64,
    pub metadata: AssetMetadata,
}

/// One timed caption line
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CaptionSegment {
    pub text: String,
    pub start_time: f64,
    pub end_time: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub highlight_words: Option<Vec<String>>,
}

/// Result of caption generation. `used_fallback` marks degraded runs.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Captions {
    pub segments: Vec<CaptionSegment>,
    pub used_fallback: bool,
}

impl Captions {
    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }
}
