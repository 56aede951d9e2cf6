//! Error types shared by the pipeline and route handlers

use std::fmt;

use axum::http::StatusCode;
use serde::Serialize;

use crate::constants::USER_ERROR_MAX_CHARS;

/// Extension trait for logging errors and converting to StatusCode
pub trait LogErr<T> {
    /// Log error with context and return INTERNAL_SERVER_ERROR
    fn log_500(self, context: &str) -> Result<T, StatusCode>;
}

impl<T, E: fmt::Display> LogErr<T> for Result<T, E> {
    fn log_500(self, context: &str) -> Result<T, StatusCode> {
        self.map_err(|e| {
            tracing::error!(error = %e, "{}", context);
            StatusCode::INTERNAL_SERVER_ERROR
        })
    }
}

/// Named pipeline stage. Prefixed to every persisted error so operators can
/// triage by stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StepId {
    AuthCheck,
    ParseRequest,
    FetchClipRecord,
    GenerateCaptions,
    CloudflareUpload,
    ProcessVertical,
    ProcessThumbnail,
    UpdateClipRecord,
}

impl StepId {
    #[cfg(test)]
    pub const ALL: [StepId; 8] = [
        StepId::AuthCheck,
        StepId::ParseRequest,
        StepId::FetchClipRecord,
        StepId::GenerateCaptions,
        StepId::CloudflareUpload,
        StepId::ProcessVertical,
        StepId::ProcessThumbnail,
        StepId::UpdateClipRecord,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StepId::AuthCheck => "auth_check",
            StepId::ParseRequest => "parse_request",
            StepId::FetchClipRecord => "fetch_clip_record",
            StepId::GenerateCaptions => "generate_captions",
            StepId::CloudflareUpload => "cloudflare_upload",
            StepId::ProcessVertical => "process_vertical",
            StepId::ProcessThumbnail => "process_thumbnail",
            StepId::UpdateClipRecord => "update_clip_record",
        }
    }

    /// Phase number reported to callers as "Phase N failed"
    pub fn phase(&self) -> u8 {
        match self {
            StepId::AuthCheck | StepId::ParseRequest => 0,
            StepId::FetchClipRecord => 1,
            StepId::GenerateCaptions => 2,
            StepId::CloudflareUpload => 3,
            StepId::ProcessVertical => 4,
            StepId::ProcessThumbnail => 5,
            StepId::UpdateClipRecord => 6,
        }
    }
}

impl fmt::Display for StepId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Coarse classification used to pick an HTTP status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Unauthorized,
    InvalidRequest,
    NotFound,
    Configuration,
    Upstream,
    Storage,
    Cancelled,
    Internal,
}

/// An error attributed to the pipeline stage that raised it.
///
/// `Display` renders the persisted form: `[stage] message`.
#[derive(Debug, Clone, thiserror::Error)]
#[error("[{stage}] {message}")]
pub struct StepError {
    pub stage: StepId,
    pub kind: ErrorKind,
    pub message: String,
    /// Raw provider response body, kept for diagnostics
    pub upstream_payload: Option<String>,
}

impl StepError {
    pub fn new(stage: StepId, kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            stage,
            kind,
            message: message.into(),
            upstream_payload: None,
        }
    }

    pub fn with_payload(mut self, payload: Option<String>) -> Self {
        self.upstream_payload = payload;
        self
    }

    /// Value written to `clips.error_message`
    pub fn persisted_message(&self) -> String {
        self.to_string()
    }

    /// Message safe to show end users, bounded in length
    pub fn user_message(&self) -> String {
        truncate_chars(&self.message, USER_ERROR_MAX_CHARS)
    }

    pub fn status_code(&self) -> StatusCode {
        match self.kind {
            ErrorKind::Unauthorized => StatusCode::UNAUTHORIZED,
            ErrorKind::InvalidRequest => StatusCode::BAD_REQUEST,
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::Upstream | ErrorKind::Configuration => StatusCode::BAD_GATEWAY,
            ErrorKind::Cancelled => StatusCode::GATEWAY_TIMEOUT,
            ErrorKind::Storage | ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Persistence failures
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("unexpected row contents: {0}")]
    InvalidRow(String),
}

/// Truncate on a char boundary
pub fn truncate_chars(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((idx, _)) => s[..idx].to_string(),
        None => s.to_string(),
    }
}
