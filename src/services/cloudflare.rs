//! Cloudflare Stream client: copy a source video by URL, cut clips from it,
//! and build crop-fit download URLs.
//!
//! The client never retries. Failures that are safe to resend are flagged by
//! `TranscodeError::is_transient` and the pipeline decides what to do.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;

/// Errors from the transcoding provider
#[derive(Debug, thiserror::Error)]
pub enum TranscodeError {
    /// Account id or API token missing. Configuration problem, never retried.
    #[error("Cloudflare Stream is not configured (missing account id or API token)")]
    Unavailable,

    /// Provider answered with a non-success envelope or HTTP status
    #[error("Cloudflare Stream {operation} failed: {message}")]
    Rejected {
        operation: &'static str,
        status: u16,
        message: String,
        payload: String,
    },

    #[error("Cloudflare Stream {operation} request failed: {source}")]
    Transport {
        operation: &'static str,
        #[source]
        source: reqwest::Error,
    },
}

impl TranscodeError {
    /// Failures where the provider never acted on the request: refused or
    /// failed connections, and 429 rate limiting.
    ///
    /// Copy and clip POSTs are not idempotent. A timeout or 5xx may come
    /// after the provider created the resource, so those are never retried.
    pub fn is_transient(&self) -> bool {
        match self {
            TranscodeError::Unavailable => false,
            TranscodeError::Rejected { status, .. } => *status == 429,
            TranscodeError::Transport { source, .. } => source.is_connect() && !source.is_timeout(),
        }
    }

    pub fn upstream_payload(&self) -> Option<String> {
        match self {
            TranscodeError::Rejected { payload, .. } => Some(payload.clone()),
            _ => None,
        }
    }
}

/// Operations the pipeline needs from a transcoding provider
#[async_trait]
pub trait TranscodeProvider: Send + Sync {
    /// Copy the source into the provider, returning its video id
    async fn upload_source(&self, source_url: &str, name: &str) -> Result<String, TranscodeError>;

    /// Cut `[start, end]` seconds out of an uploaded video, returning the clip id
    async fn create_clip(
        &self,
        video_id: &str,
        start: f64,
        end: f64,
        label: &str,
    ) -> Result<String, TranscodeError>;

    /// Download URL for a clip at a crop-fit size
    fn playback_url(&self, clip_id: &str, width: u32, height: u32) -> String;
}

/// Credentials and endpoints for Cloudflare Stream
#[derive(Debug, Clone)]
pub struct CloudflareConfig {
    pub account_id: Option<String>,
    pub api_token: Option<String>,
    /// Subdomain code for `customer-{code}.cloudflarestream.com`
    pub customer_code: Option<String>,
    pub api_base: String,
}

#[derive(Clone)]
pub struct CloudflareStreamClient {
    config: CloudflareConfig,
    http: Client,
}

/// Standard Cloudflare v4 response envelope
#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    errors: Vec<EnvelopeError>,
    result: Option<UidResult>,
}

#[derive(Debug, Deserialize)]
struct EnvelopeError {
    code: Option<i64>,
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UidResult {
    uid: String,
}

impl CloudflareStreamClient {
    pub fn new(config: CloudflareConfig, http: Client) -> Self {
        Self { config, http }
    }

    fn credentials(&self) -> Result<(&str, &str), TranscodeError> {
        let account = self
            .config
            .account_id
            .as_deref()
            .filter(|s| !s.is_empty())
            .ok_or(TranscodeError::Unavailable)?;
        let token = self
            .config
            .api_token
            .as_deref()
            .filter(|s| !s.is_empty())
            .ok_or(TranscodeError::Unavailable)?;
        Ok((account, token))
    }

    /// POST a JSON body and pull `result.uid` out of the envelope
    async fn post_for_uid(
        &self,
        operation: &'static str,
        url: &str,
        token: &str,
        body: serde_json::Value,
    ) -> Result<String, TranscodeError> {
        let resp = self
            .http
            .post(url)
            .bearer_auth(token)
            .json(&body)
            .send()
            .await
            .map_err(|source| TranscodeError::Transport { operation, source })?;

        let status = resp.status().as_u16();
        let text = resp
            .text()
            .await
            .map_err(|source| TranscodeError::Transport { operation, source })?;

        let envelope: Option<Envelope> = serde_json::from_str(&text).ok();
        match envelope {
            Some(Envelope {
                success: true,
                result: Some(result),
                ..
            }) if (200..300).contains(&status) => Ok(result.uid),
            Some(envelope) => Err(TranscodeError::Rejected {
                operation,
                status,
                message: describe_errors(&envelope.errors, status),
                payload: text,
            }),
            None => Err(TranscodeError::Rejected {
                operation,
                status,
                message: format!("unparseable response (HTTP {})", status),
                payload: text,
            }),
        }
    }
}

fn describe_errors(errors: &[EnvelopeError], status: u16) -> String {
    let parts: Vec<String> = errors
        .iter()
        .map(|e| match (e.code, e.message.as_deref()) {
            (Some(code), Some(msg)) => format!("{}: {}", code, msg),
            (None, Some(msg)) => msg.to_string(),
            (Some(code), None) => format!("error code {}", code),
            (None, None) => "unknown error".to_string(),
        })
        .collect();
    if parts.is_empty() {
        format!("request was not successful (HTTP {})", status)
    } else {
        parts.join("; ")
    }
}

#[async_trait]
impl TranscodeProvider for CloudflareStreamClient {
    async fn upload_source(&self, source_url: &str, name: &str) -> Result<String, TranscodeError> {
        let (account, token) = self.credentials()?;
        let url = format!("{}/accounts/{}/stream/copy", self.config.api_base, account);
        let body = json!({
            "url": source_url,
            "meta": { "name": name },
        });
        self.post_for_uid("copy", &url, token, body).await
    }

    async fn create_clip(
        &self,
        video_id: &str,
        start: f64,
        end: f64,
        label: &str,
    ) -> Result<String, TranscodeError> {
        let (account, token) = self.credentials()?;
        let url = format!(
            "{}/accounts/{}/stream/{}/clip",
            self.config.api_base, account, video_id
        );
        // Whole seconds, widened so the requested range is always covered
        let body = json!({
            "clippedFromVideoUID": video_id,
            "startTimeSeconds": start.max(0.0).floor() as u64,
            "endTimeSeconds": end.ceil() as u64,
            "allowedOrigins": [],
            "requireSignedURLs": false,
            "meta": { "name": label },
        });
        self.post_for_uid("clip", &url, token, body).await
    }

    fn playback_url(&self, clip_id: &str, width: u32, height: u32) -> String {
        let code = self
            .config
            .customer_code
            .as_deref()
            .or(self.config.account_id.as_deref())
            .unwrap_or_default();
        format!(
            "https://customer-{}.cloudflarestream.com/{}/downloads/default.mp4?width={}&height={}&fit=crop",
            code, clip_id, width, height
        )
    }
}
