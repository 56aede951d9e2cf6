//! Caption generation for clip exports.
//!
//! Captions are best-effort: a chat-completion model is asked for timed
//! segments, and anything short of a clean JSON answer degrades to an even
//! 2-second split of the transcript. `CaptionGenerator::generate` has no
//! error path.

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;

use crate::constants::FALLBACK_CAPTION_WINDOW_SECS;
use crate::models::{CaptionSegment, Captions};

const SYSTEM_PROMPT: &str = "You write short-form video captions. \
Split the transcript into caption segments of at most 6 words, timed to the clip. \
Respond with ONLY a JSON array, no prose, where each element is \
{\"text\": string, \"startTime\": number, \"endTime\": number, \"highlight\": [string]}. \
Times are absolute seconds within the source video and must stay inside the clip range. \
\"highlight\" lists the words to emphasise and may be omitted.";

#[derive(Debug, thiserror::Error)]
pub enum CaptionError {
    #[error("caption request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("caption provider returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("caption provider returned no content")]
    EmptyResponse,
}

/// Minimal chat-completion capability
#[async_trait]
pub trait LanguageModel: Send + Sync {
    async fn complete(&self, system: &str, user: &str) -> Result<String, CaptionError>;
}

/// OpenAI-compatible `/chat/completions` client
#[derive(Clone)]
pub struct OpenAiChatClient {
    api_key: String,
    model: String,
    api_base: String,
    http: Client,
}

impl OpenAiChatClient {
    pub fn new(api_key: &str, model: &str, api_base: &str, http: Client) -> Self {
        Self {
            api_key: api_key.to_string(),
            model: model.to_string(),
            api_base: api_base.trim_end_matches('/').to_string(),
            http,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: Option<String>,
}

#[async_trait]
impl LanguageModel for OpenAiChatClient {
    async fn complete(&self, system: &str, user: &str) -> Result<String, CaptionError> {
        let url = format!("{}/chat/completions", self.api_base);
        let body = json!({
            "model": self.model,
            "temperature": 0.3,
            "messages": [
                { "role": "system", "content": system },
                { "role": "user", "content": user },
            ],
        });

        let resp = self
            .http
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(CaptionError::Status { status, body });
        }

        let parsed: ChatResponse = resp.json().await?;
        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|c| !c.trim().is_empty())
            .ok_or(CaptionError::EmptyResponse)
    }
}

#[derive(Clone, Default)]
pub struct CaptionGenerator {
    model: Option<Arc<dyn LanguageModel>>,
}

impl CaptionGenerator {
    /// `None` means no provider is configured; every call uses the fallback.
    pub fn new(model: Option<Arc<dyn LanguageModel>>) -> Self {
        Self { model }
    }

    pub async fn generate(&self, transcript: &str, start_time: f64, duration: f64) -> Captions {
        let transcript = transcript.trim();
        if transcript.is_empty() {
            return Captions::default();
        }

        let Some(model) = &self.model else {
            tracing::debug!("no caption model configured, using fallback captions");
            return fallback(transcript, start_time, duration);
        };

        let user = format!(
            "Clip starts at {:.2}s and lasts {:.2}s (ends at {:.2}s).\n\nTranscript:\n{}",
            start_time,
            duration,
            start_time + duration,
            transcript
        );

        match model.complete(SYSTEM_PROMPT, &user).await {
            Ok(content) => match parse_segments(&content, start_time, duration) {
                Some(segments) if !segments.is_empty() => Captions {
                    segments,
                    used_fallback: false,
                },
                _ => {
                    tracing::warn!("caption model output was not a usable JSON array, using fallback");
                    fallback(transcript, start_time, duration)
                }
            },
            Err(e) => {
                tracing::warn!(error = %e, "caption model call failed, using fallback");
                fallback(transcript, start_time, duration)
            }
        }
    }
}

/// Element shape the model is asked for. `highlight` is loosely typed
/// because models return a word list, a single word, or a bool.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawSegment {
    text: String,
    start_time: f64,
    end_time: f64,
    #[serde(default)]
    highlight: Option<serde_json::Value>,
}

fn highlight_words(value: Option<serde_json::Value>) -> Option<Vec<String>> {
    match value? {
        serde_json::Value::Array(items) => {
            let words: Vec<String> = items
                .into_iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect();
            (!words.is_empty()).then_some(words)
        }
        serde_json::Value::String(word) if !word.trim().is_empty() => Some(vec![word]),
        _ => None,
    }
}

/// Pull the JSON array out of a model reply, tolerating code fences and
/// surrounding prose. Returns `None` when no array parses.
pub fn parse_segments(content: &str, start_time: f64, duration: f64) -> Option<Vec<CaptionSegment>> {
    let raw = content
        .match_indices('[')
        .filter(|(idx, _)| opens_object_array(&content[idx + 1..]))
        .find_map(|(idx, _)| first_array(&content[idx..]))?;
    let clip_end = start_time + duration;

    let segments = raw
        .into_iter()
        .filter_map(|seg| {
            let text = seg.text.trim().to_string();
            if text.is_empty() || !seg.start_time.is_finite() || !seg.end_time.is_finite() {
                return None;
            }
            let start = seg.start_time.clamp(start_time, clip_end);
            let end = seg.end_time.clamp(start_time, clip_end);
            if end <= start {
                return None;
            }
            Some(CaptionSegment {
                text,
                start_time: start,
                end_time: end,
                highlight_words: highlight_words(seg.highlight),
            })
        })
        .collect();

    Some(segments)
}

/// `[` followed by `{` or `]`, so bracketed prose like "[note]" is skipped
fn opens_object_array(rest: &str) -> bool {
    matches!(rest.trim_start().chars().next(), Some('{') | Some(']'))
}

/// Parse the array at the start of `s`, ignoring whatever follows it
fn first_array(s: &str) -> Option<Vec<RawSegment>> {
    serde_json::Deserializer::from_str(s)
        .into_iter::<Vec<RawSegment>>()
        .next()?
        .ok()
}

/// Evenly distribute the transcript's words over fixed 2-second windows
pub fn fallback(transcript: &str, start_time: f64, duration: f64) -> Captions {
    let words: Vec<&str> = transcript.split_whitespace().collect();
    if words.is_empty() || !(duration > 0.0) {
        return Captions {
            segments: Vec::new(),
            used_fallback: true,
        };
    }

    let windows = ((duration / FALLBACK_CAPTION_WINDOW_SECS).ceil() as usize).max(1);
    let per_window = words.len().div_ceil(windows);
    let clip_end = start_time + duration;

    let segments = words
        .chunks(per_window)
        .enumerate()
        .map(|(i, chunk)| {
            let start = start_time + i as f64 * FALLBACK_CAPTION_WINDOW_SECS;
            CaptionSegment {
                text: chunk.join(" "),
                start_time: start,
                end_time: (start + FALLBACK_CAPTION_WINDOW_SECS).min(clip_end),
                highlight_words: None,
            }
        })
        .collect();

    Captions {
        segments,
        used_fallback: true,
    }
}
