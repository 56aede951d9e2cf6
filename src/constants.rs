//! Application constants

/// `job_type` written on every render job row
pub const JOB_TYPE_CLIP_RENDER: &str = "clip_render";

/// `engine` written on every render job row
pub const ENGINE_CLOUDFLARE_STREAM: &str = "cloudflare_stream";

/// `processing_method` recorded in asset metadata
pub const PROCESSING_METHOD: &str = "cloudflare_stream_clip";

/// Default Cloudflare API base (overridable for staging/stubs)
pub const DEFAULT_CLOUDFLARE_API_BASE: &str = "https://api.cloudflare.com/client/v4";

/// Default OpenAI-compatible chat completions base
pub const DEFAULT_CAPTION_API_BASE: &str = "https://api.openai.com/v1";

/// Default caption model
pub const DEFAULT_CAPTION_MODEL: &str = "gpt-4o-mini";

/// Width of one fallback caption window, in seconds
pub const FALLBACK_CAPTION_WINDOW_SECS: f64 = 2.0;

/// Max characters of an error message shown to end users
pub const USER_ERROR_MAX_CHARS: usize = 300;

/// Pipeline deadline when PIPELINE_DEADLINE_SECS is unset (5 minutes)
pub const DEFAULT_PIPELINE_DEADLINE_SECS: u64 = 5 * 60;

/// Outbound HTTP timeout when HTTP_TIMEOUT_SECS is unset
pub const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 60;

/// Resends for upstream calls the provider never acted on
pub const DEFAULT_UPSTREAM_MAX_RETRIES: u32 = 2;

/// First retry delay; doubles per attempt
pub const DEFAULT_UPSTREAM_BACKOFF_MS: u64 = 500;

/// Upper bound on a single retry delay
pub const MAX_UPSTREAM_BACKOFF_MS: u64 = 8_000;
