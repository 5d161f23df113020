//! Configuration loading and validation.
//!
//! Everything comes from the environment. Credentials are required; every
//! other key has a default suitable for production.

use crate::error::{ConfigError, Result};
use std::time::Duration;

/// Skybot configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Bluesky credentials and developer identity.
    pub credentials: Credentials,

    /// Generation backend model names and safety settings.
    pub models: ModelConfig,

    /// Retry counts, delays, and media budgets for generation.
    pub generation: GenerationConfig,

    /// Queue, dedup, and thread-depth settings for the reply pipeline.
    pub pipeline: PipelineConfig,

    /// Jetstream endpoint and reconnect behavior.
    pub jetstream: JetstreamConfig,

    /// Minimum spacing between outbound calls per service.
    pub limits: LimitConfig,
}

/// Required credentials and the developer alert identity.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub bluesky_handle: String,
    pub bluesky_password: String,
    pub gemini_api_key: String,
    pub developer_did: String,
    pub developer_handle: String,
}

/// Model names and content-safety settings.
#[derive(Debug, Clone)]
pub struct ModelConfig {
    pub text_model: String,
    pub image_model: String,
    pub video_model: String,
    pub safety: SafetyConfig,
    pub image_person_generation: String,
    pub video_person_generation: String,
}

/// Per-category safety thresholds passed through to the text backend.
#[derive(Debug, Clone)]
pub struct SafetyConfig {
    pub harassment: String,
    pub hate_speech: String,
    pub sexually_explicit: String,
    pub dangerous_content: String,
    pub civic_integrity: String,
}

/// Retry and media-budget configuration for the generation orchestrator.
#[derive(Debug, Clone, Copy)]
pub struct GenerationConfig {
    pub text_max_retries: u32,
    pub text_retry_delay: Duration,
    pub image_max_retries: u32,
    pub image_retry_delay: Duration,
    pub video_max_retries: u32,
    pub video_retry_delay: Duration,
    pub video_poll_interval: Duration,
    pub video_poll_timeout: Duration,
    /// Stop downloading context images once this many bytes are buffered.
    pub image_budget_bytes: u64,
    /// Stop downloading any further context media once this many bytes are buffered.
    pub total_budget_bytes: u64,
    pub max_context_images: usize,
    pub max_context_videos: usize,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            text_max_retries: 3,
            text_retry_delay: Duration::from_secs(15),
            image_max_retries: 3,
            image_retry_delay: Duration::from_secs(10),
            video_max_retries: 2,
            video_retry_delay: Duration::from_secs(30),
            video_poll_interval: Duration::from_secs(15),
            video_poll_timeout: Duration::from_secs(600),
            image_budget_bytes: 100 * 1024 * 1024,
            total_budget_bytes: 200 * 1024 * 1024,
            max_context_images: 4,
            max_context_videos: 2,
        }
    }
}

/// Queue, dedup, and thread-depth settings.
#[derive(Debug, Clone, Copy)]
pub struct PipelineConfig {
    /// Depth requested when fetching a thread for context.
    pub thread_fetch_depth: u32,
    /// Conversation length at which the bot disengages with a canned notice.
    pub conversation_cap: usize,
    /// Maximum number of posts the bot will chain into one reply.
    pub max_reply_segments: usize,
    pub dedup_capacity: usize,
    pub queue_capacity: usize,
    pub catch_up_limit: u32,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            thread_fetch_depth: 25,
            conversation_cap: 50,
            max_reply_segments: 10,
            dedup_capacity: 500,
            queue_capacity: 1000,
            catch_up_limit: 50,
        }
    }
}

/// Jetstream subscription settings.
#[derive(Debug, Clone)]
pub struct JetstreamConfig {
    pub endpoint: String,
    pub reconnect_delay: Duration,
}

/// Minimum spacing between calls, one interval per external service.
#[derive(Debug, Clone, Copy)]
pub struct LimitConfig {
    pub generation_min_interval: Duration,
    pub social_min_interval: Duration,
}

impl Default for LimitConfig {
    fn default() -> Self {
        Self {
            generation_min_interval: Duration::from_millis(1000),
            social_min_interval: Duration::from_millis(500),
        }
    }
}

impl Config {
    /// Load configuration from the environment.
    ///
    /// Collects every missing required variable before failing so the
    /// operator sees the full list in one error.
    pub fn from_env() -> Result<Self> {
        let required = [
            ("BLUESKY_HANDLE", "Bluesky handle/username"),
            ("BLUESKY_PASSWORD", "Bluesky app password"),
            ("GEMINI_API_KEY", "generation backend API key"),
            ("DEVELOPER_DID", "developer DID for error notifications"),
            ("DEVELOPER_HANDLE", "developer handle for error notifications"),
        ];

        let missing: Vec<String> = required
            .iter()
            .filter(|(key, _)| std::env::var(key).map_or(true, |v| v.is_empty()))
            .map(|(key, description)| format!("{key} ({description})"))
            .collect();

        if !missing.is_empty() {
            return Err(ConfigError::MissingKeys(missing.join(", ")).into());
        }

        let credentials = Credentials {
            bluesky_handle: env_string("BLUESKY_HANDLE", ""),
            bluesky_password: env_string("BLUESKY_PASSWORD", ""),
            gemini_api_key: env_string("GEMINI_API_KEY", ""),
            developer_did: env_string("DEVELOPER_DID", ""),
            developer_handle: env_string("DEVELOPER_HANDLE", ""),
        };

        let models = ModelConfig {
            text_model: env_string("GEMINI_MODEL_NAME", "gemini-2.5-pro-preview-06-05"),
            image_model: env_string("IMAGEN_MODEL_NAME", "imagen-3.0-generate-002"),
            video_model: env_string("VEO_MODEL_NAME", "veo-2.0-generate-001"),
            safety: SafetyConfig {
                harassment: env_string("SAFETY_HARASSMENT", "BLOCK_NONE"),
                hate_speech: env_string("SAFETY_HATE_SPEECH", "BLOCK_NONE"),
                sexually_explicit: env_string("SAFETY_SEXUALLY_EXPLICIT", "BLOCK_NONE"),
                dangerous_content: env_string("SAFETY_DANGEROUS_CONTENT", "BLOCK_NONE"),
                civic_integrity: env_string("SAFETY_CIVIC_INTEGRITY", "BLOCK_NONE"),
            },
            image_person_generation: env_string("IMAGE_PERSON_GENERATION", "ALLOW_ADULT"),
            video_person_generation: env_string("VIDEO_PERSON_GENERATION", "ALLOW_ADULT"),
        };

        let defaults = GenerationConfig::default();
        let generation = GenerationConfig {
            text_max_retries: env_parse("MAX_GEMINI_RETRIES", defaults.text_max_retries)?,
            text_retry_delay: env_secs("GEMINI_RETRY_DELAY_SECONDS", defaults.text_retry_delay)?,
            image_max_retries: env_parse(
                "MAX_IMAGE_GENERATION_RETRIES",
                defaults.image_max_retries,
            )?,
            image_retry_delay: env_secs("IMAGE_RETRY_DELAY_SECONDS", defaults.image_retry_delay)?,
            video_max_retries: env_parse(
                "MAX_VIDEO_GENERATION_RETRIES",
                defaults.video_max_retries,
            )?,
            video_retry_delay: env_secs("VIDEO_RETRY_DELAY_SECONDS", defaults.video_retry_delay)?,
            ..defaults
        };

        let pipeline_defaults = PipelineConfig::default();
        let pipeline = PipelineConfig {
            thread_fetch_depth: env_parse(
                "MAX_THREAD_DEPTH_FOR_CONTEXT",
                pipeline_defaults.thread_fetch_depth,
            )?,
            conversation_cap: env_parse(
                "MAX_CONVERSATION_THREAD_DEPTH",
                pipeline_defaults.conversation_cap,
            )?,
            max_reply_segments: env_parse(
                "MAX_REPLY_THREAD_DEPTH",
                pipeline_defaults.max_reply_segments,
            )?,
            dedup_capacity: env_parse(
                "MAX_PROCESSED_URIS_CACHE",
                pipeline_defaults.dedup_capacity,
            )?,
            queue_capacity: env_parse("EVENT_QUEUE_CAPACITY", pipeline_defaults.queue_capacity)?,
            catch_up_limit: env_parse(
                "CATCH_UP_NOTIFICATION_LIMIT",
                pipeline_defaults.catch_up_limit,
            )?,
        };

        let jetstream = JetstreamConfig {
            endpoint: env_string(
                "JETSTREAM_ENDPOINT",
                "wss://jetstream2.us-west.bsky.network/subscribe",
            ),
            reconnect_delay: env_secs("JETSTREAM_RECONNECT_DELAY", Duration::from_secs(5))?,
        };

        Ok(Self {
            credentials,
            models,
            generation,
            pipeline,
            jetstream,
            limits: LimitConfig::default(),
        })
    }
}

fn env_string(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> Result<T> {
    match std::env::var(key) {
        Ok(raw) => raw.parse().map_err(|_| {
            ConfigError::Invalid {
                key: key.to_string(),
                message: format!("could not parse {raw:?}"),
            }
            .into()
        }),
        Err(_) => Ok(default),
    }
}

fn env_secs(key: &str, default: Duration) -> Result<Duration> {
    Ok(Duration::from_secs(env_parse(
        key,
        default.as_secs(),
    )?))
}
