//! Generation orchestration: drives the text call and any follow-up image or
//! video generation, with retry, backoff, and policy-vs-technical failure
//! classification.

use crate::alerts::AlertKind;
use crate::context::{self, VideoSource};
use crate::error::Result;
use crate::genai::{GenerationBackend, InlinePart, Operation, TextRequest};
use crate::media;
use crate::pipeline::PipelineContext;
use crate::prompts;

use std::time::Duration;

/// Which kind of media a reply carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Image,
    Video,
}

impl MediaKind {
    pub fn mime_type(self) -> &'static str {
        match self {
            MediaKind::Image => "image/jpeg",
            MediaKind::Video => "video/mp4",
        }
    }
}

/// A media directive parsed out of the model's text output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaRequest {
    Image(String),
    Video(String),
}

/// Text output split into the reply body and an optional media directive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplyDirective {
    pub text: String,
    pub media: Option<MediaRequest>,
}

/// Outcome of one media generation sub-run. Every run collapses to exactly
/// one of these before the pipeline proceeds.
#[derive(Debug, Clone)]
pub enum MediaOutcome {
    Generated(Vec<u8>),
    /// Rejected by content policy; carries the user-facing explanation.
    PolicyRejected(String),
    /// Technical failure after retry exhaustion.
    Failed,
}

/// How a media generation error should be handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    Policy,
    Technical,
}

/// Finished reply: the text to post plus optional generated media.
#[derive(Debug, Clone)]
pub struct ReplyContent {
    pub text: String,
    pub media: Option<GeneratedMedia>,
}

#[derive(Debug, Clone)]
pub struct GeneratedMedia {
    pub kind: MediaKind,
    pub bytes: Vec<u8>,
    pub alt: String,
}

const POLICY_KEYWORDS: &[&str] = &[
    "content policy",
    "safety",
    "blocked",
    "filtered",
    "person_generation",
    "inappropriate",
    "violates",
    "prohibited",
    "restricted",
    "harmful",
    "unsafe",
    "policy violation",
];

const ZERO_RESULT_MARKERS: &[&str] = &["no videos", "no images", "no usable output", "no results"];

/// Classify a media generation failure from its error text and the prompt.
///
/// Policy keywords in the error win outright. A zero-results error for a
/// prompt that mentions people is also treated as a policy rejection - that
/// pattern is how person-generation filtering usually surfaces.
pub fn classify_failure(error_text: &str, prompt: &str) -> FailureKind {
    let error_lower = error_text.to_lowercase();

    if POLICY_KEYWORDS.iter().any(|keyword| error_lower.contains(keyword)) {
        return FailureKind::Policy;
    }

    if ZERO_RESULT_MARKERS.iter().any(|marker| error_lower.contains(marker)) {
        let prompt_lower = prompt.to_lowercase();
        if prompts::PEOPLE_TERMS.iter().any(|term| prompt_lower.contains(term)) {
            return FailureKind::Policy;
        }
    }

    FailureKind::Technical
}

/// Split the model's raw output into reply text and a trailing media
/// directive. The two markers are mutually exclusive; video is checked first
/// and at most one directive is extracted.
pub fn parse_directive(raw: &str) -> ReplyDirective {
    if let Some((before, after)) = raw.split_once("VIDEO_PROMPT:") {
        return ReplyDirective {
            text: before.trim().to_string(),
            media: Some(MediaRequest::Video(after.trim().to_string())),
        };
    }
    if let Some((before, after)) = raw.split_once("IMAGE_PROMPT:") {
        return ReplyDirective {
            text: before.trim().to_string(),
            media: Some(MediaRequest::Image(after.trim().to_string())),
        };
    }
    ReplyDirective {
        text: raw.trim().to_string(),
        media: None,
    }
}

/// Strip `alt text:`-style scaffolding a model sometimes emits in prompts
/// destined to become alt text, and shorten very long descriptions.
pub fn clean_alt_text(text: &str) -> String {
    let trimmed = text.trim();
    let lower = trimmed.to_lowercase();

    let patterns = [
        ". alt text:", ". alt_text:", ". alt-text:", ". alt:",
        ", alt text:", ", alt_text:", ", alt-text:", ", alt:",
        "alt text:", "alt_text:", "alt-text:", "alt:",
    ];

    let earliest = patterns
        .iter()
        .filter_map(|pattern| lower.find(pattern).map(|index| (index, pattern.len())))
        .min_by_key(|(index, _)| *index);

    if let Some((index, length)) = earliest {
        // Offsets come from the lowercased copy; fall through on the rare
        // multibyte text where they don't line up.
        if let Some(rest) = trimmed.get(index + length..) {
            return rest.trim().to_string();
        }
    }

    if trimmed.len() > 100 {
        if let Some(first) = trimmed.split_inclusive(". ").next() {
            let first = first.trim();
            if (20..=100).contains(&first.len()) {
                return first.to_string();
            }
        }
    }

    trimmed.to_string()
}

/// Explicit state machine for the asynchronous video operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollState {
    Submitted,
    Polling,
    Done,
    TimedOut,
}

#[derive(Debug, Clone)]
pub enum PollOutcome {
    Done(Operation),
    TimedOut,
}

/// Polls a long-running operation on a fixed interval up to a hard deadline.
pub struct VideoPoller {
    pub interval: Duration,
    pub timeout: Duration,
}

impl VideoPoller {
    pub async fn run(
        &self,
        backend: &dyn GenerationBackend,
        mut operation: Operation,
    ) -> Result<PollOutcome> {
        let deadline = tokio::time::Instant::now() + self.timeout;
        let mut state = if operation.done {
            PollState::Done
        } else {
            PollState::Submitted
        };

        loop {
            match state {
                PollState::Submitted => {
                    tracing::debug!(operation = %operation.name, "video operation submitted, polling");
                    state = PollState::Polling;
                }
                PollState::Polling => {
                    if tokio::time::Instant::now() >= deadline {
                        state = PollState::TimedOut;
                        continue;
                    }
                    tokio::time::sleep(self.interval).await;
                    operation = backend.poll_operation(&operation).await?;
                    if operation.done {
                        state = PollState::Done;
                    }
                }
                PollState::Done => return Ok(PollOutcome::Done(operation)),
                PollState::TimedOut => return Ok(PollOutcome::TimedOut),
            }
        }
    }
}

/// Produce the full reply for one trigger: text generation with retries,
/// optional media sub-generation, and the fallback rules that decide what the
/// user ends up seeing.
///
/// Returns `Ok(None)` when no reply should be posted at all (prompt blocked,
/// nothing generated, or media-only request that failed technically).
pub async fn generate_reply(
    ctx: &PipelineContext,
    transcript: &str,
    author_did: &str,
) -> Result<Option<ReplyContent>> {
    let media_parts = collect_context_media(ctx, transcript, author_did).await;

    let prompt = format!(
        "{}\n\n{}\n\n---BEGIN THREAD CONTEXT---\n{}\n---END THREAD CONTEXT---",
        prompts::PERSONA_INSTRUCTION,
        prompts::REPLY_FRAMING,
        transcript,
    );

    let Some(directive) = run_text_generation(ctx, prompt, media_parts).await else {
        return Ok(None);
    };

    let mut text = directive.text;
    let mut media = None;

    if let Some(request) = directive.media {
        let (kind, prompt) = match &request {
            MediaRequest::Image(prompt) => (MediaKind::Image, prompt.clone()),
            MediaRequest::Video(prompt) => (MediaKind::Video, prompt.clone()),
        };

        let outcome = match kind {
            MediaKind::Image => run_image_generation(ctx, &prompt).await,
            MediaKind::Video => run_video_generation(ctx, &prompt).await,
        };

        match outcome {
            MediaOutcome::Generated(bytes) => {
                tracing::info!(kind = ?kind, bytes = bytes.len(), "media generated");
                media = Some(GeneratedMedia {
                    kind,
                    bytes,
                    alt: clean_alt_text(&prompt),
                });
            }
            MediaOutcome::PolicyRejected(message) => {
                // A friendly explanation replaces the media, never an alert.
                if text.is_empty() {
                    text = message;
                } else {
                    text = format!("{text}\n\n{message}");
                }
            }
            MediaOutcome::Failed => {
                if text.is_empty() {
                    tracing::warn!("media-only reply failed technically, suppressing reply");
                    return Ok(None);
                }
                text = format!("{text}\n{}", prompts::MEDIA_FALLBACK_NOTE);
            }
        }
    }

    if text.is_empty() && media.is_none() {
        return Ok(None);
    }

    Ok(Some(ReplyContent { text, media }))
}

/// Text generation retry loop. Returns `None` when nothing usable came back
/// or the prompt itself was blocked.
async fn run_text_generation(
    ctx: &PipelineContext,
    prompt: String,
    media_parts: Vec<InlinePart>,
) -> Option<ReplyDirective> {
    let config = &ctx.config.generation;
    let request = TextRequest {
        prompt,
        media: media_parts,
    };

    for attempt in 1..=config.text_max_retries {
        ctx.limits.wait_for_generation().await;
        tracing::info!(attempt, max = config.text_max_retries, "requesting text generation");

        match ctx.genai.generate_text(request.clone()).await {
            Ok(response) => {
                if let Some(reason) = response.block_reason {
                    // A block on the prompt itself is terminal; retrying the
                    // same prompt can only be blocked again.
                    tracing::warn!(reason = %reason, "prompt blocked by backend, giving up");
                    return None;
                }
                if let Some(text) = response.text {
                    let directive = parse_directive(&text);
                    if !directive.text.is_empty() || directive.media.is_some() {
                        return Some(directive);
                    }
                }
                tracing::warn!(attempt, "backend returned no usable text");
            }
            Err(error) => {
                tracing::warn!(attempt, %error, "text generation attempt failed");
            }
        }

        if attempt < config.text_max_retries {
            tokio::time::sleep(config.text_retry_delay).await;
        }
    }

    tracing::error!(
        retries = config.text_max_retries,
        "all text generation attempts failed"
    );
    None
}

/// Image generation retry loop.
async fn run_image_generation(ctx: &PipelineContext, prompt: &str) -> MediaOutcome {
    let config = &ctx.config.generation;

    for attempt in 1..=config.image_max_retries {
        ctx.limits.wait_for_generation().await;
        tracing::info!(attempt, max = config.image_max_retries, "requesting image generation");

        match ctx.genai.generate_image(prompt).await {
            Ok(bytes) => return MediaOutcome::Generated(bytes),
            Err(error) => {
                let error_text = error.to_string();
                if classify_failure(&error_text, prompt) == FailureKind::Policy {
                    tracing::info!("image generation rejected by content policy");
                    return MediaOutcome::PolicyRejected(prompts::policy_message(
                        MediaKind::Image,
                        prompt,
                    ));
                }
                tracing::warn!(attempt, %error, "image generation attempt failed");
                if attempt == config.image_max_retries {
                    ctx.alerts
                        .notify(
                            AlertKind::GenerationFailure,
                            &format!("image generation failed after {attempt} attempts: {error_text}"),
                        )
                        .await;
                    return MediaOutcome::Failed;
                }
                tokio::time::sleep(config.image_retry_delay).await;
            }
        }
    }

    MediaOutcome::Failed
}

/// Video generation retry loop, including the asynchronous poll phase.
async fn run_video_generation(ctx: &PipelineContext, prompt: &str) -> MediaOutcome {
    let config = &ctx.config.generation;
    let poller = VideoPoller {
        interval: config.video_poll_interval,
        timeout: config.video_poll_timeout,
    };

    for attempt in 1..=config.video_max_retries {
        ctx.limits.wait_for_generation().await;
        tracing::info!(attempt, max = config.video_max_retries, "requesting video generation");

        let failure = match ctx.genai.generate_video(prompt).await {
            Ok(operation) => match poller.run(ctx.genai.as_ref(), operation).await {
                Ok(PollOutcome::Done(operation)) => match operation.result_uri {
                    Some(uri) => match ctx.genai.download_file(&uri).await {
                        Ok(bytes) => return MediaOutcome::Generated(bytes),
                        Err(error) => format!("video download failed: {error}"),
                    },
                    // Finished with nothing attached reads as zero results.
                    None => "video generation returned no videos".to_string(),
                },
                Ok(PollOutcome::TimedOut) => "video generation timed out".to_string(),
                Err(error) => format!("video polling failed: {error}"),
            },
            Err(error) => error.to_string(),
        };

        if classify_failure(&failure, prompt) == FailureKind::Policy {
            tracing::info!("video generation rejected by content policy");
            return MediaOutcome::PolicyRejected(prompts::policy_message(MediaKind::Video, prompt));
        }

        tracing::warn!(attempt, failure = %failure, "video generation attempt failed");
        if attempt == config.video_max_retries {
            ctx.alerts
                .notify(
                    AlertKind::GenerationFailure,
                    &format!("video generation failed after {attempt} attempts: {failure}"),
                )
                .await;
            return MediaOutcome::Failed;
        }
        tokio::time::sleep(config.video_retry_delay).await;
    }

    MediaOutcome::Failed
}

/// Download media referenced by the transcript markers, bounded by count caps
/// and a cumulative byte budget. Failures skip the item, never the reply.
async fn collect_context_media(
    ctx: &PipelineContext,
    transcript: &str,
    author_did: &str,
) -> Vec<InlinePart> {
    let config = &ctx.config.generation;
    let mut parts = Vec::new();
    let mut budget_used: u64 = 0;

    let mut image_urls = context::extract_image_urls(transcript);
    if image_urls.len() > config.max_context_images {
        tracing::warn!(
            found = image_urls.len(),
            keeping = config.max_context_images,
            "too many context images"
        );
        image_urls.truncate(config.max_context_images);
    }

    for url in &image_urls {
        if budget_used > config.image_budget_bytes {
            tracing::warn!(budget_used, "image budget exhausted, skipping remaining images");
            break;
        }
        match media::fetch_image(&ctx.http, url).await {
            Ok(bytes) => {
                budget_used += bytes.len() as u64;
                parts.push(InlinePart {
                    mime_type: media::mime_for_url(url, "image/jpeg"),
                    data: bytes,
                });
            }
            Err(error) => {
                tracing::warn!(url = %url, %error, "skipping context image");
            }
        }
    }

    let mut video_sources = context::extract_video_sources(transcript);
    if video_sources.len() > config.max_context_videos {
        tracing::warn!(
            found = video_sources.len(),
            keeping = config.max_context_videos,
            "too many context videos"
        );
        video_sources.truncate(config.max_context_videos);
    }

    // The PDS endpoint only matters for blob sources; resolve it lazily and
    // at most once per event.
    let mut pds_endpoint: Option<String> = None;

    for source in &video_sources {
        if budget_used > config.total_budget_bytes {
            tracing::warn!(budget_used, "media budget exhausted, skipping remaining videos");
            break;
        }

        let fetched = match source {
            VideoSource::Url(url) => media::fetch_video(&ctx.http, url)
                .await
                .map(|bytes| (bytes, media::mime_for_url(url, "video/mp4"))),
            VideoSource::Blob(cid) => {
                if pds_endpoint.is_none() {
                    pds_endpoint = Some(match ctx.social.describe_repo(author_did).await {
                        Ok(endpoint) => endpoint,
                        Err(error) => {
                            tracing::warn!(%error, "could not resolve author PDS, assuming bsky.social");
                            "https://bsky.social".to_string()
                        }
                    });
                }
                let endpoint = pds_endpoint.as_deref().unwrap_or("https://bsky.social");
                media::fetch_video_blob(&ctx.http, endpoint, author_did, cid)
                    .await
                    .map(|bytes| (bytes, "video/mp4".to_string()))
            }
        };

        match fetched {
            Ok((bytes, mime_type)) => {
                budget_used += bytes.len() as u64;
                parts.push(InlinePart {
                    mime_type,
                    data: bytes,
                });
            }
            Err(error) => {
                tracing::warn!(?source, %error, "skipping context video");
            }
        }
    }

    if !parts.is_empty() {
        tracing::info!(
            parts = parts.len(),
            bytes = budget_used,
            "attached context media to generation request"
        );
    }

    parts
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::GenError;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_classify_safety_keyword_is_policy() {
        assert_eq!(
            classify_failure("request rejected: safety system engaged", "a red cube"),
            FailureKind::Policy
        );
    }

    #[test]
    fn test_classify_timeout_is_technical() {
        assert_eq!(
            classify_failure("request timeout after 30s", "a red cube"),
            FailureKind::Technical
        );
    }

    #[test]
    fn test_classify_zero_results_with_person_is_policy() {
        assert_eq!(
            classify_failure("API returned no videos", "a person dancing in the rain"),
            FailureKind::Policy
        );
    }

    #[test]
    fn test_classify_zero_results_without_person_is_technical() {
        assert_eq!(
            classify_failure("API returned no videos", "a mountain at dusk"),
            FailureKind::Technical
        );
    }

    #[test]
    fn test_parse_directive_text_only() {
        let directive = parse_directive("Just a witty reply.");
        assert_eq!(directive.text, "Just a witty reply.");
        assert!(directive.media.is_none());
    }

    #[test]
    fn test_parse_directive_image() {
        let directive = parse_directive("Here you go!\nIMAGE_PROMPT: a whimsical library");
        assert_eq!(directive.text, "Here you go!");
        assert_eq!(
            directive.media,
            Some(MediaRequest::Image("a whimsical library".into()))
        );
    }

    #[test]
    fn test_parse_directive_video_wins_over_image_text() {
        // Only one directive is ever honored; video is checked first.
        let directive = parse_directive("Behold!\nVIDEO_PROMPT: a spinning teapot");
        assert_eq!(directive.text, "Behold!");
        assert_eq!(
            directive.media,
            Some(MediaRequest::Video("a spinning teapot".into()))
        );
    }

    #[test]
    fn test_parse_directive_multiline_body() {
        let raw = indoc::indoc! {"
            A marvelous question! The answer involves at least
            three separate misconceptions, which I shall now share.
            IMAGE_PROMPT: a blackboard covered in cheerful nonsense
        "};
        let directive = parse_directive(raw);
        assert!(directive.text.starts_with("A marvelous question!"));
        assert!(directive.text.ends_with("share."));
        assert_eq!(
            directive.media,
            Some(MediaRequest::Image(
                "a blackboard covered in cheerful nonsense".into()
            ))
        );
    }

    #[test]
    fn test_clean_alt_text_strips_marker() {
        assert_eq!(
            clean_alt_text("A cozy scene. Alt text: a cat on a windowsill"),
            "a cat on a windowsill"
        );
        assert_eq!(clean_alt_text("  plain description  "), "plain description");
    }

    /// Backend whose operation finishes after a fixed number of polls.
    struct CountingBackend {
        polls_until_done: u32,
        polls: AtomicU32,
    }

    #[async_trait]
    impl GenerationBackend for CountingBackend {
        async fn generate_text(&self, _request: TextRequest) -> Result<crate::genai::TextResponse> {
            Err(GenError::EmptyOutput.into())
        }
        async fn generate_image(&self, _prompt: &str) -> Result<Vec<u8>> {
            Err(GenError::EmptyOutput.into())
        }
        async fn generate_video(&self, _prompt: &str) -> Result<Operation> {
            Ok(Operation {
                name: "operations/test".into(),
                done: false,
                result_uri: None,
            })
        }
        async fn poll_operation(&self, operation: &Operation) -> Result<Operation> {
            let seen = self.polls.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(Operation {
                name: operation.name.clone(),
                done: seen >= self.polls_until_done,
                result_uri: (seen >= self.polls_until_done)
                    .then(|| "https://files.example/video.mp4".to_string()),
            })
        }
        async fn download_file(&self, _uri: &str) -> Result<Vec<u8>> {
            Ok(vec![0u8; 16])
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_video_poller_reaches_done() {
        let backend = CountingBackend {
            polls_until_done: 3,
            polls: AtomicU32::new(0),
        };
        let poller = VideoPoller {
            interval: Duration::from_secs(15),
            timeout: Duration::from_secs(600),
        };
        let operation = backend.generate_video("a spinning teapot").await.unwrap();

        let outcome = poller.run(&backend, operation).await.unwrap();
        let PollOutcome::Done(finished) = outcome else {
            panic!("expected the poller to finish");
        };
        assert!(finished.done);
        assert_eq!(backend.polls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_video_poller_times_out() {
        let backend = CountingBackend {
            polls_until_done: u32::MAX,
            polls: AtomicU32::new(0),
        };
        let poller = VideoPoller {
            interval: Duration::from_secs(15),
            timeout: Duration::from_secs(600),
        };
        let operation = backend.generate_video("an endless render").await.unwrap();

        let outcome = poller.run(&backend, operation).await.unwrap();
        assert!(matches!(outcome, PollOutcome::TimedOut));
        // 600s deadline at 15s per poll: exactly 40 polls fit before it.
        assert_eq!(backend.polls.load(Ordering::SeqCst), 40);
    }
}
