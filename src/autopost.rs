//! Automatic posting: a persona-generated standalone post at a random
//! interval, keeping the account alive between conversations.

use crate::dispatch;
use crate::genai::TextRequest;
use crate::pipeline::PipelineContext;
use crate::prompts;

use rand::Rng as _;
use std::sync::Arc;
use std::time::Duration;

/// Posting interval bounds: 15 to 30 minutes.
const MIN_INTERVAL_SECS: u64 = 900;
const MAX_INTERVAL_SECS: u64 = 1800;

const ERROR_PAUSE: Duration = Duration::from_secs(300);

/// Spawn the background automatic posting loop.
pub fn spawn_posting_loop(ctx: Arc<PipelineContext>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        tracing::info!("automatic posting loop started");
        loop {
            let interval =
                Duration::from_secs(rand::rng().random_range(MIN_INTERVAL_SECS..=MAX_INTERVAL_SECS));
            tracing::info!(
                minutes = interval.as_secs() / 60,
                "next automatic post scheduled"
            );
            tokio::time::sleep(interval).await;

            if let Err(error) = post_once(&ctx).await {
                tracing::error!(%error, "automatic post failed");
                tokio::time::sleep(ERROR_PAUSE).await;
            }
        }
    })
}

async fn post_once(ctx: &PipelineContext) -> crate::Result<()> {
    let Some(content) = generate_content(ctx).await? else {
        tracing::warn!("no content generated for automatic post, skipping");
        return Ok(());
    };

    let posted = dispatch::post_chain(ctx, &content).await?;
    tracing::info!(posted, "automatic post complete");
    Ok(())
}

/// One-shot persona generation. Media directives are stripped: automatic
/// posts are text-only.
async fn generate_content(ctx: &PipelineContext) -> crate::Result<Option<String>> {
    let prompt = format!(
        "{}\n\nUser: {}",
        prompts::PERSONA_INSTRUCTION,
        prompts::AUTO_POST_PROMPT,
    );

    ctx.limits.wait_for_generation().await;
    let response = ctx
        .genai
        .generate_text(TextRequest {
            prompt,
            media: Vec::new(),
        })
        .await?;

    let Some(text) = response.text else {
        return Ok(None);
    };

    let text = strip_media_directives(&text);
    if text.is_empty() {
        return Ok(None);
    }
    Ok(Some(text))
}

fn strip_media_directives(text: &str) -> String {
    let text = text
        .split_once("VIDEO_PROMPT:")
        .map(|(before, _)| before)
        .unwrap_or(text);
    let text = text
        .split_once("IMAGE_PROMPT:")
        .map(|(before, _)| before)
        .unwrap_or(text);
    text.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_media_directives() {
        assert_eq!(
            strip_media_directives("A fine fact.\nIMAGE_PROMPT: a diagram"),
            "A fine fact."
        );
        assert_eq!(
            strip_media_directives("Behold.\nVIDEO_PROMPT: motion"),
            "Behold."
        );
        assert_eq!(strip_media_directives("No media here."), "No media here.");
    }
}
