//! The per-event reply pipeline and the shared context it runs against.
//!
//! Workers call [`process_event`] for every dequeued event. All terminal
//! aborts (duplicate reply, depth cap, not our conversation, ...) are normal
//! outcomes, not errors; only real failures bubble up to the worker boundary.

use crate::bsky::SocialClient;
use crate::bsky::types::{NewPost, ReplyRefs, StrongRef, ThreadNode, ThreadViewPost};
use crate::config::Config;
use crate::context;
use crate::dedup::DedupCache;
use crate::dispatch;
use crate::error::Result;
use crate::genai::GenerationBackend;
use crate::generation;
use crate::prompts;
use crate::ratelimit::RateLimiter;
use crate::stats::PipelineStats;
use crate::{BotIdentity, Event, alerts::AlertChannel, is_mention};

use std::sync::Arc;

/// Shared state for the stream consumer, workers, and background loops.
///
/// Owns every piece of cross-task mutable state (dedup cache, rate limiter,
/// stats) so tests can build a fresh context per case instead of touching
/// globals.
pub struct PipelineContext {
    pub config: Arc<Config>,
    pub bot: BotIdentity,
    pub social: Arc<dyn SocialClient>,
    pub genai: Arc<dyn GenerationBackend>,
    /// Plain HTTP client for context media downloads.
    pub http: reqwest::Client,
    pub dedup: DedupCache,
    pub limits: Arc<RateLimiter>,
    pub stats: Arc<PipelineStats>,
    pub alerts: AlertChannel,
}

/// Why a trigger event entered the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerReason {
    Mention,
    Reply,
}

/// Result of running one event through the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Replied { posts: usize },
    /// The conversation hit the length cap and got the canned notice.
    CannedLimitReply,
    Skipped(SkipReason),
}

/// Terminal aborts. None of these are errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    AlreadySeen,
    ThreadUnavailable,
    /// The bot already replied under the triggering post.
    DuplicateReply,
    /// The trigger replies to the bot's own thread-limit notice.
    ReplyToLimitNotice,
    /// The trigger replies to a post by someone other than the bot.
    NotOurConversation,
    ParentUnavailable,
    EmptyContext,
    NothingGenerated,
}

/// Run the full reply pipeline for one event.
pub async fn process_event(ctx: &PipelineContext, event: Event) -> Result<Outcome> {
    let uri = event.uri();

    // Mark before any expensive work: two near-simultaneous events for the
    // same post must not both get past this line.
    if ctx.dedup.mark_and_check(&uri) {
        tracing::debug!(uri = %uri, "event already processed, skipping");
        return Ok(Outcome::Skipped(SkipReason::AlreadySeen));
    }

    tracing::info!(uri = %uri, "processing trigger event");

    let thread = ctx
        .social
        .get_thread(&uri, ctx.config.pipeline.thread_fetch_depth)
        .await?;
    let ThreadNode::Post(view) = thread else {
        tracing::warn!(uri = %uri, "thread not resolvable, skipping");
        return Ok(Outcome::Skipped(SkipReason::ThreadUnavailable));
    };

    let length = context::thread_length(&view);
    if length >= ctx.config.pipeline.conversation_cap {
        tracing::info!(uri = %uri, length, "conversation over the length cap");
        return handle_thread_limit(ctx, &view).await;
    }

    // The bot replies at most once under any post, no matter how many
    // triggers raced in before the dedup cache saw them.
    if has_bot_reply(&view, &ctx.bot.did) {
        tracing::debug!(uri = %uri, "bot already replied under this post, skipping");
        return Ok(Outcome::Skipped(SkipReason::DuplicateReply));
    }

    let reason = if is_mention(&event.record.text, &ctx.bot.handle) {
        TriggerReason::Mention
    } else {
        TriggerReason::Reply
    };

    if reason == TriggerReason::Reply {
        match check_reply_target(ctx, &view).await {
            ReplyTarget::Bot => {}
            ReplyTarget::SomeoneElse => {
                tracing::debug!(uri = %uri, "reply targets another user, staying out of it");
                return Ok(Outcome::Skipped(SkipReason::NotOurConversation));
            }
            ReplyTarget::Unresolvable => {
                tracing::warn!(uri = %uri, "could not resolve reply parent, skipping");
                return Ok(Outcome::Skipped(SkipReason::ParentUnavailable));
            }
        }
    }

    let Some(transcript) = context::build_transcript(&view) else {
        tracing::warn!(uri = %uri, "could not build any thread context");
        return Ok(Outcome::Skipped(SkipReason::EmptyContext));
    };

    let Some(content) =
        generation::generate_reply(ctx, &transcript, &view.post.author.did).await?
    else {
        return Ok(Outcome::Skipped(SkipReason::NothingGenerated));
    };

    let posts = dispatch::post_reply(ctx, &view.post, content).await?;
    if posts == 0 {
        return Ok(Outcome::Skipped(SkipReason::NothingGenerated));
    }
    Ok(Outcome::Replied { posts })
}

/// Who the trigger's immediate parent belongs to.
enum ReplyTarget {
    Bot,
    SomeoneElse,
    Unresolvable,
}

async fn check_reply_target(ctx: &PipelineContext, view: &ThreadViewPost) -> ReplyTarget {
    let Some(reply) = &view.post.record.reply else {
        return ReplyTarget::Unresolvable;
    };

    match ctx.social.get_posts(&[reply.parent.uri.clone()]).await {
        Ok(parents) => match parents.first() {
            Some(parent) if parent.author.did == ctx.bot.did => ReplyTarget::Bot,
            Some(_) => ReplyTarget::SomeoneElse,
            None => ReplyTarget::Unresolvable,
        },
        Err(error) => {
            tracing::error!(%error, "failed to fetch reply parent");
            ReplyTarget::Unresolvable
        }
    }
}

/// Over-limit handling: one canned notice, and never a second one in
/// response to the first.
async fn handle_thread_limit(ctx: &PipelineContext, view: &ThreadViewPost) -> Result<Outcome> {
    if let Some(reply) = &view.post.record.reply {
        match ctx.social.get_posts(&[reply.parent.uri.clone()]).await {
            Ok(parents) => {
                if let Some(parent) = parents.first() {
                    if parent.author.did == ctx.bot.did
                        && parent.record.text.contains(prompts::THREAD_LIMIT_NOTICE)
                    {
                        tracing::info!("trigger replies to our own limit notice, staying silent");
                        return Ok(Outcome::Skipped(SkipReason::ReplyToLimitNotice));
                    }
                }
            }
            Err(error) => {
                // Can't prove it's our notice; sending one canned reply is
                // the lesser evil compared to looping silently forever.
                tracing::error!(%error, "failed to check parent for limit notice");
            }
        }
    }

    let trigger_ref = StrongRef {
        uri: view.post.uri.clone(),
        cid: view.post.cid.clone(),
    };
    let root = view
        .post
        .record
        .reply
        .as_ref()
        .map(|reply| reply.root.clone())
        .unwrap_or_else(|| trigger_ref.clone());

    ctx.limits.wait_for_social().await;
    ctx.social
        .send_post(NewPost {
            text: prompts::THREAD_LIMIT_NOTICE.to_string(),
            reply: Some(ReplyRefs {
                root,
                parent: trigger_ref,
            }),
            embed: None,
            facets: Vec::new(),
        })
        .await?;

    tracing::info!("sent thread limit notice");
    Ok(Outcome::CannedLimitReply)
}

/// Does the trigger already have a direct reply authored by the bot?
fn has_bot_reply(view: &ThreadViewPost, bot_did: &str) -> bool {
    view.replies.iter().any(|reply| match reply {
        ThreadNode::Post(child) => child.post.author.did == bot_did,
        _ => false,
    })
}
