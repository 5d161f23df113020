//! Startup catch-up: process recent notifications missed while offline.
//!
//! This is the poll-based adapter producing the same normalized [`Event`]
//! shape as the Jetstream consumer; both feed the identical pipeline. The
//! pipeline's duplicate-reply guard keeps already-answered posts idempotent.

use crate::bsky::types::parse_at_uri;
use crate::pipeline::{self, PipelineContext};
use crate::Event;

use std::sync::Arc;

/// Relevant notification reasons; everything else (likes, follows, reposts)
/// is ignored.
const RELEVANT_REASONS: &[&str] = &["mention", "reply"];

/// Fetch and process the most recent notifications, oldest first.
pub async fn run(ctx: &Arc<PipelineContext>) {
    let limit = ctx.config.pipeline.catch_up_limit;
    tracing::info!(limit, "starting notification catch-up");

    ctx.limits.wait_for_social().await;
    let mut notifications = match ctx.social.list_notifications(limit).await {
        Ok(notifications) => notifications,
        Err(error) => {
            tracing::error!(%error, "could not list notifications for catch-up");
            return;
        }
    };

    notifications.sort_by(|a, b| a.indexed_at.cmp(&b.indexed_at));

    let mut processed = 0;
    for notification in notifications {
        if notification.author.did == ctx.bot.did {
            continue;
        }
        if !RELEVANT_REASONS.contains(&notification.reason.as_str()) {
            continue;
        }

        let Some((did, collection, rkey)) = parse_at_uri(&notification.uri) else {
            tracing::warn!(uri = %notification.uri, "unparseable notification uri");
            continue;
        };

        let event = Event {
            did,
            collection,
            rkey,
            record: notification.record.clone(),
        };

        match pipeline::process_event(ctx, event).await {
            Ok(outcome) => {
                processed += 1;
                tracing::info!(
                    uri = %notification.uri,
                    reason = %notification.reason,
                    author = %notification.author.handle,
                    ?outcome,
                    "caught up notification"
                );
            }
            Err(error) => {
                tracing::error!(uri = %notification.uri, %error, "catch-up processing failed");
            }
        }
    }

    tracing::info!(processed, "notification catch-up complete");
}
