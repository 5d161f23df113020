//! Jetstream consumer: long-lived WebSocket subscription to the firehose,
//! filtered down to events addressed to the bot.
//!
//! The consumer never gives up: any connection loss waits the configured
//! delay and reconnects. Relevant events are handed to the queue with a
//! non-blocking enqueue so a slow pipeline can never stall the socket.

use crate::alerts::AlertKind;
use crate::bsky::types::PostRecord;
use crate::pipeline::PipelineContext;
use crate::queue::EventQueue;
use crate::{BotIdentity, Event, is_mention};

use futures::StreamExt as _;
use serde::Deserialize;
use std::sync::Arc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

/// Raw Jetstream frame, narrowed to the fields the bot inspects.
#[derive(Debug, Clone, Deserialize)]
pub struct JetstreamEvent {
    #[serde(default)]
    pub kind: String,
    #[serde(default)]
    pub did: String,
    #[serde(default)]
    pub commit: Option<JetstreamCommit>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct JetstreamCommit {
    #[serde(default)]
    pub operation: String,
    #[serde(default)]
    pub collection: String,
    #[serde(default)]
    pub rkey: String,
    #[serde(default)]
    pub record: Option<PostRecord>,
}

/// Subscription URL with the post-collection filter applied server-side.
pub fn subscribe_url(endpoint: &str) -> String {
    format!(
        "{endpoint}?wantedCollections={}",
        urlencoding::encode("app.bsky.feed.post")
    )
}

/// Relevance predicate: normalize a raw frame into an [`Event`] when it is a
/// new post addressed to the bot.
///
/// Accepted: creation of a post not authored by the bot, where either the
/// text mentions the bot's handle, or the post directly replies to one of
/// the bot's own posts. A reply to somebody else deeper in a thread the bot
/// participates in is not accepted - that would inject the bot into other
/// people's conversations.
pub fn relevant_event(raw: &JetstreamEvent, bot: &BotIdentity) -> Option<Event> {
    if raw.kind != "commit" {
        return None;
    }
    let commit = raw.commit.as_ref()?;
    if commit.operation != "create" || commit.collection != "app.bsky.feed.post" {
        return None;
    }
    if raw.did == bot.did {
        return None;
    }
    let record = commit.record.as_ref()?;

    let mentioned = is_mention(&record.text, &bot.handle);
    let replies_to_bot = record
        .reply
        .as_ref()
        .is_some_and(|reply| reply.parent.uri.contains(&bot.did));

    if !mentioned && !replies_to_bot {
        return None;
    }

    Some(Event {
        did: raw.did.clone(),
        collection: commit.collection.clone(),
        rkey: commit.rkey.clone(),
        record: record.clone(),
    })
}

/// Run the consumer until the process shuts down.
pub async fn run_consumer(ctx: Arc<PipelineContext>, queue: Arc<EventQueue>) {
    let url = subscribe_url(&ctx.config.jetstream.endpoint);
    let reconnect_delay = ctx.config.jetstream.reconnect_delay;

    loop {
        tracing::info!(url = %url, "connecting to Jetstream");

        match connect_async(url.as_str()).await {
            Ok((stream, _response)) => {
                tracing::info!("connected to Jetstream");
                let (_write, mut read) = stream.split();

                while let Some(frame) = read.next().await {
                    match frame {
                        Ok(Message::Text(payload)) => {
                            handle_frame(&ctx, &queue, payload.as_str());
                        }
                        Ok(Message::Ping(_)) | Ok(Message::Pong(_)) | Ok(Message::Binary(_)) | Ok(Message::Frame(_)) => {}
                        Ok(Message::Close(_)) => {
                            tracing::warn!("Jetstream closed the connection");
                            break;
                        }
                        Err(error) => {
                            tracing::error!(%error, "Jetstream read error");
                            break;
                        }
                    }
                }

                tracing::warn!(
                    delay_secs = reconnect_delay.as_secs(),
                    "Jetstream connection lost, reconnecting"
                );
            }
            Err(error) => {
                tracing::error!(%error, "failed to connect to Jetstream");
                ctx.alerts
                    .notify(
                        AlertKind::ConnectionWarning,
                        &format!("Jetstream connection failed: {error}"),
                    )
                    .await;
            }
        }

        tokio::time::sleep(reconnect_delay).await;
    }
}

fn handle_frame(ctx: &PipelineContext, queue: &EventQueue, payload: &str) {
    let raw: JetstreamEvent = match serde_json::from_str(payload) {
        Ok(parsed) => parsed,
        Err(error) => {
            tracing::debug!(%error, "unparseable Jetstream frame");
            return;
        }
    };

    if let Some(event) = relevant_event(&raw, &ctx.bot) {
        if !queue.enqueue(event) {
            // Already counted by the queue; nothing else to do here.
            tracing::warn!("event dropped, processing queue full");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bsky::types::{ReplyRefs, StrongRef};

    const BOT_DID: &str = "did:plc:botself";
    const BOT_HANDLE: &str = "bot.example.social";

    fn bot() -> BotIdentity {
        BotIdentity {
            did: BOT_DID.into(),
            handle: BOT_HANDLE.into(),
        }
    }

    fn frame(did: &str, operation: &str, collection: &str, record: Option<PostRecord>) -> JetstreamEvent {
        JetstreamEvent {
            kind: "commit".into(),
            did: did.into(),
            commit: Some(JetstreamCommit {
                operation: operation.into(),
                collection: collection.into(),
                rkey: "3kabc".into(),
                record,
            }),
        }
    }

    fn post_record(text: &str) -> PostRecord {
        PostRecord {
            text: text.into(),
            reply: None,
        }
    }

    fn reply_record(text: &str, parent_uri: &str) -> PostRecord {
        PostRecord {
            text: text.into(),
            reply: Some(ReplyRefs {
                root: StrongRef {
                    uri: "at://did:plc:alice/app.bsky.feed.post/root".into(),
                    cid: "bafyroot".into(),
                },
                parent: StrongRef {
                    uri: parent_uri.into(),
                    cid: "bafyparent".into(),
                },
            }),
        }
    }

    #[test]
    fn test_accepts_mention() {
        let raw = frame(
            "did:plc:alice",
            "create",
            "app.bsky.feed.post",
            Some(post_record(&format!("hey @{BOT_HANDLE}, settle a bet"))),
        );
        let event = relevant_event(&raw, &bot()).unwrap();
        assert_eq!(event.uri(), "at://did:plc:alice/app.bsky.feed.post/3kabc");
    }

    #[test]
    fn test_mention_is_case_insensitive() {
        let raw = frame(
            "did:plc:alice",
            "create",
            "app.bsky.feed.post",
            Some(post_record(&format!("hey @{}!", BOT_HANDLE.to_uppercase()))),
        );
        assert!(relevant_event(&raw, &bot()).is_some());
    }

    #[test]
    fn test_accepts_direct_reply_to_bot() {
        let raw = frame(
            "did:plc:alice",
            "create",
            "app.bsky.feed.post",
            Some(reply_record(
                "tell me more",
                &format!("at://{BOT_DID}/app.bsky.feed.post/mine"),
            )),
        );
        assert!(relevant_event(&raw, &bot()).is_some());
    }

    #[test]
    fn test_rejects_reply_to_other_user() {
        // The bot may own the thread root, but the immediate parent belongs
        // to someone else: stay out of it.
        let raw = frame(
            "did:plc:alice",
            "create",
            "app.bsky.feed.post",
            Some(reply_record(
                "totally agree",
                "at://did:plc:carol/app.bsky.feed.post/theirs",
            )),
        );
        assert!(relevant_event(&raw, &bot()).is_none());
    }

    #[test]
    fn test_rejects_own_posts() {
        let raw = frame(
            BOT_DID,
            "create",
            "app.bsky.feed.post",
            Some(post_record(&format!("@{BOT_HANDLE} talking to myself"))),
        );
        assert!(relevant_event(&raw, &bot()).is_none());
    }

    #[test]
    fn test_rejects_non_create_operations() {
        let raw = frame(
            "did:plc:alice",
            "delete",
            "app.bsky.feed.post",
            Some(post_record(&format!("@{BOT_HANDLE} hello"))),
        );
        assert!(relevant_event(&raw, &bot()).is_none());
    }

    #[test]
    fn test_rejects_other_collections() {
        let raw = frame(
            "did:plc:alice",
            "create",
            "app.bsky.feed.like",
            Some(post_record(&format!("@{BOT_HANDLE} hello"))),
        );
        assert!(relevant_event(&raw, &bot()).is_none());
    }

    #[test]
    fn test_rejects_unrelated_posts() {
        let raw = frame(
            "did:plc:alice",
            "create",
            "app.bsky.feed.post",
            Some(post_record("just posting about my lunch")),
        );
        assert!(relevant_event(&raw, &bot()).is_none());
    }

    #[test]
    fn test_rejects_non_commit_frames() {
        let raw = JetstreamEvent {
            kind: "identity".into(),
            did: "did:plc:alice".into(),
            commit: None,
        };
        assert!(relevant_event(&raw, &bot()).is_none());
    }

    #[test]
    fn test_subscribe_url_filters_posts() {
        let url = subscribe_url("wss://jetstream.example/subscribe");
        assert_eq!(
            url,
            "wss://jetstream.example/subscribe?wantedCollections=app.bsky.feed.post"
        );
    }
}
