//! Reply dispatch: split generated text into post-sized segments and post
//! them as a reply chain, media attached to the first segment only.

use crate::bsky::types::{ImageEmbed, NewPost, PostEmbed, PostView, ReplyRefs, StrongRef};
use crate::error::Result;
use crate::facets;
use crate::generation::{GeneratedMedia, MediaKind, ReplyContent};
use crate::pipeline::PipelineContext;

/// Bluesky's per-post character budget.
pub const POST_CHAR_LIMIT: usize = 300;

/// Blobs smaller than this are assumed to be error payloads, not media.
const MIN_BLOB_BYTES: usize = 1000;

/// Split text into segments of at most `limit` characters.
///
/// Sentences are kept together while they fit; a single sentence over the
/// limit falls back to word-level accumulation. A lone word longer than the
/// limit becomes its own segment rather than being cut mid-word.
pub fn split_text(text: &str, limit: usize) -> Vec<String> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Vec::new();
    }

    let mut posts = Vec::new();
    let mut current = String::new();

    for sentence in split_sentences(trimmed) {
        let sentence_len = sentence.chars().count();
        let current_len = current.chars().count();

        if current_len + sentence_len + 1 > limit {
            if !current.is_empty() {
                posts.push(std::mem::take(&mut current));
            }

            if sentence_len > limit {
                accumulate_words(sentence, limit, &mut posts);
            } else {
                current = sentence.to_string();
            }
        } else if current.is_empty() {
            current = sentence.to_string();
        } else {
            current.push(' ');
            current.push_str(sentence);
        }
    }

    if !current.is_empty() {
        posts.push(current);
    }

    posts.retain(|post| !post.is_empty());
    posts
}

/// Word-level fallback for one over-long sentence.
fn accumulate_words(sentence: &str, limit: usize, posts: &mut Vec<String>) {
    let mut word_post = String::new();
    for word in sentence.split_whitespace() {
        let word_len = word.chars().count();
        let post_len = word_post.chars().count();

        if post_len + word_len + 1 > limit {
            if !word_post.is_empty() {
                posts.push(std::mem::take(&mut word_post));
            }
            word_post = word.to_string();
        } else if word_post.is_empty() {
            word_post = word.to_string();
        } else {
            word_post.push(' ');
            word_post.push_str(word);
        }
    }
    if !word_post.is_empty() {
        posts.push(word_post);
    }
}

/// Split on sentence boundaries: whitespace following `.`, `!`, or `?`.
fn split_sentences(text: &str) -> Vec<&str> {
    let mut sentences = Vec::new();
    let mut start = 0;
    let mut previous_was_terminator = false;

    for (index, ch) in text.char_indices() {
        if previous_was_terminator && ch.is_whitespace() {
            let sentence = text[start..index].trim();
            if !sentence.is_empty() {
                sentences.push(sentence);
            }
            start = index;
        }
        previous_was_terminator = matches!(ch, '.' | '!' | '?');
    }

    let tail = text[start..].trim();
    if !tail.is_empty() {
        sentences.push(tail);
    }
    sentences
}

/// Post a reply chain under the triggering post.
///
/// Segment 0 replies to the trigger; each following segment replies to the
/// previous bot post with the thread root carried through unchanged. Only
/// segment 0 may carry the media embed. Stops at the segment cap and stops
/// immediately on any send failure. Returns the number of posts made.
pub async fn post_reply(
    ctx: &PipelineContext,
    trigger: &PostView,
    content: ReplyContent,
) -> Result<usize> {
    let mut segments = split_text(&content.text, POST_CHAR_LIMIT);
    if segments.is_empty() {
        if content.media.is_some() {
            segments.push(String::new());
        } else {
            return Ok(0);
        }
    }

    let trigger_ref = StrongRef {
        uri: trigger.uri.clone(),
        cid: trigger.cid.clone(),
    };
    // Root is the thread root when the trigger was itself a reply.
    let root = trigger
        .record
        .reply
        .as_ref()
        .map(|reply| reply.root.clone())
        .unwrap_or_else(|| trigger_ref.clone());

    let max_segments = ctx.config.pipeline.max_reply_segments;
    if segments.len() > max_segments {
        tracing::warn!(
            segments = segments.len(),
            max_segments,
            "reply exceeds segment cap, dropping overflow"
        );
    }

    let mut parent = trigger_ref;
    let mut posted = 0;

    for (index, segment) in segments.iter().take(max_segments).enumerate() {
        let embed = if index == 0 {
            match &content.media {
                Some(media) => upload_media_embed(ctx, media).await,
                None => None,
            }
        } else {
            None
        };

        let detected = facets::detect_facets(segment, ctx.social.as_ref()).await;
        ctx.limits.wait_for_social().await;

        match ctx
            .social
            .send_post(NewPost {
                text: segment.clone(),
                reply: Some(ReplyRefs {
                    root: root.clone(),
                    parent: parent.clone(),
                }),
                embed,
                facets: detected,
            })
            .await
        {
            Ok(reference) => {
                posted += 1;
                tracing::info!(uri = %reference.uri, index, "posted reply segment");
                parent = reference;
            }
            Err(error) => {
                // A broken chain cannot be continued: later segments would
                // dangle off a post that does not exist.
                tracing::error!(index, %error, "failed to post reply segment, stopping chain");
                break;
            }
        }
    }

    Ok(posted)
}

/// Post a standalone chain (no reply target): first post is the root, each
/// later segment replies to the previous one. Used by the DM command path
/// and the automatic posting loop.
pub async fn post_chain(ctx: &PipelineContext, text: &str) -> Result<usize> {
    let segments = split_text(text, POST_CHAR_LIMIT);
    if segments.is_empty() {
        return Ok(0);
    }

    let mut first: Option<StrongRef> = None;
    let mut parent: Option<StrongRef> = None;
    let mut posted = 0;

    for segment in &segments {
        let reply = match (&first, &parent) {
            (Some(root), Some(previous)) => Some(ReplyRefs {
                root: root.clone(),
                parent: previous.clone(),
            }),
            _ => None,
        };

        let detected = facets::detect_facets(segment, ctx.social.as_ref()).await;
        ctx.limits.wait_for_social().await;

        let reference = ctx
            .social
            .send_post(NewPost {
                text: segment.clone(),
                reply,
                embed: None,
                facets: detected,
            })
            .await?;

        posted += 1;
        if first.is_none() {
            first = Some(reference.clone());
        }
        parent = Some(reference);
    }

    Ok(posted)
}

/// Upload generated media and build the embed for the first segment.
///
/// Upload problems degrade to a text-only post rather than failing the reply.
async fn upload_media_embed(ctx: &PipelineContext, media: &GeneratedMedia) -> Option<PostEmbed> {
    if media.bytes.len() < MIN_BLOB_BYTES {
        tracing::warn!(
            bytes = media.bytes.len(),
            "media too small to be valid, skipping upload"
        );
        return None;
    }

    let mut alt = media.alt.clone();
    if alt.chars().count() > 300 {
        alt = alt.chars().take(297).collect::<String>() + "...";
    }

    ctx.limits.wait_for_social().await;
    match ctx
        .social
        .upload_blob(media.bytes.clone(), media.kind.mime_type())
        .await
    {
        Ok(blob) => {
            tracing::info!(kind = ?media.kind, bytes = media.bytes.len(), "uploaded media blob");
            Some(match media.kind {
                MediaKind::Image => PostEmbed::Images {
                    images: vec![ImageEmbed { alt, image: blob }],
                },
                MediaKind::Video => PostEmbed::Video { video: blob, alt },
            })
        }
        Err(error) => {
            tracing::error!(%error, "failed to upload media blob");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_empty_input_is_empty() {
        assert!(split_text("", 300).is_empty());
        assert!(split_text("   \n  ", 300).is_empty());
    }

    #[test]
    fn test_split_short_text_is_single_segment() {
        let segments = split_text("Hello there. How are you?", 300);
        assert_eq!(segments, vec!["Hello there. How are you?"]);
    }

    #[test]
    fn test_split_segments_stay_under_limit() {
        let text = "One sentence here. Another sentence follows. And a third one too. \
                    Plus a fourth for good measure. Finally a fifth sentence ends it.";
        for limit in [40, 60, 100] {
            for segment in split_text(text, limit) {
                assert!(
                    segment.chars().count() <= limit,
                    "segment {segment:?} over limit {limit}"
                );
            }
        }
    }

    #[test]
    fn test_split_preserves_words_in_order() {
        let text = "The quick brown fox jumps over the lazy dog. \
                    Pack my box with five dozen liquor jugs! \
                    How vexingly quick daft zebras jump?";
        let segments = split_text(text, 50);

        let original_words: Vec<&str> = text.split_whitespace().collect();
        let joined = segments.join(" ");
        let segment_words: Vec<&str> = joined.split_whitespace().collect();
        assert_eq!(segment_words, original_words);
    }

    #[test]
    fn test_split_long_sentence_falls_back_to_words() {
        let sentence = "word ".repeat(100);
        let segments = split_text(sentence.trim(), 50);
        assert!(segments.len() > 1);
        for segment in &segments {
            assert!(segment.chars().count() <= 50);
        }
    }

    #[test]
    fn test_split_single_overlong_word_is_own_segment() {
        let word = "a".repeat(400);
        let text = format!("Short intro. {word}");
        let segments = split_text(&text, 300);
        assert!(segments.contains(&"Short intro.".to_string()));
        assert!(segments.contains(&word));
    }

    #[test]
    fn test_split_900_chars_makes_three_segments() {
        // Three ~290-char sentences: each must land in its own post.
        let sentence = format!("{}.", "x".repeat(289));
        let text = format!("{sentence} {sentence} {sentence}");
        let segments = split_text(&text, 300);
        assert_eq!(segments.len(), 3);
        for segment in &segments {
            assert!(segment.chars().count() <= 300);
        }
    }

    #[test]
    fn test_split_sentences_handles_terminators() {
        let sentences = split_sentences("First one. Second one! Third one? Fourth");
        assert_eq!(sentences, vec!["First one.", "Second one!", "Third one?", "Fourth"]);
    }

    #[test]
    fn test_split_sentences_keeps_ellipsis_together() {
        let sentences = split_sentences("Well... maybe. Sure.");
        assert_eq!(sentences, vec!["Well...", "maybe.", "Sure."]);
    }
}
