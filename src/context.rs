//! Thread context assembly: walk a fetched thread from the triggering post
//! back to the root and serialize it for the generation backend.
//!
//! Media attached along the way is described in-line for the model and also
//! emitted as machine-parseable markers (`<<IMAGE_URL_n:...>>`,
//! `<<VIDEO_URL_n:...>>`) so the orchestrator can download it afterwards.
//! Video blobs are referenced as `BLOB:<cid>` and later fetched from the
//! author's PDS.

use crate::bsky::types::{EmbedView, ThreadNode, ThreadViewPost};
use std::sync::LazyLock;

/// A media source extracted from transcript markers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VideoSource {
    Url(String),
    Blob(String),
}

static IMAGE_MARKER_RE: LazyLock<regex::Regex> =
    LazyLock::new(|| regex::Regex::new(r"<<IMAGE_URL_\d+:(https?://[^>]+)>>").unwrap());

static VIDEO_MARKER_RE: LazyLock<regex::Regex> =
    LazyLock::new(|| regex::Regex::new(r"<<VIDEO_URL_\d+:(BLOB:[^>]+|https?://[^>]+)>>").unwrap());

/// Count resolvable posts from the triggering node up to the root.
///
/// A not-found or blocked ancestor ends the count; everything above it is
/// unreachable anyway.
pub fn thread_length(view: &ThreadViewPost) -> usize {
    let mut count = 1;
    let mut current = view.parent.as_deref();
    while let Some(node) = current {
        match node {
            ThreadNode::Post(parent) => {
                count += 1;
                current = parent.parent.as_deref();
            }
            ThreadNode::NotFound { .. } | ThreadNode::Blocked { .. } => break,
        }
    }
    count
}

/// Serialize the conversation from root to the triggering post.
///
/// Each entry is `Display Name (@handle): text`, followed by an embed note
/// and any media markers. Returns `None` when nothing could be assembled.
pub fn build_transcript(view: &ThreadViewPost) -> Option<String> {
    let mut entries = Vec::new();
    let mut node = Some(view);

    loop {
        let Some(current) = node else { break };
        entries.push(render_entry(current));

        node = match current.parent.as_deref() {
            Some(ThreadNode::Post(parent)) => Some(parent),
            Some(ThreadNode::NotFound { uri }) | Some(ThreadNode::Blocked { uri }) => {
                tracing::warn!(uri = %uri, "thread ancestor unavailable, stopping traversal");
                None
            }
            None => None,
        };
    }

    if entries.is_empty() {
        return None;
    }

    entries.reverse();
    Some(entries.join("\n\n"))
}

fn render_entry(view: &ThreadViewPost) -> String {
    let post = &view.post;
    let mut entry = format!(
        "{} (@{}): {}",
        post.author.display(),
        post.author.handle,
        post.record.text
    );

    if let Some(embed) = &post.embed {
        let described = describe_embed(embed);
        entry.push_str(&described.note);
        for (i, url) in described.image_urls.iter().enumerate() {
            entry.push_str(&format!("\n<<IMAGE_URL_{}:{}>>", i + 1, url));
        }
        for (i, source) in described.video_sources.iter().enumerate() {
            let rendered = match source {
                VideoSource::Url(url) => url.clone(),
                VideoSource::Blob(cid) => format!("BLOB:{cid}"),
            };
            entry.push_str(&format!("\n<<VIDEO_URL_{}:{}>>", i + 1, rendered));
        }
    }

    entry
}

/// Textual description of an embed plus any downloadable media references.
pub struct DescribedEmbed {
    pub note: String,
    pub image_urls: Vec<String>,
    pub video_sources: Vec<VideoSource>,
}

/// Describe an embed for the transcript, matching exhaustively over the
/// closed embed union.
pub fn describe_embed(embed: &EmbedView) -> DescribedEmbed {
    match embed {
        EmbedView::Images { images } => {
            let alts: Vec<String> = images
                .iter()
                .map(|image| {
                    if image.alt.is_empty() {
                        "image".to_string()
                    } else {
                        image.alt.clone()
                    }
                })
                .collect();
            let note = if alts.is_empty() {
                " [User attached an image]".to_string()
            } else {
                format!(" [User attached: {}]", alts.join(", "))
            };
            DescribedEmbed {
                note,
                image_urls: images
                    .iter()
                    .filter_map(|image| image.url().map(str::to_string))
                    .collect(),
                video_sources: Vec::new(),
            }
        }
        EmbedView::Video { alt, cid } => {
            let note = match alt.as_deref() {
                Some(alt) if !alt.is_empty() => format!(" [User attached video: {alt}]"),
                _ => " [User attached a video]".to_string(),
            };
            DescribedEmbed {
                note,
                image_urls: Vec::new(),
                video_sources: cid
                    .iter()
                    .map(|cid| VideoSource::Blob(cid.clone()))
                    .collect(),
            }
        }
        EmbedView::External { external } => {
            let note = if external.title.is_empty() {
                " [User shared a link]".to_string()
            } else {
                format!(" [User shared a link: {}]", external.title)
            };
            DescribedEmbed {
                note,
                image_urls: Vec::new(),
                video_sources: Vec::new(),
            }
        }
        EmbedView::Record => DescribedEmbed {
            note: " [User quoted another post]".to_string(),
            image_urls: Vec::new(),
            video_sources: Vec::new(),
        },
        EmbedView::RecordWithMedia => DescribedEmbed {
            note: " [User quoted another post with media]".to_string(),
            image_urls: Vec::new(),
            video_sources: Vec::new(),
        },
        EmbedView::Other => DescribedEmbed {
            note: String::new(),
            image_urls: Vec::new(),
            video_sources: Vec::new(),
        },
    }
}

/// Pull image URLs back out of a transcript's markers.
pub fn extract_image_urls(transcript: &str) -> Vec<String> {
    IMAGE_MARKER_RE
        .captures_iter(transcript)
        .filter_map(|capture| capture.get(1).map(|m| m.as_str().to_string()))
        .collect()
}

/// Pull video sources back out of a transcript's markers.
pub fn extract_video_sources(transcript: &str) -> Vec<VideoSource> {
    VIDEO_MARKER_RE
        .captures_iter(transcript)
        .filter_map(|capture| capture.get(1).map(|m| m.as_str()))
        .map(|raw| match raw.strip_prefix("BLOB:") {
            Some(cid) => VideoSource::Blob(cid.to_string()),
            None => VideoSource::Url(raw.to_string()),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bsky::types::{Author, ExternalView, ImageView, PostRecord, PostView};

    fn post(author_handle: &str, text: &str) -> PostView {
        PostView {
            uri: format!("at://did:plc:{author_handle}/app.bsky.feed.post/1"),
            cid: "bafy".into(),
            author: Author {
                did: format!("did:plc:{author_handle}"),
                handle: format!("{author_handle}.bsky.social"),
                display_name: None,
            },
            record: PostRecord {
                text: text.into(),
                reply: None,
            },
            embed: None,
        }
    }

    fn leaf_with_parents(depth: usize) -> ThreadViewPost {
        let mut node: Option<Box<ThreadNode>> = None;
        for i in 1..depth {
            node = Some(Box::new(ThreadNode::Post(ThreadViewPost {
                post: post("alice", &format!("message {i}")),
                parent: node,
                replies: Vec::new(),
            })));
        }
        ThreadViewPost {
            post: post("bob", "the trigger"),
            parent: node,
            replies: Vec::new(),
        }
    }

    #[test]
    fn test_thread_length_counts_chain() {
        assert_eq!(thread_length(&leaf_with_parents(1)), 1);
        assert_eq!(thread_length(&leaf_with_parents(7)), 7);
    }

    #[test]
    fn test_thread_length_stops_at_blocked_ancestor() {
        let view = ThreadViewPost {
            post: post("bob", "reply"),
            parent: Some(Box::new(ThreadNode::Post(ThreadViewPost {
                post: post("alice", "middle"),
                parent: Some(Box::new(ThreadNode::Blocked {
                    uri: "at://blocked".into(),
                })),
                replies: Vec::new(),
            }))),
            replies: Vec::new(),
        };
        assert_eq!(thread_length(&view), 2);
    }

    #[test]
    fn test_transcript_is_root_to_leaf() {
        let view = leaf_with_parents(3);
        let transcript = build_transcript(&view).unwrap();
        let entries: Vec<&str> = transcript.split("\n\n").collect();
        assert_eq!(entries.len(), 3);
        assert!(entries[0].contains("message 1"));
        assert!(entries[1].contains("message 2"));
        assert!(entries[2].ends_with("the trigger"));
        assert!(entries[2].starts_with("bob.bsky.social (@bob.bsky.social):"));
    }

    #[test]
    fn test_transcript_emits_image_markers() {
        let mut view = leaf_with_parents(1);
        view.post.embed = Some(EmbedView::Images {
            images: vec![ImageView {
                alt: "a sunset".into(),
                fullsize: Some("https://cdn.example/full.jpg".into()),
                thumb: None,
            }],
        });

        let transcript = build_transcript(&view).unwrap();
        assert!(transcript.contains("[User attached: a sunset]"));
        assert_eq!(
            extract_image_urls(&transcript),
            vec!["https://cdn.example/full.jpg".to_string()]
        );
    }

    #[test]
    fn test_transcript_emits_video_blob_markers() {
        let mut view = leaf_with_parents(1);
        view.post.embed = Some(EmbedView::Video {
            alt: Some("cat video".into()),
            cid: Some("bafyvideo123".into()),
        });

        let transcript = build_transcript(&view).unwrap();
        assert!(transcript.contains("[User attached video: cat video]"));
        assert_eq!(
            extract_video_sources(&transcript),
            vec![VideoSource::Blob("bafyvideo123".to_string())]
        );
    }

    #[test]
    fn test_describe_external_link() {
        let described = describe_embed(&EmbedView::External {
            external: ExternalView {
                title: "Interesting Article".into(),
                uri: "https://example.com".into(),
            },
        });
        assert_eq!(described.note, " [User shared a link: Interesting Article]");
        assert!(described.image_urls.is_empty());
    }

    #[test]
    fn test_extract_ignores_malformed_markers() {
        let transcript = "text <<IMAGE_URL_1:not-a-url>> <<VIDEO_URL_x:https://a>>";
        assert!(extract_image_urls(transcript).is_empty());
        assert!(extract_video_sources(transcript).is_empty());
    }
}
