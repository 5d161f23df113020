//! Serde types for the subset of the AT Protocol surface the bot touches.

use serde::{Deserialize, Serialize};

/// Post author.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Author {
    pub did: String,
    pub handle: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
}

impl Author {
    /// Display name with handle fallback, as shown in thread transcripts.
    pub fn display(&self) -> &str {
        match self.display_name.as_deref() {
            Some(name) if !name.is_empty() => name,
            _ => &self.handle,
        }
    }
}

/// A `com.atproto.repo.strongRef`: the (uri, cid) pair naming one record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StrongRef {
    pub uri: String,
    pub cid: String,
}

/// Root/parent refs carried by a reply record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplyRefs {
    pub root: StrongRef,
    pub parent: StrongRef,
}

/// An `app.bsky.feed.post` record.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PostRecord {
    #[serde(default)]
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply: Option<ReplyRefs>,
}

/// A hydrated post view.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostView {
    pub uri: String,
    pub cid: String,
    pub author: Author,
    pub record: PostRecord,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embed: Option<EmbedView>,
}

/// Closed union of the embed shapes the context builder understands.
///
/// Anything the bot has no use for collapses to `Other` rather than failing
/// deserialization.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "$type")]
pub enum EmbedView {
    #[serde(rename = "app.bsky.embed.images#view")]
    Images { images: Vec<ImageView> },
    #[serde(rename = "app.bsky.embed.video#view")]
    Video {
        #[serde(default)]
        alt: Option<String>,
        #[serde(default)]
        cid: Option<String>,
    },
    #[serde(rename = "app.bsky.embed.external#view")]
    External { external: ExternalView },
    #[serde(rename = "app.bsky.embed.record#view")]
    Record,
    #[serde(rename = "app.bsky.embed.recordWithMedia#view")]
    RecordWithMedia,
    #[serde(other)]
    Other,
}

/// One image in an images embed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageView {
    #[serde(default)]
    pub alt: String,
    #[serde(default)]
    pub fullsize: Option<String>,
    #[serde(default)]
    pub thumb: Option<String>,
}

impl ImageView {
    /// Best available URL for downloading the image.
    pub fn url(&self) -> Option<&str> {
        self.fullsize.as_deref().or(self.thumb.as_deref())
    }
}

/// External-link embed card.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExternalView {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub uri: String,
}

/// One node in a fetched thread.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "$type")]
pub enum ThreadNode {
    #[serde(rename = "app.bsky.feed.defs#threadViewPost")]
    Post(ThreadViewPost),
    #[serde(rename = "app.bsky.feed.defs#notFoundPost")]
    NotFound { uri: String },
    #[serde(rename = "app.bsky.feed.defs#blockedPost")]
    Blocked { uri: String },
}

/// A resolvable thread node with its parent chain and direct replies.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThreadViewPost {
    pub post: PostView,
    #[serde(default)]
    pub parent: Option<Box<ThreadNode>>,
    #[serde(default)]
    pub replies: Vec<ThreadNode>,
}

/// A notification from `app.bsky.notification.listNotifications`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub uri: String,
    pub reason: String,
    pub author: Author,
    #[serde(default)]
    pub record: PostRecord,
    pub indexed_at: String,
}

/// A DM conversation summary.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DmConvo {
    pub id: String,
    #[serde(default)]
    pub unread_count: u32,
}

/// A message in a DM conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DmMessage {
    pub id: String,
    #[serde(default)]
    pub text: String,
    pub sender: DmSender,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DmSender {
    pub did: String,
}

/// A rich-text annotation over a byte range of post text.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Facet {
    pub index: ByteSlice,
    pub features: Vec<FacetFeature>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ByteSlice {
    pub byte_start: usize,
    pub byte_end: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "$type")]
pub enum FacetFeature {
    #[serde(rename = "app.bsky.richtext.facet#mention")]
    Mention { did: String },
    #[serde(rename = "app.bsky.richtext.facet#link")]
    Link { uri: String },
}

/// Embed attached to an outgoing post.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "$type")]
pub enum PostEmbed {
    #[serde(rename = "app.bsky.embed.images")]
    Images { images: Vec<ImageEmbed> },
    #[serde(rename = "app.bsky.embed.video")]
    Video { video: serde_json::Value, alt: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageEmbed {
    pub alt: String,
    pub image: serde_json::Value,
}

/// Everything needed to create one post.
#[derive(Debug, Clone, Default)]
pub struct NewPost {
    pub text: String,
    pub reply: Option<ReplyRefs>,
    pub embed: Option<PostEmbed>,
    pub facets: Vec<Facet>,
}

/// Parse an `at://did/collection/rkey` URI into its components.
pub fn parse_at_uri(uri: &str) -> Option<(String, String, String)> {
    let rest = uri.strip_prefix("at://")?;
    let mut parts = rest.splitn(3, '/');
    let did = parts.next()?;
    let collection = parts.next()?;
    let rkey = parts.next()?;
    if did.is_empty() || collection.is_empty() || rkey.is_empty() {
        return None;
    }
    Some((did.to_string(), collection.to_string(), rkey.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_at_uri() {
        let (did, collection, rkey) =
            parse_at_uri("at://did:plc:abc123/app.bsky.feed.post/3kxyz").unwrap();
        assert_eq!(did, "did:plc:abc123");
        assert_eq!(collection, "app.bsky.feed.post");
        assert_eq!(rkey, "3kxyz");
    }

    #[test]
    fn test_parse_at_uri_rejects_garbage() {
        assert!(parse_at_uri("https://example.com/post/1").is_none());
        assert!(parse_at_uri("at://did:plc:abc123").is_none());
        assert!(parse_at_uri("at://did:plc:abc123/collection-only").is_none());
    }

    #[test]
    fn test_embed_view_unknown_type_is_other() {
        let raw = r#"{"$type": "app.bsky.embed.somethingNew#view", "stuff": 1}"#;
        let embed: EmbedView = serde_json::from_str(raw).unwrap();
        assert!(matches!(embed, EmbedView::Other));
    }

    #[test]
    fn test_thread_node_roundtrip() {
        let raw = r#"{
            "$type": "app.bsky.feed.defs#threadViewPost",
            "post": {
                "uri": "at://did:plc:abc/app.bsky.feed.post/1",
                "cid": "bafy1",
                "author": {"did": "did:plc:abc", "handle": "alice.bsky.social"},
                "record": {"text": "hello"}
            },
            "parent": {"$type": "app.bsky.feed.defs#notFoundPost", "uri": "at://gone"}
        }"#;
        let node: ThreadNode = serde_json::from_str(raw).unwrap();
        let ThreadNode::Post(view) = node else {
            panic!("expected a thread view post");
        };
        assert_eq!(view.post.record.text, "hello");
        assert!(matches!(view.parent.as_deref(), Some(ThreadNode::NotFound { .. })));
    }

    #[test]
    fn test_author_display_falls_back_to_handle() {
        let author = Author {
            did: "did:plc:abc".into(),
            handle: "alice.bsky.social".into(),
            display_name: None,
        };
        assert_eq!(author.display(), "alice.bsky.social");

        let named = Author {
            display_name: Some("Alice".into()),
            ..author
        };
        assert_eq!(named.display(), "Alice");
    }
}
