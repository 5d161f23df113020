//! Rich-text facet detection for outgoing posts (mentions and links).

use crate::bsky::types::{ByteSlice, Facet, FacetFeature};
use crate::bsky::SocialClient;

use std::sync::LazyLock;

static MENTION_RE: LazyLock<regex::Regex> = LazyLock::new(|| {
    regex::Regex::new(r"@([a-zA-Z0-9_.-]+(?:\.[a-zA-Z0-9_.-]+)*\.(?:[a-zA-Z]{2,}|[a-zA-Z0-9_.-]+))")
        .unwrap()
});

static URL_RE: LazyLock<regex::Regex> = LazyLock::new(|| {
    regex::Regex::new(
        r"https?://(?:www\.)?[-a-zA-Z0-9@:%._+~#=]{1,256}\.[a-zA-Z0-9()]{1,6}\b(?:[-a-zA-Z0-9()@:%_+.~#?&/=]*)",
    )
    .unwrap()
});

/// Detect mention and link facets in `text`.
///
/// Handles are resolved to DIDs through the social client; mentions whose
/// handle cannot be resolved are skipped rather than failing the post.
/// `Regex` byte offsets are already UTF-8 byte offsets, which is exactly
/// what the facet index wants.
pub async fn detect_facets(text: &str, social: &dyn SocialClient) -> Vec<Facet> {
    let mut facets = Vec::new();
    if text.is_empty() {
        return facets;
    }

    for capture in MENTION_RE.captures_iter(text) {
        let Some(whole) = capture.get(0) else { continue };
        let Some(handle) = capture.get(1) else { continue };

        match social.resolve_handle(handle.as_str()).await {
            Ok(did) => facets.push(Facet {
                index: ByteSlice {
                    byte_start: whole.start(),
                    byte_end: whole.end(),
                },
                features: vec![FacetFeature::Mention { did }],
            }),
            Err(error) => {
                tracing::warn!(handle = handle.as_str(), %error, "could not resolve mention handle");
            }
        }
    }

    for found in URL_RE.find_iter(text) {
        let uri = found.as_str();
        if uri.len() > 2048 {
            continue;
        }
        facets.push(Facet {
            index: ByteSlice {
                byte_start: found.start(),
                byte_end: found.end(),
            },
            features: vec![FacetFeature::Link {
                uri: uri.to_string(),
            }],
        });
    }

    facets
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bsky::types::{
        DmMessage, NewPost, Notification, PostView, StrongRef, ThreadNode,
    };
    use crate::error::Result;
    use async_trait::async_trait;

    /// Resolver stub: every handle maps to a predictable DID.
    struct StubResolver;

    #[async_trait]
    impl SocialClient for StubResolver {
        async fn get_thread(&self, _uri: &str, _depth: u32) -> Result<ThreadNode> {
            unreachable!("not used by facet tests")
        }
        async fn get_posts(&self, _uris: &[String]) -> Result<Vec<PostView>> {
            unreachable!("not used by facet tests")
        }
        async fn send_post(&self, _post: NewPost) -> Result<StrongRef> {
            unreachable!("not used by facet tests")
        }
        async fn upload_blob(&self, _bytes: Vec<u8>, _mime: &str) -> Result<serde_json::Value> {
            unreachable!("not used by facet tests")
        }
        async fn list_notifications(&self, _limit: u32) -> Result<Vec<Notification>> {
            unreachable!("not used by facet tests")
        }
        async fn get_or_create_convo(&self, _peer_did: &str) -> Result<String> {
            unreachable!("not used by facet tests")
        }
        async fn send_dm(&self, _convo_id: &str, _text: &str) -> Result<()> {
            unreachable!("not used by facet tests")
        }
        async fn get_dm_messages(&self, _convo_id: &str, _limit: u32) -> Result<Vec<DmMessage>> {
            unreachable!("not used by facet tests")
        }
        async fn list_dm_convos(&self) -> Result<Vec<crate::bsky::types::DmConvo>> {
            unreachable!("not used by facet tests")
        }
        async fn mark_dm_read(&self, _convo_id: &str) -> Result<()> {
            unreachable!("not used by facet tests")
        }
        async fn resolve_handle(&self, handle: &str) -> Result<String> {
            Ok(format!("did:plc:{handle}"))
        }
        async fn describe_repo(&self, _did: &str) -> Result<String> {
            unreachable!("not used by facet tests")
        }
    }

    #[tokio::test]
    async fn test_mention_byte_range() {
        let text = "hello @alice.bsky.social!";
        let facets = detect_facets(text, &StubResolver).await;
        assert_eq!(facets.len(), 1);
        assert_eq!(facets[0].index.byte_start, 6);
        assert_eq!(facets[0].index.byte_end, 24);
        assert!(matches!(
            &facets[0].features[0],
            FacetFeature::Mention { did } if did == "did:plc:alice.bsky.social"
        ));
    }

    #[tokio::test]
    async fn test_mention_byte_range_after_multibyte_text() {
        // "café " is 6 bytes, 5 chars: facet offsets must count bytes.
        let text = "café @bob.example.com";
        let facets = detect_facets(text, &StubResolver).await;
        assert_eq!(facets.len(), 1);
        assert_eq!(facets[0].index.byte_start, 6);
        assert_eq!(facets[0].index.byte_end, text.len());
    }

    #[tokio::test]
    async fn test_link_facet() {
        let text = "see https://example.com/page?x=1 for details";
        let facets = detect_facets(text, &StubResolver).await;
        assert_eq!(facets.len(), 1);
        let FacetFeature::Link { uri } = &facets[0].features[0] else {
            panic!("expected a link facet");
        };
        assert_eq!(uri, "https://example.com/page?x=1");
        assert_eq!(&text[facets[0].index.byte_start..facets[0].index.byte_end], uri);
    }

    #[tokio::test]
    async fn test_plain_text_has_no_facets() {
        assert!(detect_facets("just words here", &StubResolver).await.is_empty());
        assert!(detect_facets("", &StubResolver).await.is_empty());
    }
}
