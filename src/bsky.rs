//! Bluesky (AT Protocol) client: wire types, the `SocialClient` trait, and
//! the XRPC implementation.

pub mod client;
pub mod types;

pub use client::BskyClient;
pub use types::*;

use crate::error::Result;
use async_trait::async_trait;

/// Operations the reply pipeline needs from the social platform.
///
/// The production implementation is [`BskyClient`]; tests inject recording
/// fakes through this trait.
#[async_trait]
pub trait SocialClient: Send + Sync {
    /// Fetch the thread around a post, walking up to `depth` ancestors.
    async fn get_thread(&self, uri: &str, depth: u32) -> Result<ThreadNode>;

    /// Fetch posts by URI. Unknown URIs are simply absent from the result.
    async fn get_posts(&self, uris: &[String]) -> Result<Vec<PostView>>;

    /// Create a post and return its strong ref.
    async fn send_post(&self, post: NewPost) -> Result<StrongRef>;

    /// Upload a media blob, returning the opaque blob object to embed.
    async fn upload_blob(&self, bytes: Vec<u8>, mime_type: &str) -> Result<serde_json::Value>;

    async fn list_notifications(&self, limit: u32) -> Result<Vec<Notification>>;

    /// Get (or create) the DM conversation with a single peer.
    async fn get_or_create_convo(&self, peer_did: &str) -> Result<String>;

    async fn send_dm(&self, convo_id: &str, text: &str) -> Result<()>;

    async fn get_dm_messages(&self, convo_id: &str, limit: u32) -> Result<Vec<DmMessage>>;

    /// List DM conversations the bot participates in.
    async fn list_dm_convos(&self) -> Result<Vec<DmConvo>>;

    /// Mark a DM conversation read up to its latest message.
    async fn mark_dm_read(&self, convo_id: &str) -> Result<()>;

    /// Resolve a handle to its DID.
    async fn resolve_handle(&self, handle: &str) -> Result<String>;

    /// Resolve the PDS service endpoint hosting a repo, for blob fetches.
    async fn describe_repo(&self, did: &str) -> Result<String>;
}
