//! XRPC implementation of the [`SocialClient`] trait.

use crate::BotIdentity;
use crate::bsky::SocialClient;
use crate::bsky::types::{
    DmConvo, DmMessage, NewPost, Notification, PostView, StrongRef, ThreadNode,
};
use crate::error::{Result, SocialError};

use async_trait::async_trait;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::json;
use tokio::sync::RwLock;

/// Default PDS entry point.
const DEFAULT_SERVICE: &str = "https://bsky.social";

/// Service proxy header value routing chat calls to the DM service.
const CHAT_PROXY: &str = "did:web:api.bsky.chat#bsky_chat";

/// Authenticated Bluesky client over XRPC.
pub struct BskyClient {
    http: reqwest::Client,
    service: String,
    session: RwLock<Session>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Session {
    access_jwt: String,
    refresh_jwt: String,
    did: String,
    handle: String,
}

impl BskyClient {
    /// Create a session against the default service.
    pub async fn login(handle: &str, password: &str) -> Result<Self> {
        Self::login_to(DEFAULT_SERVICE, handle, password).await
    }

    /// Create a session against a specific PDS.
    pub async fn login_to(service: &str, handle: &str, password: &str) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .map_err(|source| SocialError::Request {
                endpoint: "client".into(),
                source,
            })?;

        let endpoint = format!("{service}/xrpc/com.atproto.server.createSession");
        let response = http
            .post(&endpoint)
            .json(&json!({ "identifier": handle, "password": password }))
            .send()
            .await
            .map_err(|source| SocialError::Request {
                endpoint: "com.atproto.server.createSession".into(),
                source,
            })?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(SocialError::Auth {
                handle: handle.to_string(),
                message: format!("{status}: {body}"),
            }
            .into());
        }

        let session: Session = response.json().await.map_err(|source| SocialError::Request {
            endpoint: "com.atproto.server.createSession".into(),
            source,
        })?;

        tracing::info!(did = %session.did, handle = %session.handle, "logged in to Bluesky");

        Ok(Self {
            http,
            service: service.to_string(),
            session: RwLock::new(session),
        })
    }

    /// The identity of the logged-in account.
    pub async fn identity(&self) -> BotIdentity {
        let session = self.session.read().await;
        BotIdentity {
            did: session.did.clone(),
            handle: session.handle.clone(),
        }
    }

    /// Swap the session tokens using the refresh token.
    async fn refresh_session(&self) -> Result<()> {
        let refresh_jwt = self.session.read().await.refresh_jwt.clone();
        let endpoint = format!("{}/xrpc/com.atproto.server.refreshSession", self.service);
        let response = self
            .http
            .post(&endpoint)
            .bearer_auth(&refresh_jwt)
            .send()
            .await
            .map_err(|source| SocialError::Request {
                endpoint: "com.atproto.server.refreshSession".into(),
                source,
            })?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(SocialError::Status {
                endpoint: "com.atproto.server.refreshSession".into(),
                status,
                body,
            }
            .into());
        }

        let refreshed: Session = response.json().await.map_err(|source| SocialError::Request {
            endpoint: "com.atproto.server.refreshSession".into(),
            source,
        })?;
        *self.session.write().await = refreshed;
        tracing::debug!("refreshed Bluesky session");
        Ok(())
    }

    async fn send_request(
        &self,
        nsid: &str,
        build: impl Fn(&str) -> reqwest::RequestBuilder,
    ) -> Result<reqwest::Response> {
        let access = self.session.read().await.access_jwt.clone();
        let response = build(&access)
            .send()
            .await
            .map_err(|source| SocialError::Request {
                endpoint: nsid.to_string(),
                source,
            })?;

        // Expired access tokens come back as 400 ExpiredToken or plain 401.
        // Refresh once and retry before surfacing the failure.
        match response.status().as_u16() {
            401 => {}
            400 => {
                let body = response.text().await.unwrap_or_default();
                if !body.contains("ExpiredToken") {
                    return Err(SocialError::Status {
                        endpoint: nsid.to_string(),
                        status: 400,
                        body,
                    }
                    .into());
                }
            }
            _ => return check_status(nsid, response).await,
        }

        self.refresh_session().await?;
        let access = self.session.read().await.access_jwt.clone();
        let response = build(&access)
            .send()
            .await
            .map_err(|source| SocialError::Request {
                endpoint: nsid.to_string(),
                source,
            })?;
        check_status(nsid, response).await
    }

    async fn xrpc_get<T: DeserializeOwned>(&self, nsid: &str, query: &[(&str, String)]) -> Result<T> {
        let url = format!("{}/xrpc/{nsid}", self.service);
        let response = self
            .send_request(nsid, |access| {
                self.http.get(&url).bearer_auth(access).query(query)
            })
            .await?;
        decode(nsid, response).await
    }

    async fn xrpc_get_proxied<T: DeserializeOwned>(
        &self,
        nsid: &str,
        query: &[(&str, String)],
    ) -> Result<T> {
        let url = format!("{}/xrpc/{nsid}", self.service);
        let response = self
            .send_request(nsid, |access| {
                self.http
                    .get(&url)
                    .bearer_auth(access)
                    .header("atproto-proxy", CHAT_PROXY)
                    .query(query)
            })
            .await?;
        decode(nsid, response).await
    }

    async fn xrpc_post<T: DeserializeOwned>(&self, nsid: &str, body: serde_json::Value) -> Result<T> {
        let url = format!("{}/xrpc/{nsid}", self.service);
        let response = self
            .send_request(nsid, |access| {
                self.http.post(&url).bearer_auth(access).json(&body)
            })
            .await?;
        decode(nsid, response).await
    }

    async fn xrpc_post_proxied<T: DeserializeOwned>(
        &self,
        nsid: &str,
        body: serde_json::Value,
    ) -> Result<T> {
        let url = format!("{}/xrpc/{nsid}", self.service);
        let response = self
            .send_request(nsid, |access| {
                self.http
                    .post(&url)
                    .bearer_auth(access)
                    .header("atproto-proxy", CHAT_PROXY)
                    .json(&body)
            })
            .await?;
        decode(nsid, response).await
    }
}

async fn check_status(nsid: &str, response: reqwest::Response) -> Result<reqwest::Response> {
    if response.status().is_success() {
        return Ok(response);
    }
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    Err(SocialError::Status {
        endpoint: nsid.to_string(),
        status,
        body,
    }
    .into())
}

async fn decode<T: DeserializeOwned>(nsid: &str, response: reqwest::Response) -> Result<T> {
    response.json().await.map_err(|source| {
        SocialError::Request {
            endpoint: nsid.to_string(),
            source,
        }
        .into()
    })
}

#[async_trait]
impl SocialClient for BskyClient {
    async fn get_thread(&self, uri: &str, depth: u32) -> Result<ThreadNode> {
        #[derive(Deserialize)]
        struct ThreadResponse {
            thread: ThreadNode,
        }
        let response: ThreadResponse = self
            .xrpc_get(
                "app.bsky.feed.getPostThread",
                &[("uri", uri.to_string()), ("depth", depth.to_string())],
            )
            .await?;
        Ok(response.thread)
    }

    async fn get_posts(&self, uris: &[String]) -> Result<Vec<PostView>> {
        #[derive(Deserialize)]
        struct PostsResponse {
            posts: Vec<PostView>,
        }
        let query: Vec<(&str, String)> = uris.iter().map(|uri| ("uris", uri.clone())).collect();
        let response: PostsResponse = self.xrpc_get("app.bsky.feed.getPosts", &query).await?;
        Ok(response.posts)
    }

    async fn send_post(&self, post: NewPost) -> Result<StrongRef> {
        let did = self.session.read().await.did.clone();
        let mut record = json!({
            "$type": "app.bsky.feed.post",
            "text": post.text,
            "createdAt": chrono::Utc::now().to_rfc3339(),
        });
        if let Some(reply) = &post.reply {
            record["reply"] = serde_json::to_value(reply).map_err(anyhow::Error::from)?;
        }
        if let Some(embed) = &post.embed {
            record["embed"] = serde_json::to_value(embed).map_err(anyhow::Error::from)?;
        }
        if !post.facets.is_empty() {
            record["facets"] = serde_json::to_value(&post.facets).map_err(anyhow::Error::from)?;
        }

        let response: StrongRef = self
            .xrpc_post(
                "com.atproto.repo.createRecord",
                json!({
                    "repo": did,
                    "collection": "app.bsky.feed.post",
                    "record": record,
                }),
            )
            .await?;
        Ok(response)
    }

    async fn upload_blob(&self, bytes: Vec<u8>, mime_type: &str) -> Result<serde_json::Value> {
        let nsid = "com.atproto.repo.uploadBlob";
        let url = format!("{}/xrpc/{nsid}", self.service);
        let mime = mime_type.to_string();
        let response = self
            .send_request(nsid, |access| {
                self.http
                    .post(&url)
                    .bearer_auth(access)
                    .header("content-type", mime.clone())
                    .body(bytes.clone())
            })
            .await?;

        let body: serde_json::Value = decode(nsid, response).await?;
        body.get("blob").cloned().ok_or_else(|| {
            SocialError::UnexpectedResponse {
                endpoint: nsid.to_string(),
                message: "missing blob in upload response".into(),
            }
            .into()
        })
    }

    async fn list_notifications(&self, limit: u32) -> Result<Vec<Notification>> {
        #[derive(Deserialize)]
        struct NotificationsResponse {
            notifications: Vec<Notification>,
        }
        let response: NotificationsResponse = self
            .xrpc_get(
                "app.bsky.notification.listNotifications",
                &[("limit", limit.to_string())],
            )
            .await?;
        Ok(response.notifications)
    }

    async fn get_or_create_convo(&self, peer_did: &str) -> Result<String> {
        #[derive(Deserialize)]
        struct ConvoResponse {
            convo: Convo,
        }
        #[derive(Deserialize)]
        struct Convo {
            id: String,
        }
        let response: ConvoResponse = self
            .xrpc_get_proxied(
                "chat.bsky.convo.getConvoForMembers",
                &[("members", peer_did.to_string())],
            )
            .await?;
        Ok(response.convo.id)
    }

    async fn send_dm(&self, convo_id: &str, text: &str) -> Result<()> {
        let _: serde_json::Value = self
            .xrpc_post_proxied(
                "chat.bsky.convo.sendMessage",
                json!({
                    "convoId": convo_id,
                    "message": { "text": text },
                }),
            )
            .await?;
        Ok(())
    }

    async fn get_dm_messages(&self, convo_id: &str, limit: u32) -> Result<Vec<DmMessage>> {
        #[derive(Deserialize)]
        struct MessagesResponse {
            messages: Vec<DmMessage>,
        }
        let response: MessagesResponse = self
            .xrpc_get_proxied(
                "chat.bsky.convo.getMessages",
                &[
                    ("convoId", convo_id.to_string()),
                    ("limit", limit.to_string()),
                ],
            )
            .await?;
        Ok(response.messages)
    }

    async fn list_dm_convos(&self) -> Result<Vec<DmConvo>> {
        #[derive(Deserialize)]
        struct ConvosResponse {
            convos: Vec<DmConvo>,
        }
        let response: ConvosResponse = self
            .xrpc_get_proxied("chat.bsky.convo.listConvos", &[])
            .await?;
        Ok(response.convos)
    }

    async fn mark_dm_read(&self, convo_id: &str) -> Result<()> {
        let _: serde_json::Value = self
            .xrpc_post_proxied(
                "chat.bsky.convo.updateRead",
                json!({ "convoId": convo_id }),
            )
            .await?;
        Ok(())
    }

    async fn resolve_handle(&self, handle: &str) -> Result<String> {
        #[derive(Deserialize)]
        struct ResolveResponse {
            did: String,
        }
        let response: ResolveResponse = self
            .xrpc_get(
                "com.atproto.identity.resolveHandle",
                &[("handle", handle.to_string())],
            )
            .await?;
        Ok(response.did)
    }

    async fn describe_repo(&self, did: &str) -> Result<String> {
        let nsid = "com.atproto.repo.describeRepo";
        let body: serde_json::Value = self.xrpc_get(nsid, &[("repo", did.to_string())]).await?;

        // The PDS endpoint lives in the DID document's service list.
        body.pointer("/didDoc/service")
            .and_then(|services| services.as_array())
            .and_then(|services| {
                services.iter().find_map(|service| {
                    service
                        .get("serviceEndpoint")
                        .and_then(|endpoint| endpoint.as_str())
                        .map(|endpoint| endpoint.to_string())
                })
            })
            .ok_or_else(|| {
                SocialError::UnexpectedResponse {
                    endpoint: nsid.to_string(),
                    message: format!("no service endpoint in DID document for {did}"),
                }
                .into()
            })
    }
}
