//! Out-of-band developer alerts over Bluesky DM, with a public-post fallback
//! reserved for critical failures.

use crate::bsky::SocialClient;
use crate::bsky::types::NewPost;
use crate::facets;
use crate::ratelimit::RateLimiter;

use std::sync::Arc;

/// DMs are truncated to this many characters.
const MAX_DM_LENGTH: usize = 1000;

/// Kinds of developer notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertKind {
    Critical,
    Startup,
    QueueWarning,
    ErrorRateWarning,
    DropRateWarning,
    ConnectionWarning,
    GenerationFailure,
}

impl AlertKind {
    fn label(self) -> &'static str {
        match self {
            AlertKind::Critical => "CRITICAL ERROR",
            AlertKind::Startup => "STARTUP NOTIFICATION",
            AlertKind::QueueWarning => "QUEUE WARNING",
            AlertKind::ErrorRateWarning => "ERROR RATE WARNING",
            AlertKind::DropRateWarning => "DROP RATE WARNING",
            AlertKind::ConnectionWarning => "CONNECTION WARNING",
            AlertKind::GenerationFailure => "GENERATION FAILURE",
        }
    }
}

/// Channel for reaching the developer outside the public reply flow.
pub struct AlertChannel {
    social: Arc<dyn SocialClient>,
    limits: Arc<RateLimiter>,
    developer_did: String,
    developer_handle: String,
    bot_handle: String,
}

impl AlertChannel {
    pub fn new(
        social: Arc<dyn SocialClient>,
        limits: Arc<RateLimiter>,
        developer_did: String,
        developer_handle: String,
        bot_handle: String,
    ) -> Self {
        Self {
            social,
            limits,
            developer_did,
            developer_handle,
            bot_handle,
        }
    }

    /// Send a DM-only alert. Failures are logged, never propagated - an
    /// unreachable alert channel must not take the pipeline down with it.
    pub async fn notify(&self, kind: AlertKind, message: &str) {
        if let Err(error) = self.send_dm(kind, message).await {
            tracing::error!(kind = kind.label(), %error, "failed to send developer DM");
        }
    }

    /// Send an alert with a public-mention fallback when the DM channel is
    /// unavailable. Reserved for critical errors; routine warnings stay
    /// DM-only.
    pub async fn notify_critical(&self, message: &str) {
        let kind = AlertKind::Critical;
        if let Err(dm_error) = self.send_dm(kind, message).await {
            tracing::error!(%dm_error, "failed to send critical DM, falling back to public mention");
            if let Err(post_error) = self.send_public_fallback(kind, message).await {
                tracing::error!(%post_error, "all developer notification methods failed");
            }
        }
    }

    async fn send_dm(&self, kind: AlertKind, message: &str) -> crate::Result<()> {
        let mut body = message.to_string();
        if body.len() > MAX_DM_LENGTH {
            body = format!("{}...", truncate_chars(&body, MAX_DM_LENGTH - 3));
        }

        let text = format!(
            "{}\n\nBot: @{}\n{}\n\nTime: {}",
            kind.label(),
            self.bot_handle,
            body,
            chrono::Utc::now().format("%Y-%m-%d %H:%M:%S UTC"),
        );

        self.limits.wait_for_social().await;
        let convo_id = self.social.get_or_create_convo(&self.developer_did).await?;
        self.social.send_dm(&convo_id, &text).await?;
        tracing::info!(kind = kind.label(), "sent developer DM");
        Ok(())
    }

    async fn send_public_fallback(&self, kind: AlertKind, message: &str) -> crate::Result<()> {
        let mut text = format!(
            "@{} {}: {}",
            self.developer_handle,
            kind.label(),
            truncate_chars(message, 200),
        );
        if text.chars().count() > 300 {
            text = format!("{}...", truncate_chars(&text, 297));
        }

        let detected = facets::detect_facets(&text, self.social.as_ref()).await;
        self.limits.wait_for_social().await;
        self.social
            .send_post(NewPost {
                text,
                facets: detected,
                ..NewPost::default()
            })
            .await?;
        tracing::info!(kind = kind.label(), "sent public fallback notification");
        Ok(())
    }
}

/// Truncate to at most `max` characters on a char boundary.
fn truncate_chars(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((index, _)) => &text[..index],
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_chars_respects_boundaries() {
        assert_eq!(truncate_chars("hello", 10), "hello");
        assert_eq!(truncate_chars("hello", 3), "hel");
        // Multibyte chars must not be split mid-sequence.
        assert_eq!(truncate_chars("généralité", 4), "géné");
    }
}
