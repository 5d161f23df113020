//! Bounded HTTP downloads for context media (images, videos, PDS blobs).

use anyhow::{Context as _, bail};
use futures::StreamExt as _;
use std::time::Duration;

/// Size ceiling for context images.
pub const MAX_IMAGE_BYTES: u64 = 4 * 1024 * 1024;
/// Size ceiling for videos fetched from a plain URL.
pub const MAX_VIDEO_BYTES: u64 = 15 * 1024 * 1024;
/// Size ceiling for videos fetched as PDS blobs.
pub const MAX_BLOB_VIDEO_BYTES: u64 = 20 * 1024 * 1024;

const IMAGE_TIMEOUT: Duration = Duration::from_secs(15);
const VIDEO_TIMEOUT: Duration = Duration::from_secs(30);

/// Download an image, enforcing content type and the image size ceiling.
pub async fn fetch_image(http: &reqwest::Client, url: &str) -> anyhow::Result<Vec<u8>> {
    fetch_bounded(http, url, "image/", MAX_IMAGE_BYTES, IMAGE_TIMEOUT).await
}

/// Download a video from a plain URL.
pub async fn fetch_video(http: &reqwest::Client, url: &str) -> anyhow::Result<Vec<u8>> {
    fetch_bounded(http, url, "video/", MAX_VIDEO_BYTES, VIDEO_TIMEOUT).await
}

/// Download a video blob from the author's PDS `getBlob` endpoint.
pub async fn fetch_video_blob(
    http: &reqwest::Client,
    pds_endpoint: &str,
    author_did: &str,
    blob_cid: &str,
) -> anyhow::Result<Vec<u8>> {
    let url = format!(
        "{pds_endpoint}/xrpc/com.atproto.sync.getBlob?did={}&cid={}",
        urlencoding::encode(author_did),
        urlencoding::encode(blob_cid),
    );
    fetch_bounded(http, &url, "video/", MAX_BLOB_VIDEO_BYTES, VIDEO_TIMEOUT).await
}

/// Streaming GET that rejects mismatched content types and aborts the moment
/// the body exceeds `max_bytes` - oversized downloads never finish buffering.
async fn fetch_bounded(
    http: &reqwest::Client,
    url: &str,
    content_type_prefix: &str,
    max_bytes: u64,
    timeout: Duration,
) -> anyhow::Result<Vec<u8>> {
    let response = http
        .get(url)
        .timeout(timeout)
        .send()
        .await
        .with_context(|| format!("request to {url} failed"))?;

    if !response.status().is_success() {
        bail!("download of {url} returned status {}", response.status());
    }

    let content_type = response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default();
    if !content_type.starts_with(content_type_prefix) {
        bail!("{url} has content type {content_type:?}, expected {content_type_prefix}*");
    }

    if let Some(length) = response.content_length() {
        if length > max_bytes {
            bail!("{url} is {length} bytes, over the {max_bytes} byte ceiling");
        }
    }

    let mut body = Vec::new();
    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.with_context(|| format!("download of {url} interrupted"))?;
        if body.len() as u64 + chunk.len() as u64 > max_bytes {
            bail!("{url} exceeded the {max_bytes} byte ceiling mid-download");
        }
        body.extend_from_slice(&chunk);
    }

    tracing::debug!(url, bytes = body.len(), "downloaded media");
    Ok(body)
}

/// Guess a MIME type for a media URL from its extension.
pub fn mime_for_url(url: &str, fallback: &str) -> String {
    let lower = url.to_lowercase();
    let known = [
        (".png", "image/png"),
        (".gif", "image/gif"),
        (".jpg", "image/jpeg"),
        (".jpeg", "image/jpeg"),
        (".webm", "video/webm"),
        (".mov", "video/quicktime"),
        (".avi", "video/x-msvideo"),
        (".mp4", "video/mp4"),
    ];
    for (extension, mime) in known {
        if lower.ends_with(extension) {
            return mime.to_string();
        }
    }
    fallback.to_string()
}
