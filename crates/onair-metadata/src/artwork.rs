//! Resolves an artwork reference (remote URL, `file://` URL or local path)
//! into image bytes.

use std::path::Path;

use async_trait::async_trait;
use onair_proto::protocol::Artwork;
use reqwest::header::CONTENT_TYPE;
use tracing::{debug, warn};

use crate::error::{MetadataError, Result};

#[async_trait]
pub trait ArtworkLoader: Send + Sync {
    /// Decoded image, or `None` when the reference cannot be loaded.
    async fn load(&self, reference: &str) -> Option<Artwork>;
}

pub struct HttpArtworkLoader {
    client: reqwest::Client,
}

impl HttpArtworkLoader {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }

    async fn fetch_remote(&self, url: &str) -> Result<Artwork> {
        let response = self.client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(MetadataError::Status {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .unwrap_or_else(|| content_type_for(url).to_string());
        let bytes = response.bytes().await?.to_vec();
        Ok(Artwork {
            content_type,
            bytes,
        })
    }

    async fn read_local(path: &Path) -> Result<Artwork> {
        let bytes = tokio::fs::read(path).await?;
        Ok(Artwork {
            content_type: content_type_for(&path.to_string_lossy()).to_string(),
            bytes,
        })
    }
}

#[async_trait]
impl ArtworkLoader for HttpArtworkLoader {
    async fn load(&self, reference: &str) -> Option<Artwork> {
        let reference = reference.trim();
        if reference.is_empty() {
            return None;
        }

        let loaded = if reference.starts_with("http://") || reference.starts_with("https://") {
            self.fetch_remote(reference).await
        } else {
            let path = reference.strip_prefix("file://").unwrap_or(reference);
            Self::read_local(Path::new(path)).await
        };

        match loaded {
            Ok(artwork) if !artwork.bytes.is_empty() => {
                debug!("[artwork] {} ({} bytes)", reference, artwork.bytes.len());
                Some(artwork)
            }
            Ok(_) => {
                warn!("[artwork] {} is empty", reference);
                None
            }
            Err(e) => {
                warn!("[artwork] failed to load {}: {}", reference, e);
                None
            }
        }
    }
}

/// Guess from the file extension; Cover Art Archive `front-500` has none and
/// is always JPEG.
fn content_type_for(reference: &str) -> &'static str {
    let lower = reference.to_ascii_lowercase();
    let ext = lower.rsplit('.').next().unwrap_or("");
    match ext {
        "png" => "image/png",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "svg" => "image/svg+xml",
        _ => "image/jpeg",
    }
}
