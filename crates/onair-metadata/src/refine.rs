//! Song refinement against MusicBrainz: canonical artist/title spelling plus a
//! Cover Art Archive URL for the most "original" release of the recording.

use async_trait::async_trait;
use onair_proto::config::MetadataConfig;
use onair_proto::protocol::{MetadataKind, MetadataRecord};
use reqwest::header::ACCEPT;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::error::Result;
use crate::transport::{decode_json, non_blank};

/// Looks a song up and returns a standardized record.
#[async_trait]
pub trait RecordingLookup: Send + Sync {
    /// `None` only for blank input.  Non-song input, no match and lookup
    /// failures all return the input unchanged.
    async fn refine(&self, artist: &str, title: &str, kind: MetadataKind) -> Option<MetadataRecord>;
}

pub struct MusicBrainzRefiner {
    client: reqwest::Client,
    search_url: String,
    cover_art_url: String,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    recordings: Vec<Recording>,
}

#[derive(Debug, Deserialize)]
struct Recording {
    title: Option<String>,
    #[serde(rename = "artist-credit", default)]
    artist_credit: Vec<ArtistCredit>,
    #[serde(default)]
    releases: Vec<Release>,
}

#[derive(Debug, Deserialize)]
struct ArtistCredit {
    name: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Release {
    pub id: String,
    #[serde(rename = "release-group", default)]
    pub release_group: Option<ReleaseGroup>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ReleaseGroup {
    #[serde(rename = "primary-type", default)]
    pub primary_type: Option<String>,
    #[serde(rename = "secondary-types", default)]
    pub secondary_types: Vec<String>,
}

impl MusicBrainzRefiner {
    pub fn new(client: reqwest::Client, config: &MetadataConfig) -> Self {
        Self {
            client,
            search_url: format!("{}/recording/", config.musicbrainz_url.trim_end_matches('/')),
            cover_art_url: config.cover_art_url.trim_end_matches('/').to_string(),
        }
    }

    async fn search(&self, artist: &str, title: &str) -> Result<Option<MetadataRecord>> {
        let query = format!(
            "recording:\"{}\" AND artist:\"{}\"",
            escape_phrase(title),
            escape_phrase(artist)
        );
        let response = self
            .client
            .get(&self.search_url)
            .query(&[("query", query.as_str()), ("fmt", "json")])
            .header(ACCEPT, "application/json")
            .send()
            .await?;
        let found: SearchResponse = decode_json(response).await?;

        let Some(recording) = found.recordings.first() else {
            return Ok(None);
        };

        let credited = recording.artist_credit.first().and_then(|c| non_blank(c.name.as_deref()));

        let artwork_url = best_release(&recording.releases)
            .filter(|r| !r.id.is_empty())
            .map(|r| format!("{}/release/{}/front-500", self.cover_art_url, r.id));

        Ok(Some(MetadataRecord {
            artist: Some(credited.unwrap_or_else(|| artist.to_string())),
            title: Some(non_blank(recording.title.as_deref()).unwrap_or_else(|| title.to_string())),
            artwork_url,
            kind: MetadataKind::Song,
        }))
    }
}

#[async_trait]
impl RecordingLookup for MusicBrainzRefiner {
    async fn refine(&self, artist: &str, title: &str, kind: MetadataKind) -> Option<MetadataRecord> {
        let (Some(artist), Some(title)) = (non_blank(Some(artist)), non_blank(Some(title))) else {
            return None;
        };
        let unchanged = MetadataRecord {
            artist: Some(artist.clone()),
            title: Some(title.clone()),
            artwork_url: None,
            kind,
        };
        if kind != MetadataKind::Song {
            return Some(unchanged);
        }

        match self.search(&artist, &title).await {
            Ok(Some(record)) => {
                debug!("[musicbrainz] {} - {} → {:?}", artist, title, record);
                Some(record)
            }
            Ok(None) => {
                debug!("[musicbrainz] no recording for {} - {}", artist, title);
                Some(unchanged)
            }
            Err(e) => {
                warn!("[musicbrainz] lookup failed for {} - {}: {}", artist, title, e);
                Some(unchanged)
            }
        }
    }
}

fn escape_phrase(s: &str) -> String {
    s.replace('\\', "\\\\").replace('"', "\\\"")
}

fn is_compilation(group: &ReleaseGroup) -> bool {
    group
        .primary_type
        .as_deref()
        .is_some_and(|t| t.eq_ignore_ascii_case("compilation"))
        || group
            .secondary_types
            .iter()
            .any(|t| t.eq_ignore_ascii_case("compilation"))
}

/// Higher means closer to the original issue of the song:
/// plain album 4, plain single 3, non-compilation album 2, other
/// non-compilation 1, compilation 0.
pub fn release_score(release: &Release) -> u8 {
    let group = release.release_group.clone().unwrap_or_default();
    let primary = group.primary_type.as_deref().unwrap_or("");
    let plain = group.secondary_types.is_empty();
    let compilation = is_compilation(&group);

    if primary.eq_ignore_ascii_case("album") && plain {
        4
    } else if primary.eq_ignore_ascii_case("single") && plain {
        3
    } else if primary.eq_ignore_ascii_case("album") && !compilation {
        2
    } else if !compilation {
        1
    } else {
        0
    }
}

/// Highest-scoring release; the earliest listed wins a tie.
pub fn best_release(releases: &[Release]) -> Option<&Release> {
    releases.iter().fold(None, |best: Option<&Release>, r| match best {
        Some(b) if release_score(b) >= release_score(r) => Some(b),
        _ => Some(r),
    })
}
