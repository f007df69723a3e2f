use async_trait::async_trait;
use onair_proto::protocol::{MetadataKind, MetadataRecord};
use serde::Deserialize;
use tracing::debug;

use super::MetadataProvider;
use crate::error::Result;
use crate::transport::{get_json, non_blank};

/// BBC "RMS" segments API: `<base>/services/<service id>/segments/latest`.
pub struct BbcProvider {
    client: reqwest::Client,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct SegmentsResponse {
    #[serde(default)]
    data: Vec<Segment>,
}

#[derive(Debug, Deserialize)]
struct Segment {
    #[serde(default)]
    offset: Option<Offset>,
    #[serde(default)]
    titles: Option<Titles>,
}

#[derive(Debug, Deserialize)]
struct Offset {
    #[serde(default)]
    now_playing: bool,
}

#[derive(Debug, Deserialize)]
struct Titles {
    /// Artist
    primary: Option<String>,
    /// Track title
    secondary: Option<String>,
}

impl BbcProvider {
    pub fn new(client: reqwest::Client, base_url: &str) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl MetadataProvider for BbcProvider {
    async fn fetch_metadata(&self, service: &str) -> Result<Option<MetadataRecord>> {
        let url = format!("{}/services/{}/segments/latest", self.base_url, service);
        let response: SegmentsResponse = get_json(&self.client, &url).await?;
        let record = now_playing_segment(&response);
        debug!("[bbc] {} → {:?}", service, record);
        Ok(record)
    }
}

/// Only the newest segment counts, and only while it is flagged as on air.
/// A track title is required; the artist is not.
fn now_playing_segment(response: &SegmentsResponse) -> Option<MetadataRecord> {
    let segment = response.data.first()?;
    if !segment.offset.as_ref().is_some_and(|o| o.now_playing) {
        return None;
    }
    let titles = segment.titles.as_ref()?;
    let title = non_blank(titles.secondary.as_deref())?;
    Some(MetadataRecord {
        artist: non_blank(titles.primary.as_deref()),
        title: Some(title),
        artwork_url: None,
        kind: MetadataKind::Song,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(json: &str) -> Option<MetadataRecord> {
        now_playing_segment(&serde_json::from_str(json).unwrap())
    }

    #[test]
    fn test_now_playing_segment() {
        let record = parse(
            r#"{"data":[{"offset":{"now_playing":true},"titles":{"primary":"Daft Punk","secondary":"One More Time"}}]}"#,
        )
        .unwrap();
        assert_eq!(record, MetadataRecord::song("Daft Punk", "One More Time"));
    }

    #[test]
    fn test_segment_without_artist_is_still_a_song() {
        let record = parse(
            r#"{"data":[{"offset":{"now_playing":true},"titles":{"primary":"","secondary":"One More Time"}}]}"#,
        )
        .unwrap();
        assert_eq!(record.kind, MetadataKind::Song);
        assert_eq!(record.artist, None);
        assert_eq!(record.title.as_deref(), Some("One More Time"));

        assert!(parse(
            r#"{"data":[{"offset":{"now_playing":true},"titles":{"primary":"Daft Punk","secondary":" "}}]}"#
        )
        .is_none());
    }

    #[test]
    fn test_finished_segment_ignored() {
        assert!(parse(
            r#"{"data":[{"offset":{"now_playing":false},"titles":{"primary":"A","secondary":"B"}}]}"#
        )
        .is_none());
        assert!(parse(r#"{"data":[]}"#).is_none());
        assert!(parse(r#"{}"#).is_none());
    }
}
