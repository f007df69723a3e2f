use async_trait::async_trait;
use onair_proto::protocol::{MetadataKind, MetadataRecord};
use serde::Deserialize;
use tracing::debug;

use super::MetadataProvider;
use crate::error::Result;
use crate::transport::{get_json, non_blank};

/// Radio Nova publishes every one of its webradios in a single JSON array;
/// the parameter selects an entry by radio code or display name.
pub struct NovaProvider {
    client: reqwest::Client,
    url: String,
}

#[derive(Debug, Deserialize)]
struct NovaEntry {
    #[serde(default)]
    radio: Option<NovaRadio>,
    #[serde(rename = "currentTrack", default)]
    current_track: Option<NovaTrack>,
    #[serde(rename = "currentShow", default)]
    current_show: Option<NovaShow>,
}

#[derive(Debug, Deserialize)]
struct NovaRadio {
    code: Option<String>,
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct NovaTrack {
    artist: Option<String>,
    title: Option<String>,
}

#[derive(Debug, Deserialize)]
struct NovaShow {
    author: Option<String>,
    title: Option<String>,
}

impl NovaProvider {
    pub fn new(client: reqwest::Client, url: &str) -> Self {
        Self {
            client,
            url: url.to_string(),
        }
    }
}

#[async_trait]
impl MetadataProvider for NovaProvider {
    async fn fetch_metadata(&self, radio: &str) -> Result<Option<MetadataRecord>> {
        let entries: Vec<NovaEntry> = get_json(&self.client, &self.url).await?;
        let record = entries
            .iter()
            .find(|e| e.radio.as_ref().is_some_and(|r| r.is(radio)))
            .and_then(current_item);
        debug!("[nova] {} → {:?}", radio, record);
        Ok(record)
    }
}

impl NovaRadio {
    fn is(&self, key: &str) -> bool {
        self.code.as_deref() == Some(key) || self.name.as_deref() == Some(key)
    }
}

/// Track first, then the show; a bare radio entry reports the radio name.
/// Any track object present wins, even with blank fields.
fn current_item(entry: &NovaEntry) -> Option<MetadataRecord> {
    if let Some(track) = &entry.current_track {
        return Some(MetadataRecord {
            artist: non_blank(track.artist.as_deref()),
            title: non_blank(track.title.as_deref()),
            artwork_url: None,
            kind: MetadataKind::Song,
        });
    }
    if let Some(show) = &entry.current_show {
        return Some(MetadataRecord {
            artist: non_blank(show.author.as_deref()),
            title: non_blank(show.title.as_deref()),
            artwork_url: None,
            kind: MetadataKind::Program,
        });
    }
    let name = entry.radio.as_ref().and_then(|r| non_blank(r.name.as_deref()))?;
    Some(MetadataRecord::program(None, name))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(json: &str) -> NovaEntry {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn test_track_wins_over_show() {
        let record = current_item(&entry(
            r#"{"radio":{"code":"radionova","name":"Radio Nova"},
                "currentTrack":{"artist":"Khruangbin","title":"Maria También"},
                "currentShow":{"author":"Jean Croc","title":"Nova Club"}}"#,
        ))
        .unwrap();
        assert_eq!(record, MetadataRecord::song("Khruangbin", "Maria También"));
    }

    #[test]
    fn test_blank_track_still_shadows_show() {
        let record = current_item(&entry(
            r#"{"radio":{"code":"radionova"},
                "currentTrack":{"artist":"Khruangbin","title":"  "},
                "currentShow":{"author":"Jean Croc","title":"Nova Club"}}"#,
        ))
        .unwrap();
        assert_eq!(record.kind, MetadataKind::Song);
        assert_eq!(record.artist.as_deref(), Some("Khruangbin"));
        assert_eq!(record.title, None);
    }

    #[test]
    fn test_show_is_program() {
        let record = current_item(&entry(
            r#"{"radio":{"code":"radionova"},"currentShow":{"author":"Jean Croc","title":"Nova Club"}}"#,
        ))
        .unwrap();
        assert_eq!(record.kind, MetadataKind::Program);
        assert_eq!(record.artist.as_deref(), Some("Jean Croc"));
        assert_eq!(record.title.as_deref(), Some("Nova Club"));
    }

    #[test]
    fn test_bare_radio_reports_its_name() {
        let record = current_item(&entry(r#"{"radio":{"code":"nouvo","name":"Nouvo Nova"}}"#)).unwrap();
        assert_eq!(record.title.as_deref(), Some("Nouvo Nova"));
        assert_eq!(record.kind, MetadataKind::Program);
    }
}
