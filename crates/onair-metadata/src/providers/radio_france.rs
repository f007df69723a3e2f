use std::collections::BTreeMap;

use async_trait::async_trait;
use onair_proto::protocol::{MetadataKind, MetadataRecord};
use serde::Deserialize;
use tracing::debug;

use super::MetadataProvider;
use crate::error::Result;
use crate::transport::{get_json, non_blank};

/// Radio France "livemeta" feed: `<base>/<station number>`.
///
/// The feed is a timeline of nested steps (show → episode → song); the item on
/// air is the deepest step whose window contains the current time.
pub struct RadioFranceProvider {
    client: reqwest::Client,
    base_url: String,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct LiveMeta {
    #[serde(default)]
    steps: BTreeMap<String, Step>,
    #[serde(default)]
    levels: Vec<Level>,
}

#[derive(Debug, Deserialize)]
struct Level {
    #[serde(default)]
    items: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub(crate) struct Step {
    #[serde(default)]
    start: Option<i64>,
    #[serde(default)]
    end: Option<i64>,
    #[serde(default)]
    depth: u32,
    #[serde(rename = "embedType", default)]
    embed_type: Option<String>,
    #[serde(default)]
    title: Option<String>,
    #[serde(rename = "titleConcept", default)]
    title_concept: Option<String>,
    #[serde(default)]
    authors: Option<String>,
}

impl RadioFranceProvider {
    pub fn new(client: reqwest::Client, base_url: &str) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl MetadataProvider for RadioFranceProvider {
    async fn fetch_metadata(&self, station: &str) -> Result<Option<MetadataRecord>> {
        let url = format!("{}/{}", self.base_url, station);
        let live: LiveMeta = get_json(&self.client, &url).await?;
        let now = chrono::Utc::now().timestamp();
        let record = live.current_step(now).and_then(Step::to_record);
        debug!("[radiofrance] {} → {:?}", station, record);
        Ok(record)
    }
}

impl LiveMeta {
    /// Steps in timeline order: level items first, then anything unreferenced.
    fn ordered_steps(&self) -> Vec<&Step> {
        let mut ordered: Vec<&str> = Vec::new();
        for id in self.levels.iter().flat_map(|l| l.items.iter()) {
            if !ordered.contains(&id.as_str()) {
                ordered.push(id);
            }
        }
        for id in self.steps.keys() {
            if !ordered.contains(&id.as_str()) {
                ordered.push(id);
            }
        }
        ordered.iter().filter_map(|id| self.steps.get(*id)).collect()
    }

    /// Deepest step with `start <= now < end`; the first one seen wins a tie.
    /// Without any live step, the last item of the top level.
    pub(crate) fn current_step(&self, now: i64) -> Option<&Step> {
        let live = self
            .ordered_steps()
            .into_iter()
            .filter(|s| s.is_live(now))
            .fold(None::<&Step>, |best, step| match best {
                Some(b) if b.depth >= step.depth => Some(b),
                _ => Some(step),
            });
        live.or_else(|| {
            let last = self.levels.first()?.items.last()?;
            self.steps.get(last)
        })
    }
}

impl Step {
    fn is_live(&self, now: i64) -> bool {
        matches!((self.start, self.end), (Some(start), Some(end)) if start <= now && now < end)
    }

    fn to_record(&self) -> Option<MetadataRecord> {
        let title = non_blank(self.title.as_deref());
        let concept = non_blank(self.title_concept.as_deref());

        if self.embed_type.as_deref() == Some("song") {
            return Some(MetadataRecord {
                artist: non_blank(self.authors.as_deref()),
                title: Some(title?),
                artwork_url: None,
                kind: MetadataKind::Song,
            });
        }
        match (concept, title) {
            (Some(show), Some(episode)) => Some(MetadataRecord::program(Some(show), episode)),
            (Some(show), None) => Some(MetadataRecord::program(None, show)),
            (None, Some(episode)) => Some(MetadataRecord::program(None, episode)),
            (None, None) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TIMELINE: &str = r#"{
        "steps": {
            "show":  {"start": 1000, "end": 5000, "depth": 1, "embedType": "expression",
                      "titleConcept": "Club Jazzafip", "title": "Spéciale Blue Note"},
            "song1": {"start": 1000, "end": 1200, "depth": 2, "embedType": "song",
                      "title": "Cantaloupe Island", "authors": "Herbie Hancock"},
            "song2": {"start": 1200, "end": 1400, "depth": 2, "embedType": "song",
                      "title": "Maiden Voyage", "authors": "Herbie Hancock"}
        },
        "levels": [{"items": ["song1", "song2", "show"]}]
    }"#;

    fn live() -> LiveMeta {
        serde_json::from_str(TIMELINE).unwrap()
    }

    #[test]
    fn test_deepest_live_step_wins() {
        let live = live();
        let record = live.current_step(1250).and_then(Step::to_record).unwrap();
        assert_eq!(record, MetadataRecord::song("Herbie Hancock", "Maiden Voyage"));
    }

    #[test]
    fn test_only_show_live_is_program() {
        let live = live();
        let record = live.current_step(3000).and_then(Step::to_record).unwrap();
        assert_eq!(record.kind, MetadataKind::Program);
        assert_eq!(record.artist.as_deref(), Some("Club Jazzafip"));
        assert_eq!(record.title.as_deref(), Some("Spéciale Blue Note"));
    }

    #[test]
    fn test_end_is_exclusive_and_fallback_is_last_item() {
        let live = live();
        // 5000 is past every window: fall back to the last item of level 0
        let step = live.current_step(5000).unwrap();
        assert_eq!(step.title_concept.as_deref(), Some("Club Jazzafip"));
        // 1200 belongs to song2 only
        let record = live.current_step(1200).and_then(Step::to_record).unwrap();
        assert_eq!(record.title.as_deref(), Some("Maiden Voyage"));
    }

    #[test]
    fn test_depth_tie_keeps_first_seen() {
        let live: LiveMeta = serde_json::from_str(
            r#"{"steps": {
                    "a": {"start": 0, "end": 10, "depth": 3, "embedType": "song", "title": "First", "authors": "X"},
                    "b": {"start": 0, "end": 10, "depth": 3, "embedType": "song", "title": "Second", "authors": "Y"}
                },
                "levels": [{"items": ["b", "a"]}]}"#,
        )
        .unwrap();
        let record = live.current_step(5).and_then(Step::to_record).unwrap();
        assert_eq!(record.title.as_deref(), Some("Second"));
    }

    #[test]
    fn test_empty_feed() {
        assert!(LiveMeta::default().current_step(0).is_none());
    }
}
