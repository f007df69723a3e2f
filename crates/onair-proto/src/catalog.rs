//! Station catalog: loading, repository capability, filtering and ranking.

use async_trait::async_trait;
use serde::Serialize;
use std::collections::{BTreeSet, HashMap};

use crate::protocol::{ProviderRef, Station};

/// Station lookup plus the per-user library (favorites and listen counts).
///
/// One instance is built per process and shared as `Arc<dyn StationRepository>`.
#[async_trait]
pub trait StationRepository: Send + Sync {
    /// Lookup by id.  The catalog itself is static for the process lifetime.
    fn station(&self, id: &str) -> Option<Station>;

    /// Every station in catalog order.
    fn stations(&self) -> Vec<Station>;

    /// Count one listen for `id`.
    async fn record_listen(&self, id: &str) -> anyhow::Result<()>;

    async fn favorites(&self) -> BTreeSet<String>;

    /// Flip the favorite flag, returning the new value.
    async fn toggle_favorite(&self, id: &str) -> anyhow::Result<bool>;

    async fn listen_counts(&self) -> HashMap<String, u64>;

    /// Filtered stations, favorites first then by listen count.
    async fn browse(&self, filter: &StationFilter) -> Vec<StationEntry> {
        let favorites = self.favorites().await;
        let counts = self.listen_counts().await;
        let entries = self
            .stations()
            .into_iter()
            .map(|station| StationEntry {
                is_favorite: favorites.contains(&station.id),
                listen_count: counts.get(&station.id).copied().unwrap_or(0),
                station,
            })
            .filter(|entry| filter.matches(entry))
            .collect();
        rank(entries)
    }
}

/// A station decorated with library state, as presented to clients.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct StationEntry {
    #[serde(flatten)]
    pub station: Station,
    pub is_favorite: bool,
    pub listen_count: u64,
}

/// Browse filter.  Empty fields match everything.
#[derive(Debug, Clone, Default)]
pub struct StationFilter {
    /// `world`, `europe`, `north_america`, or a single country id.
    pub region: Option<String>,
    /// Genre ids; a station matches if it carries any of them.
    pub styles: Vec<String>,
    pub favorites_only: bool,
    /// Case-insensitive substring over name, description and tags.
    pub query: Option<String>,
}

impl StationFilter {
    pub fn matches(&self, entry: &StationEntry) -> bool {
        if self.favorites_only && !entry.is_favorite {
            return false;
        }
        if let Some(region) = &self.region {
            let countries = countries_for_region(region);
            if !countries.is_empty()
                && !countries
                    .iter()
                    .any(|c| c.eq_ignore_ascii_case(&entry.station.country))
            {
                return false;
            }
        }
        if !self.styles.is_empty()
            && !self
                .styles
                .iter()
                .any(|style| genre_matches(&entry.station.genre, style))
        {
            return false;
        }
        if let Some(query) = self.query.as_deref().map(str::trim).filter(|q| !q.is_empty()) {
            let q = query.to_lowercase();
            let s = &entry.station;
            let hit = s.name.to_lowercase().contains(&q)
                || s.description.to_lowercase().contains(&q)
                || s.tags.iter().any(|t| t.to_lowercase().contains(&q));
            if !hit {
                return false;
            }
        }
        true
    }
}

/// Countries covered by a region id.  Empty means "all countries".
pub fn countries_for_region(region: &str) -> Vec<String> {
    match region.to_ascii_lowercase().as_str() {
        "world" | "" => Vec::new(),
        "europe" => vec!["uk".into(), "france".into(), "germany".into()],
        "north_america" => vec!["usa".into()],
        country => vec![country.to_string()],
    }
}

/// `news` matches both `news` and `news_talk`.
fn genre_matches(genre: &str, style: &str) -> bool {
    genre.eq_ignore_ascii_case(style)
        || genre
            .to_ascii_lowercase()
            .starts_with(&format!("{}_", style.to_ascii_lowercase()))
}

/// Favorites first, then listen count, then popularity; catalog order breaks ties.
pub fn rank(mut entries: Vec<StationEntry>) -> Vec<StationEntry> {
    entries.sort_by(|a, b| {
        b.is_favorite
            .cmp(&a.is_favorite)
            .then(b.listen_count.cmp(&a.listen_count))
            .then(b.station.popularity.cmp(&a.station.popularity))
    });
    entries
}

// ── TOML station loader ───────────────────────────────────────────────────────

/// Intermediate struct that matches the TOML `[[station]]` table.
/// Kept separate from `Station` so the file schema can stay flat.
#[derive(Debug, serde::Deserialize)]
struct TomlStationFile {
    station: Vec<TomlStation>,
}

#[derive(Debug, serde::Deserialize)]
struct TomlStation {
    id: String,
    name: String,
    url: String,
    #[serde(default)]
    artwork: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    genre: String,
    #[serde(default)]
    country: String,
    #[serde(default)]
    tags: Vec<String>,
    #[serde(default)]
    popularity: u32,
    #[serde(default)]
    metadata_provider: Option<String>,
    #[serde(default)]
    metadata_param: Option<String>,
}

const BUILTIN_STATIONS: &str = include_str!("../stations.toml");

/// The catalog shipped with the crate.
pub fn builtin_stations() -> Vec<Station> {
    match parse_stations_from_toml_str(BUILTIN_STATIONS) {
        Ok(stations) => stations,
        Err(e) => {
            tracing::error!("built-in station list is invalid: {}", e);
            Vec::new()
        }
    }
}

pub fn load_stations_from_toml(path: &std::path::Path) -> anyhow::Result<Vec<Station>> {
    let content = std::fs::read_to_string(path)?;
    parse_stations_from_toml_str(&content)
}

pub fn parse_stations_from_toml_str(content: &str) -> anyhow::Result<Vec<Station>> {
    let file: TomlStationFile = toml::from_str(content)?;
    let mut seen = BTreeSet::new();
    let mut stations = Vec::with_capacity(file.station.len());
    for s in file.station {
        if !seen.insert(s.id.clone()) {
            anyhow::bail!("duplicate station id '{}'", s.id);
        }
        let metadata = match (s.metadata_provider, s.metadata_param) {
            (Some(provider), Some(param)) => Some(ProviderRef { provider, param }),
            _ => None,
        };
        stations.push(Station {
            id: s.id,
            name: s.name,
            url: s.url,
            artwork: s.artwork,
            description: s.description,
            genre: s.genre,
            country: s.country,
            tags: s.tags,
            popularity: s.popularity,
            metadata,
        });
    }
    Ok(stations)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
        [[station]]
        id = "bbc_radio_1"
        name = "BBC Radio 1"
        url = "https://example.org/r1.m3u8"
        genre = "pop_rock"
        country = "uk"
        popularity = 90
        metadata_provider = "bbc_rms"
        metadata_param = "bbc_radio_one"

        [[station]]
        id = "wnyc_fm"
        name = "WNYC 93.9 FM"
        url = "http://fm939.wnyc.org/wnycfm.mp3"
        description = "New York's flagship public radio station"
        genre = "news_talk"
        country = "usa"
        tags = ["public", "talk"]
        popularity = 70
    "#;

    fn entry(station: Station, is_favorite: bool, listen_count: u64) -> StationEntry {
        StationEntry {
            station,
            is_favorite,
            listen_count,
        }
    }

    #[test]
    fn test_parse_toml_with_provider() {
        let stations = parse_stations_from_toml_str(SAMPLE).unwrap();
        assert_eq!(stations.len(), 2);
        let r1 = &stations[0];
        assert_eq!(
            r1.metadata,
            Some(ProviderRef {
                provider: "bbc_rms".into(),
                param: "bbc_radio_one".into()
            })
        );
        assert!(stations[1].metadata.is_none());
        assert_eq!(stations[1].tags, vec!["public", "talk"]);
    }

    #[test]
    fn test_duplicate_ids_rejected() {
        let dup = r#"
            [[station]]
            id = "a"
            name = "A"
            url = "http://a"
            [[station]]
            id = "a"
            name = "A again"
            url = "http://a2"
        "#;
        assert!(parse_stations_from_toml_str(dup).is_err());
    }

    #[test]
    fn test_region_and_style_filters() {
        let stations = parse_stations_from_toml_str(SAMPLE).unwrap();
        let r1 = entry(stations[0].clone(), false, 0);
        let wnyc = entry(stations[1].clone(), false, 0);

        let europe = StationFilter {
            region: Some("europe".into()),
            ..Default::default()
        };
        assert!(europe.matches(&r1));
        assert!(!europe.matches(&wnyc));

        let world = StationFilter {
            region: Some("world".into()),
            ..Default::default()
        };
        assert!(world.matches(&r1) && world.matches(&wnyc));

        let news = StationFilter {
            styles: vec!["news".into(), "jazz".into()],
            ..Default::default()
        };
        assert!(news.matches(&wnyc));
        assert!(!news.matches(&r1));
    }

    #[test]
    fn test_query_and_favorites_filter() {
        let stations = parse_stations_from_toml_str(SAMPLE).unwrap();
        let wnyc = entry(stations[1].clone(), false, 0);

        let by_tag = StationFilter {
            query: Some("TALK".into()),
            ..Default::default()
        };
        assert!(by_tag.matches(&wnyc));

        let favs = StationFilter {
            favorites_only: true,
            ..Default::default()
        };
        assert!(!favs.matches(&wnyc));
        assert!(favs.matches(&entry(stations[1].clone(), true, 0)));
    }

    #[test]
    fn test_builtin_catalog_parses() {
        let stations = builtin_stations();
        assert!(stations.len() >= 10);
        assert!(stations.iter().any(|s| s.metadata.is_some()));
        assert!(stations.iter().any(|s| s.metadata.is_none()));
    }

    #[test]
    fn test_rank_favorites_then_listens() {
        let stations = parse_stations_from_toml_str(SAMPLE).unwrap();
        let ranked = rank(vec![
            entry(stations[0].clone(), false, 3),
            entry(stations[1].clone(), true, 0),
        ]);
        assert_eq!(ranked[0].station.id, "wnyc_fm");

        let ranked = rank(vec![
            entry(stations[1].clone(), false, 1),
            entry(stations[0].clone(), false, 5),
        ]);
        assert_eq!(ranked[0].station.id, "bbc_radio_1");
    }
}
