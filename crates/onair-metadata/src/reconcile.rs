//! The now-playing state machine.
//!
//! Pure and synchronous: every input goes through [`Reconciler::handle`], which
//! returns at most one [`Action`] for the pipeline actor to carry out.  Lookup
//! completions come back in as [`Update::Refined`], so suppression and dedup
//! apply to them exactly as they do to stream tags and polled results.

use onair_proto::protocol::{MetadataKind, MetadataRecord, Station};

use crate::transport::non_blank;

/// One input to the reconciler.
#[derive(Debug, Clone, PartialEq)]
pub enum Update {
    /// Tags embedded in the stream (ICY / ID3).
    Raw {
        title: Option<String>,
        artist: Option<String>,
    },
    /// Result from the station's external provider.
    Polled(MetadataRecord),
    /// Completion of a lookup requested with [`Action::Refine`].
    Refined {
        request: RefineRequest,
        result: Option<MetadataRecord>,
    },
}

/// What the pipeline must do next.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    /// Look the song up, then feed the outcome back as [`Update::Refined`].
    Refine(RefineRequest),
    /// Resolve the artwork and publish.
    Emit(Emission),
}

#[derive(Debug, Clone, PartialEq)]
pub struct RefineRequest {
    pub artist: String,
    pub title: String,
    /// Published as-is when the lookup has no result.
    pub fallback: Emission,
}

/// A record ready for publishing; `record.artwork_url` is the resolved
/// reference (supplied, cached, or the station logo).
#[derive(Debug, Clone, PartialEq)]
pub struct Emission {
    pub record: MetadataRecord,
    pub is_song_artwork: bool,
}

/// Per-station reconciliation state; reset on every station change.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReconciliationState {
    /// Kind of the last accepted polled or refined update.
    pub active_kind: MetadataKind,
    pub last_artist: Option<String>,
    pub last_title: Option<String>,
    pub last_station_id: Option<String>,
    /// Latest stream title, used when a polled record carries none.
    pub current_raw_title: Option<String>,
}

impl ReconciliationState {
    fn fingerprint_differs(&self, artist: &Option<String>, title: &Option<String>, station_id: &str) -> bool {
        self.last_artist != *artist
            || self.last_title != *title
            || self.last_station_id.as_deref() != Some(station_id)
    }
}

#[derive(Debug, Clone)]
struct CachedRefinement {
    artist: String,
    title: String,
    result: MetadataRecord,
}

impl CachedRefinement {
    fn matches(&self, artist: &str, title: &str) -> bool {
        self.artist.to_lowercase() == artist.to_lowercase()
            && self.title.to_lowercase() == title.to_lowercase()
    }
}

#[derive(Debug, Default)]
pub struct Reconciler {
    station: Option<Station>,
    state: ReconciliationState,
    /// Last successful lookup of this session.
    cache: Option<CachedRefinement>,
}

impl Reconciler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a new session.  `None` means playback stopped.
    pub fn change_station(&mut self, station: Option<Station>) {
        self.station = station;
        self.state = ReconciliationState::default();
        self.cache = None;
    }

    pub fn station_id(&self) -> Option<&str> {
        self.station.as_ref().map(|s| s.id.as_str())
    }

    pub fn state(&self) -> &ReconciliationState {
        &self.state
    }

    pub fn handle(&mut self, update: Update) -> Option<Action> {
        let station = self.station.clone()?;
        match update {
            Update::Raw { title, artist } => {
                let title = non_blank(title.as_deref());
                self.state.current_raw_title = title.clone();
                let input = MetadataRecord {
                    artist: non_blank(artist.as_deref()),
                    title,
                    artwork_url: None,
                    kind: MetadataKind::Unknown,
                };
                self.reconcile(&station, input, false)
            }
            Update::Polled(record) => self.reconcile(&station, record, false),
            Update::Refined {
                request,
                result: Some(record),
            } => {
                self.cache = Some(CachedRefinement {
                    artist: request.artist,
                    title: request.title,
                    result: record.clone(),
                });
                self.reconcile(&station, record, true)
            }
            Update::Refined { request, result: None } => Some(Action::Emit(request.fallback)),
        }
    }

    fn reconcile(&mut self, station: &Station, input: MetadataRecord, refined: bool) -> Option<Action> {
        let is_raw = input.kind == MetadataKind::Unknown;
        let input_title = non_blank(input.title.as_deref());
        let supplied_artwork = non_blank(input.artwork_url.as_deref());

        let mut kind = input.kind;
        let mut artist = non_blank(input.artist.as_deref());
        let mut title = input_title
            .clone()
            .or_else(|| self.state.current_raw_title.clone());

        if artist.is_none() {
            if let Some((a, t)) = title.as_deref().and_then(split_artist_title) {
                artist = Some(a);
                title = Some(t);
                if kind == MetadataKind::Unknown {
                    kind = MetadataKind::Song;
                }
            }
        }

        let cached = match (&self.cache, &artist, &title) {
            (Some(c), Some(a), Some(t)) if !refined && kind == MetadataKind::Song && c.matches(a, t) => {
                Some(c.result.clone())
            }
            _ => None,
        };

        if artist.is_none() {
            artist = Some(station.name.clone());
        }

        if is_raw && self.state.active_kind != MetadataKind::Unknown {
            let weak = input_title
                .as_deref()
                .map_or(true, |t| t.to_lowercase() == station.name.trim().to_lowercase());
            if weak {
                return None;
            }
        }

        if !is_raw {
            self.state.active_kind = kind;
        }

        if supplied_artwork.is_none() && !refined {
            if self.state.fingerprint_differs(&artist, &title, &station.id) {
                self.state.last_artist = artist.clone();
                self.state.last_title = title.clone();
                self.state.last_station_id = Some(station.id.clone());

                if cached.is_none() && kind == MetadataKind::Song {
                    if let (Some(a), Some(t)) = (&artist, &title) {
                        let fallback = emission(station, artist.clone(), title.clone(), None, kind);
                        return Some(Action::Refine(RefineRequest {
                            artist: a.clone(),
                            title: t.clone(),
                            fallback,
                        }));
                    }
                }
            } else if is_raw {
                return None;
            }
        }

        let mut artwork = supplied_artwork;
        if let Some(hit) = cached {
            artist = hit.artist.or(artist);
            title = hit.title.or(title);
            artwork = artwork.or(hit.artwork_url);
        }
        Some(Action::Emit(emission(station, artist, title, artwork, kind)))
    }
}

fn emission(
    station: &Station,
    artist: Option<String>,
    title: Option<String>,
    artwork: Option<String>,
    kind: MetadataKind,
) -> Emission {
    let (artwork_url, is_song_artwork) = match artwork {
        Some(url) => (Some(url), kind == MetadataKind::Song),
        None => (non_blank(Some(&station.artwork)), false),
    };
    Emission {
        record: MetadataRecord {
            artist,
            title,
            artwork_url,
            kind,
        },
        is_song_artwork,
    }
}

/// `"Artist - Title"`, or `"Artist;Title"` when there is no dash.
pub fn split_artist_title(s: &str) -> Option<(String, String)> {
    let (artist, title) = s.split_once(" - ").or_else(|| s.split_once(';'))?;
    let (artist, title) = (artist.trim(), title.trim());
    if artist.is_empty() || title.is_empty() {
        return None;
    }
    Some((artist.to_string(), title.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn radio1() -> Station {
        Station {
            id: "bbc_radio_1".into(),
            name: "BBC Radio 1".into(),
            url: "https://example.org/r1.m3u8".into(),
            artwork: "https://example.org/r1.png".into(),
            ..Station::default()
        }
    }

    fn reconciler() -> Reconciler {
        let mut r = Reconciler::new();
        r.change_station(Some(radio1()));
        r
    }

    fn raw(title: &str) -> Update {
        Update::Raw {
            title: Some(title.into()),
            artist: None,
        }
    }

    fn expect_refine(action: Option<Action>) -> RefineRequest {
        match action {
            Some(Action::Refine(req)) => req,
            other => panic!("expected Refine, got {:?}", other),
        }
    }

    fn expect_emit(action: Option<Action>) -> Emission {
        match action {
            Some(Action::Emit(e)) => e,
            other => panic!("expected Emit, got {:?}", other),
        }
    }

    /// Accept a polled song with artwork so `active_kind` becomes Song.
    fn make_song_active(r: &mut Reconciler) {
        let polled = MetadataRecord::song("Fred again..", "Delilah").with_artwork("https://img/delilah.jpg");
        expect_emit(r.handle(Update::Polled(polled)));
        assert_eq!(r.state().active_kind, MetadataKind::Song);
    }

    #[test]
    fn test_split_dash_promotes_to_song() {
        let mut r = reconciler();
        let req = expect_refine(r.handle(raw("Daft Punk - One More Time")));
        assert_eq!(req.artist, "Daft Punk");
        assert_eq!(req.title, "One More Time");
        assert_eq!(req.fallback.record.kind, MetadataKind::Song);
        assert_eq!(req.fallback.record.artwork_url.as_deref(), Some("https://example.org/r1.png"));
        assert!(!req.fallback.is_song_artwork);
    }

    #[test]
    fn test_split_semicolon() {
        assert_eq!(
            split_artist_title("Nina Simone;Sinnerman"),
            Some(("Nina Simone".into(), "Sinnerman".into()))
        );
        assert_eq!(split_artist_title(" - Title"), None);
        assert_eq!(split_artist_title("Just a title"), None);
    }

    #[test]
    fn test_explicit_artist_prevents_split() {
        let mut r = reconciler();
        let e = expect_emit(r.handle(Update::Raw {
            title: Some("Live - From Studio 4".into()),
            artist: Some("Annie Mac".into()),
        }));
        assert_eq!(e.record.artist.as_deref(), Some("Annie Mac"));
        assert_eq!(e.record.title.as_deref(), Some("Live - From Studio 4"));
        assert_eq!(e.record.kind, MetadataKind::Unknown);
    }

    #[test]
    fn test_weak_raw_suppressed_while_specific_active() {
        let mut r = reconciler();
        make_song_active(&mut r);
        let before = r.state().clone();

        assert_eq!(r.handle(raw("BBC Radio 1")), None);
        assert_eq!(r.handle(raw("  bbc radio 1 ")), None);
        assert_eq!(r.handle(raw("")), None);
        assert_eq!(
            r.handle(Update::Raw {
                title: None,
                artist: None
            }),
            None
        );
        assert_eq!(r.state().active_kind, before.active_kind);
        assert_eq!(r.state().last_title, before.last_title);
    }

    #[test]
    fn test_weak_raw_accepted_before_any_specific_update() {
        let mut r = reconciler();
        let e = expect_emit(r.handle(raw("BBC Radio 1")));
        assert_eq!(e.record.artist.as_deref(), Some("BBC Radio 1"));
        assert_eq!(e.record.title.as_deref(), Some("BBC Radio 1"));
    }

    #[test]
    fn test_station_change_resets_state() {
        let mut r = reconciler();
        make_song_active(&mut r);
        assert_eq!(r.handle(raw("BBC Radio 1")), None);

        r.change_station(Some(radio1()));
        assert_eq!(r.state(), &ReconciliationState::default());
        expect_emit(r.handle(raw("BBC Radio 1")));
    }

    #[test]
    fn test_station_change_forgets_refined_song() {
        let mut r = reconciler();
        let req = expect_refine(r.handle(raw("Daft Punk - One More Time")));
        expect_emit(r.handle(Update::Refined {
            request: req,
            result: Some(MetadataRecord::song("Daft Punk", "One More Time").with_artwork("https://caa/x")),
        }));

        let mut fip = radio1();
        fip.id = "fip".into();
        fip.name = "FIP".into();
        r.change_station(Some(fip));
        let req = expect_refine(r.handle(raw("Daft Punk - One More Time")));
        assert_eq!(req.fallback.record.artwork_url.as_deref(), Some("https://example.org/r1.png"));
        assert!(!req.fallback.is_song_artwork);
    }

    #[test]
    fn test_repeated_raw_is_noop() {
        let mut r = reconciler();
        expect_emit(r.handle(raw("Breakfast with Greg James")));
        assert_eq!(r.handle(raw("Breakfast with Greg James")), None);
    }

    #[test]
    fn test_specific_raw_not_suppressed() {
        let mut r = reconciler();
        make_song_active(&mut r);
        let req = expect_refine(r.handle(raw("Daft Punk - One More Time")));
        assert_eq!(req.artist, "Daft Punk");
        // raw updates never change the active kind
        assert_eq!(r.state().active_kind, MetadataKind::Song);
    }

    #[test]
    fn test_refined_result_reenters_and_is_cached() {
        let mut r = reconciler();
        let req = expect_refine(r.handle(Update::Polled(MetadataRecord::song("daft punk", "one more time"))));

        let refined = MetadataRecord::song("Daft Punk", "One More Time")
            .with_artwork("https://caa/release/r1/front-500");
        let e = expect_emit(r.handle(Update::Refined {
            request: req,
            result: Some(refined),
        }));
        assert_eq!(e.record.artist.as_deref(), Some("Daft Punk"));
        assert_eq!(e.record.artwork_url.as_deref(), Some("https://caa/release/r1/front-500"));
        assert!(e.is_song_artwork);

        // the next poll of the same song keeps the refined text and cover
        let again = expect_emit(r.handle(Update::Polled(MetadataRecord::song("Daft Punk", "One More Time"))));
        assert_eq!(again.record.artwork_url.as_deref(), Some("https://caa/release/r1/front-500"));
        assert!(again.is_song_artwork);

        // and the same song in the stream tags is already on screen
        assert_eq!(r.handle(raw("Daft Punk - One More Time")), None);
    }

    #[test]
    fn test_refined_without_artwork_does_not_dispatch_again() {
        let mut r = reconciler();
        let req = expect_refine(r.handle(raw("Kraftwerk - Computer Love")));
        let e = expect_emit(r.handle(Update::Refined {
            request: req,
            result: Some(MetadataRecord::song("Kraftwerk", "Computerliebe")),
        }));
        assert_eq!(e.record.title.as_deref(), Some("Computerliebe"));
        assert_eq!(e.record.artwork_url.as_deref(), Some("https://example.org/r1.png"));
        assert!(!e.is_song_artwork);
    }

    #[test]
    fn test_refine_without_result_emits_fallback() {
        let mut r = reconciler();
        let req = expect_refine(r.handle(raw("Obscure - B-side")));
        let fallback = req.fallback.clone();
        let e = expect_emit(r.handle(Update::Refined {
            request: req,
            result: None,
        }));
        assert_eq!(e, fallback);
    }

    #[test]
    fn test_program_uses_station_artwork() {
        let mut r = reconciler();
        let e = expect_emit(r.handle(Update::Polled(MetadataRecord::program(
            Some("Greg James".into()),
            "Breakfast",
        ))));
        assert_eq!(e.record.kind, MetadataKind::Program);
        assert_eq!(e.record.artwork_url.as_deref(), Some("https://example.org/r1.png"));
        assert_eq!(r.state().active_kind, MetadataKind::Program);
    }

    #[test]
    fn test_polled_without_title_uses_last_raw_title() {
        let mut r = reconciler();
        expect_emit(r.handle(raw("Morning news")));
        let e = expect_emit(r.handle(Update::Polled(MetadataRecord {
            artist: Some("Newsbeat".into()),
            title: None,
            artwork_url: None,
            kind: MetadataKind::Program,
        })));
        assert_eq!(e.record.title.as_deref(), Some("Morning news"));
    }

    #[test]
    fn test_stopped_ignores_everything() {
        let mut r = Reconciler::new();
        assert_eq!(r.handle(raw("Daft Punk - One More Time")), None);
        assert_eq!(r.station_id(), None);
    }
}
