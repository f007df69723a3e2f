use serde::{Deserialize, Serialize};

/// Commands accepted by the daemon core (HTTP API, signal handlers).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "cmd")]
pub enum Command {
    Play { station_id: String },
    Stop,
    Next,
    Prev,
    Random,
    TogglePause,
    Volume { value: f32 },
    ToggleFavorite { station_id: String },
    GetState,
}

/// Playback status as observed from mpv.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub enum PlaybackStatus {
    #[default]
    Idle, // nothing loaded / explicitly stopped
    Connecting, // loadfile sent, mpv buffering/connecting
    Retrying,   // stream dropped, waiting for the next reconnect attempt
    Playing,    // core-idle=false, audio flowing
    Paused,     // explicitly paused
    Error,      // gave up after the retry window
}

/// Health of the mpv process as observed by the daemon.
///
/// Transitions:
///   Absent -> Starting -> Running -> Dead -> Starting ...
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub enum MpvHealth {
    #[default]
    Absent,
    Starting,
    Running,
    Dead,
}

/// Classification of what a station is currently broadcasting.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum MetadataKind {
    Song,
    Program,
    #[default]
    Unknown,
}

/// One now-playing observation.  Replaced wholesale, never patched.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct MetadataRecord {
    pub artist: Option<String>,
    pub title: Option<String>,
    /// Artwork URL or local path; resolved by the artwork loader.
    pub artwork_url: Option<String>,
    #[serde(default)]
    pub kind: MetadataKind,
}

impl MetadataRecord {
    pub fn song(artist: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            artist: Some(artist.into()),
            title: Some(title.into()),
            artwork_url: None,
            kind: MetadataKind::Song,
        }
    }

    pub fn program(host: Option<String>, title: impl Into<String>) -> Self {
        Self {
            artist: host,
            title: Some(title.into()),
            artwork_url: None,
            kind: MetadataKind::Program,
        }
    }

    pub fn with_artwork(mut self, url: impl Into<String>) -> Self {
        self.artwork_url = Some(url.into());
        self
    }
}

/// Decoded artwork attached to an emitted record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct Artwork {
    pub content_type: String,
    /// Served separately by the HTTP API; never inlined into JSON.
    #[serde(skip)]
    pub bytes: Vec<u8>,
}

/// Final now-playing state published by the metadata pipeline.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct NowPlaying {
    pub station_id: String,
    pub record: MetadataRecord,
    pub artwork: Option<Artwork>,
    /// True when the artwork is the song's cover rather than the station logo.
    #[serde(default)]
    pub is_song_artwork: bool,
    /// Playback session the record belongs to (see `DaemonState::session`).
    #[serde(default)]
    pub session: u64,
}

/// Fatal playback failure surfaced once the retry window is exhausted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PlaybackError {
    pub station_id: String,
    pub url: String,
    /// mpv `end-file` reason / `file_error` string, e.g. `"network"`.
    pub code: String,
}

/// Full state of the daemon.  `rev` is a monotonically increasing counter
/// incremented every time the state changes.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct DaemonState {
    #[serde(default)]
    pub rev: u64,
    pub current_station: Option<String>,
    pub volume: f32,
    pub is_playing: bool,
    #[serde(default)]
    pub is_paused: bool,
    pub playback_status: PlaybackStatus,
    pub now_playing: Option<NowPlaying>,
    pub last_error: Option<PlaybackError>,
    #[serde(default)]
    pub mpv_health: MpvHealth,
    /// Bumped whenever playback starts, stops or fails.
    #[serde(default)]
    pub session: u64,
}

/// External poller identity for a station: provider type plus its parameter.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProviderRef {
    pub provider: String,
    pub param: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Station {
    pub id: String,
    pub name: String,
    pub url: String,
    /// Default artwork: URL or local file path.
    #[serde(default)]
    pub artwork: String,
    #[serde(default)]
    pub description: String,
    /// Genre id, e.g. `pop_rock`, `classical`, `news_talk`.
    #[serde(default)]
    pub genre: String,
    /// Country id, e.g. `uk`, `france`, `usa`.
    #[serde(default)]
    pub country: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub popularity: u32,
    #[serde(default)]
    pub metadata: Option<ProviderRef>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_wire_format() {
        let cmd: Command = serde_json::from_str(r#"{"cmd":"Play","station_id":"fip"}"#).unwrap();
        match cmd {
            Command::Play { station_id } => assert_eq!(station_id, "fip"),
            other => panic!("Wrong command: {:?}", other),
        }
    }

    #[test]
    fn test_artwork_bytes_not_serialized() {
        let np = NowPlaying {
            station_id: "fip".into(),
            record: MetadataRecord::song("Daft Punk", "One More Time"),
            artwork: Some(Artwork {
                content_type: "image/png".into(),
                bytes: vec![1, 2, 3],
            }),
            is_song_artwork: true,
            session: 3,
        };
        let json = serde_json::to_value(&np).unwrap();
        assert_eq!(json["artwork"]["content_type"], "image/png");
        assert!(json["artwork"].get("bytes").is_none());
        assert_eq!(json["record"]["kind"], "Song");
    }
}
