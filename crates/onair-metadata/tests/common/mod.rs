#![allow(dead_code)]

use onair_proto::config::MetadataConfig;
use serde_json::{json, Value};
use wiremock::MockServer;

/// Every upstream endpoint pointed at `server`.
pub fn config_for(server: &MockServer) -> MetadataConfig {
    let uri = server.uri();
    MetadataConfig {
        musicbrainz_url: format!("{}/ws/2", uri),
        cover_art_url: format!("{}/caa", uri),
        bbc_url: format!("{}/bbc/v2", uri),
        radio_france_url: format!("{}/livemeta/pull", uri),
        nova_url: format!("{}/nova/all.json", uri),
        report_url: format!("{}/report", uri),
        http_timeout_secs: 2,
        ..MetadataConfig::default()
    }
}

pub fn bbc_segments(artist: &str, title: &str, now_playing: bool) -> Value {
    json!({
        "data": [{
            "segment_type": "music",
            "offset": { "start": 0, "end": 240, "now_playing": now_playing },
            "titles": { "primary": artist, "secondary": title, "tertiary": null }
        }]
    })
}

pub fn mb_query(artist: &str, title: &str) -> String {
    format!("recording:\"{}\" AND artist:\"{}\"", title, artist)
}

pub fn mb_recording(artist: &str, title: &str, releases: Value) -> Value {
    json!({
        "created": "2026-10-19T10:00:00.000Z",
        "count": 1,
        "offset": 0,
        "recordings": [{
            "id": "b1a9c0e9-d987-4042-ae91-78d6a3267d69",
            "score": 100,
            "title": title,
            "artist-credit": [{ "name": artist, "artist": { "id": "056e4f3e", "name": artist } }],
            "releases": releases
        }]
    })
}

pub fn mb_release(id: &str, primary: &str, secondary: &[&str]) -> Value {
    json!({
        "id": id,
        "title": "Some release",
        "release-group": { "id": format!("rg-{}", id), "primary-type": primary, "secondary-types": secondary }
    })
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("onair_metadata=debug")
        .with_test_writer()
        .try_init();
}
