use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use super::platform;

pub const DEFAULT_USER_AGENT: &str =
    "OnAirRadio/1.0 ( https://github.com/guakamole/on-air-radio )";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub daemon: DaemonConfig,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub mpv: MpvConfig,
    #[serde(default)]
    pub stations: StationsConfig,
    #[serde(default)]
    pub metadata: MetadataConfig,
    #[serde(default)]
    pub playback: PlaybackConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// Favorites, listen counts, last station and volume.
    #[serde(default = "default_state_file")]
    pub state_file: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "default_http_enabled")]
    pub enabled: bool,
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MpvConfig {
    #[serde(default = "default_volume")]
    pub default_volume: f32,
}

/// Where the curated station list comes from.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StationsConfig {
    /// Path to a local TOML station file (highest priority).
    /// Defaults to `$XDG_CONFIG_HOME/onair/stations.toml`.
    #[serde(default = "default_stations_toml")]
    pub stations_toml: PathBuf,
}

/// Now-playing metadata: polling cadence, HTTP limits and upstream endpoints.
///
/// Endpoints are base URLs so they can be pointed at a mock server in tests.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetadataConfig {
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    /// Connect and request timeout for every metadata/artwork call.
    #[serde(default = "default_http_timeout_secs")]
    pub http_timeout_secs: u64,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    /// Look songs up on MusicBrainz to standardize text and find cover art.
    #[serde(default = "default_refine")]
    pub refine: bool,
    #[serde(default = "default_musicbrainz_url")]
    pub musicbrainz_url: String,
    #[serde(default = "default_cover_art_url")]
    pub cover_art_url: String,
    #[serde(default = "default_bbc_url")]
    pub bbc_url: String,
    #[serde(default = "default_radio_france_url")]
    pub radio_france_url: String,
    #[serde(default = "default_nova_url")]
    pub nova_url: String,
    /// Collects user-submitted playback failure reports.
    #[serde(default = "default_report_url")]
    pub report_url: String,
}

/// Stream reconnect policy: capped exponential backoff inside a fixed window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaybackConfig {
    #[serde(default = "default_max_retry_secs")]
    pub max_retry_secs: u64,
    #[serde(default = "default_initial_retry_ms")]
    pub initial_retry_ms: u64,
    #[serde(default = "default_max_retry_delay_ms")]
    pub max_retry_delay_ms: u64,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            state_file: default_state_file(),
        }
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            enabled: default_http_enabled(),
            bind_address: default_bind_address(),
            port: default_port(),
        }
    }
}

impl Default for MpvConfig {
    fn default() -> Self {
        Self {
            default_volume: default_volume(),
        }
    }
}

impl Default for StationsConfig {
    fn default() -> Self {
        Self {
            stations_toml: default_stations_toml(),
        }
    }
}

impl Default for MetadataConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval_secs(),
            http_timeout_secs: default_http_timeout_secs(),
            user_agent: default_user_agent(),
            refine: default_refine(),
            musicbrainz_url: default_musicbrainz_url(),
            cover_art_url: default_cover_art_url(),
            bbc_url: default_bbc_url(),
            radio_france_url: default_radio_france_url(),
            nova_url: default_nova_url(),
            report_url: default_report_url(),
        }
    }
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            max_retry_secs: default_max_retry_secs(),
            initial_retry_ms: default_initial_retry_ms(),
            max_retry_delay_ms: default_max_retry_delay_ms(),
        }
    }
}

fn default_state_file() -> PathBuf {
    platform::data_dir().join("state.json")
}

fn default_http_enabled() -> bool {
    true
}

fn default_bind_address() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8990
}

fn default_volume() -> f32 {
    0.5
}

fn default_stations_toml() -> PathBuf {
    #[cfg(windows)]
    {
        if let Some(portable) = platform::beside_exe("stations.toml") {
            return portable;
        }
    }

    platform::config_dir().join("stations.toml")
}

fn default_poll_interval_secs() -> u64 {
    5
}

fn default_http_timeout_secs() -> u64 {
    5
}

fn default_user_agent() -> String {
    DEFAULT_USER_AGENT.to_string()
}

fn default_refine() -> bool {
    true
}

fn default_musicbrainz_url() -> String {
    "https://musicbrainz.org/ws/2".to_string()
}

fn default_cover_art_url() -> String {
    "https://coverartarchive.org".to_string()
}

fn default_bbc_url() -> String {
    "https://rms.api.bbc.co.uk/v2".to_string()
}

fn default_radio_france_url() -> String {
    "https://api.radiofrance.fr/livemeta/pull".to_string()
}

fn default_nova_url() -> String {
    "https://www.nova.fr/radios-data/www.nova.fr/all.json".to_string()
}

fn default_report_url() -> String {
    "http://apps.guakamole.org/report".to_string()
}

fn default_max_retry_secs() -> u64 {
    15
}

fn default_initial_retry_ms() -> u64 {
    1_000
}

fn default_max_retry_delay_ms() -> u64 {
    4_000
}

impl Config {
    pub fn load() -> anyhow::Result<Self> {
        Self::load_from(&Self::config_path())
    }

    /// Load from `path`, writing the defaults there first when it is missing.
    pub fn load_from(path: &std::path::Path) -> anyhow::Result<Self> {
        if !path.exists() {
            let config = Self::default();
            config.save_to(path)?;
            return Ok(config);
        }

        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn save_to(&self, path: &std::path::Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn config_path() -> PathBuf {
        platform::config_dir().join("config.toml")
    }
}
