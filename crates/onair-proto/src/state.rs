use crate::catalog::{StationFilter, StationRepository};
use crate::protocol::{
    DaemonState, MpvHealth, NowPlaying, PlaybackError, PlaybackStatus, Station,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::warn;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistentState {
    pub last_station_id: Option<String>,
    pub volume: f32,
    #[serde(default)]
    pub favorites: BTreeSet<String>,
    #[serde(default)]
    pub listen_counts: HashMap<String, u64>,
}

impl Default for PersistentState {
    fn default() -> Self {
        Self {
            last_station_id: None,
            volume: 0.5,
            favorites: BTreeSet::new(),
            listen_counts: HashMap::new(),
        }
    }
}

#[derive(Debug, Default)]
struct Library {
    favorites: BTreeSet<String>,
    listen_counts: HashMap<String, u64>,
}

/// Owns the daemon state snapshot, the static catalog and the user library.
pub struct StateManager {
    stations: Vec<Station>,
    state: Arc<RwLock<DaemonState>>,
    library: RwLock<Library>,
    state_file: PathBuf,
}

impl StateManager {
    pub fn new(state_file: PathBuf, stations: Vec<Station>) -> Self {
        let persistent = Self::load_persistent(&state_file);

        let current_station = persistent
            .last_station_id
            .filter(|id| stations.iter().any(|s| &s.id == id));

        let state = DaemonState {
            rev: 1,
            current_station,
            volume: persistent.volume,
            ..DaemonState::default()
        };

        Self {
            stations,
            state: Arc::new(RwLock::new(state)),
            library: RwLock::new(Library {
                favorites: persistent.favorites,
                listen_counts: persistent.listen_counts,
            }),
            state_file,
        }
    }

    pub fn arc(&self) -> Arc<RwLock<DaemonState>> {
        Arc::clone(&self.state)
    }

    pub async fn get_state(&self) -> DaemonState {
        self.state.read().await.clone()
    }

    pub async fn set_playing(&self, station_id: &str) -> anyhow::Result<()> {
        {
            let mut state = self.state.write().await;
            state.current_station = Some(station_id.to_string());
            state.is_playing = true;
            state.is_paused = false;
            state.playback_status = PlaybackStatus::Connecting;
            state.now_playing = None; // clear stale metadata from previous station
            state.last_error = None;
            state.session += 1;
            state.rev += 1;
        }
        self.save().await
    }

    pub async fn set_stopped(&self) -> anyhow::Result<()> {
        {
            let mut state = self.state.write().await;
            state.is_playing = false;
            state.is_paused = false;
            state.playback_status = PlaybackStatus::Idle;
            state.now_playing = None;
            state.session += 1;
            state.rev += 1;
        }
        self.save().await
    }

    pub async fn set_playback_status(&self, status: PlaybackStatus) {
        let mut state = self.state.write().await;
        state.is_playing = matches!(status, PlaybackStatus::Playing | PlaybackStatus::Paused);
        state.is_paused = status == PlaybackStatus::Paused;
        state.playback_status = status;
        state.rev += 1;
    }

    pub async fn set_mpv_health(&self, health: MpvHealth) {
        let mut state = self.state.write().await;
        state.mpv_health = health;
        state.rev += 1;
    }

    pub async fn set_volume(&self, volume: f32) -> anyhow::Result<()> {
        {
            let mut state = self.state.write().await;
            state.volume = volume.clamp(0.0, 1.0);
            state.rev += 1;
        }
        self.save().await
    }

    /// Store a pipeline emission.  Ignored when it belongs to another station
    /// or to a session that has since been stopped, failed or replayed.
    pub async fn set_now_playing(&self, now_playing: NowPlaying) -> bool {
        let mut state = self.state.write().await;
        if state.session != now_playing.session
            || state.current_station.as_deref() != Some(now_playing.station_id.as_str())
        {
            return false;
        }
        state.now_playing = Some(now_playing);
        state.rev += 1;
        true
    }

    pub async fn set_error(&self, error: PlaybackError) {
        let mut state = self.state.write().await;
        state.is_playing = false;
        state.playback_status = PlaybackStatus::Error;
        state.last_error = Some(error);
        state.session += 1;
        state.rev += 1;
    }

    /// Station after the current one in browse order (wrapping).
    pub async fn next_station(&self) -> Option<String> {
        self.step_station(1).await
    }

    /// Station before the current one in browse order (wrapping).
    pub async fn prev_station(&self) -> Option<String> {
        self.step_station(-1).await
    }

    pub async fn random_station(&self) -> Option<String> {
        use rand::seq::SliceRandom;
        self.stations
            .choose(&mut rand::thread_rng())
            .map(|s| s.id.clone())
    }

    async fn step_station(&self, delta: isize) -> Option<String> {
        let order: Vec<String> = self
            .browse(&StationFilter::default())
            .await
            .into_iter()
            .map(|e| e.station.id)
            .collect();
        if order.is_empty() {
            return None;
        }
        let len = order.len() as isize;
        let current = self.state.read().await.current_station.clone();
        let next = match current.and_then(|id| order.iter().position(|s| *s == id)) {
            Some(pos) => (pos as isize + delta).rem_euclid(len),
            None => 0,
        };
        order.get(next as usize).cloned()
    }

    async fn save(&self) -> anyhow::Result<()> {
        let persistent = {
            let state = self.state.read().await;
            let library = self.library.read().await;
            PersistentState {
                last_station_id: state.current_station.clone(),
                volume: state.volume,
                favorites: library.favorites.clone(),
                listen_counts: library.listen_counts.clone(),
            }
        };

        if let Some(parent) = self.state_file.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let json = serde_json::to_string_pretty(&persistent)?;
        tokio::fs::write(&self.state_file, json).await?;
        Ok(())
    }

    fn load_persistent(state_file: &Path) -> PersistentState {
        let Ok(content) = std::fs::read_to_string(state_file) else {
            return PersistentState::default();
        };
        match serde_json::from_str::<PersistentState>(&content) {
            Ok(persistent) => persistent,
            Err(e) => {
                warn!("Ignoring unreadable state file {:?}: {}", state_file, e);
                PersistentState::default()
            }
        }
    }
}

#[async_trait]
impl StationRepository for StateManager {
    fn station(&self, id: &str) -> Option<Station> {
        self.stations.iter().find(|s| s.id == id).cloned()
    }

    fn stations(&self) -> Vec<Station> {
        self.stations.clone()
    }

    async fn record_listen(&self, id: &str) -> anyhow::Result<()> {
        {
            let mut library = self.library.write().await;
            *library.listen_counts.entry(id.to_string()).or_insert(0) += 1;
        }
        self.save().await
    }

    async fn favorites(&self) -> BTreeSet<String> {
        self.library.read().await.favorites.clone()
    }

    async fn toggle_favorite(&self, id: &str) -> anyhow::Result<bool> {
        if self.station(id).is_none() {
            anyhow::bail!("unknown station '{}'", id);
        }
        let now_favorite = {
            let mut library = self.library.write().await;
            if library.favorites.remove(id) {
                false
            } else {
                library.favorites.insert(id.to_string());
                true
            }
        };
        self.save().await?;
        Ok(now_favorite)
    }

    async fn listen_counts(&self) -> HashMap<String, u64> {
        self.library.read().await.listen_counts.clone()
    }
}
