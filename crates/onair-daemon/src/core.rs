/// DaemonCore: single-owner event loop for all mutable playback state.
///
/// Every task that needs to change playback state (HTTP handlers, the mpv
/// reader, the metadata pipeline, retry timers) sends a `DaemonEvent` into
/// this loop.  DaemonCore owns `MpvDriver` and the retry bookkeeping
/// exclusively; `StateManager` holds the snapshot served to clients.
///
/// After each event that mutates state, DaemonCore broadcasts a
/// `BroadcastMessage` to all listeners via a `tokio::sync::broadcast` channel.
///
/// mpv integration is property-observation-driven: on every fresh connection
/// we `observe_property` core-idle, pause, icy-title and the metadata map.
/// Stream tags are handed to the metadata pipeline as raw updates; the
/// pipeline answers with `NowPlaying` events.
use std::path::PathBuf;
use std::sync::Arc;

use onair_metadata::PipelineHandle;
use onair_proto::catalog::{builtin_stations, load_stations_from_toml, StationRepository};
use onair_proto::config::Config;
use onair_proto::protocol::{
    Command, MpvHealth, NowPlaying, PlaybackError, PlaybackStatus, Station,
};
use onair_proto::state::StateManager;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info, warn};

use crate::mpv::{
    icy_tags, metadata_tags, MpvDriver, MpvEvent, MpvHandle, StreamTags, OBS_CORE_IDLE,
    OBS_ICY_TITLE, OBS_METADATA, OBS_PAUSE,
};
use crate::retry::{RetryPolicy, RetryState};
use crate::BroadcastMessage;

// ── DaemonEvent ───────────────────────────────────────────────────────────────

/// All inputs into the DaemonCore loop.
#[derive(Debug)]
pub enum DaemonEvent {
    /// A command from the HTTP API.
    ClientCommand(Command),
    /// Heartbeat: check process liveness and the connecting timeout.
    HeartbeatTick,
    /// Raw mpv unsolicited event (forwarded from reader task).
    MpvEvent(MpvEvent),
    /// Reconciled metadata from the pipeline.
    NowPlaying(NowPlaying),
    /// Backoff elapsed; reload the stream unless playback moved on.
    RetryPlayback { generation: u64 },
    /// Shutdown requested.
    Shutdown,
}

// ── DaemonCore ────────────────────────────────────────────────────────────────

pub struct DaemonCore {
    state_manager: Arc<StateManager>,
    pipeline: PipelineHandle,
    mpv_driver: MpvDriver,
    /// Live handle to the mpv IO tasks.  `None` when mpv is not yet connected.
    mpv_handle: Option<MpvHandle>,
    /// Channel back into our own event loop (mpv forwarder, retry timers).
    event_tx: mpsc::Sender<DaemonEvent>,
    broadcast_tx: broadcast::Sender<BroadcastMessage>,
    retry_policy: RetryPolicy,
    retry: RetryState,
    /// A reconnect timer is running for the current stream.
    retry_pending: bool,
    /// Bumped by every play/stop so timers for an older stream are ignored.
    play_generation: u64,
    /// true when the user has requested playback (used to derive status).
    intend_playing: bool,
    mpv_health: MpvHealth,
    obs_core_idle: Option<bool>,
    obs_pause: bool,
    /// Last stream tags handed to the pipeline.
    last_tags: StreamTags,
    /// When we started connecting/buffering (to detect timeout).
    connecting_since: Option<tokio::time::Instant>,
    last_status: PlaybackStatus,
}

impl DaemonCore {
    pub async fn new(
        config: &Config,
        state_manager: Arc<StateManager>,
        pipeline: PipelineHandle,
        broadcast_tx: broadcast::Sender<BroadcastMessage>,
        event_tx: mpsc::Sender<DaemonEvent>,
    ) -> Self {
        let initial_volume = state_manager.get_state().await.volume;
        let mut mpv_driver = MpvDriver::new();
        mpv_driver.last_volume = initial_volume;

        Self {
            state_manager,
            pipeline,
            mpv_driver,
            mpv_handle: None,
            event_tx,
            broadcast_tx,
            retry_policy: RetryPolicy::from_config(&config.playback),
            retry: RetryState::default(),
            retry_pending: false,
            play_generation: 0,
            intend_playing: false,
            mpv_health: MpvHealth::Absent,
            obs_core_idle: None,
            obs_pause: false,
            last_tags: StreamTags::default(),
            connecting_since: None,
            last_status: PlaybackStatus::Idle,
        }
    }

    /// Run the core event loop.  Returns when a `Shutdown` event is received
    /// or the event channel is closed.
    pub async fn run(mut self, mut event_rx: mpsc::Receiver<DaemonEvent>) -> anyhow::Result<()> {
        info!("DaemonCore: starting event loop");

        let heartbeat_tx = self.event_tx.clone();
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(tokio::time::Duration::from_secs(10)).await;
                if heartbeat_tx.send(DaemonEvent::HeartbeatTick).await.is_err() {
                    break;
                }
            }
        });

        loop {
            match event_rx.recv().await {
                None => {
                    info!("DaemonCore: event channel closed, shutting down");
                    break;
                }

                Some(DaemonEvent::Shutdown) => {
                    info!("DaemonCore: shutdown requested");
                    break;
                }

                Some(DaemonEvent::ClientCommand(cmd)) => {
                    info!("DaemonCore: command {:?}", cmd);
                    if let Err(e) = self.handle_command(cmd).await {
                        error!("DaemonCore: command error: {}", e);
                    }
                }

                Some(DaemonEvent::MpvEvent(evt)) => {
                    self.handle_mpv_event(evt).await;
                }

                Some(DaemonEvent::NowPlaying(now_playing)) => {
                    self.publish_now_playing(now_playing).await;
                }

                Some(DaemonEvent::RetryPlayback { generation }) => {
                    self.retry_playback(generation).await;
                }

                Some(DaemonEvent::HeartbeatTick) => {
                    if self.mpv_handle.is_some() && !self.mpv_driver.process_alive() {
                        warn!("DaemonCore: heartbeat: mpv process died");
                        self.mpv_handle = None;
                        self.set_mpv_health(MpvHealth::Dead).await;
                        self.reset_observed_state();
                    }

                    // property events may never arrive on a dead stream
                    if self.intend_playing && !self.obs_pause {
                        self.maybe_update_status().await;
                    }
                }
            }
        }

        self.cleanup().await?;
        Ok(())
    }

    // ── mpv event handler ─────────────────────────────────────────────────────

    async fn handle_mpv_event(&mut self, evt: MpvEvent) {
        debug!("mpv event: {:?}", evt.raw);

        if let Some((obs_id, data)) = evt.as_property_change() {
            match obs_id {
                OBS_CORE_IDLE => {
                    let val = data.as_bool();
                    if val != self.obs_core_idle {
                        debug!("mpv: core-idle → {:?}", val);
                        self.obs_core_idle = val;
                        self.maybe_update_status().await;
                    }
                }
                OBS_PAUSE => {
                    let val = data.as_bool().unwrap_or(false);
                    if val != self.obs_pause {
                        debug!("mpv: pause → {}", val);
                        self.obs_pause = val;
                        self.maybe_update_status().await;
                    }
                }
                OBS_ICY_TITLE => self.forward_stream_tags(icy_tags(data)).await,
                OBS_METADATA => self.forward_stream_tags(metadata_tags(data)).await,
                _ => {}
            }
            return;
        }

        if let Some(end) = evt.as_end_file() {
            info!("mpv: end-file reason={} error={:?}", end.reason, end.file_error);
            if end.is_transport_failure() && self.intend_playing && !self.obs_pause {
                self.schedule_retry(end.code()).await;
            }
            self.last_tags = StreamTags::default();
            self.obs_core_idle = Some(true);
            self.maybe_update_status().await;
            return;
        }

        match evt.event_name() {
            Some("start-file") => {
                info!("mpv: start-file");
                self.connecting_since = None;
                self.obs_core_idle = Some(true); // flips to false when audio flows
                self.maybe_update_status().await;
            }
            Some("file-loaded") => {
                info!("mpv: file-loaded, re-issuing observe_property");
                // re-register so mpv pushes the current values for the new file
                if let Some(h) = self.mpv_handle.clone() {
                    tokio::spawn(async move {
                        tokio::time::sleep(tokio::time::Duration::from_millis(50)).await;
                        h.observe_all_properties().await;
                    });
                }
            }
            _ => {}
        }
    }

    /// Hand new in-stream tags to the metadata pipeline.
    async fn forward_stream_tags(&mut self, tags: StreamTags) {
        if !self.intend_playing || tags.is_empty() || tags == self.last_tags {
            return;
        }
        info!("mpv: stream tags {:?} → {:?}", self.last_tags, tags);
        self.last_tags = tags.clone();
        self.pipeline.raw_metadata(tags.title, tags.artist).await;
    }

    /// Derive PlaybackStatus from observed state and update if changed.
    async fn maybe_update_status(&mut self) {
        let status = if !self.intend_playing {
            self.connecting_since = None;
            if self.last_status == PlaybackStatus::Error {
                return;
            }
            PlaybackStatus::Idle
        } else if self.retry_pending {
            self.connecting_since = None;
            PlaybackStatus::Retrying
        } else if self.obs_pause {
            self.connecting_since = None;
            PlaybackStatus::Paused
        } else {
            match self.obs_core_idle {
                Some(false) => {
                    self.connecting_since = None;
                    self.retry.reset();
                    PlaybackStatus::Playing
                }
                other => {
                    let since = *self
                        .connecting_since
                        .get_or_insert_with(tokio::time::Instant::now);
                    let elapsed = since.elapsed();
                    debug!(
                        "mpv: waiting for playback core_idle={:?} elapsed={}s",
                        other,
                        elapsed.as_secs()
                    );
                    if elapsed >= self.retry_policy.budget {
                        warn!("mpv: no audio after {}s", elapsed.as_secs());
                        self.fail_playback("timeout".to_string()).await;
                        return;
                    }
                    PlaybackStatus::Connecting
                }
            }
        };

        if status != self.last_status {
            info!("DaemonCore: status {:?} → {:?}", self.last_status, status);
            self.last_status = status.clone();
            self.state_manager.set_playback_status(status).await;
            let _ = self.broadcast_tx.send(BroadcastMessage::StateUpdated);
        }
    }

    fn reset_observed_state(&mut self) {
        self.obs_core_idle = None;
        self.obs_pause = false;
        self.last_tags = StreamTags::default();
        self.connecting_since = None;
    }

    // ── retry ─────────────────────────────────────────────────────────────────

    async fn schedule_retry(&mut self, code: String) {
        match self.retry.next(&self.retry_policy) {
            Some(delay) => {
                warn!(
                    "mpv: stream dropped ({}), reconnect attempt {} in {:?}",
                    code,
                    self.retry.attempt(),
                    delay
                );
                self.retry_pending = true;
                let tx = self.event_tx.clone();
                let generation = self.play_generation;
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    let _ = tx.send(DaemonEvent::RetryPlayback { generation }).await;
                });
            }
            None => self.fail_playback(code).await,
        }
    }

    async fn retry_playback(&mut self, generation: u64) {
        if generation != self.play_generation || !self.intend_playing || !self.retry_pending {
            debug!("DaemonCore: dropping stale reconnect (generation {})", generation);
            return;
        }
        self.retry_pending = false;
        let Some(station) = self.current_station().await else {
            return;
        };
        info!("DaemonCore: reconnecting to '{}'", station.name);
        self.connecting_since = None;
        self.obs_core_idle = None;
        self.maybe_update_status().await;
        self.load_stream(&station).await;
    }

    /// Give up on the current stream and surface the failure to clients.
    async fn fail_playback(&mut self, code: String) {
        let Some(station) = self.current_station().await else {
            return;
        };
        self.intend_playing = false;
        self.retry_pending = false;
        self.retry.reset();
        self.play_generation += 1;
        self.connecting_since = None;

        let failure = PlaybackError {
            station_id: station.id.clone(),
            url: station.url.clone(),
            code,
        };
        error!(
            "DaemonCore: playback of '{}' failed: {}",
            station.name, failure.code
        );
        self.last_status = PlaybackStatus::Error;
        self.state_manager.set_error(failure.clone()).await;
        self.pipeline.station_changed(None, self.session().await).await;
        let _ = self.broadcast_tx.send(BroadcastMessage::PlaybackError(failure));
        let _ = self.broadcast_tx.send(BroadcastMessage::StateUpdated);
    }

    // ── mpv handle management ─────────────────────────────────────────────────

    /// Update tracked mpv health and broadcast state if it changed.
    async fn set_mpv_health(&mut self, health: MpvHealth) {
        if self.mpv_health != health {
            info!("DaemonCore: mpv health {:?} → {:?}", self.mpv_health, health);
            self.mpv_health = health.clone();
            self.state_manager.set_mpv_health(health).await;
            let _ = self.broadcast_tx.send(BroadcastMessage::StateUpdated);
        }
    }

    async fn ensure_mpv_handle(&mut self) -> Option<MpvHandle> {
        if self.mpv_handle.is_some() && !self.mpv_driver.process_alive() {
            warn!("DaemonCore: mpv process died, dropping handle");
            self.mpv_handle = None;
            self.set_mpv_health(MpvHealth::Dead).await;
            self.reset_observed_state();
        }

        if self.mpv_handle.is_none() {
            // one channel and one forwarder per connection
            let (event_tx, mut event_rx) = mpsc::channel::<MpvEvent>(64);
            let core_tx = self.event_tx.clone();
            tokio::spawn(async move {
                while let Some(evt) = event_rx.recv().await {
                    if core_tx.send(DaemonEvent::MpvEvent(evt)).await.is_err() {
                        break;
                    }
                }
            });

            let handle = match self.mpv_driver.try_reconnect(event_tx.clone()).await {
                Some(h) => {
                    info!("DaemonCore: reconnected to existing mpv socket");
                    h
                }
                None => {
                    self.set_mpv_health(MpvHealth::Starting).await;
                    match self.mpv_driver.spawn_and_connect(event_tx).await {
                        Ok(h) => h,
                        Err(e) => {
                            warn!("DaemonCore: failed to start mpv: {}", e);
                            self.set_mpv_health(MpvHealth::Dead).await;
                            return None;
                        }
                    }
                }
            };

            self.set_mpv_health(MpvHealth::Running).await;

            let h_clone = handle.clone();
            tokio::spawn(async move {
                h_clone.observe_all_properties().await;
            });

            self.mpv_handle = Some(handle);
        }

        self.mpv_handle.clone()
    }

    // ── command handlers ──────────────────────────────────────────────────────

    async fn handle_command(&mut self, cmd: Command) -> anyhow::Result<()> {
        match cmd {
            Command::Play { station_id } => self.play_station(&station_id).await?,
            Command::Stop => self.stop().await?,
            Command::Next => {
                if let Some(id) = self.state_manager.next_station().await {
                    self.play_station(&id).await?;
                }
            }
            Command::Prev => {
                if let Some(id) = self.state_manager.prev_station().await {
                    self.play_station(&id).await?;
                }
            }
            Command::Random => {
                if let Some(id) = self.state_manager.random_station().await {
                    self.play_station(&id).await?;
                }
            }
            Command::TogglePause => self.toggle_pause().await?,
            Command::Volume { value } => self.set_volume(value).await?,
            Command::ToggleFavorite { station_id } => {
                let favorite = self.state_manager.toggle_favorite(&station_id).await?;
                info!("Favorite {} → {}", station_id, favorite);
                let _ = self.broadcast_tx.send(BroadcastMessage::StateUpdated);
            }
            Command::GetState => {
                let _ = self.broadcast_tx.send(BroadcastMessage::StateUpdated);
            }
        }
        Ok(())
    }

    async fn play_station(&mut self, station_id: &str) -> anyhow::Result<()> {
        let Some(station) = self.state_manager.station(station_id) else {
            anyhow::bail!("unknown station '{}'", station_id);
        };
        info!("Playing station: {}", station.name);

        // a replay of the same station also starts a fresh session
        self.play_generation += 1;
        self.retry.reset();
        self.retry_pending = false;
        self.reset_observed_state();
        self.intend_playing = true;

        self.state_manager.set_playing(&station.id).await?;
        if let Err(e) = self.state_manager.record_listen(&station.id).await {
            warn!("Failed to record listen for {}: {}", station.id, e);
        }
        self.last_status = PlaybackStatus::Connecting;
        let _ = self.broadcast_tx.send(BroadcastMessage::StateUpdated);

        self.pipeline
            .station_changed(Some(station.id.clone()), self.session().await)
            .await;
        self.load_stream(&station).await;
        Ok(())
    }

    async fn load_stream(&mut self, station: &Station) {
        let volume = self.state_manager.get_state().await.volume;
        match self.ensure_mpv_handle().await {
            Some(handle) => {
                if let Err(e) = handle.load_stream(&station.url, volume).await {
                    warn!("Failed to load stream '{}': {}", station.name, e);
                    self.fail_playback(format!("loadfile: {}", e)).await;
                }
            }
            None => {
                warn!("No mpv handle available for station '{}'", station.name);
                self.fail_playback("mpv unavailable".to_string()).await;
            }
        }
    }

    async fn stop(&mut self) -> anyhow::Result<()> {
        info!("Stopping playback");
        self.play_generation += 1;
        self.intend_playing = false;
        self.retry.reset();
        self.retry_pending = false;
        self.connecting_since = None;
        self.last_tags = StreamTags::default();
        if let Some(handle) = self.mpv_handle.as_ref() {
            handle.stop().await?;
        }
        self.state_manager.set_stopped().await?;
        self.last_status = PlaybackStatus::Idle;
        self.pipeline.station_changed(None, self.session().await).await;
        let _ = self.broadcast_tx.send(BroadcastMessage::StateUpdated);
        Ok(())
    }

    async fn set_volume(&mut self, value: f32) -> anyhow::Result<()> {
        let value = value.clamp(0.0, 1.0);
        self.state_manager.set_volume(value).await?;
        self.mpv_driver.last_volume = value;
        if let Some(handle) = self.mpv_handle.as_ref() {
            handle.set_volume(value).await?;
        }
        let _ = self.broadcast_tx.send(BroadcastMessage::StateUpdated);
        Ok(())
    }

    async fn toggle_pause(&mut self) -> anyhow::Result<()> {
        if !self.intend_playing {
            return Ok(());
        }
        if let Some(handle) = self.mpv_handle.as_ref() {
            // observed pause state avoids an IPC round-trip while buffering
            handle.set_pause(!self.obs_pause).await?;
        }
        Ok(())
    }

    async fn publish_now_playing(&mut self, now_playing: NowPlaying) {
        if !self.state_manager.set_now_playing(now_playing.clone()).await {
            debug!("DaemonCore: dropping now-playing for {}", now_playing.station_id);
            return;
        }
        info!(
            "Now playing on {}: {:?} - {:?}",
            now_playing.station_id, now_playing.record.artist, now_playing.record.title
        );
        let _ = self
            .broadcast_tx
            .send(BroadcastMessage::NowPlaying(now_playing));
        let _ = self.broadcast_tx.send(BroadcastMessage::StateUpdated);
    }

    // ── helpers ───────────────────────────────────────────────────────────────

    /// Playback session that pipeline output must carry to be stored.
    async fn session(&self) -> u64 {
        self.state_manager.get_state().await.session
    }

    async fn current_station(&self) -> Option<Station> {
        let id = self.state_manager.get_state().await.current_station?;
        self.state_manager.station(&id)
    }

    async fn cleanup(&mut self) -> anyhow::Result<()> {
        info!("DaemonCore: cleanup, killing mpv");
        self.pipeline.station_changed(None, self.session().await).await;
        if let Some(handle) = self.mpv_handle.take() {
            let _ = handle.stop().await;
        }
        self.mpv_driver.kill().await;
        Ok(())
    }
}

// ── station loader ────────────────────────────────────────────────────────────

/// First readable source wins: configured TOML, `stations.toml` beside the
/// executable, `stations.toml` in the working directory, then the built-in list.
pub fn load_stations(config: &Config) -> Vec<Station> {
    let mut candidates = vec![config.stations.stations_toml.clone()];
    if let Some(dir) = std::env::current_exe().ok().and_then(|exe| exe.parent().map(PathBuf::from)) {
        candidates.push(dir.join("stations.toml"));
    }
    candidates.push(PathBuf::from("stations.toml"));
    load_stations_from(&candidates)
}

fn load_stations_from(candidates: &[PathBuf]) -> Vec<Station> {
    for path in candidates {
        if !path.exists() {
            continue;
        }
        match load_stations_from_toml(path) {
            Ok(stations) if !stations.is_empty() => {
                info!("Loaded {} stations from {}", stations.len(), path.display());
                return stations;
            }
            Ok(_) => warn!("No stations in {}", path.display()),
            Err(e) => warn!("Failed to parse {}: {}", path.display(), e),
        }
    }

    let stations = builtin_stations();
    info!("Using {} built-in stations", stations.len());
    stations
}

#[cfg(test)]
mod tests {
    use super::*;

    const ONE_STATION: &str = r#"
        [[station]]
        id = "local"
        name = "Local FM"
        url = "http://127.0.0.1:8000/live"
    "#;

    #[test]
    fn test_first_valid_source_wins() {
        let dir = tempfile::tempdir().unwrap();
        let broken = dir.path().join("broken.toml");
        let good = dir.path().join("good.toml");
        std::fs::write(&broken, "[[station]]\nid = ").unwrap();
        std::fs::write(&good, ONE_STATION).unwrap();

        let stations = load_stations_from(&[dir.path().join("missing.toml"), broken, good]);
        assert_eq!(stations.len(), 1);
        assert_eq!(stations[0].id, "local");
    }

    #[test]
    fn test_falls_back_to_builtin_list() {
        let dir = tempfile::tempdir().unwrap();
        let stations = load_stations_from(&[dir.path().join("missing.toml")]);
        assert!(!stations.is_empty());
        assert_eq!(stations, builtin_stations());
    }
}
