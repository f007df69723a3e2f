//! The actor that owns the [`Reconciler`] for the current playback session.
//!
//! Stream tags and station changes arrive through a [`PipelineHandle`],
//! provider results through the poller channel, and lookup / artwork
//! completions through an internal channel.  Every spawned task belongs to the
//! session's `CancellationToken` and carries the session generation; results
//! from a superseded session are dropped.

use std::sync::Arc;
use std::time::Duration;

use onair_proto::catalog::StationRepository;
use onair_proto::protocol::{Artwork, MetadataKind, MetadataRecord, NowPlaying};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::artwork::ArtworkLoader;
use crate::poller::{MetadataPoller, PolledMetadata};
use crate::providers::ProviderRegistry;
use crate::reconcile::{Action, Emission, Reconciler, RefineRequest, Update};
use crate::refine::RecordingLookup;

#[derive(Debug)]
enum PipelineCommand {
    StationChanged {
        station_id: Option<String>,
        playback_session: u64,
    },
    Raw {
        title: Option<String>,
        artist: Option<String>,
    },
}

#[derive(Debug)]
enum Completion {
    Refined {
        generation: u64,
        request: RefineRequest,
        result: Option<MetadataRecord>,
    },
    Artwork {
        generation: u64,
        emission: Emission,
        artwork: Option<Artwork>,
    },
}

/// Cloneable sender side of the pipeline.
#[derive(Clone)]
pub struct PipelineHandle {
    tx: mpsc::Sender<PipelineCommand>,
}

impl PipelineHandle {
    /// New playback session; `None` when playback stopped.  Every record
    /// published afterwards carries `playback_session`.
    pub async fn station_changed(&self, station_id: Option<String>, playback_session: u64) {
        let cmd = PipelineCommand::StationChanged {
            station_id,
            playback_session,
        };
        if self.tx.send(cmd).await.is_err() {
            warn!("[pipeline] not running; station change dropped");
        }
    }

    /// Stream tags reported by the player.
    pub async fn raw_metadata(&self, title: Option<String>, artist: Option<String>) {
        if self.tx.send(PipelineCommand::Raw { title, artist }).await.is_err() {
            warn!("[pipeline] not running; stream tags dropped");
        }
    }
}

pub struct MetadataPipeline {
    stations: Arc<dyn StationRepository>,
    refiner: Option<Arc<dyn RecordingLookup>>,
    artwork: Arc<dyn ArtworkLoader>,
    poller: MetadataPoller,
    reconciler: Reconciler,
    generation: u64,
    session: CancellationToken,
    playback_session: u64,
    polled_rx: mpsc::Receiver<PolledMetadata>,
    done_tx: mpsc::Sender<Completion>,
    done_rx: mpsc::Receiver<Completion>,
    output: mpsc::Sender<NowPlaying>,
}

impl MetadataPipeline {
    /// Spawn the actor.  `refiner: None` disables lookups; songs are then
    /// published with their provider or stream text as-is.
    pub fn spawn(
        stations: Arc<dyn StationRepository>,
        registry: Arc<ProviderRegistry>,
        refiner: Option<Arc<dyn RecordingLookup>>,
        artwork: Arc<dyn ArtworkLoader>,
        poll_interval: Duration,
        output: mpsc::Sender<NowPlaying>,
    ) -> (PipelineHandle, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(64);
        let (polled_tx, polled_rx) = mpsc::channel(16);
        let (done_tx, done_rx) = mpsc::channel(16);

        let pipeline = Self {
            poller: MetadataPoller::new(registry, Arc::clone(&stations), poll_interval, polled_tx),
            stations,
            refiner,
            artwork,
            reconciler: Reconciler::new(),
            generation: 0,
            session: CancellationToken::new(),
            playback_session: 0,
            polled_rx,
            done_tx,
            done_rx,
            output,
        };
        let task = tokio::spawn(pipeline.run(rx));
        (PipelineHandle { tx }, task)
    }

    async fn run(mut self, mut commands: mpsc::Receiver<PipelineCommand>) {
        loop {
            tokio::select! {
                cmd = commands.recv() => match cmd {
                    Some(PipelineCommand::StationChanged { station_id, playback_session }) => {
                        self.playback_session = playback_session;
                        self.change_station(station_id);
                    }
                    Some(PipelineCommand::Raw { title, artist }) => {
                        self.apply(Update::Raw { title, artist }).await;
                    }
                    None => break,
                },
                Some(polled) = self.polled_rx.recv() => {
                    if self.reconciler.station_id() != Some(polled.station_id.as_str()) {
                        debug!("[pipeline] dropping poll result for {}", polled.station_id);
                        continue;
                    }
                    self.apply(Update::Polled(polled.record)).await;
                }
                Some(done) = self.done_rx.recv() => self.complete(done).await,
            }
        }
        self.poller.stop_polling();
        self.session.cancel();
        info!("[pipeline] stopped");
    }

    fn change_station(&mut self, station_id: Option<String>) {
        self.session.cancel();
        self.session = CancellationToken::new();
        self.generation += 1;

        let station = station_id.as_deref().and_then(|id| self.stations.station(id));
        if station_id.is_some() && station.is_none() {
            warn!("[pipeline] unknown station {:?}", station_id);
        }
        info!(
            "[pipeline] session {} for {:?}",
            self.generation,
            station.as_ref().map(|s| s.id.as_str())
        );
        let id = station.as_ref().map(|s| s.id.clone());
        self.reconciler.change_station(station);
        self.poller.start_polling(id.as_deref());
    }

    async fn complete(&mut self, done: Completion) {
        match done {
            Completion::Refined {
                generation,
                request,
                result,
            } => {
                if generation != self.generation {
                    debug!("[pipeline] discarding stale lookup for {} - {}", request.artist, request.title);
                    return;
                }
                self.apply(Update::Refined { request, result }).await;
            }
            Completion::Artwork {
                generation,
                emission,
                artwork,
            } => {
                if generation != self.generation {
                    debug!("[pipeline] discarding stale artwork {:?}", emission.record.artwork_url);
                    return;
                }
                self.publish(emission, artwork).await;
            }
        }
    }

    async fn apply(&mut self, update: Update) {
        match self.reconciler.handle(update) {
            None => {}
            Some(Action::Refine(request)) => self.dispatch_refine(request).await,
            Some(Action::Emit(emission)) => self.dispatch_artwork(emission).await,
        }
    }

    async fn dispatch_refine(&mut self, request: RefineRequest) {
        let Some(refiner) = self.refiner.clone() else {
            // lookups disabled: publish the unrefined text straight away
            self.dispatch_artwork(request.fallback).await;
            return;
        };
        debug!("[pipeline] looking up {} - {}", request.artist, request.title);

        let generation = self.generation;
        let token = self.session.clone();
        let done = self.done_tx.clone();
        tokio::spawn(async move {
            let result = tokio::select! {
                _ = token.cancelled() => return,
                result = refiner.refine(&request.artist, &request.title, MetadataKind::Song) => result,
            };
            let _ = done
                .send(Completion::Refined {
                    generation,
                    request,
                    result,
                })
                .await;
        });
    }

    async fn dispatch_artwork(&mut self, emission: Emission) {
        let Some(reference) = emission.record.artwork_url.clone() else {
            self.publish(emission, None).await;
            return;
        };

        let loader = Arc::clone(&self.artwork);
        let generation = self.generation;
        let token = self.session.clone();
        let done = self.done_tx.clone();
        tokio::spawn(async move {
            let artwork = tokio::select! {
                _ = token.cancelled() => return,
                artwork = loader.load(&reference) => artwork,
            };
            let _ = done
                .send(Completion::Artwork {
                    generation,
                    emission,
                    artwork,
                })
                .await;
        });
    }

    async fn publish(&mut self, emission: Emission, artwork: Option<Artwork>) {
        let Some(station_id) = self.reconciler.station_id().map(str::to_string) else {
            return;
        };
        let mut record = emission.record;
        if artwork.is_some() {
            // bytes take priority; the reference is only kept for text-only emissions
            record.artwork_url = None;
        }
        info!(
            "[pipeline] now playing on {}: {:?} - {:?} ({:?})",
            station_id, record.artist, record.title, record.kind
        );
        let now_playing = NowPlaying {
            station_id,
            is_song_artwork: emission.is_song_artwork && artwork.is_some(),
            record,
            artwork,
            session: self.playback_session,
        };
        if self.output.send(now_playing).await.is_err() {
            warn!("[pipeline] now-playing receiver dropped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use onair_proto::protocol::Station;
    use onair_proto::state::StateManager;
    use tokio::sync::Notify;

    /// Lookup that blocks until released, then returns a cover.
    struct GatedLookup {
        gate: Arc<Notify>,
    }

    #[async_trait]
    impl RecordingLookup for GatedLookup {
        async fn refine(&self, artist: &str, title: &str, _kind: MetadataKind) -> Option<MetadataRecord> {
            self.gate.notified().await;
            Some(MetadataRecord::song(artist, title).with_artwork("mem://cover"))
        }
    }

    struct MemoryArtwork;

    #[async_trait]
    impl ArtworkLoader for MemoryArtwork {
        async fn load(&self, reference: &str) -> Option<Artwork> {
            (reference == "mem://cover").then(|| Artwork {
                content_type: "image/jpeg".into(),
                bytes: vec![0xff, 0xd8],
            })
        }
    }

    fn stations() -> Vec<Station> {
        ["fip", "nova"]
            .iter()
            .map(|id| Station {
                id: id.to_string(),
                name: id.to_uppercase(),
                url: format!("http://example.org/{}", id),
                artwork: "mem://logo".into(),
                ..Station::default()
            })
            .collect()
    }

    fn spawn_pipeline(
        refiner: Option<Arc<dyn RecordingLookup>>,
    ) -> (PipelineHandle, mpsc::Receiver<NowPlaying>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let repo = Arc::new(StateManager::new(dir.path().join("state.json"), stations()));
        let (out_tx, out_rx) = mpsc::channel(16);
        let (handle, _task) = MetadataPipeline::spawn(
            repo,
            Arc::new(ProviderRegistry::new()),
            refiner,
            Arc::new(MemoryArtwork),
            Duration::from_secs(5),
            out_tx,
        );
        (handle, out_rx, dir)
    }

    async fn next(rx: &mut mpsc::Receiver<NowPlaying>) -> NowPlaying {
        tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("no emission")
            .expect("pipeline gone")
    }

    #[tokio::test]
    async fn test_refined_song_published_with_cover_bytes() {
        let gate = Arc::new(Notify::new());
        let (handle, mut rx, _dir) = spawn_pipeline(Some(Arc::new(GatedLookup { gate: gate.clone() })));

        handle.station_changed(Some("fip".into()), 1).await;
        handle.raw_metadata(Some("Air - La femme d'argent".into()), None).await;
        gate.notify_one();

        let np = next(&mut rx).await;
        assert_eq!(np.station_id, "fip");
        assert_eq!(np.record.artist.as_deref(), Some("Air"));
        assert_eq!(np.artwork.unwrap().bytes, vec![0xff, 0xd8]);
        assert!(np.record.artwork_url.is_none());
        assert!(np.is_song_artwork);
    }

    #[tokio::test]
    async fn test_lookup_for_superseded_station_is_discarded() {
        let gate = Arc::new(Notify::new());
        let (handle, mut rx, _dir) = spawn_pipeline(Some(Arc::new(GatedLookup { gate: gate.clone() })));

        handle.station_changed(Some("fip".into()), 1).await;
        handle.raw_metadata(Some("Air - La femme d'argent".into()), None).await;
        handle.station_changed(Some("nova".into()), 2).await;
        handle.raw_metadata(Some("Nova la nuit".into()), None).await;
        gate.notify_waiters();

        // the station logo cannot be loaded from memory: text-only emission
        let np = next(&mut rx).await;
        assert_eq!(np.station_id, "nova");
        assert_eq!(np.session, 2);
        assert_eq!(np.record.title.as_deref(), Some("Nova la nuit"));
        assert_eq!(np.record.artwork_url.as_deref(), Some("mem://logo"));
        assert!(np.artwork.is_none());
        assert!(!np.is_song_artwork);

        assert!(tokio::time::timeout(Duration::from_millis(200), rx.recv())
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_refinement_disabled_publishes_text() {
        let (handle, mut rx, _dir) = spawn_pipeline(None);
        handle.station_changed(Some("fip".into()), 1).await;
        handle.raw_metadata(Some("Air - Playground Love".into()), None).await;

        let np = next(&mut rx).await;
        assert_eq!(np.record.artist.as_deref(), Some("Air"));
        assert_eq!(np.record.kind, MetadataKind::Song);
    }

    #[tokio::test]
    async fn test_stopped_pipeline_ignores_tags() {
        let (handle, mut rx, _dir) = spawn_pipeline(None);
        handle.station_changed(Some("fip".into()), 1).await;
        handle.station_changed(None, 2).await;
        handle.raw_metadata(Some("Air - Playground Love".into()), None).await;
        assert!(tokio::time::timeout(Duration::from_millis(200), rx.recv())
            .await
            .is_err());
    }
}
