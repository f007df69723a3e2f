mod core;
mod http;
mod mpv;
mod retry;

use std::sync::Arc;
use std::time::Duration;

use onair_metadata::artwork::HttpArtworkLoader;
use onair_metadata::refine::{MusicBrainzRefiner, RecordingLookup};
use onair_metadata::{transport, MetadataPipeline, PlaybackReporter, ProviderRegistry};
use onair_proto::config::Config;
use onair_proto::protocol::{NowPlaying, PlaybackError};
use onair_proto::state::StateManager;
use serde::Serialize;
use tokio::sync::{broadcast, mpsc};
use tracing::{error, info};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Everything pushed to event-stream subscribers.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "data")]
pub enum BroadcastMessage {
    StateUpdated,
    NowPlaying(NowPlaying),
    PlaybackError(PlaybackError),
    Log(String),
}

/// A custom tracing layer that forwards log messages to the broadcast channel
struct BroadcastLayer {
    sender: broadcast::Sender<BroadcastMessage>,
}

impl BroadcastLayer {
    fn new(sender: broadcast::Sender<BroadcastMessage>) -> Self {
        Self { sender }
    }
}

impl<S> tracing_subscriber::Layer<S> for BroadcastLayer
where
    S: tracing::Subscriber,
{
    fn on_event(&self, event: &tracing::Event<'_>, _ctx: tracing_subscriber::layer::Context<'_, S>) {
        // Only WARN and ERROR, to avoid clogging the channel
        let level = event.metadata().level();
        if !matches!(*level, tracing::Level::WARN | tracing::Level::ERROR) {
            return;
        }

        let now = chrono::Local::now();
        let mut message = format!("{} [{}] ", now.format("%H:%M:%S"), level);
        let mut visitor = MessageVisitor(&mut message);
        event.record(&mut visitor);

        // no receivers is OK
        let _ = self.sender.send(BroadcastMessage::Log(message));
    }
}

struct MessageVisitor<'a>(&'a mut String);

impl<'a> tracing::field::Visit for MessageVisitor<'a> {
    fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            self.0.push_str(&format!("{:?}", value));
        } else {
            self.0.push_str(&format!(" {}={:?}", field.name(), value));
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Setup broadcast channel first so we can use it for logging
    let (broadcast_tx, _) = broadcast::channel::<BroadcastMessage>(100);

    let data_dir = onair_proto::platform::data_dir();
    std::fs::create_dir_all(&data_dir)?;
    let log_path = data_dir.join("daemon.log");

    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)?;

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_writer(log_file)
        .with_ansi(false);

    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(BroadcastLayer::new(broadcast_tx.clone()))
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                tracing_subscriber::EnvFilter::new("info,onair_daemon=debug,onair_metadata=debug")
            }),
        )
        .init();

    info!("Log file: {:?}", log_path);

    let config = Config::load()?;
    info!("Config loaded from: {:?}", Config::config_path());

    let stations = core::load_stations(&config);
    let state_manager = Arc::new(StateManager::new(
        config.daemon.state_file.clone(),
        stations,
    ));

    // Metadata pipeline: providers, optional MusicBrainz lookups, artwork
    let client = transport::build_client(&config.metadata)?;
    let registry = Arc::new(ProviderRegistry::with_defaults(
        client.clone(),
        &config.metadata,
    ));
    let refiner: Option<Arc<dyn RecordingLookup>> = if config.metadata.refine {
        Some(Arc::new(MusicBrainzRefiner::new(client.clone(), &config.metadata)))
    } else {
        info!("Recording lookups disabled");
        None
    };
    let reporter = PlaybackReporter::new(client.clone(), &config.metadata, env!("CARGO_PKG_VERSION"));
    let (now_playing_tx, mut now_playing_rx) = mpsc::channel::<NowPlaying>(32);
    let (pipeline, pipeline_task) = MetadataPipeline::spawn(
        state_manager.clone(),
        registry,
        refiner,
        Arc::new(HttpArtworkLoader::new(client.clone())),
        Duration::from_secs(config.metadata.poll_interval_secs),
        now_playing_tx,
    );

    // Event channel: all external inputs funnel into DaemonCore
    let (event_tx, event_rx) = mpsc::channel::<core::DaemonEvent>(256);

    let forward_tx = event_tx.clone();
    tokio::spawn(async move {
        while let Some(now_playing) = now_playing_rx.recv().await {
            if forward_tx
                .send(core::DaemonEvent::NowPlaying(now_playing))
                .await
                .is_err()
            {
                break;
            }
        }
    });

    let daemon_core = core::DaemonCore::new(
        &config,
        state_manager.clone(),
        pipeline,
        broadcast_tx.clone(),
        event_tx.clone(),
    )
    .await;

    if config.http.enabled {
        let _http_handle = http::start_server(
            config.http.bind_address.clone(),
            config.http.port,
            http::HttpState {
                state_manager: state_manager.clone(),
                event_tx: event_tx.clone(),
                broadcast_tx: broadcast_tx.clone(),
                reporter,
            },
        );
    }

    let signal_tx = event_tx.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Interrupt received");
                let _ = signal_tx.send(core::DaemonEvent::Shutdown).await;
            }
            Err(e) => error!("Failed to listen for ctrl-c: {}", e),
        }
    });
    drop(event_tx);

    info!("Daemon initialised, running event loop");
    daemon_core.run(event_rx).await?;

    // core dropped its pipeline handle; the actor drains and exits
    if let Err(e) = pipeline_task.await {
        error!("Metadata pipeline task failed: {}", e);
    }
    info!("Daemon stopped");
    Ok(())
}
